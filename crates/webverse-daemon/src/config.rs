//! Daemon configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use webverse_core::{WebVerseError, WebVerseResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
}

/// `[daemon]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// 0 lets the OS pick a free port.
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_discovery_dir")]
    pub discovery_dir: String,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Empty string disables the log file.
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: 0,
            discovery_dir: default_discovery_dir(),
            hostname: None,
            log_file: default_log_file(),
        }
    }
}

/// `[heartbeat]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_increment")]
    pub increment: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            increment: default_increment(),
            timeout: default_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_discovery_dir() -> String {
    ".".to_string()
}
fn default_log_file() -> String {
    "daemon.log".to_string()
}
fn default_interval_secs() -> u64 {
    5
}
fn default_increment() -> u64 {
    5
}
fn default_timeout() -> u64 {
    30
}

/// Heartbeat accounting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Seconds between ticks.
    pub interval_secs: u64,
    /// Age added to every tracked counter per tick.
    pub increment: u64,
    /// A counter strictly above this evicts its client.
    pub timeout: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        HeartbeatSection::default().into()
    }
}

impl From<HeartbeatSection> for HeartbeatSettings {
    fn from(s: HeartbeatSection) -> Self {
        Self {
            interval_secs: s.interval_secs,
            increment: s.increment,
            timeout: s.timeout,
        }
    }
}

/// Resolved daemon configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub discovery_dir: PathBuf,
    pub hostname: String,
    pub log_file: Option<PathBuf>,
    pub heartbeat: HeartbeatSettings,
}

/// CLI values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub discovery_dir: Option<String>,
}

impl DaemonConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> WebVerseResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, cli)
    }

    /// Merge a parsed config file with CLI overrides.
    pub fn resolve(file_config: ConfigFile, cli: &CliOverrides) -> WebVerseResult<Self> {
        let bind_str = cli.bind.clone().unwrap_or(file_config.daemon.bind);
        let bind: IpAddr = bind_str
            .parse()
            .map_err(|e| WebVerseError::Config(format!("invalid bind address {bind_str}: {e}")))?;

        let heartbeat: HeartbeatSettings = file_config.heartbeat.into();
        if heartbeat.interval_secs == 0 {
            return Err(WebVerseError::Config(
                "heartbeat.interval_secs must be greater than zero".into(),
            ));
        }

        let discovery_dir = cli
            .discovery_dir
            .clone()
            .unwrap_or(file_config.daemon.discovery_dir);

        let hostname = file_config
            .daemon
            .hostname
            .filter(|h| !h.is_empty())
            .unwrap_or_else(local_hostname);

        let log_file = if file_config.daemon.log_file.is_empty() {
            None
        } else {
            Some(expand_tilde_str(&file_config.daemon.log_file))
        };

        Ok(Self {
            bind,
            port: cli.port.unwrap_or(file_config.daemon.port),
            discovery_dir: expand_tilde_str(&discovery_dir),
            hostname,
            log_file,
            heartbeat,
        })
    }
}

/// Parse config TOML text.
pub fn parse(content: &str) -> WebVerseResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| WebVerseError::Config(format!("config parse error: {e}")))
}

/// Name of this machine: `/etc/hostname`, then `$HOSTNAME`, then `localhost`.
fn local_hostname() -> String {
    first_hostname([
        std::fs::read_to_string("/etc/hostname").ok(),
        std::env::var("HOSTNAME").ok(),
    ])
}

fn first_hostname<I>(candidates: I) -> String
where
    I: IntoIterator<Item = Option<String>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(|h| h.trim().to_string())
        .find(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
