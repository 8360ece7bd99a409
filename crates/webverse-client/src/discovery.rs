//! Locate a running daemon from the files it leaves in its discovery directory.

use std::path::{Path, PathBuf};
use webverse_core::discovery::{cert_file_name, PID_FILE, PORT_FILE};
use webverse_core::{WebVerseError, WebVerseResult};

/// What a daemon published about itself.
#[derive(Debug, Clone)]
pub struct DaemonInfo {
    pub pid: u32,
    pub port: u16,
    /// PEM certificate the daemon serves.
    pub cert_pem: String,
    pub cert_path: PathBuf,
}

impl DaemonInfo {
    /// Read the PID, port and certificate files from `dir`.
    pub fn discover(dir: &Path) -> WebVerseResult<Self> {
        let pid = read_number(&dir.join(PID_FILE))?;
        let port = read_number(&dir.join(PORT_FILE))?;
        let cert_path = dir.join(cert_file_name(port));
        let cert_pem = std::fs::read_to_string(&cert_path)?;

        Ok(Self {
            pid,
            port,
            cert_pem,
            cert_path,
        })
    }

    /// Secure WebSocket URL of the daemon on this host.
    pub fn url(&self) -> String {
        format!("wss://localhost:{}", self.port)
    }
}

fn read_number<T>(path: &Path) -> WebVerseResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let text = std::fs::read_to_string(path)?;
    text.trim().parse().map_err(|e| {
        WebVerseError::Config(format!("invalid contents in {}: {e}", path.display()))
    })
}
