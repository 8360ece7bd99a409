//! Discovery artifacts: PID, port and certificate files for peers.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use webverse_core::discovery::{cert_file_name, PID_FILE, PORT_FILE};
use webverse_core::WebVerseResult;

/// Paths of the discovery files written for one daemon run.
#[derive(Debug, Clone)]
pub struct DiscoveryFiles {
    pub pid_path: PathBuf,
    pub port_path: PathBuf,
    pub cert_path: PathBuf,
}

impl DiscoveryFiles {
    /// Write the PID, port and certificate files into `dir`.
    pub fn write(dir: &Path, pid: u32, port: u16, cert_pem: &str) -> WebVerseResult<Self> {
        std::fs::create_dir_all(dir)?;

        let files = Self {
            pid_path: dir.join(PID_FILE),
            port_path: dir.join(PORT_FILE),
            cert_path: dir.join(cert_file_name(port)),
        };

        std::fs::write(&files.pid_path, pid.to_string())?;
        std::fs::write(&files.port_path, port.to_string())?;
        std::fs::write(&files.cert_path, cert_pem)?;

        info!(
            dir = %dir.display(),
            pid,
            port,
            "wrote discovery files"
        );

        Ok(files)
    }

    /// Remove the files again (best effort).
    pub fn remove(&self) {
        for path in [&self.pid_path, &self.port_path, &self.cert_path] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed discovery file"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove discovery file"),
            }
        }
    }
}
