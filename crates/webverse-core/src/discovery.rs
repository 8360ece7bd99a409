//! Names of the files the daemon writes so peers can find and trust it.

/// File holding the daemon's process ID.
pub const PID_FILE: &str = ".webverse-daemon-pid.dat";

/// File holding the port the daemon listens on.
pub const PORT_FILE: &str = ".webverse-daemon-port.dat";

/// Name of the PEM certificate file for a daemon listening on `port`.
pub fn cert_file_name(port: u16) -> String {
    format!(".webverse-daemon-connection-{port}.cert")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_name_embeds_port() {
        assert_eq!(cert_file_name(49152), ".webverse-daemon-connection-49152.cert");
    }
}
