//! Server configuration

use std::time::Duration;

/// Configuration shared read-only by every connection of one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address to listen on for new connections
    pub listen_addr: String,
    /// Banner shown in the greeting and echoed in the HELO reply
    pub banner: String,
    /// Maximum time to receive one command or body line. Zero disables the
    /// timeout.
    pub read_timeout: Duration,
}

impl Config {
    /// Create a configuration with the default banner and no read timeout
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Time allowed for reading one whole line, `None` when disabled
    pub fn socket_read_timeout(&self) -> Option<Duration> {
        if self.read_timeout.is_zero() {
            None
        } else {
            Some(self.read_timeout)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:2525".to_string(),
            banner: "mailsink.local".to_string(),
            read_timeout: Duration::ZERO,
        }
    }
}
