//! SMTP reply handling

/// Name announced in the greeting after the banner
pub const IMPLEMENTATION_ID: &str = env!("CARGO_PKG_NAME");

/// Represents an SMTP reply that can be sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// The three digit reply code (e.g. 250, 354, 503)
    pub code: u16,
    /// The human-readable text
    pub message: String,
}

impl SmtpResponse {
    /// Create a new SMTP reply
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a success reply (250 ok)
    pub fn ok() -> Self {
        Self::new(250, "ok")
    }

    /// Create the greeting sent when a connection opens (220)
    pub fn greeting(banner: &str) -> Self {
        Self::new(220, format!("{banner} [{IMPLEMENTATION_ID}]"))
    }

    /// Create a HELO/EHLO reply (250), echoing the banner
    pub fn helo(banner: &str) -> Self {
        Self::new(250, banner)
    }

    /// Create a DATA intermediate reply (354)
    pub fn data_start() -> Self {
        Self::new(354, "continue until \\r\\n.\\r\\n")
    }

    /// Create the reply sent once a message reached the sink (250)
    pub fn queued() -> Self {
        Self::new(250, "message queued for delivery")
    }

    /// Create a QUIT reply (221)
    pub fn quit() -> Self {
        Self::new(221, "bye")
    }

    /// Format the reply for sending over the wire
    pub fn format(&self) -> String {
        format!("{} {}\r\n", self.code, self.message)
    }
}
