//! Error types for the SMTP server

use crate::smtp::response::SmtpResponse;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported command")]
    InvalidCommand,

    #[error("Bad sequence of commands: {0}")]
    InvalidState(&'static str),

    #[error("Syntax error: {0}")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} bytes)")]
    LineTooLong { max: usize },

    #[error("Connection closed by peer")]
    ConnectionClosed,
}

/// Line limits enforced while reading from a client
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a single line, terminator excluded.
    /// Longer lines are a transport failure and close the connection.
    pub const LINE_MAX_LENGTH: usize = 4096;
}

impl SmtpError {
    /// Maps SMTP errors to response codes. Transport errors have no reply code.
    pub fn to_response_code(&self) -> Option<u16> {
        match self {
            SmtpError::InvalidCommand => Some(502),
            SmtpError::InvalidState(_) => Some(503),
            SmtpError::InvalidSyntax(_) => Some(501),
            _ => None,
        }
    }

    /// Builds the reply sent to the client for a recoverable error
    pub fn to_response(&self) -> Option<SmtpResponse> {
        let code = self.to_response_code()?;
        let message = match self {
            SmtpError::InvalidCommand => "unsupported command".to_string(),
            SmtpError::InvalidState(msg) => (*msg).to_string(),
            SmtpError::InvalidSyntax(msg) => msg.clone(),
            _ => return None,
        };
        Some(SmtpResponse::new(code, message))
    }
}
