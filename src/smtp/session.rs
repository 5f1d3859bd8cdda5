//! SMTP session state management
//!
//! A session is a value owned by its connection. Every transition takes the
//! current session by value and returns the next one, so an invalid
//! transition can only leave the state untouched by handing it back.

use crate::smtp::message::Message;

use lettre::Address;

/// Label of the current protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// No sender yet - waiting for MAIL
    Idle,
    /// MAIL FROM received - accepting RCPT commands and DATA
    MailReceived,
    /// DATA accepted - collecting body lines
    DataMode,
    /// QUIT processed - no further input is read
    Closed,
}

/// Sender and recipients of the transaction in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: Address,
    pub recipients: Vec<Address>,
}

impl Envelope {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            recipients: Vec::new(),
        }
    }
}

/// Per-connection protocol state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SmtpSession {
    #[default]
    Idle,
    Mail(Envelope),
    Data {
        envelope: Envelope,
        lines: Vec<Vec<u8>>,
    },
    Closed,
}

/// Result of feeding one line to a session in data mode
#[derive(Debug)]
pub enum DataLine {
    /// The line was part of the body
    Collected(SmtpSession),
    /// The terminator was seen; the session is back to idle
    Complete(SmtpSession, Message),
}

impl SmtpSession {
    /// Create a new SMTP session
    pub fn new() -> Self {
        Self::Idle
    }

    pub fn state(&self) -> SmtpState {
        match self {
            Self::Idle => SmtpState::Idle,
            Self::Mail(_) => SmtpState::MailReceived,
            Self::Data { .. } => SmtpState::DataMode,
            Self::Closed => SmtpState::Closed,
        }
    }

    pub fn sender(&self) -> Option<&Address> {
        match self {
            Self::Mail(envelope) | Self::Data { envelope, .. } => Some(&envelope.sender),
            Self::Idle | Self::Closed => None,
        }
    }

    pub fn recipients(&self) -> &[Address] {
        match self {
            Self::Mail(envelope) | Self::Data { envelope, .. } => &envelope.recipients,
            Self::Idle | Self::Closed => &[],
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Start a transaction. Only an idle session accepts a sender.
    pub fn with_sender(self, sender: Address) -> Result<Self, Self> {
        match self {
            Self::Idle => Ok(Self::Mail(Envelope::new(sender))),
            other => Err(other),
        }
    }

    /// Append a recipient. Requires a sender.
    pub fn with_recipient(self, recipient: Address) -> Result<Self, Self> {
        match self {
            Self::Mail(mut envelope) => {
                envelope.recipients.push(recipient);
                Ok(Self::Mail(envelope))
            }
            other => Err(other),
        }
    }

    /// Enter data mode. Requires at least one recipient.
    pub fn start_data(self) -> Result<Self, Self> {
        match self {
            Self::Mail(envelope) if !envelope.recipients.is_empty() => Ok(Self::Data {
                envelope,
                lines: Vec::new(),
            }),
            other => Err(other),
        }
    }

    /// Feed one raw body line. A line consisting only of "." ends the body;
    /// other lines, including ones starting with ".", are kept verbatim.
    pub fn push_data_line(self, line: Vec<u8>) -> DataLine {
        match self {
            Self::Data {
                envelope,
                mut lines,
            } => {
                if line == b"." {
                    let message = Message::new(envelope.sender, envelope.recipients, &lines);
                    DataLine::Complete(Self::Idle, message)
                } else {
                    lines.push(line);
                    DataLine::Collected(Self::Data { envelope, lines })
                }
            }
            other => DataLine::Collected(other),
        }
    }
}
