//! Message data structures and functionality

use lettre::Address;
use std::time::SystemTime;

/// A message accepted by the server, handed to the sink after DATA completes
#[derive(Debug, Clone)]
pub struct Message {
    /// The sender's address from MAIL FROM
    pub from: Address,

    /// Recipient addresses from RCPT TO, in the order they were given
    pub to: Vec<Address>,

    /// The content lines joined by CRLF, terminator line excluded.
    /// Kept as received; 8-bit content need not be UTF-8.
    pub body: Vec<u8>,

    /// When the message was completed by the server
    pub received_at: SystemTime,
}

impl Message {
    /// Create a new message from a completed transaction
    pub fn new(from: Address, to: Vec<Address>, lines: &[Vec<u8>]) -> Self {
        Self {
            from,
            to,
            body: lines.join(&b"\r\n"[..]),
            received_at: SystemTime::now(),
        }
    }

    /// Check if this message was sent to a specific recipient
    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.to
            .iter()
            .any(|addr| AsRef::<str>::as_ref(addr) == recipient)
    }

    /// Check if this message was sent from a specific sender
    pub fn is_from_sender(&self, sender: &str) -> bool {
        AsRef::<str>::as_ref(&self.from) == sender
    }

    /// Get the size of the body in bytes
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    /// The body as text, if it is valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Get the subject line from the headers (if present and UTF-8)
    pub fn subject(&self) -> Option<&str> {
        for line in self.body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                // End of headers
                break;
            }
            let Ok(line) = std::str::from_utf8(line) else {
                continue;
            };
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("subject") {
                    return Some(value.trim_start());
                }
            }
        }
        None
    }
}

impl PartialEq for Message {
    /// Two messages are equal when their envelope and body match;
    /// the reception time is not compared.
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to && self.body == other.body
    }
}

impl Eq for Message {}
