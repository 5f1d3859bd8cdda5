//! # mailsink
//!
//! mailsink is a minimal SMTP submission endpoint.
//!
//! It accepts client connections, checks each session against the core
//! RFC 5321 command sequence and hands every completed message to a channel.
//! What happens to a message afterwards is up to the consumer.
//!
//! ## Quick Start
//!
//! ```rust
//! use mailsink::{Config, SmtpServer};
//! use std::thread;
//! use std::time::Duration;
//!
//! let config = Config::new("127.0.0.1:0")
//!     .with_banner("test.local")
//!     .with_read_timeout(Duration::from_secs(30));
//! let (server, messages) = SmtpServer::bind(config).unwrap();
//!
//! let consumer = thread::spawn(move || {
//!     for message in messages {
//!         println!("Received message from: {}", message.from);
//!     }
//! });
//!
//! // Clients connect to server.local_addr()
//! // ...
//!
//! server.close(true);
//! consumer.join().unwrap();
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client (no extensions are advertised)
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify the destination (multiple destinations are supported)
//! - `DATA` - Send the message body
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! ## Notes
//!
//! - Lines starting with a dot inside `DATA` are kept as sent; only a line
//!   consisting of a single `.` ends the body.
//! - Message bodies are raw bytes; 8-bit content is passed through unchanged.
//! - The read timeout bounds each whole line, not each socket read.
//! - A recipient the address parser rejects is answered with 501 and is not
//!   added to the transaction.
//! - No authentication, TLS, pipelining or size limits.
//!
//! ## Message Handling
//!
//! Messages are handed over a rendezvous channel: the connection that
//! completed a message waits until the consumer receives it. The channel is
//! closed by [`SmtpServer::close`] once every connection has ended.

mod smtp;

pub use smtp::{
    AddressValidator, Command, Config, DataLine, Envelope, LineReader, MailboxValidator, Message,
    MessageSink, ProtocolEngine, SmtpCommandHandler, SmtpError, SmtpLimits, SmtpResponse,
    SmtpServer, SmtpSession, SmtpState, TimedStream,
};
