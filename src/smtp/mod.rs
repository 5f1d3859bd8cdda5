//! SMTP server implementation

pub mod address;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod registry;
pub mod response;
pub mod server;
pub mod session;

pub use address::{AddressValidator, MailboxValidator};
pub use commands::{Command, SmtpCommandHandler};
pub use config::Config;
pub use engine::{LineReader, MessageSink, ProtocolEngine, TimedStream};
pub use error::{SmtpError, SmtpLimits};
pub use message::Message;
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{DataLine, Envelope, SmtpSession, SmtpState};
