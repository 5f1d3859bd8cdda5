//! Per-connection protocol engine

use crate::smtp::address::AddressValidator;
use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::config::Config;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::message::Message;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{DataLine, SmtpSession};

use std::io::{self, BufRead, BufReader, Cursor, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::mpsc::SyncSender;
use std::time::Instant;

/// Buffered input whose blocking reads can be bounded by a deadline
pub trait LineReader: BufRead {
    /// Bound every read from now on by `deadline`; `None` removes the bound
    fn set_deadline(&mut self, deadline: Option<Instant>);
}

/// In-memory input never blocks.
impl<T: AsRef<[u8]>> LineReader for Cursor<T> {
    fn set_deadline(&mut self, _deadline: Option<Instant>) {}
}

impl LineReader for BufReader<TimedStream<'_>> {
    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.get_mut().deadline = deadline;
    }
}

/// Socket reader that lowers the socket timeout to the time left until its
/// deadline before every read
#[derive(Debug)]
pub struct TimedStream<'a> {
    stream: &'a TcpStream,
    deadline: Option<Instant>,
}

impl<'a> TimedStream<'a> {
    pub fn new(stream: &'a TcpStream) -> Self {
        Self {
            stream,
            deadline: None,
        }
    }
}

impl Read for TimedStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(io::Error::new(ErrorKind::TimedOut, "read deadline passed"));
                }
                Some(remaining)
            }
            None => None,
        };
        self.stream.set_read_timeout(timeout)?;
        self.stream.read(buf)
    }
}

/// Sending half of the message hand-off
#[derive(Debug, Clone)]
pub struct MessageSink {
    sender: SyncSender<Message>,
}

impl MessageSink {
    pub fn new(sender: SyncSender<Message>) -> Self {
        Self { sender }
    }

    /// Blocks until a consumer takes the message.
    /// Fails only when every receiver is gone.
    pub fn deliver(&self, message: Message) -> Result<(), Message> {
        self.sender.send(message).map_err(|error| error.0)
    }
}

/// Drives one connection: greeting, command loop, body collection
pub struct ProtocolEngine<R, W> {
    reader: R,
    writer: W,
    config: Arc<Config>,
    validator: Arc<dyn AddressValidator>,
    sink: MessageSink,
}

impl<R: LineReader, W: Write> ProtocolEngine<R, W> {
    pub fn new(
        reader: R,
        writer: W,
        config: Arc<Config>,
        validator: Arc<dyn AddressValidator>,
        sink: MessageSink,
    ) -> Self {
        Self {
            reader,
            writer,
            config,
            validator,
            sink,
        }
    }

    /// Run until QUIT (`Ok`) or a transport failure (`Err`). No reply is
    /// sent for a transport failure. The engine, including its sink handle,
    /// is consumed.
    pub fn run(mut self) -> Result<(), SmtpError> {
        self.send_response(&SmtpResponse::greeting(&self.config.banner))?;

        let config = Arc::clone(&self.config);
        let validator = Arc::clone(&self.validator);
        let handler = SmtpCommandHandler::new(&config.banner, validator.as_ref());
        let mut session = SmtpSession::new();

        loop {
            let line = self.read_line()?;

            session = match session {
                data @ SmtpSession::Data { .. } => match data.push_data_line(line) {
                    DataLine::Collected(session) => session,
                    DataLine::Complete(session, message) => {
                        self.hand_off(message);
                        self.send_response(&SmtpResponse::queued())?;
                        session
                    }
                },
                session => {
                    let line = String::from_utf8_lossy(&line);
                    let (session, response) = handler.process_command(&line, session);
                    self.send_response(&response)?;
                    session
                }
            };

            if session.is_closed() {
                return Ok(());
            }
        }
    }

    fn hand_off(&self, message: Message) {
        tracing::debug!(
            from = %message.from,
            recipients = message.to.len(),
            size = message.body_size(),
            "Message complete."
        );

        // Nobody left to receive; the client still gets its 250.
        if let Err(message) = self.sink.deliver(message) {
            tracing::warn!(from = %message.from, "Message sink closed, message dropped.");
        }
    }

    /// Read one raw line, terminator stripped. EOF, I/O errors, an expired
    /// read timeout and over-long lines end the connection.
    fn read_line(&mut self) -> Result<Vec<u8>, SmtpError> {
        let limit = SmtpLimits::LINE_MAX_LENGTH as u64 + 2;
        let mut buffer = Vec::new();

        // The timeout covers the whole line, however it is split across reads.
        let deadline = self
            .config
            .socket_read_timeout()
            .map(|timeout| Instant::now() + timeout);
        self.reader.set_deadline(deadline);

        let read = (&mut self.reader).take(limit).read_until(b'\n', &mut buffer)?;
        if read == 0 {
            return Err(SmtpError::ConnectionClosed);
        }

        if buffer.last() == Some(&b'\n') {
            buffer.pop();
            if buffer.last() == Some(&b'\r') {
                buffer.pop();
            }
        } else if read as u64 == limit {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::LINE_MAX_LENGTH,
            });
        }

        if buffer.len() > SmtpLimits::LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::LINE_MAX_LENGTH,
            });
        }

        Ok(buffer)
    }

    /// Send a reply to the client
    fn send_response(&mut self, response: &SmtpResponse) -> Result<(), SmtpError> {
        self.writer.write_all(response.format().as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}
