//! SMTP server implementation

use crate::smtp::address::{AddressValidator, MailboxValidator};
use crate::smtp::config::Config;
use crate::smtp::engine::{MessageSink, ProtocolEngine, TimedStream};
use crate::smtp::error::SmtpError;
use crate::smtp::message::Message;
use crate::smtp::registry::{ConnectionHandle, ConnectionId, Registry};

use std::io::{BufReader, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// SMTP server that runs one thread per connection and hands every accepted
/// message to a rendezvous channel
///
/// The receiver returned by [`SmtpServer::bind`] must be drained: a
/// connection that completed a message waits until it is received.
#[derive(Debug)]
pub struct SmtpServer {
    config: Arc<Config>,
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    closing: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    coordinator: Option<JoinHandle<()>>,
    sink: Option<MessageSink>,
}

/// State moved into the accept thread
struct Acceptor {
    listener: TcpListener,
    config: Arc<Config>,
    validator: Arc<dyn AddressValidator>,
    sink: MessageSink,
    registry: Arc<Registry>,
    closing: Arc<AtomicBool>,
    finished: mpsc::Sender<ConnectionId>,
    next_id: ConnectionId,
}

impl SmtpServer {
    /// Bind `config.listen_addr` and start accepting connections
    pub fn bind(config: Config) -> Result<(Self, mpsc::Receiver<Message>), SmtpError> {
        Self::bind_with_validator(config, Arc::new(MailboxValidator))
    }

    /// Like [`SmtpServer::bind`], with a custom address validator
    pub fn bind_with_validator(
        config: Config,
        validator: Arc<dyn AddressValidator>,
    ) -> Result<(Self, mpsc::Receiver<Message>), SmtpError> {
        let listener = TcpListener::bind(&config.listen_addr).map_err(|source| SmtpError::Bind {
            addr: config.listen_addr.clone(),
            source,
        })?;
        Self::with_listener(listener, config, validator)
    }

    /// Start the server on an existing listener. `config.listen_addr` is
    /// informational only.
    pub fn with_listener(
        listener: TcpListener,
        config: Config,
        validator: Arc<dyn AddressValidator>,
    ) -> Result<(Self, mpsc::Receiver<Message>), SmtpError> {
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let closing = Arc::new(AtomicBool::new(false));
        let (message_tx, message_rx) = mpsc::sync_channel(0);
        let (finished_tx, finished_rx) = mpsc::channel();
        let sink = MessageSink::new(message_tx);

        let coordinator = {
            let registry = Arc::clone(&registry);
            thread::Builder::new()
                .name("smtp-coordinator".to_string())
                .spawn(move || {
                    for id in finished_rx {
                        if let Some(handle) = registry.remove(id) {
                            tracing::debug!(id, peer = ?handle.peer(), "Connection deregistered.");
                        }
                    }
                })?
        };

        let acceptor = Acceptor {
            listener,
            config: Arc::clone(&config),
            validator,
            sink: sink.clone(),
            registry: Arc::clone(&registry),
            closing: Arc::clone(&closing),
            finished: finished_tx,
            next_id: 0,
        };
        let accept_thread = thread::Builder::new()
            .name("smtp-accept".to_string())
            .spawn(move || acceptor.run())?;

        tracing::info!(%local_addr, banner = %config.banner, "SMTP server listening.");

        let server = Self {
            config,
            local_addr,
            registry,
            closing,
            accept_thread: Some(accept_thread),
            coordinator: Some(coordinator),
            sink: Some(sink),
        };
        Ok((server, message_rx))
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of connections that have not deregistered yet
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting and wait for every connection to end, then close the
    /// message channel. With `force`, live connections are shut down first;
    /// otherwise they end on their own (QUIT, disconnect or read timeout).
    pub fn close(mut self, force: bool) {
        tracing::info!(force, "Closing SMTP server.");
        self.closing.store(true, Ordering::SeqCst);

        if let Some(accept_thread) = self.accept_thread.take() {
            if accept_thread.join().is_err() {
                tracing::error!("Accept loop panicked.");
            }
        }

        if force {
            let count = self.registry.close_all();
            tracing::info!(count, "Forcing connections closed.");
        }

        if !self.registry.is_empty() {
            tracing::info!(
                count = self.registry.len(),
                "Waiting for connections to end."
            );
        }
        self.registry.wait_empty();

        if let Some(coordinator) = self.coordinator.take() {
            if coordinator.join().is_err() {
                tracing::error!("Connection coordinator panicked.");
            }
        }

        // Last sender: receivers now observe the end of the stream.
        drop(self.sink.take());
        tracing::info!("SMTP server closed.");
    }
}

impl Drop for SmtpServer {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
    }
}

impl Acceptor {
    fn run(mut self) {
        while !self.closing.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => self.spawn_engine(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::Interrupted
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::ConnectionReset
                    ) =>
                {
                    tracing::debug!(error = %e, "Transient accept failure.");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed, no longer accepting connections.");
                    break;
                }
            }
        }
        tracing::debug!("Accept loop finished.");
    }

    /// Register the connection, then start its engine thread
    fn spawn_engine(&mut self, stream: TcpStream, peer: SocketAddr) {
        // Accepted sockets may inherit the listener's non-blocking flag.
        if let Err(error) = stream.set_nonblocking(false) {
            tracing::warn!(%peer, %error, "Dropping connection.");
            return;
        }
        let handle_stream = match stream.try_clone() {
            Ok(handle_stream) => handle_stream,
            Err(error) => {
                tracing::warn!(%peer, %error, "Dropping connection.");
                return;
            }
        };

        self.next_id += 1;
        let id = self.next_id;
        self.registry.insert(ConnectionHandle::new(id, handle_stream));
        tracing::debug!(id, %peer, "Connection accepted.");

        let config = Arc::clone(&self.config);
        let validator = Arc::clone(&self.validator);
        let sink = self.sink.clone();
        let finished = self.finished.clone();

        let spawned = thread::Builder::new()
            .name(format!("smtp-conn-{id}"))
            .spawn(move || {
                let reader = BufReader::new(TimedStream::new(&stream));
                let engine = ProtocolEngine::new(reader, &stream, config, validator, sink);
                match engine.run() {
                    Ok(()) => tracing::debug!(id, "Client quit."),
                    Err(error) => tracing::debug!(id, %error, "Connection ended."),
                }
                let _ = stream.shutdown(Shutdown::Both);
                drop(stream);

                // The coordinator only stops once every sender is gone, so
                // this cannot fail while the server is running.
                let _ = finished.send(id);
            });

        if let Err(error) = spawned {
            tracing::error!(id, %error, "Failed to spawn connection thread.");
            if let Some(handle) = self.registry.remove(id) {
                handle.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::time::Instant;

    fn start_test_server(read_timeout: Duration) -> (SmtpServer, mpsc::Receiver<Message>) {
        let config = Config::new("127.0.0.1:0")
            .with_banner("test.local")
            .with_read_timeout(read_timeout);
        SmtpServer::bind(config).unwrap()
    }

    fn connect(server: &SmtpServer) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(server.local_addr()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut greeting = String::new();
        reader.read_line(&mut greeting).unwrap();
        assert_eq!(greeting, "220 test.local [mailsink]\r\n");
        (stream, reader)
    }

    fn send_command(
        stream: &mut TcpStream,
        reader: &mut BufReader<TcpStream>,
        command: &str,
    ) -> String {
        write!(stream, "{command}\r\n").unwrap();
        stream.flush().unwrap();
        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        response.trim_end().to_string()
    }

    fn wait_for_connections(server: &SmtpServer, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while server.connection_count() != count {
            assert!(Instant::now() < deadline, "connections never reached {count}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config::new(taken.local_addr().unwrap().to_string());

        let result = SmtpServer::bind(config);
        assert!(matches!(result, Err(SmtpError::Bind { .. })));
    }

    #[test]
    fn test_quit_deregisters_connection() {
        let (server, _rx) = start_test_server(Duration::ZERO);
        let (mut stream, mut reader) = connect(&server);
        wait_for_connections(&server, 1);

        assert_eq!(send_command(&mut stream, &mut reader, "QUIT"), "221 bye");
        wait_for_connections(&server, 0);

        server.close(false);
    }

    #[test]
    fn test_read_timeout_closes_connection() {
        let (server, _rx) = start_test_server(Duration::from_millis(100));
        let (_stream, mut reader) = connect(&server);

        // No reply is sent; the server just hangs up.
        let mut rest = String::new();
        assert_eq!(reader.read_line(&mut rest).unwrap(), 0);
        wait_for_connections(&server, 0);

        server.close(false);
    }

    #[test]
    fn test_read_timeout_bounds_a_trickled_line() {
        let (server, _rx) = start_test_server(Duration::from_millis(200));
        let (mut stream, mut reader) = connect(&server);
        let started = Instant::now();

        // Each byte arrives well within the timeout, the line as a whole does not.
        for byte in b"NOOP xxxxxxxxxxxxxxx" {
            if stream.write_all(&[*byte]).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        let _ = stream.write_all(b"\r\n");

        let mut rest = String::new();
        assert_eq!(reader.read_line(&mut rest).unwrap_or(0), 0, "got reply {rest:?}");
        assert!(started.elapsed() >= Duration::from_millis(200));
        wait_for_connections(&server, 0);

        server.close(false);
    }

    #[test]
    fn test_forced_close() {
        let (server, rx) = start_test_server(Duration::ZERO);
        let clients: Vec<_> = (0..3).map(|_| connect(&server)).collect();
        wait_for_connections(&server, 3);

        server.close(true);

        // Every client observes the hang-up and the sink is closed.
        for (_stream, mut reader) in clients {
            let mut rest = String::new();
            assert_eq!(reader.read_line(&mut rest).unwrap_or(0), 0);
        }
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_close_stops_accepting() {
        let (server, _rx) = start_test_server(Duration::ZERO);
        let addr = server.local_addr();
        server.close(false);

        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_graceful_close_waits_for_quit() {
        let (server, rx) = start_test_server(Duration::ZERO);
        let (mut stream, mut reader) = connect(&server);
        wait_for_connections(&server, 1);

        let closer = thread::spawn(move || server.close(false));

        // Still served while the server drains.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(send_command(&mut stream, &mut reader, "NOOP"), "250 ok");
        assert!(!closer.is_finished());

        assert_eq!(send_command(&mut stream, &mut reader, "QUIT"), "221 bye");
        closer.join().unwrap();
        assert!(rx.recv().is_err());
    }
}
