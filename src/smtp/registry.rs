//! Live connection tracking

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Identifies one accepted connection for its whole lifetime
pub type ConnectionId = u64;

/// The registry's reference to a live connection. It holds a clone of the
/// socket so the connection can be closed from outside its thread.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    stream: TcpStream,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, stream: TcpStream) -> Self {
        Self {
            id,
            peer: stream.peer_addr().ok(),
            stream,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Shut the socket down. The engine sees this as end of input on its
    /// next read.
    pub fn close(&self) {
        if let Err(error) = self.stream.shutdown(Shutdown::Both) {
            tracing::debug!(id = self.id, %error, "Connection already closed.");
        }
    }
}

/// Set of live connections, mutated only under its lock
#[derive(Debug, Default)]
pub struct Registry {
    live: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    drained: Condvar,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: ConnectionHandle) {
        self.lock().insert(handle.id(), handle);
    }

    /// Remove a connection, waking waiters once the set is empty
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut live = self.lock();
        let handle = live.remove(&id);
        if live.is_empty() {
            self.drained.notify_all();
        }
        handle
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every live connection without removing it; each one is removed
    /// when its engine reports completion.
    pub fn close_all(&self) -> usize {
        let live = self.lock();
        for handle in live.values() {
            handle.close();
        }
        live.len()
    }

    /// Block until every connection has been removed
    pub fn wait_empty(&self) {
        let mut live = self.lock();
        while !live.is_empty() {
            live = self
                .drained
                .wait(live)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    // A panicking engine thread must not wedge shutdown.
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
