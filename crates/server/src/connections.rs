//! Set of live client connections and the fan-out path to them.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use shared::{
    domain::{ConnectionId, ConnectionState},
    protocol::OutboundEvent,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// A serialized event, shared by every recipient of one broadcast.
pub type OutboundFrame = Arc<str>;

struct ConnectionEntry {
    state: ConnectionState,
    outbound: mpsc::Sender<OutboundFrame>,
}

struct Inner {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

/// Owns the broadcast set. Entries only change through `register`,
/// `mark_open`, `begin_close`, `deregister` and `close_all`, or when a
/// broadcast finds a connection that can no longer take events.
///
/// A connection that is not in the set is `Closed`. Dropping an entry drops
/// its queue sender, which ends the connection's writer task.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_depth,
            }),
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection in `Connecting` and returns the receiving end of its
    /// outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, receiver) = mpsc::channel(self.inner.queue_depth);
        self.connections().insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Connecting,
                outbound,
            },
        );
        debug!(connection_id = %id, "client connecting");
        (id, receiver)
    }

    /// Promotes a `Connecting` connection to `Open`. Returns false if the
    /// connection is unknown or already past `Connecting`.
    pub fn mark_open(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections();
        match connections.get_mut(&id) {
            Some(entry) if entry.state == ConnectionState::Connecting => {
                entry.state = ConnectionState::Open;
                let open = connections
                    .values()
                    .filter(|entry| entry.state.is_open())
                    .count();
                info!(connection_id = %id, open, "client connected");
                true
            }
            _ => false,
        }
    }

    /// Takes the connection out of the broadcast set while its transport
    /// finishes closing.
    pub fn begin_close(&self, id: ConnectionId) {
        if let Some(entry) = self.connections().get_mut(&id) {
            entry.state = ConnectionState::Closing;
        }
    }

    /// Idempotent. Returns true only for the call that removed the entry.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections().remove(&id).is_some();
        if removed {
            info!(connection_id = %id, "client disconnected");
        }
        removed
    }

    pub fn close_all(&self) -> usize {
        let drained = self.connections().drain().count();
        if drained > 0 {
            info!(connections = drained, "closed all client connections");
        }
        drained
    }

    #[cfg(test)]
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.connections()
            .get(&id)
            .map_or(ConnectionState::Closed, |entry| entry.state)
    }

    pub fn open_count(&self) -> usize {
        self.connections()
            .values()
            .filter(|entry| entry.state.is_open())
            .count()
    }

    /// Serializes `event` once and queues it for every `Open` connection.
    ///
    /// Never waits on a client. A connection whose queue is full or whose
    /// writer is gone is closed and removed on the spot. Returns the number
    /// of connections the event was queued for.
    pub fn broadcast(&self, event: &OutboundEvent) -> usize {
        let frame: OutboundFrame = match event.to_json() {
            Ok(json) => json.into(),
            Err(error) => {
                warn!(kind = %event.kind(), %error, "failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let mut connections = self.connections();
            for (id, entry) in connections.iter() {
                if !entry.state.is_open() {
                    continue;
                }
                match entry.outbound.try_send(Arc::clone(&frame)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(connection_id = %id, "outbound queue full; disconnecting slow client");
                        failed.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(connection_id = %id, "outbound queue closed");
                        failed.push(*id);
                    }
                }
            }
            for id in &failed {
                connections.remove(id);
            }
        }

        debug!(
            kind = %event.kind(),
            delivered,
            dropped = failed.len(),
            "broadcast event"
        );
        delivered
    }
}

#[cfg(test)]
#[path = "tests/connections_tests.rs"]
mod tests;
