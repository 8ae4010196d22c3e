//! Polls watched store keys and broadcasts their transitions.

use std::{sync::Arc, time::Duration};

use shared::{domain::EventKind, protocol::OutboundEvent};
use store::Store;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::connections::ConnectionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
    pub key: String,
    pub kind: EventKind,
    pub interval: Duration,
}

/// `Observed(None)` means the key was read and found absent.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LastValue {
    Unobserved,
    Observed(Option<String>),
}

/// Change-detection state for one key. Only the task polling the key holds
/// it, so updates need no locking.
#[derive(Debug)]
pub struct WatchedKey {
    spec: WatchSpec,
    last_value: LastValue,
}

impl WatchedKey {
    pub fn new(spec: WatchSpec) -> Self {
        Self {
            spec,
            last_value: LastValue::Unobserved,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.key
    }

    pub fn interval(&self) -> Duration {
        self.spec.interval
    }

    /// Records a read and returns the event to broadcast, if the value
    /// differs from the last one seen. The first read always differs.
    pub fn observe(&mut self, value: Option<String>) -> Option<OutboundEvent> {
        if let LastValue::Observed(last) = &self.last_value {
            if *last == value {
                return None;
            }
        }
        let event = OutboundEvent::new(self.spec.kind, value.clone());
        self.last_value = LastValue::Observed(value);
        Some(event)
    }
}

/// Reads the key once. A failed read leaves the key's state untouched.
pub async fn poll_once(key: &mut WatchedKey, store: &dyn Store) -> Option<OutboundEvent> {
    match store.get(key.name()).await {
        Ok(value) => key.observe(value),
        Err(error) => {
            warn!(key = key.name(), %error, "store read failed; skipping tick");
            None
        }
    }
}

pub struct StateWatcher {
    store: Arc<dyn Store>,
    connections: ConnectionManager,
    table: Vec<WatchSpec>,
}

impl StateWatcher {
    pub fn new(store: Arc<dyn Store>, connections: ConnectionManager, table: Vec<WatchSpec>) -> Self {
        Self {
            store,
            connections,
            table,
        }
    }

    /// Starts one polling task per watched key. Each task stops once
    /// `shutdown` reads true.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.table
            .iter()
            .cloned()
            .map(|spec| {
                tokio::spawn(watch_key(
                    WatchedKey::new(spec),
                    Arc::clone(&self.store),
                    self.connections.clone(),
                    shutdown.clone(),
                ))
            })
            .collect()
    }
}

async fn watch_key(
    mut key: WatchedKey,
    store: Arc<dyn Store>,
    connections: ConnectionManager,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(key.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(key = key.name(), interval_ms = key.interval().as_millis() as u64, "watching key");

    while !*shutdown.borrow() {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let event = poll_once(&mut key, store.as_ref()).await;
        if *shutdown.borrow() {
            break;
        }
        if let Some(event) = event {
            debug!(key = key.name(), value = ?event.value(), "watched key changed");
            connections.broadcast(&event);
        }
    }

    debug!(key = key.name(), "stopped watching key");
}

#[cfg(test)]
#[path = "tests/watcher_tests.rs"]
mod tests;
