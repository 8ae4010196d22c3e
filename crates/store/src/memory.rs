use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{MessageStream, Result, Store, StoreError};

const CHANNEL_CAPACITY: usize = 64;

/// One call received by a [`MemoryStore`], in the order it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Get(String),
    Set(String, String),
    Publish(String, String),
    Subscribe(String),
}

impl StoreCall {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Set(..) | Self::Publish(..))
    }
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, String>,
    channels: HashMap<String, broadcast::Sender<String>>,
    calls: Vec<StoreCall>,
    fail_reads: bool,
    fail_writes: bool,
    fail_subscribe: bool,
}

/// In-process store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes a value without recording a call, as another process would.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner().values.insert(key.into(), value.into());
    }

    /// Reads a value without recording a call.
    pub fn value(&self, key: &str) -> Option<String> {
        self.inner().values.get(key).cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner().calls.clone()
    }

    /// `set` and `publish` calls only.
    pub fn mutations(&self) -> Vec<StoreCall> {
        self.inner()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner().fail_writes = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner().fail_subscribe = fail;
    }

    /// Ends every open subscription stream on `channel`.
    pub fn close_channel(&self, channel: &str) {
        self.inner().channels.remove(channel);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner()
            .channels
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner();
        inner.calls.push(StoreCall::Get(key.to_owned()));
        if inner.fail_reads {
            return Err(StoreError::Unavailable(format!("read of `{key}` refused")));
        }
        Ok(inner.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner();
        inner
            .calls
            .push(StoreCall::Set(key.to_owned(), value.to_owned()));
        if inner.fail_writes {
            return Err(StoreError::Unavailable(format!("write of `{key}` refused")));
        }
        inner.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut inner = self.inner();
        inner
            .calls
            .push(StoreCall::Publish(channel.to_owned(), message.to_owned()));
        if inner.fail_writes {
            return Err(StoreError::Unavailable(format!(
                "publish to `{channel}` refused"
            )));
        }
        if let Some(sender) = inner.channels.get(channel) {
            // No subscribers is not an error for pub/sub.
            let _ = sender.send(message.to_owned());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut inner = self.inner();
        inner.calls.push(StoreCall::Subscribe(channel.to_owned()));
        if inner.fail_subscribe {
            return Err(StoreError::Unavailable(format!(
                "subscription to `{channel}` refused"
            )));
        }
        let receiver = inner
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
