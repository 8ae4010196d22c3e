//! Key/value + pub/sub store capability consumed by the relay.
//!
//! [`RedisStore`] is the production backend. [`MemoryStore`] keeps everything
//! in process, records each call it receives and can be told to fail, which
//! is what the relay's tests run against.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub mod memory;
mod redis_store;

pub use memory::{MemoryStore, StoreCall};
pub use redis_store::RedisStore;

/// Payloads received on a subscribed channel. The stream ends when the
/// subscription is lost.
pub type MessageStream = BoxStream<'static, String>;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Returns `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;
}
