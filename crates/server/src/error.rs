//! Errors that stop the bridge.

use store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to subscribe to safety channel '{channel}': {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: StoreError,
    },
    #[error("safety channel '{channel}' lost after {attempts} resubscribe attempts")]
    SafetyChannelLost { channel: String, attempts: u32 },
    #[error("safety channel task failed: {0}")]
    SafetyTask(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
