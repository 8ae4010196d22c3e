//! Relays the safety channel straight onto the broadcast path.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use shared::protocol::OutboundEvent;
use store::{MessageStream, Store};
use tokio::{sync::watch, time};
use tracing::{error, info, warn};

use crate::{connections::ConnectionManager, error::BridgeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribePolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

pub struct PubSubBridge {
    store: Arc<dyn Store>,
    connections: ConnectionManager,
    channel: String,
    policy: ResubscribePolicy,
}

impl PubSubBridge {
    pub fn new(
        store: Arc<dyn Store>,
        connections: ConnectionManager,
        channel: impl Into<String>,
        policy: ResubscribePolicy,
    ) -> Self {
        Self {
            store,
            connections,
            channel: channel.into(),
            policy,
        }
    }

    pub async fn subscribe(&self) -> Result<MessageStream, BridgeError> {
        self.store
            .subscribe(&self.channel)
            .await
            .map_err(|source| BridgeError::Subscribe {
                channel: self.channel.clone(),
                source,
            })
    }

    /// Broadcasts one emergency stop. No dedup and no comparison with
    /// earlier messages: every publication reaches the clients.
    pub fn relay(&self, payload: String) -> usize {
        warn!(channel = %self.channel, %payload, "emergency stop received");
        self.connections.broadcast(&OutboundEvent::estop(payload))
    }

    /// Runs until shutdown, or until the subscription is lost and cannot be
    /// re-established, which is reported as [`BridgeError::SafetyChannelLost`].
    pub async fn run(
        self,
        mut messages: MessageStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BridgeError> {
        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                message = messages.next() => match message {
                    Some(payload) => {
                        self.relay(payload);
                    }
                    None => {
                        error!(channel = %self.channel, "safety channel subscription ended");
                        match self.resubscribe(&mut shutdown).await? {
                            Some(stream) => messages = stream,
                            None => break,
                        }
                    }
                },
            }
        }
        info!(channel = %self.channel, "unsubscribed from safety channel");
        Ok(())
    }

    /// `Ok(None)` means shutdown was requested while retrying.
    async fn resubscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<MessageStream>, BridgeError> {
        for attempt in 1..=self.policy.attempts {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => return Ok(None),
                _ = time::sleep(self.policy.backoff) => {}
            }
            match self.subscribe().await {
                Ok(stream) => {
                    info!(channel = %self.channel, attempt, "resubscribed to safety channel");
                    return Ok(Some(stream));
                }
                Err(error) => {
                    error!(
                        channel = %self.channel,
                        attempt,
                        max_attempts = self.policy.attempts,
                        %error,
                        "safety channel resubscribe failed"
                    );
                }
            }
        }
        Err(BridgeError::SafetyChannelLost {
            channel: self.channel.clone(),
            attempts: self.policy.attempts,
        })
    }
}

#[cfg(test)]
#[path = "tests/pubsub_tests.rs"]
mod tests;
