use async_trait::async_trait;
use futures::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{info, warn};

use crate::{MessageStream, Result, Store};

/// Redis-backed store.
///
/// Commands share one multiplexed [`ConnectionManager`]: it pipelines
/// concurrent requests over a single socket, matches replies in order and
/// reconnects after I/O errors, so watcher ticks and client commands can be
/// in flight at the same time. Every subscription opens its own connection
/// because a subscribed Redis connection cannot run regular commands.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    commands: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let commands = ConnectionManager::new(client.clone()).await?;
        info!(addr = %client.get_connection_info().addr, "connected to redis");
        Ok(Self { client, commands })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.commands.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.commands.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.commands.clone();
        conn.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        info!(%channel, "subscribed to redis channel");

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let payload = msg.get_payload::<String>();
            let channel = msg.get_channel_name().to_owned();
            async move {
                match payload {
                    Ok(payload) => Some(payload),
                    Err(error) => {
                        warn!(%channel, %error, "dropping undecodable pub/sub payload");
                        None
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
