use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use shared::protocol::{InboundCommand, OutboundEvent};
use store::{RedisStore, Store};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-tools", about = "Operator helpers for the state relay")]
struct Cli {
    #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
    redis_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish an emergency stop.
    Estop {
        #[arg(long, default_value = "ESTOP")]
        channel: String,
        #[arg(long, default_value = "ESTOP")]
        message: String,
    },
    Set {
        key: String,
        value: String,
    },
    Get {
        key: String,
    },
    /// Print every event the relay sends to a client.
    Listen {
        #[arg(long, default_value = "ws://127.0.0.1:4000/ws")]
        url: String,
        /// Press and release this key once after connecting.
        #[arg(long)]
        keypress: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();

    match cli.command {
        Command::Estop { channel, message } => {
            let store = connect_store(&cli.redis_url).await?;
            store.publish(&channel, &message).await?;
            println!("published {message:?} to {channel}");
        }
        Command::Set { key, value } => {
            let store = connect_store(&cli.redis_url).await?;
            store.set(&key, &value).await?;
            println!("{key} = {value:?}");
        }
        Command::Get { key } => {
            let store = connect_store(&cli.redis_url).await?;
            match store.get(&key).await? {
                Some(value) => println!("{key} = {value:?}"),
                None => println!("{key} is not set"),
            }
        }
        Command::Listen { url, keypress } => listen(&url, keypress).await?,
    }

    Ok(())
}

async fn connect_store(redis_url: &str) -> Result<RedisStore> {
    RedisStore::connect(redis_url)
        .await
        .with_context(|| format!("failed to connect to {redis_url}"))
}

async fn listen(url: &str, keypress: Option<String>) -> Result<()> {
    let (ws_stream, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect websocket: {url}"))?;
    info!(%url, "connected");
    let (mut writer, mut reader) = ws_stream.split();

    if let Some(key) = keypress {
        for command in [
            InboundCommand::Keypress(key.clone()),
            InboundCommand::KeyUnpress(key),
        ] {
            writer.send(Message::Text(command.to_json()?)).await?;
        }
    }

    while let Some(message) = reader.next().await {
        match message.context("websocket receive failed")? {
            Message::Text(text) => match serde_json::from_str::<OutboundEvent>(&text) {
                Ok(event) => println!("{}\t{}", event.kind(), event.value().unwrap_or("<absent>")),
                Err(error) => debug!(%error, %text, "unexpected frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    println!("connection closed");
    Ok(())
}
