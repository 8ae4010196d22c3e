use std::sync::Arc;

use anyhow::Context;
use store::RedisStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod bridge;
mod config;
mod connections;
mod error;
mod pubsub;
mod router;
mod routes;
mod watcher;

use bridge::BridgeProcess;
use config::load_settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    init_tracing(&settings.log_filter);

    let redis_url = settings.redis_url()?;
    let store = RedisStore::connect(&redis_url).await.map_err(|error| {
        error!(
            host = %settings.redis_host,
            port = settings.redis_port,
            %error,
            "failed to connect to redis; verify REDIS_HOST, REDIS_PORT and REDIS_PASSWORD"
        );
        error
    })?;

    let mut bridge = BridgeProcess::start(&settings, Arc::new(store)).await?;

    let outcome = tokio::select! {
        result = bridge.wait() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("received ctrl-c");
            Ok(())
        }
    };
    if let Err(error) = &outcome {
        error!(%error, "emergency-stop path lost; shutting down");
    }

    bridge.shutdown().await;
    Ok(outcome?)
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
