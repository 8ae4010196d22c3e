//! Wiring and lifecycle of one relay instance.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use store::Store;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle, time};
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    config::Settings,
    connections::ConnectionManager,
    error::BridgeError,
    pubsub::PubSubBridge,
    router::CommandRouter,
    routes::build_router,
    watcher::StateWatcher,
};

const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BridgeProcess {
    local_addr: SocketAddr,
    connections: ConnectionManager,
    shutdown: watch::Sender<bool>,
    watchers: Vec<JoinHandle<()>>,
    safety: Option<JoinHandle<Result<(), BridgeError>>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl BridgeProcess {
    /// Subscribes to the safety channel, binds the listener, then starts the
    /// watchers and the server. Failing to subscribe or bind is fatal.
    pub async fn start(settings: &Settings, store: Arc<dyn Store>) -> Result<Self, BridgeError> {
        let connections = ConnectionManager::new(settings.outbound_queue_depth);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let safety = PubSubBridge::new(
            Arc::clone(&store),
            connections.clone(),
            settings.estop_channel.clone(),
            settings.resubscribe_policy(),
        );
        let messages = safety.subscribe().await?;

        let bind_error = |source| BridgeError::Bind {
            addr: settings.bind_addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&settings.bind_addr)
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let safety = tokio::spawn(safety.run(messages, shutdown_rx.clone()));
        let watchers = StateWatcher::new(
            Arc::clone(&store),
            connections.clone(),
            settings.watch_table(),
        )
        .spawn(shutdown_rx.clone());

        let state = Arc::new(AppState {
            connections: connections.clone(),
            router: CommandRouter::new(store),
            send_timeout: settings.send_timeout(),
        });
        let mut server_shutdown = shutdown_rx;
        let server = tokio::spawn(async move {
            axum::serve(listener, build_router(state))
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.wait_for(|stop| *stop).await;
                })
                .await
        });

        info!(
            %local_addr,
            channel = %settings.estop_channel,
            watched_keys = watchers.len(),
            "bridge listening"
        );

        Ok(Self {
            local_addr,
            connections,
            shutdown,
            watchers,
            safety: Some(safety),
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[cfg(test)]
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Resolves when the safety channel relay stops on its own, which only
    /// happens when the subscription is lost for good.
    pub async fn wait(&mut self) -> Result<(), BridgeError> {
        let Some(safety) = self.safety.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = match safety.await {
            Ok(result) => result,
            Err(error) => Err(BridgeError::SafetyTask(error.to_string())),
        };
        self.safety = None;
        outcome
    }

    /// Stops timers, unsubscribes, closes every client and the listener.
    /// The store handle is released with the last task holding it.
    pub async fn shutdown(mut self) {
        info!(
            open_connections = self.connections.open_count(),
            "bridge shutting down"
        );
        let _ = self.shutdown.send(true);

        for watcher in self.watchers.drain(..) {
            watcher.abort();
            let _ = watcher.await;
        }
        if let Some(safety) = self.safety.take() {
            safety.abort();
            let _ = safety.await;
        }

        let closed = self.connections.close_all();

        match time::timeout(SERVER_DRAIN_TIMEOUT, &mut self.server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(error))) => warn!(%error, "server stopped with error"),
            Ok(Err(error)) => warn!(%error, "server task failed"),
            Err(_) => {
                warn!("server did not drain in time; aborting");
                self.server.abort();
            }
        }

        info!(closed_connections = closed, "bridge stopped");
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
