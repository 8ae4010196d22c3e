//! HTTP routes and the per-connection WebSocket pump.

use std::{fmt, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use shared::domain::ConnectionId;
use tokio::{sync::mpsc, time};
use tracing::{debug, warn};

use crate::{app_state::AppState, connections::OutboundFrame};

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (id, outbound) = state.connections.register();
    let (sender, receiver) = socket.split();
    state.connections.mark_open(id);
    serve_connection(&state, id, outbound, sender, receiver).await;
}

/// Pumps one connection until either side ends, then deregisters it.
async fn serve_connection<S, R, E>(
    state: &AppState,
    id: ConnectionId,
    outbound: mpsc::Receiver<OutboundFrame>,
    sender: S,
    mut receiver: R,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let mut send_task = tokio::spawn(write_outbound(id, outbound, sender, state.send_timeout));

    let connections = state.connections.clone();
    let router = state.router.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => router.handle_text(id, &text).await,
                Ok(Message::Close(_)) => {
                    connections.begin_close(id);
                    break;
                }
                Ok(Message::Binary(_)) => {
                    debug!(connection_id = %id, "ignoring binary frame");
                }
                Ok(_) => {}
                Err(error) => {
                    debug!(connection_id = %id, %error, "receive failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    state.connections.deregister(id);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    QueueClosed,
    SendFailed,
    TimedOut,
}

/// Sends queued frames in order. Each send, including the final close frame,
/// gets at most `send_timeout`.
async fn write_outbound<S>(
    id: ConnectionId,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    mut sender: S,
    send_timeout: Duration,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(frame) = outbound.recv().await {
        match time::timeout(send_timeout, sender.send(Message::Text(frame.to_string()))).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                debug!(connection_id = %id, %error, "send failed");
                return WriterExit::SendFailed;
            }
            Err(_) => {
                warn!(
                    connection_id = %id,
                    timeout_ms = send_timeout.as_millis() as u64,
                    "send timed out; disconnecting slow client"
                );
                return WriterExit::TimedOut;
            }
        }
    }
    // The manager dropped this connection; tell the client.
    let _ = time::timeout(send_timeout, sender.send(Message::Close(None))).await;
    WriterExit::QueueClosed
}

#[cfg(test)]
#[path = "tests/routes_tests.rs"]
mod tests;
