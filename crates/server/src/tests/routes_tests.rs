use super::*;

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
};
use futures::{sink, stream};
use shared::{
    domain::{ConnectionState, EventKind},
    protocol::OutboundEvent,
};
use store::MemoryStore;
use tower::ServiceExt;

use crate::{connections::ConnectionManager, router::CommandRouter};

const SEND_TIMEOUT: Duration = Duration::from_secs(1);

fn test_state() -> Arc<AppState> {
    state_with_store(&MemoryStore::new())
}

fn state_with_store(store: &MemoryStore) -> Arc<AppState> {
    Arc::new(AppState {
        connections: ConnectionManager::new(8),
        router: CommandRouter::new(Arc::new(store.clone())),
        send_timeout: SEND_TIMEOUT,
    })
}

fn open_connection(state: &AppState) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
    let (id, outbound) = state.connections.register();
    state.connections.mark_open(id);
    (id, outbound)
}

fn status_event() -> OutboundEvent {
    OutboundEvent::new(EventKind::DroneStatus, Some("flying".into()))
}

fn silent_client() -> stream::Pending<Result<Message, io::Error>> {
    stream::pending()
}

/// A peer that never drains its socket.
struct StalledSink;

impl Sink<Message> for StalledSink {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}

/// A peer whose transport is already gone.
struct BrokenSink;

impl Sink<Message> for BrokenSink {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn healthz_reports_ok() {
    let response = build_router(test_state())
        .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body::to_bytes(response.into_body(), 1024)
        .await
        .expect("body");
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn plain_get_on_socket_routes_is_rejected() {
    for path in ["/", "/ws"] {
        let response = build_router(test_state())
            .oneshot(Request::get(path).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert!(response.status().is_client_error(), "path {path}");
    }
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let state = test_state();
    let response = build_router(Arc::clone(&state))
        .oneshot(Request::get("/nope").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(state.connections.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_send_times_out() {
    let (queue, outbound) = mpsc::channel(1);
    queue.send(Arc::from("{}")).await.expect("queue frame");

    let started = time::Instant::now();
    let exit = write_outbound(ConnectionId(1), outbound, StalledSink, SEND_TIMEOUT).await;

    assert_eq!(exit, WriterExit::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= SEND_TIMEOUT && elapsed < SEND_TIMEOUT * 2, "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn slow_client_is_deregistered_after_send_timeout() {
    let state = test_state();
    let (id, outbound) = open_connection(&state);
    let (_other, _other_rx) = open_connection(&state);
    assert_eq!(state.connections.broadcast(&status_event()), 2);

    let started = time::Instant::now();
    serve_connection(&state, id, outbound, StalledSink, silent_client()).await;

    assert!(started.elapsed() >= SEND_TIMEOUT);
    assert_eq!(state.connections.state(id), ConnectionState::Closed);
    assert_eq!(state.connections.broadcast(&status_event()), 1);
}

#[tokio::test]
async fn failed_send_deregisters_connection() {
    let state = test_state();
    let (id, outbound) = open_connection(&state);
    state.connections.broadcast(&status_event());

    serve_connection(&state, id, outbound, BrokenSink, silent_client()).await;

    assert_eq!(state.connections.state(id), ConnectionState::Closed);
    assert_eq!(state.connections.open_count(), 0);
}

#[tokio::test]
async fn failed_send_ends_writer() {
    let (queue, outbound) = mpsc::channel(1);
    queue.send(Arc::from("{}")).await.expect("queue frame");

    let exit = write_outbound(ConnectionId(1), outbound, BrokenSink, SEND_TIMEOUT).await;
    assert_eq!(exit, WriterExit::SendFailed);
}

#[tokio::test]
async fn writer_flushes_queue_then_sends_close() {
    let (sink, mut sent) = futures::channel::mpsc::unbounded::<Message>();
    let (queue, outbound) = mpsc::channel(4);
    let frame = r#"{"type":"ESTOP","value":"stop"}"#;
    queue.send(Arc::from(frame)).await.expect("queue frame");
    drop(queue);

    let exit = write_outbound(ConnectionId(1), outbound, sink, SEND_TIMEOUT).await;

    assert_eq!(exit, WriterExit::QueueClosed);
    assert_eq!(sent.next().await, Some(Message::Text(frame.into())));
    assert_eq!(sent.next().await, Some(Message::Close(None)));
}

#[tokio::test]
async fn client_frames_are_routed_until_close() {
    let store = MemoryStore::new();
    let state = state_with_store(&store);
    let (id, outbound) = open_connection(&state);
    let frames = stream::iter(vec![
        Ok::<_, io::Error>(Message::Binary(vec![1, 2, 3])),
        Ok(Message::Text(r#"{"type":"keypress","value":"ArrowUp"}"#.into())),
        Ok(Message::Close(None)),
        Ok(Message::Text(r#"{"type":"keypress","value":"ArrowDown"}"#.into())),
    ]);

    serve_connection(&state, id, outbound, sink::drain(), frames).await;

    assert_eq!(store.value("remote_command").as_deref(), Some("forward"));
    assert_eq!(state.connections.state(id), ConnectionState::Closed);
}
