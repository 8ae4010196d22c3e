//! State shared by every HTTP and WebSocket handler.

use std::time::Duration;

use crate::{connections::ConnectionManager, router::CommandRouter};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) connections: ConnectionManager,
    pub(crate) router: CommandRouter,
    pub(crate) send_timeout: Duration,
}
