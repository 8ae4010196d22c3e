//! Turns client commands into store writes and publications.

use std::sync::Arc;

use shared::{
    domain::ConnectionId,
    protocol::{ClientMessage, InboundCommand},
};
use store::Store;
use tracing::{debug, info, warn};

pub const FLIGHT_MODE_KEY: &str = "flight_mode";
pub const REMOTE_COMMAND_KEY: &str = "remote_command";
pub const TAKEOFF_LAND_CHANNEL: &str = "remote_takeoff_land";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    Set { key: &'static str, value: String },
    Publish {
        channel: &'static str,
        message: &'static str,
    },
}

/// Store effect of a command, or `None` for keys with no remote binding.
pub fn plan(command: &InboundCommand) -> Option<StoreAction> {
    match command {
        InboundCommand::FlightMode(mode) => Some(StoreAction::Set {
            key: FLIGHT_MODE_KEY,
            value: mode.clone(),
        }),
        InboundCommand::Keypress(key) => keypress_action(key),
        InboundCommand::KeyUnpress(_) => Some(StoreAction::Set {
            key: REMOTE_COMMAND_KEY,
            value: String::new(),
        }),
    }
}

fn keypress_action(key: &str) -> Option<StoreAction> {
    let direction = match key {
        "ArrowLeft" => "left",
        "ArrowRight" => "right",
        "ArrowUp" => "forward",
        "ArrowDown" => "back",
        "]" => "up",
        "#" => "down",
        "t" | "T" => return Some(takeoff_land("takeoff")),
        "l" | "L" => return Some(takeoff_land("land")),
        _ => return None,
    };
    Some(StoreAction::Set {
        key: REMOTE_COMMAND_KEY,
        value: direction.to_owned(),
    })
}

fn takeoff_land(message: &'static str) -> StoreAction {
    StoreAction::Publish {
        channel: TAKEOFF_LAND_CHANNEL,
        message,
    }
}

#[derive(Clone)]
pub struct CommandRouter {
    store: Arc<dyn Store>,
}

impl CommandRouter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Parses and applies one text frame. Malformed frames are dropped
    /// without a reply.
    pub async fn handle_text(&self, connection_id: ConnectionId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.dispatch(connection_id, message).await,
            Err(error) => {
                debug!(%connection_id, %error, "dropping malformed client message");
            }
        }
    }

    pub async fn dispatch(&self, connection_id: ConnectionId, message: ClientMessage) {
        let command = match message {
            ClientMessage::Command(command) => command,
            ClientMessage::Unrecognized { kind } => {
                info!(%connection_id, %kind, "ignoring unrecognized client message");
                return;
            }
        };

        let Some(action) = plan(&command) else {
            debug!(%connection_id, kind = command.kind(), ?command, "command has no store action");
            return;
        };

        let result = match &action {
            StoreAction::Set { key, value } => self.store.set(key, value).await,
            StoreAction::Publish { channel, message } => self.store.publish(channel, message).await,
        };
        match result {
            Ok(()) => debug!(%connection_id, kind = command.kind(), ?action, "applied client command"),
            Err(error) => {
                warn!(
                    %connection_id,
                    kind = command.kind(),
                    ?action,
                    %error,
                    "store write failed; command dropped"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
