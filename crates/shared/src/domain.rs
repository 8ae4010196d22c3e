use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ConnectionId);

/// Lifecycle of a single client connection. `Closed` is terminal; a client
/// that reconnects gets a new [`ConnectionId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Semantic tag carried by every outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "controller_status")]
    ControllerStatus,
    #[serde(rename = "drone_status")]
    DroneStatus,
    #[serde(rename = "flight_mode")]
    FlightMode,
    #[serde(rename = "ESTOP")]
    EStop,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ControllerStatus => "controller_status",
            Self::DroneStatus => "drone_status",
            Self::FlightMode => "flight_mode",
            Self::EStop => "ESTOP",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
