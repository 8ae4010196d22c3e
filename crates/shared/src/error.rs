use thiserror::Error;

/// Reasons an inbound client frame is rejected. None of these are reported
/// back to the client; the frame is dropped and the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("`{kind}` message is missing its value")]
    MissingValue { kind: String },
    #[error("`{kind}` message value must be a string")]
    NonStringValue { kind: String },
}
