use thiserror::Error;

/// Rejected inbound desired-state update.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("unknown desired-state path `{0}`")]
    UnknownPath(String),

    #[error("malformed payload `{payload}` for path `{path}`")]
    MalformedPayload { path: String, payload: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("remote session is not connected")]
    NotConnected,

    #[error("remote session not re-established after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("publish failed: {0}")]
    Publish(String),
}
