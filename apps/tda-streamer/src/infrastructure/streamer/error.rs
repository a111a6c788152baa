//! Session error type.

use std::time::Duration;

use super::codec::CodecError;
use crate::application::ports::{PrincipalError, TransportError};
use crate::domain::session::SessionState;
use crate::domain::subscription::ConfigurationError;

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The principal provider failed or returned unusable metadata.
    #[error("streamer credentials unavailable: {0}")]
    AuthUnavailable(#[from] PrincipalError),

    /// The streamer answered a control request with a non-zero code.
    #[error("control request rejected (code {code}): {msg}")]
    ControlRejected {
        /// Status code from the response.
        code: i64,
        /// Status message from the response.
        msg: String,
    },

    /// The socket failed or was closed by the peer.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No answer within the allotted time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
        /// The limit that elapsed.
        after: Duration,
    },

    /// Invalid subscription arguments.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The operation is not allowed in the current state.
    #[error("operation not allowed while {0}")]
    InvalidState(SessionState),

    /// The session has been closed.
    #[error("session closed")]
    Closed,

    /// A request could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl StreamError {
    /// Whether the error means the connection must be re-established.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        Self::ConnectionLost(err.to_string())
    }
}
