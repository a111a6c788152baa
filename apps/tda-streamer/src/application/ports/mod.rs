//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`PrincipalProvider`]: Supplies the streamer token and socket address
//! - [`Transport`]: Opens message-oriented socket connections
//! - [`Connection`]: One open socket

mod principal;

use async_trait::async_trait;

pub use principal::{
    PrincipalAccount, PrincipalRequest, StreamerInfo, StreamerPrincipal, SubscriptionKey,
    SubscriptionKeys,
};

// =============================================================================
// Errors
// =============================================================================

/// Failure obtaining or interpreting principal metadata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrincipalError {
    /// The provider could not supply a principal.
    #[error("principal unavailable: {0}")]
    Unavailable(String),

    /// The principal is missing data the session needs.
    #[error("principal malformed: {0}")]
    Malformed(String),
}

/// Failure on the socket transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// Sending a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Receiving a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),
}

// =============================================================================
// Ports
// =============================================================================

/// Source of streamer credentials and connection info.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrincipalProvider: Send + Sync {
    /// Fetch the current principal. Called on every (re)connect so that a
    /// refreshed streamer token is picked up.
    async fn get_principal(
        &self,
        request: &PrincipalRequest,
    ) -> Result<StreamerPrincipal, PrincipalError>;
}

/// Factory for socket connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `uri`.
    async fn connect(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// An open, message-oriented socket.
#[async_trait]
pub trait Connection: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text frame.
    ///
    /// Must be cancel-safe: dropping the future before it completes must not
    /// lose a frame.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the connection. Errors are informational.
    async fn close(&mut self) -> Result<(), TransportError>;
}
