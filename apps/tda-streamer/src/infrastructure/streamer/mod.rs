//! Streamer Adapters
//!
//! The streaming protocol client:
//!
//! - [`messages`]: Wire types and request builders
//! - [`codec`]: Frame classification and positional payload decoding
//! - [`login`]: Login request assembly from principal metadata
//! - [`correlator`]: Control request/acknowledgement matching
//! - [`session`]: Connection owner, subscriptions and reconnect
//! - [`ws`]: WebSocket transport

pub mod codec;
pub mod correlator;
pub mod error;
pub mod liveness;
pub mod login;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod ws;

pub use codec::{CodecError, Frame, decode_data};
pub use error::StreamError;
pub use messages::QosLevel;
pub use session::{SessionConfig, StreamSession};
pub use ws::WsTransport;
