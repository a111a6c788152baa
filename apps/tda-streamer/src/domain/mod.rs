//! Domain Layer - Streaming data model and session bookkeeping.
//!
//! Pure types with no I/O: the field taxonomy, canonical records, the
//! subscription registry, and the session lifecycle.

/// Field taxonomy and typed values.
pub mod fields;

/// Canonical records and order status.
pub mod record;

/// Session lifecycle states.
pub mod session;

/// Subscription descriptors and the registry.
pub mod subscription;
