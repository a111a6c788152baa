#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! TDA Streamer - Streaming Session Engine
//!
//! A client for the brokerage streaming service. One WebSocket session
//! carries level one quotes, option quotes, one-minute bars, time and
//! sales, and account activity; subscriptions register typed consumer
//! callbacks and survive reconnects.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data model
//!   - `fields`: Per-domain field taxonomy and value coercion
//!   - `record`: Canonical records and order status
//!   - `subscription`: Subscription descriptors and the registry
//!   - `session`: Session lifecycle states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Principal provider, transport and connection interfaces
//!   - `services`: Record dispatch to consumers
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `streamer`: Wire codec, correlator, session worker, WebSocket transport
//!   - `principal`: File-backed principal provider
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                 ┌────────────┐    ┌─────────┐    ┌────────────┐
//! Streamer WS ───►│ Connection │───►│  Codec  │───►│ Dispatcher │──► Consumers
//!                 └────────────┘    └─────────┘    └────────────┘
//!                        ▲                               │
//!                        │ SUBS / UNSUBS / QOS           │ registry
//!                 ┌──────┴─────┐                   ┌─────┴──────┐
//!                 │ Correlator │◄──────────────────│  Session   │◄── caller
//!                 └────────────┘                   └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Streaming data model with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::fields::{
    AccountField, ChartField, Domain, Field, FieldLookup, FieldValue, MalformedFieldError,
    OptionField, QuoteField, TimeSaleField, resolve_by_index, resolve_by_name,
};
pub use domain::record::{CanonicalRecord, OrderStatus};
pub use domain::session::SessionState;
pub use domain::subscription::{
    ConfigurationError, ConsumerBinding, ConsumerContext, ConsumerError, SubscriptionDescriptor,
    SubscriptionRegistry, SymbolKeys,
};

// Ports
pub use application::ports::{
    Connection, PrincipalError, PrincipalProvider, PrincipalRequest, StreamerPrincipal,
    Transport, TransportError,
};

// Streaming session
pub use infrastructure::streamer::{
    QosLevel, SessionConfig, StreamError, StreamSession, WsTransport,
};

// Principal
pub use infrastructure::principal::FilePrincipalProvider;

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamerConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
