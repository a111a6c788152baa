//! TDA Streamer Binary
//!
//! Opens a streaming session, subscribes level one quotes for the configured
//! symbols plus account activity, and logs every record until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tda-streamer
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TDA_PRINCIPAL_PATH`: Path to the user principals JSON document
//!
//! ## Optional
//! - `TDA_ACCOUNT_ID`: Account to log in with (default: first account)
//! - `STREAMER_SYMBOLS`: Comma separated quote symbols (default: SPY)
//! - `STREAMER_QOS`: express | real_time | fast | moderate | slow | delayed
//! - `STREAMER_CONNECT_TIMEOUT_SECS`, `STREAMER_CONTROL_TIMEOUT_SECS`,
//!   `STREAMER_FIRST_DATA_TIMEOUT_SECS`, `STREAMER_STALE_AFTER_SECS`
//! - `STREAMER_RECONNECT_INITIAL_MS`, `STREAMER_RECONNECT_MAX_SECS`,
//!   `STREAMER_RECONNECT_MAX_ATTEMPTS` (0 = unlimited)
//! - `STREAMER_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9090)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: tda-streamer)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tda_streamer::infrastructure::telemetry;
use tda_streamer::{
    CanonicalRecord, ConsumerBinding, ConsumerContext, ConsumerError, FilePrincipalProvider,
    StreamSession, StreamerConfig, WsTransport, init_metrics,
};
use tokio::signal;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting TDA streamer");

    let config = StreamerConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        init_metrics(Some(addr))?;
        tracing::info!(addr = %addr, "Metrics listening");
    }

    let provider = Arc::new(FilePrincipalProvider::new(config.principal_path.clone()));
    let transport = Arc::new(WsTransport::new());
    let session = StreamSession::open(config.session_config(), provider, transport)
        .await
        .context("failed to open streaming session")?;

    let mut states = WatchStream::new(session.state_changes());
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            tracing::info!(state = %state, "Session state");
        }
    });

    session
        .subscribe_quotes(config.symbols.clone(), vec![ConsumerBinding::from_fn(log_records)])
        .await?;
    if let Err(e) = session
        .subscribe_account_activity(vec![ConsumerBinding::from_fn(log_records)])
        .await
    {
        tracing::warn!(error = %e, "Account activity unavailable");
    }

    tracing::info!(session_id = %session.session_id(), "Streamer ready");

    await_shutdown().await;

    session.close().await;
    tracing::info!("Streamer stopped");
    Ok(())
}

/// Consumer that logs each record.
#[allow(clippy::unnecessary_wraps)]
fn log_records(
    records: &[CanonicalRecord],
    _context: &ConsumerContext,
) -> Result<(), ConsumerError> {
    for record in records {
        tracing::info!(domain = %record.domain(), record = %record.to_named_json(), "Record");
    }
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamerConfig) {
    tracing::info!(
        principal_path = %config.principal_path.display(),
        account_id = config.account_id.as_deref().unwrap_or("<first>"),
        qos = ?config.qos,
        symbols = config.symbols.len(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        timeouts = ?config.timeouts,
        reconnect = ?config.reconnect,
        "Session tuning"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
