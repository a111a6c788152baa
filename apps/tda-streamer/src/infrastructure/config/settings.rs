//! Streamer Configuration Settings
//!
//! Configuration for the streamer binary, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::streamer::liveness::LivenessConfig;
use crate::infrastructure::streamer::messages::QosLevel;
use crate::infrastructure::streamer::reconnect::ReconnectConfig;
use crate::infrastructure::streamer::session::SessionConfig;

/// Timeouts applied by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutSettings {
    /// Transport handshake.
    pub connect: Duration,
    /// Each control acknowledgement.
    pub control: Duration,
    /// First data frame after a subscribe.
    pub first_data: Duration,
    /// Silence before the connection is considered dead.
    pub stale_after: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            control: Duration::from_secs(10),
            first_data: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Ceiling for the delay.
    pub max_delay: Duration,
    /// Attempts per outage (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

/// Complete streamer configuration.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// JSON file holding the user principal.
    pub principal_path: PathBuf,
    /// Account to log in with.
    pub account_id: Option<String>,
    /// Quality of service requested at login.
    pub qos: QosLevel,
    /// Equity symbols to stream quotes for.
    pub symbols: Vec<String>,
    /// Session timeouts.
    pub timeouts: TimeoutSettings,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Prometheus exporter port (0 = disabled).
    pub metrics_port: u16,
}

impl StreamerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TDA_PRINCIPAL_PATH` is missing or empty, or if
    /// any variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let principal_path = lookup("TDA_PRINCIPAL_PATH")
            .ok_or_else(|| ConfigError::MissingEnvVar("TDA_PRINCIPAL_PATH".to_string()))?;
        if principal_path.trim().is_empty() {
            return Err(ConfigError::EmptyValue("TDA_PRINCIPAL_PATH".to_string()));
        }

        let account_id = lookup("TDA_ACCOUNT_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let qos = match lookup("STREAMER_QOS") {
            Some(raw) => raw.parse::<QosLevel>().map_err(|reason| ConfigError::InvalidValue {
                key: "STREAMER_QOS".to_string(),
                reason,
            })?,
            None => QosLevel::default(),
        };

        let symbols: Vec<String> = lookup("STREAMER_SYMBOLS")
            .unwrap_or_else(|| "SPY".to_string())
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Err(ConfigError::EmptyValue("STREAMER_SYMBOLS".to_string()));
        }

        let defaults = TimeoutSettings::default();
        let timeouts = TimeoutSettings {
            connect: parse_secs(&lookup, "STREAMER_CONNECT_TIMEOUT_SECS", defaults.connect)?,
            control: parse_secs(&lookup, "STREAMER_CONTROL_TIMEOUT_SECS", defaults.control)?,
            first_data: parse_secs(
                &lookup,
                "STREAMER_FIRST_DATA_TIMEOUT_SECS",
                defaults.first_data,
            )?,
            stale_after: parse_secs(&lookup, "STREAMER_STALE_AFTER_SECS", defaults.stale_after)?,
        };

        let defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            initial_delay: parse_env(&lookup, "STREAMER_RECONNECT_INITIAL_MS", None)?
                .map_or(defaults.initial_delay, Duration::from_millis),
            max_delay: parse_secs(&lookup, "STREAMER_RECONNECT_MAX_SECS", defaults.max_delay)?,
            max_attempts: parse_env(
                &lookup,
                "STREAMER_RECONNECT_MAX_ATTEMPTS",
                Some(defaults.max_attempts),
            )?
            .unwrap_or_default(),
        };

        let metrics_port =
            parse_env(&lookup, "STREAMER_METRICS_PORT", Some(9090))?.unwrap_or_default();

        Ok(Self {
            principal_path: PathBuf::from(principal_path),
            account_id,
            qos,
            symbols,
            timeouts,
            reconnect,
            metrics_port,
        })
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            account_id: self.account_id.clone(),
            qos: self.qos,
            connect_timeout: self.timeouts.connect,
            control_timeout: self.timeouts.control,
            first_data_timeout: self.timeouts.first_data,
            liveness: LivenessConfig::with_stale_after(self.timeouts.stale_after),
            reconnect: ReconnectConfig {
                initial_delay: self.reconnect.initial_delay,
                max_delay: self.reconnect.max_delay,
                max_attempts: self.reconnect.max_attempts,
                ..ReconnectConfig::default()
            },
            ..SessionConfig::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
}

fn parse_env<F, T>(lookup: &F, key: &str, default: Option<T>) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_env::<F, u64>(lookup, key, None)?.map_or(default, Duration::from_secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<StreamerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_only_principal_path() {
        let config = load(&[("TDA_PRINCIPAL_PATH", "principal.json")]).unwrap();
        assert_eq!(config.principal_path, PathBuf::from("principal.json"));
        assert_eq!(config.account_id, None);
        assert_eq!(config.qos, QosLevel::Express);
        assert_eq!(config.symbols, vec!["SPY".to_string()]);
        assert_eq!(config.timeouts, TimeoutSettings::default());
        assert_eq!(config.reconnect, ReconnectSettings::default());
        assert_eq!(config.metrics_port, 9090);
    }

    #[test]
    fn missing_principal_path() {
        assert!(matches!(
            load(&[]),
            Err(ConfigError::MissingEnvVar(key)) if key == "TDA_PRINCIPAL_PATH"
        ));
        assert!(matches!(
            load(&[("TDA_PRINCIPAL_PATH", " ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("TDA_PRINCIPAL_PATH", "/etc/tda/principal.json"),
            ("TDA_ACCOUNT_ID", "1002"),
            ("STREAMER_QOS", "slow"),
            ("STREAMER_SYMBOLS", "spy, qqq ,,iwm"),
            ("STREAMER_CONTROL_TIMEOUT_SECS", "3"),
            ("STREAMER_STALE_AFTER_SECS", "12"),
            ("STREAMER_RECONNECT_INITIAL_MS", "250"),
            ("STREAMER_RECONNECT_MAX_ATTEMPTS", "5"),
            ("STREAMER_METRICS_PORT", "0"),
        ])
        .unwrap();
        assert_eq!(config.account_id.as_deref(), Some("1002"));
        assert_eq!(config.qos, QosLevel::Slow);
        assert_eq!(config.symbols, vec!["SPY", "QQQ", "IWM"]);
        assert_eq!(config.metrics_port, 0);

        let session = config.session_config();
        assert_eq!(session.control_timeout, Duration::from_secs(3));
        assert_eq!(session.liveness.stale_after, Duration::from_secs(12));
        assert_eq!(session.liveness.check_interval, Duration::from_secs(2));
        assert_eq!(session.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(session.reconnect.max_attempts, 5);
        assert_eq!(session.qos, QosLevel::Slow);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = load(&[
            ("TDA_PRINCIPAL_PATH", "p.json"),
            ("STREAMER_CONNECT_TIMEOUT_SECS", "ten"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key, .. } if key == "STREAMER_CONNECT_TIMEOUT_SECS"
        ));

        let err = load(&[("TDA_PRINCIPAL_PATH", "p.json"), ("STREAMER_QOS", "turbo")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "STREAMER_QOS"));
    }
}
