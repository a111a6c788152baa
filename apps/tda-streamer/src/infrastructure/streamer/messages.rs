//! Streamer Wire Messages
//!
//! Serde types for the JSON frames exchanged with the streamer.
//!
//! # Outbound
//!
//! Every control request travels in an envelope:
//!
//! ```json
//! {"requests": [{"service": "QUOTE", "command": "SUBS", "requestid": 3,
//!   "account": "1001", "source": "app1",
//!   "parameters": {"keys": "SPY,QQQ", "fields": "0,1,2"}}]}
//! ```
//!
//! # Inbound
//!
//! - `{"notify": [...]}`: heartbeat
//! - `{"response": [{"service", "command", "requestid", "content": {"code", "msg"}}]}`
//! - `{"data": [{"service", "timestamp", "command", "content": [...]}]}`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use super::codec::CodecError;
use crate::domain::fields::Domain;

/// Service name for session-level commands.
pub const ADMIN_SERVICE: &str = "ADMIN";

// =============================================================================
// Commands and QoS
// =============================================================================

/// Control command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    /// Authenticate the session.
    Login,
    /// End the session.
    Logout,
    /// Change the update rate.
    Qos,
    /// Subscribe (replaces any previous subscription of the service).
    Subs,
    /// Unsubscribe keys.
    Unsubs,
}

impl Command {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::Qos => "QOS",
            Self::Subs => "SUBS",
            Self::Unsubs => "UNSUBS",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Update rate negotiated with the streamer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QosLevel {
    /// 500 ms.
    #[default]
    Express,
    /// 750 ms.
    RealTime,
    /// 1 s.
    Fast,
    /// 1.5 s.
    Moderate,
    /// 3 s.
    Slow,
    /// 5 s.
    Delayed,
}

impl QosLevel {
    /// Wire value, a single digit.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Express => "0",
            Self::RealTime => "1",
            Self::Fast => "2",
            Self::Moderate => "3",
            Self::Slow => "4",
            Self::Delayed => "5",
        }
    }
}

impl FromStr for QosLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "express" | "0" => Ok(Self::Express),
            "real_time" | "realtime" | "1" => Ok(Self::RealTime),
            "fast" | "2" => Ok(Self::Fast),
            "moderate" | "3" => Ok(Self::Moderate),
            "slow" | "4" => Ok(Self::Slow),
            "delayed" | "5" => Ok(Self::Delayed),
            other => Err(format!("unknown QoS level: {other}")),
        }
    }
}

// =============================================================================
// Outbound Requests
// =============================================================================

/// Account and application identifying every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSource {
    /// Account id.
    pub account: String,
    /// Application id.
    pub source: String,
}

/// One control request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRequest {
    /// Target service.
    pub service: &'static str,
    /// Command verb.
    pub command: Command,
    /// Correlation id, assigned when the request is sent.
    pub requestid: u64,
    /// Account id.
    pub account: String,
    /// Application id.
    pub source: String,
    /// Command parameters.
    pub parameters: Map<String, Value>,
}

impl StreamRequest {
    fn new(
        service: &'static str,
        command: Command,
        origin: &RequestSource,
        parameters: Map<String, Value>,
    ) -> Self {
        Self {
            service,
            command,
            requestid: 0,
            account: origin.account.clone(),
            source: origin.source.clone(),
            parameters,
        }
    }

    /// `ADMIN/LOGIN` with an already-encoded credential.
    #[must_use]
    pub fn login(
        origin: &RequestSource,
        credential: String,
        token: String,
        qos: QosLevel,
    ) -> Self {
        let mut parameters = Map::new();
        parameters.insert("credential".into(), Value::String(credential));
        parameters.insert("token".into(), Value::String(token));
        parameters.insert("version".into(), json!("1.0"));
        parameters.insert("qoslevel".into(), json!(qos.as_wire()));
        Self::new(ADMIN_SERVICE, Command::Login, origin, parameters)
    }

    /// `ADMIN/LOGOUT`.
    #[must_use]
    pub fn logout(origin: &RequestSource) -> Self {
        Self::new(ADMIN_SERVICE, Command::Logout, origin, Map::new())
    }

    /// `ADMIN/QOS`.
    #[must_use]
    pub fn qos(origin: &RequestSource, level: QosLevel) -> Self {
        let mut parameters = Map::new();
        parameters.insert("qoslevel".into(), json!(level.as_wire()));
        Self::new(ADMIN_SERVICE, Command::Qos, origin, parameters)
    }

    /// `<service>/SUBS`.
    #[must_use]
    pub fn subscribe(
        origin: &RequestSource,
        domain: Domain,
        keys: String,
        fields: String,
    ) -> Self {
        let mut parameters = Map::new();
        parameters.insert("keys".into(), Value::String(keys));
        parameters.insert("fields".into(), Value::String(fields));
        Self::new(domain.service(), Command::Subs, origin, parameters)
    }

    /// `<service>/UNSUBS`.
    #[must_use]
    pub fn unsubscribe(origin: &RequestSource, domain: Domain, keys: String) -> Self {
        let mut parameters = Map::new();
        parameters.insert("keys".into(), Value::String(keys));
        Self::new(domain.service(), Command::Unsubs, origin, parameters)
    }

    /// Set the correlation id.
    #[must_use]
    pub const fn with_request_id(mut self, requestid: u64) -> Self {
        self.requestid = requestid;
        self
    }

    /// Serialize inside a `requests` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&RequestEnvelope {
            requests: std::slice::from_ref(self),
        })?)
    }
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    requests: &'a [StreamRequest],
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// Acknowledgement of a control request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlResponse {
    /// Service the response belongs to.
    #[serde(default)]
    pub service: Option<String>,
    /// Command being acknowledged.
    #[serde(default)]
    pub command: Option<String>,
    /// Correlation id, when echoed. Accepts numbers and numeric strings.
    #[serde(default, deserialize_with = "lenient_request_id")]
    pub requestid: Option<u64>,
    /// Status.
    #[serde(default)]
    pub content: Option<ResponseContent>,
}

/// Status of a control response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseContent {
    /// Zero on success.
    pub code: i64,
    /// Human readable status.
    #[serde(default)]
    pub msg: Option<String>,
}

impl ControlResponse {
    /// Status code, if the response carries content.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        self.content.as_ref().map(|c| c.code)
    }

    /// Status message, or an empty string.
    #[must_use]
    pub fn message(&self) -> &str {
        self.content
            .as_ref()
            .and_then(|c| c.msg.as_deref())
            .unwrap_or_default()
    }
}

/// One service's payload inside a data frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataMessage {
    /// Service tag.
    #[serde(default)]
    pub service: Option<String>,
    /// Server timestamp, epoch millis.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Command tag, usually `SUBS`.
    #[serde(default)]
    pub command: Option<String>,
    /// Positional records, as an array or a single object.
    #[serde(default)]
    pub content: Value,
}

impl DataMessage {
    /// Domain named by the service tag.
    #[must_use]
    pub fn domain(&self) -> Option<Domain> {
        self.service.as_deref().and_then(Domain::from_service)
    }
}

fn lenient_request_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn origin() -> RequestSource {
        RequestSource {
            account: "1001".into(),
            source: "app1".into(),
        }
    }

    #[test]
    fn subscribe_envelope_shape() {
        let request = StreamRequest::subscribe(
            &origin(),
            Domain::ChartBar,
            "XYZ,ABC".into(),
            "0,1,2".into(),
        )
        .with_request_id(7);
        let encoded: Value = serde_json::from_str(&request.encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({"requests": [{
                "service": "CHART_EQUITY",
                "command": "SUBS",
                "requestid": 7,
                "account": "1001",
                "source": "app1",
                "parameters": {"keys": "XYZ,ABC", "fields": "0,1,2"}
            }]})
        );
    }

    #[test]
    fn login_parameters() {
        let request = StreamRequest::login(&origin(), "cred".into(), "tok".into(), QosLevel::Fast);
        assert_eq!(request.service, ADMIN_SERVICE);
        assert_eq!(request.command, Command::Login);
        assert_eq!(
            Value::Object(request.parameters),
            json!({"credential": "cred", "token": "tok", "version": "1.0", "qoslevel": "2"})
        );
    }

    #[test]
    fn logout_and_qos() {
        let logout = StreamRequest::logout(&origin());
        assert!(logout.parameters.is_empty());
        assert_eq!(logout.command.as_str(), "LOGOUT");

        let qos = StreamRequest::qos(&origin(), QosLevel::Delayed);
        assert_eq!(qos.parameters.get("qoslevel"), Some(&json!("5")));
    }

    #[test_case("express", QosLevel::Express)]
    #[test_case("REAL_TIME", QosLevel::RealTime)]
    #[test_case("real-time", QosLevel::RealTime)]
    #[test_case("3", QosLevel::Moderate)]
    #[test_case(" slow ", QosLevel::Slow)]
    fn qos_parsing(raw: &str, expected: QosLevel) {
        assert_eq!(raw.parse::<QosLevel>().unwrap(), expected);
    }

    #[test]
    fn qos_rejects_unknown() {
        assert!("turbo".parse::<QosLevel>().is_err());
    }

    #[test]
    fn response_request_id_is_lenient() {
        let numeric: ControlResponse =
            serde_json::from_value(json!({"requestid": 4, "content": {"code": 0}})).unwrap();
        let text: ControlResponse =
            serde_json::from_value(json!({"requestid": "4", "content": {"code": 0}})).unwrap();
        let garbage: ControlResponse =
            serde_json::from_value(json!({"requestid": "x", "content": {"code": 0}})).unwrap();
        assert_eq!(numeric.requestid, Some(4));
        assert_eq!(text.requestid, Some(4));
        assert_eq!(garbage.requestid, None);
    }

    #[test]
    fn response_without_optional_parts() {
        let response: ControlResponse =
            serde_json::from_value(json!({"content": {"code": 3, "msg": "bad token"}})).unwrap();
        assert_eq!(response.code(), Some(3));
        assert_eq!(response.message(), "bad token");
        assert!(response.service.is_none());
    }

    #[test]
    fn data_message_domain() {
        let message: DataMessage =
            serde_json::from_value(json!({"service": "QUOTE", "content": []})).unwrap();
        assert_eq!(message.domain(), Some(Domain::Quote));

        let unknown: DataMessage =
            serde_json::from_value(json!({"service": "NEWS_HEADLINE"})).unwrap();
        assert_eq!(unknown.domain(), None);
        assert!(unknown.content.is_null());
    }
}
