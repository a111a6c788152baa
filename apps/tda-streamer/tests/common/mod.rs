//! Shared fixtures for session integration tests.
//!
//! [`ScriptedTransport`] hands out in-memory connections whose far end is a
//! [`ServerEnd`] driven by the test, playing the streamer.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use tda_streamer::{
    CanonicalRecord, Connection, ConsumerBinding, PrincipalError, PrincipalProvider,
    PrincipalRequest, SessionConfig, StreamerPrincipal, Transport, TransportError,
};

/// How long a scripted server waits for the client before failing the test.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Principal
// =============================================================================

/// Principal with one account and one subscription key.
pub fn principal() -> StreamerPrincipal {
    serde_json::from_value(json!({
        "userId": "user1",
        "streamerInfo": {
            "streamerSocketUrl": "streamer.example.com",
            "token": "tok",
            "tokenTimestamp": "2019-10-31T17:24:36+0000",
            "userGroup": "ACCT",
            "accessLevel": "ACCT",
            "acl": "AKBP",
            "appId": "app1"
        },
        "streamerSubscriptionKeys": {"keys": [{"key": "sub-key-1"}]},
        "accounts": [{
            "accountId": "1001",
            "company": "AMER",
            "segment": "ADVNCED",
            "accountCdDomainId": "A1"
        }]
    }))
    .unwrap()
}

mockall::mock! {
    pub Provider {}

    #[async_trait]
    impl PrincipalProvider for Provider {
        async fn get_principal(
            &self,
            request: &PrincipalRequest,
        ) -> Result<StreamerPrincipal, PrincipalError>;
    }
}

/// Provider that always returns [`principal`].
pub fn provider() -> Arc<MockProvider> {
    let mut provider = MockProvider::new();
    provider
        .expect_get_principal()
        .returning(|_| Ok(principal()));
    Arc::new(provider)
}

/// Session tuning with short timeouts and a fast, bounded reconnect.
pub fn config() -> SessionConfig {
    let mut config = SessionConfig {
        control_timeout: Duration::from_secs(2),
        first_data_timeout: Duration::from_millis(200),
        logout_timeout: Duration::from_secs(1),
        ..SessionConfig::default()
    };
    config.reconnect.initial_delay = Duration::from_millis(10);
    config.reconnect.max_delay = Duration::from_millis(50);
    config.reconnect.jitter_factor = 0.0;
    config.reconnect.max_attempts = 3;
    config
}

// =============================================================================
// Transport
// =============================================================================

type Inbound = Result<String, TransportError>;

/// Transport serving pre-registered connections in order.
///
/// Once the queue is empty every connect fails.
#[derive(Default)]
pub struct ScriptedTransport {
    links: Mutex<VecDeque<ScriptedConnection>>,
    uris: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a connection and return the server side of it.
    pub fn push_link(&self) -> ServerEnd {
        let (frames, inbound) = mpsc::unbounded_channel();
        let (outbound, requests) = mpsc::unbounded_channel();
        self.links.lock().push_back(ScriptedConnection { inbound, outbound });
        ServerEnd { requests, frames }
    }

    /// URIs passed to `connect`, in call order.
    pub fn connected_uris(&self) -> Vec<String> {
        self.uris.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, uri: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.uris.lock().push(uri.to_string());
        let link = self.links.lock().pop_front();
        link.map(|conn| Box::new(conn) as Box<dyn Connection>)
            .ok_or_else(|| TransportError::Connect("connection refused".to_string()))
    }
}

struct ScriptedConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Send("server gone".to_string()))
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        self.inbound.recv().await.unwrap_or(Err(TransportError::Closed))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inbound.close();
        Ok(())
    }
}

// =============================================================================
// Server End
// =============================================================================

/// The streamer's side of a scripted connection.
pub struct ServerEnd {
    requests: mpsc::UnboundedReceiver<String>,
    frames: mpsc::UnboundedSender<Inbound>,
}

impl ServerEnd {
    /// Next request sent by the client, unwrapped from its envelope.
    pub async fn next_request(&mut self) -> Value {
        let raw = tokio::time::timeout(STEP_TIMEOUT, self.requests.recv())
            .await
            .expect("client sent nothing")
            .expect("client hung up");
        let mut envelope: Value = serde_json::from_str(&raw).unwrap();
        envelope["requests"][0].take()
    }

    /// Whether the client sent anything not yet read.
    pub fn has_pending_request(&mut self) -> bool {
        !self.requests.is_empty()
    }

    /// Read the next request and acknowledge it.
    pub async fn accept_next(&mut self) -> Value {
        let request = self.next_request().await;
        self.ack(&request);
        request
    }

    /// Read the next request and refuse it.
    pub async fn reject_next(&mut self, code: i64, msg: &str) -> Value {
        let request = self.next_request().await;
        self.respond(&request, code, msg);
        request
    }

    /// Acknowledge `request` with code 0.
    pub fn ack(&self, request: &Value) {
        self.respond(request, 0, "ok");
    }

    /// Answer `request` with the given status.
    pub fn respond(&self, request: &Value, code: i64, msg: &str) {
        self.push(&json!({
            "response": [{
                "service": request["service"],
                "command": request["command"],
                "requestid": request["requestid"],
                "timestamp": 1_700_000_000_000_i64,
                "content": {"code": code, "msg": msg}
            }]
        }));
    }

    /// Send a data frame for one service.
    pub fn data(&self, service: &str, content: Value) {
        self.push(&json!({
            "data": [{
                "service": service,
                "timestamp": 1_700_000_000_000_i64,
                "command": "SUBS",
                "content": content
            }]
        }));
    }

    /// Send a heartbeat.
    pub fn heartbeat(&self) {
        self.push(&json!({"notify": [{"heartbeat": "1700000000000"}]}));
    }

    /// Fail the client's next receive.
    pub fn reset(&self) {
        let _ = self.frames.send(Err(TransportError::Receive(
            "connection reset by peer".to_string(),
        )));
    }

    fn push(&self, frame: &Value) {
        let _ = self.frames.send(Ok(frame.to_string()));
    }
}

// =============================================================================
// Consumers
// =============================================================================

/// Consumer appending every record it sees to a shared list.
pub fn collector() -> (ConsumerBinding, Arc<Mutex<Vec<CanonicalRecord>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let binding = ConsumerBinding::from_fn(move |records, _| {
        sink.lock().extend_from_slice(records);
        Ok(())
    });
    (binding, seen)
}
