//! Request/Response Correlator
//!
//! Sends one control request and waits for its acknowledgement while the
//! connection keeps delivering other traffic.
//!
//! # Pumping
//!
//! While waiting, every inbound frame is handled in arrival order:
//!
//! - heartbeats only refresh liveness
//! - data frames are forwarded to the [`FrameSink`] immediately, so other
//!   domains keep flowing during a slow subscribe
//! - responses that do not match the pending request are dropped
//!
//! # Matching
//!
//! A response matches when its `requestid` equals the pending id. The
//! streamer does not always echo ids (login rejections carry only
//! `content`), so without an id the service and command are compared when
//! present, and a bare response matches whatever is pending.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::codec::Frame;
use super::error::StreamError;
use super::messages::{Command, ControlResponse, DataMessage, StreamRequest};
use crate::application::ports::Connection;
use crate::infrastructure::metrics::{self, ControlOutcome};

/// Receiver for traffic that arrives while a control request is pending.
pub trait FrameSink {
    /// A frame of the given kind arrived.
    fn on_frame(&mut self, kind: &'static str);

    /// A data frame arrived.
    fn on_data(&mut self, messages: Vec<DataMessage>);
}

/// The request currently awaiting acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Id sent with the request.
    pub request_id: u64,
    /// Target service.
    pub service: &'static str,
    /// Command verb.
    pub command: Command,
}

impl PendingRequest {
    /// Whether `response` acknowledges this request.
    #[must_use]
    pub fn matches(&self, response: &ControlResponse) -> bool {
        if response.content.is_none() {
            return false;
        }
        if let Some(id) = response.requestid {
            return id == self.request_id;
        }
        let service_matches = response
            .service
            .as_deref()
            .is_none_or(|s| s.eq_ignore_ascii_case(self.service));
        let command_matches = response
            .command
            .as_deref()
            .is_none_or(|c| c.eq_ignore_ascii_case(self.command.as_str()));
        service_matches && command_matches
    }
}

/// Assigns request ids and runs control round-trips on one connection.
#[derive(Debug, Default)]
pub struct Correlator {
    next_id: u64,
}

impl Correlator {
    /// Start numbering from zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Take the next request id.
    pub const fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send `request` and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`StreamError::ControlRejected`] for a non-zero response code
    /// - [`StreamError::ConnectionLost`] if the socket fails
    /// - [`StreamError::Timeout`] if nothing matches within `timeout`
    /// - [`StreamError::Closed`] if `cancel` fires
    pub async fn send_and_await<S>(
        &mut self,
        conn: &mut dyn Connection,
        request: StreamRequest,
        timeout: Duration,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ControlResponse, StreamError>
    where
        S: FrameSink + ?Sized,
    {
        let request = request.with_request_id(self.next_request_id());
        let pending = PendingRequest {
            request_id: request.requestid,
            service: request.service,
            command: request.command,
        };
        let command = request.command.as_str();
        let started = Instant::now();

        let result = Self::round_trip(conn, &request, &pending, timeout, sink, cancel).await;

        let outcome = match &result {
            Ok(_) => ControlOutcome::Accepted,
            Err(StreamError::ControlRejected { .. }) => ControlOutcome::Rejected,
            Err(StreamError::Timeout { .. }) => ControlOutcome::TimedOut,
            Err(_) => ControlOutcome::Aborted,
        };
        metrics::record_control(command, outcome, started.elapsed());
        result
    }

    async fn round_trip<S>(
        conn: &mut dyn Connection,
        request: &StreamRequest,
        pending: &PendingRequest,
        timeout: Duration,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ControlResponse, StreamError>
    where
        S: FrameSink + ?Sized,
    {
        tracing::debug!(
            request_id = pending.request_id,
            service = pending.service,
            command = %pending.command,
            "Sending control request"
        );
        conn.send(request.encode()?).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let raw = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(StreamError::Closed),
                () = sleep_until(deadline) => {
                    return Err(StreamError::Timeout {
                        operation: pending.command.as_str(),
                        after: timeout,
                    });
                }
                frame = conn.receive() => frame?,
            };

            let frame = Frame::classify(&raw);
            sink.on_frame(frame.kind());
            match frame {
                Frame::Heartbeat | Frame::Unknown => {}
                Frame::Data(messages) => sink.on_data(messages),
                Frame::Response(responses) => {
                    for response in responses {
                        if pending.matches(&response) {
                            return accept(response);
                        }
                        log_stray(&response);
                    }
                }
            }
        }
    }

    /// Wait for the next data frame without forwarding it.
    ///
    /// Returns `Ok(None)` when nothing arrives within `timeout`. Responses
    /// seen meanwhile are treated as stray.
    ///
    /// # Errors
    ///
    /// [`StreamError::ConnectionLost`] or [`StreamError::Closed`].
    pub async fn await_data<S>(
        conn: &mut dyn Connection,
        timeout: Duration,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<DataMessage>>, StreamError>
    where
        S: FrameSink + ?Sized,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let raw = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(StreamError::Closed),
                () = sleep_until(deadline) => return Ok(None),
                frame = conn.receive() => frame?,
            };

            let frame = Frame::classify(&raw);
            sink.on_frame(frame.kind());
            match frame {
                Frame::Data(messages) => return Ok(Some(messages)),
                Frame::Response(responses) => responses.iter().for_each(log_stray),
                Frame::Heartbeat | Frame::Unknown => {}
            }
        }
    }
}

fn accept(response: ControlResponse) -> Result<ControlResponse, StreamError> {
    match response.code() {
        Some(0) | None => Ok(response),
        Some(code) => Err(StreamError::ControlRejected {
            code,
            msg: response.message().to_string(),
        }),
    }
}

/// Log a response nobody is waiting for.
pub fn log_stray(response: &ControlResponse) {
    match response.code() {
        Some(code) if code != 0 => tracing::warn!(
            service = response.service.as_deref().unwrap_or_default(),
            command = response.command.as_deref().unwrap_or_default(),
            request_id = ?response.requestid,
            code,
            msg = response.message(),
            "Unsolicited control response with error code"
        ),
        _ => tracing::debug!(
            service = response.service.as_deref().unwrap_or_default(),
            command = response.command.as_deref().unwrap_or_default(),
            request_id = ?response.requestid,
            "Dropping unsolicited control response"
        ),
    }
}
