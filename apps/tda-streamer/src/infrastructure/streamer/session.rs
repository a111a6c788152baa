//! Streaming Session
//!
//! One authenticated streamer connection with its subscriptions, owned by a
//! single worker task.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  commands (mpsc + oneshot)  ┌─────────────────────────┐
//! │  StreamSession   │ ──────────────────────────▶ │         Worker          │
//! │  (caller handle) │ ◀────────────────────────── │ owns Connection         │
//! │  gate: Mutex     │     state (watch)           │ Correlator, Dispatcher  │
//! └──────────────────┘                             └─────────────────────────┘
//! ```
//!
//! The worker processes inbound frames strictly in arrival order. Control
//! calls from the handle are serialized by a gate, so at most one is in
//! flight; while it waits for its acknowledgement the worker keeps
//! dispatching data for every other domain.
//!
//! # States
//!
//! `Disconnected → Connecting → Authenticating → Active`. A lost socket
//! (peer close, receive error, or silence beyond the liveness threshold)
//! moves `Active → Reconnecting`; the worker then backs off, logs in again
//! and replays every registered subscription in registration order before
//! returning to `Active`. `close()` from any state ends in `Closed`.
//!
//! # Closing
//!
//! `close()` signals the worker before it queues behind the gate. A control
//! call still waiting for its acknowledgement, first data, or a reconnect
//! login returns [`StreamError::Closed`] at once; the worker then logs out
//! and tears the connection down.
//!
//! # First Data Processing
//!
//! A subscription created with `process_first_data` waits, after its
//! confirmation, for the next data frame and dispatches it before the
//! subscribe call returns. That frame is routed by the service tag it
//! carries, not by the domain just subscribed, so if the streamer sends
//! another domain's data first it reaches that domain's consumers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::codec;
use super::correlator::{Correlator, FrameSink};
use super::error::StreamError;
use super::liveness::{LivenessConfig, LivenessState};
use super::login::LoginPlan;
use super::messages::{DataMessage, QosLevel, RequestSource, StreamRequest};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Connection, PrincipalProvider, PrincipalRequest, Transport};
use crate::application::services::Dispatcher;
use crate::domain::fields::{Domain, Field};
use crate::domain::session::SessionState;
use crate::domain::subscription::{
    ConsumerBinding, SubscriptionDescriptor, SubscriptionRegistry, SymbolKeys,
};
use crate::infrastructure::metrics::{self, ReconnectOutcome};

const COMMAND_BUFFER: usize = 16;

// =============================================================================
// Configuration
// =============================================================================

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Account to log in with; the principal's first account when `None`.
    pub account_id: Option<String>,
    /// Quality of service requested at login.
    pub qos: QosLevel,
    /// Limit for the transport handshake.
    pub connect_timeout: Duration,
    /// Limit for each control acknowledgement.
    pub control_timeout: Duration,
    /// Limit for the first data frame after a subscribe.
    pub first_data_timeout: Duration,
    /// Limit for the logout acknowledgement on close.
    pub logout_timeout: Duration,
    /// Dead-socket detection.
    pub liveness: LivenessConfig,
    /// Backoff between reconnect attempts.
    pub reconnect: ReconnectConfig,
    /// Fields requested from the principal provider.
    pub principal_request: PrincipalRequest,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            account_id: None,
            qos: QosLevel::default(),
            connect_timeout: Duration::from_secs(10),
            control_timeout: Duration::from_secs(10),
            first_data_timeout: Duration::from_secs(10),
            logout_timeout: Duration::from_secs(5),
            liveness: LivenessConfig::default(),
            reconnect: ReconnectConfig::default(),
            principal_request: PrincipalRequest::default(),
        }
    }
}

// =============================================================================
// Session Handle
// =============================================================================

type Reply = oneshot::Sender<Result<(), StreamError>>;

enum SessionCommand {
    Subscribe {
        descriptor: SubscriptionDescriptor,
        reply: Reply,
    },
    Unsubscribe {
        domain: Domain,
        reply: Reply,
    },
    SetQos {
        level: QosLevel,
        reply: Reply,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

impl SessionCommand {
    fn reject(self, error: StreamError) {
        match self {
            Self::Subscribe { reply, .. }
            | Self::Unsubscribe { reply, .. }
            | Self::SetQos { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Close { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

/// Handle to a running streaming session.
///
/// Dropping the handle cancels the worker without logging out; call
/// [`close`](Self::close) for an orderly shutdown.
pub struct StreamSession {
    session_id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    gate: Mutex<()>,
    state: watch::Receiver<SessionState>,
    registry: SubscriptionRegistry,
    cancel: CancellationToken,
    closing: CancellationToken,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    close_timeout: Duration,
}

impl StreamSession {
    /// Connect, log in and start the worker.
    ///
    /// The initial connection is not retried: any failure closes the
    /// session and is returned.
    ///
    /// # Errors
    ///
    /// - [`StreamError::AuthUnavailable`] if the principal cannot be obtained
    /// - [`StreamError::ConnectionLost`] if the transport fails
    /// - [`StreamError::Timeout`] if the handshake or login is not answered
    /// - [`StreamError::ControlRejected`] if the login is refused
    pub async fn open(
        config: SessionConfig,
        provider: Arc<dyn PrincipalProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StreamError> {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        Self::open_with_state(config, provider, transport, state_tx, state_rx).await
    }

    async fn open_with_state(
        config: SessionConfig,
        provider: Arc<dyn PrincipalProvider>,
        transport: Arc<dyn Transport>,
        state_tx: watch::Sender<SessionState>,
        state_rx: watch::Receiver<SessionState>,
    ) -> Result<Self, StreamError> {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("stream_session", session_id = %session_id);
        let registry = SubscriptionRegistry::new();
        let cancel = CancellationToken::new();
        let closing = cancel.child_token();
        let close_timeout = config.logout_timeout * 2;

        let worker = Worker {
            dispatcher: Dispatcher::new(registry.clone()),
            registry: registry.clone(),
            liveness: LivenessState::new(),
            state: state_tx,
            cancel: cancel.clone(),
            closing: closing.clone(),
            config,
            provider,
            transport,
        };

        let link = match worker.establish().instrument(span.clone()).await {
            Ok(link) => link,
            Err(e) => {
                span.in_scope(|| tracing::error!(error = %e, "Failed to open session"));
                worker.finish();
                return Err(e);
            }
        };
        worker.set_state(SessionState::Active);

        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(worker.run(link, command_rx).instrument(span));

        Ok(Self {
            session_id,
            commands,
            gate: Mutex::new(()),
            state: state_rx,
            registry,
            cancel,
            closing,
            worker: parking_lot::Mutex::new(Some(handle)),
            close_timeout,
        })
    }

    /// Identifier attached to this session's log spans.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] if the session closes first.
    pub async fn wait_for(&self, target: SessionState) -> Result<(), StreamError> {
        let mut changes = self.state.clone();
        let reached = *changes
            .wait_for(|state| *state == target || state.is_terminal())
            .await
            .map_err(|_| StreamError::Closed)?;
        if reached == target {
            Ok(())
        } else {
            Err(StreamError::Closed)
        }
    }

    /// The live subscriptions.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Subscribe a domain, replacing any existing subscription for it.
    ///
    /// # Errors
    ///
    /// - [`StreamError::Configuration`] for invalid arguments
    /// - [`StreamError::InvalidState`] unless the session is `Active`
    /// - [`StreamError::ControlRejected`] if the streamer refuses
    /// - [`StreamError::Timeout`] if no acknowledgement arrives
    /// - [`StreamError::ConnectionLost`] if the socket drops. When it drops
    ///   after the confirmation, while waiting for first data, the
    ///   subscription stays registered and is replayed on reconnect.
    /// - [`StreamError::Closed`] if the session is closed meanwhile
    pub async fn subscribe(
        &self,
        domain: Domain,
        fields: Vec<Field>,
        symbols: SymbolKeys,
        consumers: Vec<ConsumerBinding>,
        process_first_data: bool,
    ) -> Result<(), StreamError> {
        let descriptor = SubscriptionDescriptor::new(domain, fields, symbols, consumers)?
            .with_process_first_data(process_first_data);
        self.subscribe_descriptor(descriptor).await
    }

    /// Subscribe with a prepared descriptor.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub async fn subscribe_descriptor(
        &self,
        descriptor: SubscriptionDescriptor,
    ) -> Result<(), StreamError> {
        self.control(|reply| SessionCommand::Subscribe { descriptor, reply })
            .await
    }

    /// Remove a domain's subscription. Unknown domains are a no-op.
    ///
    /// Data for the domain stops being delivered as soon as the request is
    /// sent, before the streamer acknowledges it.
    ///
    /// # Errors
    ///
    /// - [`StreamError::InvalidState`] unless the session is `Active`
    /// - [`StreamError::ControlRejected`] or [`StreamError::Timeout`] from
    ///   the acknowledgement
    pub async fn unsubscribe(&self, domain: Domain) -> Result<(), StreamError> {
        self.control(|reply| SessionCommand::Unsubscribe { domain, reply })
            .await
    }

    /// Change the quality of service. Later reconnects log in with the new
    /// level.
    ///
    /// # Errors
    ///
    /// Same as [`unsubscribe`](Self::unsubscribe).
    pub async fn set_qos(&self, level: QosLevel) -> Result<(), StreamError> {
        self.control(|reply| SessionCommand::SetQos { level, reply })
            .await
    }

    /// Level one equity quotes with the default field set.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub async fn subscribe_quotes<I, S>(
        &self,
        symbols: I,
        consumers: Vec<ConsumerBinding>,
    ) -> Result<(), StreamError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        self.subscribe_market(Domain::Quote, SymbolKeys::symbols(symbols), consumers)
            .await
    }

    /// One-minute equity bars with the default field set.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub async fn subscribe_chart_equity<I, S>(
        &self,
        symbols: I,
        consumers: Vec<ConsumerBinding>,
    ) -> Result<(), StreamError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        self.subscribe_market(Domain::ChartBar, SymbolKeys::symbols(symbols), consumers)
            .await
    }

    /// Level one option quotes with the default field set.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub async fn subscribe_options<I, S>(
        &self,
        symbols: I,
        consumers: Vec<ConsumerBinding>,
    ) -> Result<(), StreamError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        self.subscribe_market(
            Domain::OptionContract,
            SymbolKeys::symbols(symbols),
            consumers,
        )
        .await
    }

    /// Equity time and sales with the default field set.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub async fn subscribe_timesale_equity<I, S>(
        &self,
        symbols: I,
        consumers: Vec<ConsumerBinding>,
    ) -> Result<(), StreamError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        self.subscribe_market(Domain::TimeSale, SymbolKeys::symbols(symbols), consumers)
            .await
    }

    /// Order activity for the logged-in account, keyed by the principal's
    /// streamer subscription key.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe). Fails with
    /// [`StreamError::Configuration`] when the principal has no key.
    pub async fn subscribe_account_activity(
        &self,
        consumers: Vec<ConsumerBinding>,
    ) -> Result<(), StreamError> {
        let domain = Domain::AccountActivity;
        self.subscribe(
            domain,
            domain.default_stream_fields(),
            SymbolKeys::PrincipalKey,
            consumers,
            false,
        )
        .await
    }

    async fn subscribe_market(
        &self,
        domain: Domain,
        symbols: SymbolKeys,
        consumers: Vec<ConsumerBinding>,
    ) -> Result<(), StreamError> {
        self.subscribe(domain, domain.default_stream_fields(), symbols, consumers, true)
            .await
    }

    /// Log out, close the connection and stop the worker. Idempotent.
    ///
    /// A control call in flight is interrupted and returns
    /// [`StreamError::Closed`].
    pub async fn close(&self) {
        self.closing.cancel();
        let _gate = self.gate.lock().await;

        if !self.state().is_terminal() {
            let (reply, done) = oneshot::channel();
            if self
                .commands
                .send(SessionCommand::Close { reply })
                .await
                .is_ok()
                && tokio::time::timeout(self.close_timeout, done).await.is_err()
            {
                tracing::warn!(
                    session_id = %self.session_id,
                    "Session did not close in time, cancelling"
                );
            }
        }

        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            tracing::error!(session_id = %self.session_id, error = %e, "Session worker failed");
        }
    }

    async fn control<F>(&self, command: F) -> Result<(), StreamError>
    where
        F: FnOnce(Reply) -> SessionCommand,
    {
        let _gate = self.gate.lock().await;
        if self.closing.is_cancelled() {
            return Err(StreamError::Closed);
        }
        match self.state() {
            SessionState::Active => {}
            SessionState::Closed => return Err(StreamError::Closed),
            other => return Err(StreamError::InvalidState(other)),
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| StreamError::Closed)?;
        response.await.map_err(|_| StreamError::Closed)?
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("subscriptions", &self.registry.domains())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Worker
// =============================================================================

/// An authenticated connection.
struct Link {
    conn: Box<dyn Connection>,
    origin: RequestSource,
    subscription_key: Option<String>,
    correlator: Correlator,
}

impl Link {
    async fn close_quietly(&mut self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "Error closing connection");
        }
    }
}

/// Why the serve loop stopped.
enum Exit {
    Lost(String),
    Shutdown(Option<oneshot::Sender<()>>),
}

/// Stops the reconnect loop, carrying the close reply if one is pending.
type Stop = Option<oneshot::Sender<()>>;

struct Worker {
    config: SessionConfig,
    provider: Arc<dyn PrincipalProvider>,
    transport: Arc<dyn Transport>,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    liveness: LivenessState,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    /// Fired by `close()`. Interrupts control waits but not the serve loop,
    /// which still has to pick up the close command and log out.
    closing: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut link: Link, mut commands: mpsc::Receiver<SessionCommand>) {
        let reply = loop {
            match self.serve(&mut link, &mut commands).await {
                Exit::Shutdown(reply) => {
                    if reply.is_some() {
                        self.logout(&mut link).await;
                    }
                    link.close_quietly().await;
                    break reply;
                }
                Exit::Lost(reason) => {
                    tracing::warn!(reason = %reason, "Connection lost");
                    link.close_quietly().await;
                    match self.reconnect(&mut commands).await {
                        Ok(fresh) => link = fresh,
                        Err(reply) => break reply,
                    }
                }
            }
        };

        self.finish();
        commands.close();
        while let Ok(command) = commands.try_recv() {
            command.reject(StreamError::Closed);
        }
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    /// Connect and log in. Leaves the state at `Authenticating` on success.
    async fn establish(&self) -> Result<Link, StreamError> {
        self.set_state(SessionState::Connecting);

        let principal = self
            .provider
            .get_principal(&self.config.principal_request)
            .await?;
        let plan = LoginPlan::new(&principal, self.config.account_id.as_deref(), self.config.qos)?;
        tracing::info!(uri = %plan.uri, account = %plan.origin.account, "Connecting to streamer");

        let handshake = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&plan.uri),
        );
        let conn = tokio::select! {
            biased;
            () = self.closing.cancelled() => return Err(StreamError::Closed),
            result = handshake => match result {
                Ok(conn) => conn?,
                Err(_) => {
                    return Err(StreamError::Timeout {
                        operation: "connect",
                        after: self.config.connect_timeout,
                    });
                }
            },
        };

        self.set_state(SessionState::Authenticating);
        self.liveness.reset();
        let mut link = Link {
            conn,
            origin: plan.origin,
            subscription_key: principal.subscription_key().map(str::to_string),
            correlator: Correlator::new(),
        };

        let mut router = self.router();
        let login = link
            .correlator
            .send_and_await(
                link.conn.as_mut(),
                plan.request,
                self.config.control_timeout,
                &mut router,
                &self.closing,
            )
            .await;
        if let Err(e) = login {
            link.close_quietly().await;
            return Err(e);
        }

        tracing::info!(qos = ?self.config.qos, "Logged in");
        Ok(link)
    }

    async fn serve(
        &mut self,
        link: &mut Link,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Exit {
        let mut watchdog = tokio::time::interval(self.config.liveness.check_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Exit::Shutdown(None),
                command = commands.recv() => {
                    let Some(command) = command else {
                        return Exit::Shutdown(None);
                    };
                    if let Some(exit) = self.handle(link, command).await {
                        return exit;
                    }
                }
                frame = link.conn.receive() => match frame {
                    Ok(raw) => self.route(&raw),
                    Err(e) => return Exit::Lost(e.to_string()),
                },
                _ = watchdog.tick() => {
                    if self.liveness.is_stale(self.config.liveness.stale_after) {
                        return Exit::Lost(format!(
                            "no frames for {:?}",
                            self.liveness.time_since_frame()
                        ));
                    }
                }
            }
        }
    }

    fn route(&self, raw: &str) {
        let frame = codec::Frame::classify(raw);
        let mut router = self.router();
        router.on_frame(frame.kind());
        match frame {
            codec::Frame::Data(messages) => router.on_data(messages),
            codec::Frame::Response(responses) => {
                responses.iter().for_each(super::correlator::log_stray);
            }
            codec::Frame::Heartbeat => {}
            codec::Frame::Unknown => tracing::trace!("Ignoring unrecognised frame"),
        }
    }

    async fn handle(&mut self, link: &mut Link, command: SessionCommand) -> Option<Exit> {
        match command {
            SessionCommand::Subscribe { descriptor, reply } => {
                let result = self.subscribe(link, descriptor).await;
                respond(reply, result)
            }
            SessionCommand::Unsubscribe { domain, reply } => {
                let result = self.unsubscribe(link, domain).await;
                respond(reply, result)
            }
            SessionCommand::SetQos { level, reply } => {
                let result = self.set_qos(link, level).await;
                respond(reply, result)
            }
            SessionCommand::Close { reply } => Some(Exit::Shutdown(Some(reply))),
        }
    }

    async fn subscribe(
        &self,
        link: &mut Link,
        descriptor: SubscriptionDescriptor,
    ) -> Result<(), StreamError> {
        let domain = descriptor.domain();
        let keys = descriptor
            .symbols()
            .to_wire(link.subscription_key.as_deref())?;
        let request =
            StreamRequest::subscribe(&link.origin, domain, keys, descriptor.field_indices());

        let mut router = self.router();
        link.correlator
            .send_and_await(
                link.conn.as_mut(),
                request,
                self.config.control_timeout,
                &mut router,
                &self.closing,
            )
            .await?;

        let first_data = descriptor.process_first_data();
        let replaced = self.registry.put(descriptor).is_some();
        metrics::set_subscriptions(self.registry.len());
        tracing::info!(domain = %domain, replaced, "Subscribed");

        if first_data {
            self.process_first_data(link, domain).await?;
        }
        Ok(())
    }

    async fn process_first_data(
        &self,
        link: &mut Link,
        subscribed: Domain,
    ) -> Result<(), StreamError> {
        let mut router = self.router();
        let first = Correlator::await_data(
            link.conn.as_mut(),
            self.config.first_data_timeout,
            &mut router,
            &self.closing,
        )
        .await?;

        match first {
            Some(messages) => {
                for message in &messages {
                    if message.domain() != Some(subscribed) {
                        tracing::warn!(
                            domain = %subscribed,
                            service = message.service.as_deref().unwrap_or_default(),
                            "First data frame after subscribe belongs to another service"
                        );
                    }
                }
                router.on_data(messages);
            }
            None => tracing::warn!(
                domain = %subscribed,
                timeout = ?self.config.first_data_timeout,
                "No data frame followed the subscribe confirmation"
            ),
        }
        Ok(())
    }

    async fn unsubscribe(&self, link: &mut Link, domain: Domain) -> Result<(), StreamError> {
        let Some(descriptor) = self.registry.remove(domain) else {
            tracing::debug!(domain = %domain, "Not subscribed, nothing to remove");
            return Ok(());
        };
        metrics::set_subscriptions(self.registry.len());

        let keys = descriptor
            .symbols()
            .to_wire(link.subscription_key.as_deref())?;
        let request = StreamRequest::unsubscribe(&link.origin, domain, keys);

        let mut router = self.router();
        link.correlator
            .send_and_await(
                link.conn.as_mut(),
                request,
                self.config.control_timeout,
                &mut router,
                &self.closing,
            )
            .await?;

        tracing::info!(domain = %domain, "Unsubscribed");
        Ok(())
    }

    async fn set_qos(&mut self, link: &mut Link, level: QosLevel) -> Result<(), StreamError> {
        let request = StreamRequest::qos(&link.origin, level);
        let mut router = self.router();
        link.correlator
            .send_and_await(
                link.conn.as_mut(),
                request,
                self.config.control_timeout,
                &mut router,
                &self.closing,
            )
            .await?;

        tracing::info!(qos = ?level, "Quality of service changed");
        self.config.qos = level;
        Ok(())
    }

    async fn logout(&self, link: &mut Link) {
        let request = StreamRequest::logout(&link.origin);
        let mut router = self.router();
        // The session token may already be cancelled; logout gets its own.
        let result = link
            .correlator
            .send_and_await(
                link.conn.as_mut(),
                request,
                self.config.logout_timeout,
                &mut router,
                &CancellationToken::new(),
            )
            .await;
        match result {
            Ok(_) => tracing::info!("Logged out"),
            Err(e) => tracing::debug!(error = %e, "Logout not acknowledged"),
        }
    }

    // =========================================================================
    // Reconnect
    // =========================================================================

    async fn reconnect(
        &mut self,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<Link, Stop> {
        self.set_state(SessionState::Reconnecting);
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            let Some(delay) = policy.next_delay() else {
                tracing::error!(attempts = policy.attempt_count(), "Giving up on reconnect");
                metrics::record_reconnect(ReconnectOutcome::GaveUp);
                return Err(None);
            };
            let attempt = policy.attempt_count();
            tracing::info!(attempt, delay = ?delay, "Reconnecting");
            self.idle(delay, commands).await?;

            let error = match self.establish().await {
                Ok(mut link) => match self.replay(&mut link).await {
                    Ok(()) => {
                        tracing::info!(attempt, "Session re-established");
                        metrics::record_reconnect(ReconnectOutcome::Succeeded);
                        self.set_state(SessionState::Active);
                        return Ok(link);
                    }
                    Err(e) => {
                        link.close_quietly().await;
                        e
                    }
                },
                Err(e) => e,
            };

            match error {
                StreamError::Closed => return Err(None),
                StreamError::ControlRejected { code, msg } => {
                    tracing::error!(
                        code,
                        msg = %msg,
                        "Login rejected during reconnect, closing session"
                    );
                    metrics::record_reconnect(ReconnectOutcome::GaveUp);
                    return Err(None);
                }
                e => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    metrics::record_reconnect(ReconnectOutcome::Failed);
                    self.set_state(SessionState::Reconnecting);
                }
            }
        }
    }

    /// Sleep out a backoff delay while answering commands.
    async fn idle(
        &self,
        delay: Duration,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<(), Stop> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(None),
                command = commands.recv() => match command {
                    None => return Err(None),
                    Some(SessionCommand::Close { reply }) => return Err(Some(reply)),
                    Some(other) => {
                        other.reject(StreamError::InvalidState(SessionState::Reconnecting));
                    }
                },
                () = &mut sleep => return Ok(()),
            }
        }
    }

    /// Re-send every registered subscription, in registration order.
    ///
    /// A domain the streamer refuses stays registered and is tried again on
    /// the next reconnect. Only a lost connection or cancellation aborts.
    async fn replay(&self, link: &mut Link) -> Result<(), StreamError> {
        for descriptor in self.registry.all() {
            let domain = descriptor.domain();
            let keys = match descriptor
                .symbols()
                .to_wire(link.subscription_key.as_deref())
            {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(domain = %domain, error = %e, "Cannot replay subscription");
                    continue;
                }
            };
            let request =
                StreamRequest::subscribe(&link.origin, domain, keys, descriptor.field_indices());

            let mut router = self.router();
            let result = link
                .correlator
                .send_and_await(
                    link.conn.as_mut(),
                    request,
                    self.config.control_timeout,
                    &mut router,
                    &self.closing,
                )
                .await;
            match result {
                Ok(_) => tracing::info!(domain = %domain, "Replayed subscription"),
                Err(e @ (StreamError::ConnectionLost(_) | StreamError::Closed)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        domain = %domain,
                        error = %e,
                        "Replay failed, will retry on next reconnect"
                    );
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    const fn router(&self) -> Router<'_> {
        Router {
            dispatcher: &self.dispatcher,
            liveness: &self.liveness,
        }
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                tracing::warn!(from = %current, to = %next, "Ignoring invalid state transition");
                return false;
            }
            tracing::info!(from = %current, to = %next, "Session state changed");
            *current = next;
            true
        });
        if changed {
            metrics::set_session_state(next);
        }
    }

    /// Observers woken by `Closed` must already see an empty registry.
    fn finish(&self) {
        self.registry.clear();
        metrics::set_subscriptions(0);
        self.set_state(SessionState::Closed);
    }
}

fn respond(reply: Reply, result: Result<(), StreamError>) -> Option<Exit> {
    let lost = match &result {
        Err(StreamError::ConnectionLost(reason)) => Some(reason.clone()),
        _ => None,
    };
    let _ = reply.send(result);
    lost.map(Exit::Lost)
}

// =============================================================================
// Frame Routing
// =============================================================================

/// Feeds inbound traffic to the dispatcher and the liveness tracker.
struct Router<'a> {
    dispatcher: &'a Dispatcher,
    liveness: &'a LivenessState,
}

impl FrameSink for Router<'_> {
    fn on_frame(&mut self, kind: &'static str) {
        self.liveness.record_frame();
        metrics::record_frame(kind);
    }

    fn on_data(&mut self, messages: Vec<DataMessage>) {
        for message in &messages {
            deliver(self.dispatcher, message);
        }
    }
}

fn deliver(dispatcher: &Dispatcher, message: &DataMessage) {
    let Some((domain, records)) = codec::decode_message(message) else {
        tracing::trace!(
            service = message.service.as_deref().unwrap_or_default(),
            "Ignoring data for unknown service"
        );
        return;
    };

    match dispatcher.dispatch(domain, &records) {
        Some(report) => {
            metrics::record_dispatched(domain, u64::try_from(records.len()).unwrap_or(u64::MAX));
            for _ in 0..report.failed {
                metrics::record_consumer_failure(domain);
            }
        }
        None => tracing::trace!(domain = %domain, "No subscription, dropping data"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{MockPrincipalProvider, PrincipalError, TransportError};

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn connect(&self, _uri: &str) -> Result<Box<dyn Connection>, TransportError> {
            std::future::pending().await
        }
    }

    fn principal() -> crate::application::ports::StreamerPrincipal {
        serde_json::from_value(serde_json::json!({
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
            "accounts": [{
                "accountId": "1001",
                "company": "AMER",
                "segment": "ADVNCED",
                "accountCdDomainId": "A1"
            }]
        }))
        .unwrap()
    }

    /// Answers the login with a rejection, then stays silent.
    struct RejectingLogin;

    #[async_trait]
    impl Transport for RejectingLogin {
        async fn connect(&self, _uri: &str) -> Result<Box<dyn Connection>, TransportError> {
            Ok(Box::new(DeniedConnection { answered: false }))
        }
    }

    struct DeniedConnection {
        answered: bool,
    }

    #[async_trait]
    impl Connection for DeniedConnection {
        async fn send(&mut self, _text: String) -> Result<(), TransportError> {
            Ok(())
        }

        async fn receive(&mut self) -> Result<String, TransportError> {
            if self.answered {
                return std::future::pending().await;
            }
            self.answered = true;
            Ok(serde_json::json!({
                "response": [{
                    "service": "ADMIN",
                    "command": "LOGIN",
                    "requestid": "0",
                    "content": {"code": 3, "msg": "Login denied"}
                }]
            })
            .to_string())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn login_rejection_leaves_state_closed() {
        let mut provider = MockPrincipalProvider::new();
        provider
            .expect_get_principal()
            .times(1)
            .returning(|_| Ok(principal()));
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let mut observed = state_rx.clone();

        let err = StreamSession::open_with_state(
            SessionConfig::default(),
            Arc::new(provider),
            Arc::new(RejectingLogin),
            state_tx,
            state_rx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StreamError::ControlRejected { code: 3, .. }));
        assert_eq!(*observed.borrow_and_update(), SessionState::Closed);
    }

    #[tokio::test]
    async fn provider_failure_closes_without_connecting() {
        let mut provider = MockPrincipalProvider::new();
        provider
            .expect_get_principal()
            .times(1)
            .returning(|_| Err(PrincipalError::Unavailable("token expired".into())));

        let err = StreamSession::open(
            SessionConfig::default(),
            Arc::new(provider),
            Arc::new(Unreachable),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StreamError::AuthUnavailable(PrincipalError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_is_reported() {
        let mut provider = MockPrincipalProvider::new();
        provider
            .expect_get_principal()
            .returning(|_| Ok(principal()));

        let config = SessionConfig {
            connect_timeout: Duration::from_secs(3),
            ..SessionConfig::default()
        };
        let err = StreamSession::open(config, Arc::new(provider), Arc::new(Unreachable))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StreamError::Timeout { operation: "connect", after } if after == Duration::from_secs(3)
        ));
    }

    #[test]
    fn rejected_commands_answer_their_caller() {
        let (reply, mut response) = oneshot::channel();
        SessionCommand::Unsubscribe {
            domain: Domain::Quote,
            reply,
        }
        .reject(StreamError::InvalidState(SessionState::Reconnecting));
        assert!(matches!(
            response.try_recv(),
            Ok(Err(StreamError::InvalidState(SessionState::Reconnecting)))
        ));
    }

    #[test]
    fn lost_connection_ends_serving() {
        let (reply, _response) = oneshot::channel();
        let exit = respond(reply, Err(StreamError::ConnectionLost("reset".into())));
        assert!(matches!(exit, Some(Exit::Lost(reason)) if reason == "reset"));

        let (reply, _response) = oneshot::channel();
        assert!(respond(reply, Err(StreamError::Closed)).is_none());
    }
}
