// Collaboration session client: connection state machine with
// reconnection supervision.
//
// One client instance owns one transport and one handler registry.
// Concurrency hazards are handled with guard flags and state checks
// rather than locks: everything runs on the caller's task, and the only
// suspension points are network I/O.
//
// The caller drives an event pump: `next_event` receives frames while
// the session is open, and after an abnormal closure it performs the
// scheduled backoff attempts, one per call.

pub mod ops;

use std::time::Duration;

use tracing::{debug, error, info, warn};

use fresco_common::protocol::close::{ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use fresco_common::protocol::envelope::{Envelope, MessageKind};

use crate::auth::store::CredentialStore;
use crate::auth::token::{AuthApi, TokenManager};
use crate::config::{ClientConfig, ReconnectConfig};
use crate::dispatch::{Dispatcher, HandlerId, Interest};
use crate::error::{AuthError, ConnectError};
use crate::rest::RestAuthApi;
use crate::session::{FileSessionStore, SessionPersistence};
use crate::transport::ws::WsTransport;
use crate::transport::{CloseReason, Incoming, Transport};

// ── Reconnection policy ────────────────────────────────────────────

/// Backoff parameters for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt; attempt n waits `base * 2^(n-1)`.
    pub base_delay: Duration,
    /// Automatic attempts before surfacing `reconnection_failed`.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::from_millis(1000), max_attempts: 5 }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Backoff before the 1-indexed `attempt`. Uncapped: with the
    /// default ceiling of 5 the longest wait is 16s.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

// ── Connection state ───────────────────────────────────────────────

/// How the transport last closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// Deliberate shutdown by either party; no reconnection.
    Clean,
    /// Anything else; reconnection runs while attempts remain.
    Abnormal,
}

/// The connection controller's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed(Closure),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Lifecycle and message events surfaced by the event pump.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An inbound message, already fanned out to subscribers.
    Message(Envelope),
    /// The transport closed. Abnormal closures are followed by
    /// reconnection events while attempts remain.
    Closed { code: u16, clean: bool },
    /// A scheduled attempt failed; more remain. `attempt` is 0 for a
    /// failed manual retry that fell back to the schedule.
    Reconnecting { attempt: u32 },
    /// Reconnection succeeded. Operations sent while disconnected were
    /// dropped, so callers should request a canvas sync now.
    Reconnected,
    /// The attempt budget is exhausted; only `retry_connection` (or a
    /// fresh `connect`) continues from here.
    ReconnectionFailed,
    /// The refresh credential was rejected. Stored credentials are
    /// cleared; the application must route the user to sign-in.
    AuthRequired,
}

// ── Client ─────────────────────────────────────────────────────────

/// A collaboration session client.
///
/// Generic over the transport and the auth endpoint so tests can script
/// both; `CollabClient::with_defaults` wires the production stack.
pub struct CollabClient<T: Transport, A: AuthApi> {
    config: ClientConfig,
    policy: ReconnectPolicy,
    transport: T,
    tokens: TokenManager<A>,
    dispatcher: Dispatcher,
    persistence: SessionPersistence,
    state: ConnectionState,
    session_id: Option<String>,
    reconnect_attempts: u32,
    is_connecting: bool,
    is_reconnecting: bool,
    is_manual_retry: bool,
}

impl CollabClient<WsTransport, RestAuthApi> {
    /// Production client: WebSocket transport, REST auth endpoint,
    /// file-backed session records.
    pub fn with_defaults(
        config: ClientConfig,
        credentials: std::sync::Arc<dyn CredentialStore>,
    ) -> Self {
        let auth = RestAuthApi::new(&config);
        let tokens = TokenManager::new(credentials, auth);
        let persistence = match FileSessionStore::default_path() {
            Some(path) => SessionPersistence::new(Box::new(FileSessionStore::new(path))),
            None => SessionPersistence::in_memory(),
        };
        Self::new(config, WsTransport::new(), tokens, persistence)
    }
}

impl<T: Transport, A: AuthApi> CollabClient<T, A> {
    pub fn new(
        config: ClientConfig,
        transport: T,
        tokens: TokenManager<A>,
        mut persistence: SessionPersistence,
    ) -> Self {
        // Reattach to a recent session across restarts; stale records
        // are cleared by restore() itself.
        let session_id = persistence.restore();
        let policy = ReconnectPolicy::from_config(&config.reconnect);
        Self {
            config,
            policy,
            transport,
            tokens,
            dispatcher: Dispatcher::new(),
            persistence,
            state: ConnectionState::Idle,
            session_id,
            reconnect_attempts: 0,
            is_connecting: false,
            is_reconnecting: false,
            is_manual_retry: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_open()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting
    }

    /// Whether the in-flight attempt came from `retry_connection`.
    pub fn is_manual_retry(&self) -> bool {
        self.is_manual_retry
    }

    /// The current (or restored, reattachable) session id.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    // ── Subscriptions ──────────────────────────────────────────────

    /// Register a message handler; see [`Dispatcher::on`].
    pub fn on(
        &mut self,
        interest: impl Into<Interest>,
        handler: impl FnMut(Envelope) + Send + 'static,
    ) -> HandlerId {
        self.dispatcher.on(interest, handler)
    }

    /// Remove a handler registered with [`CollabClient::on`].
    pub fn off(&mut self, interest: impl Into<Interest>, id: HandlerId) -> bool {
        self.dispatcher.off(interest, id)
    }

    // ── Connection lifecycle ───────────────────────────────────────

    /// Connect to a collaboration session.
    ///
    /// No-op when already open or while another attempt is in flight.
    /// Persists the session id, resolves a valid access token
    /// (refreshing proactively), and opens the socket with the token in
    /// the connection URI.
    pub async fn connect(&mut self, session_id: &str) -> Result<(), ConnectError> {
        if self.state.is_open() {
            debug!(session_id, "already connected to a session; connect ignored");
            return Ok(());
        }
        if self.is_connecting {
            warn!(session_id, "connection attempt already in progress; connect ignored");
            return Ok(());
        }

        self.is_connecting = true;
        let result = self.connect_inner(session_id).await;
        self.is_connecting = false;

        if let Err(error) = &result {
            self.state = ConnectionState::Closed(Closure::Abnormal);
            if matches!(error, ConnectError::Auth(AuthError::AuthRequired)) {
                // The credentials are gone; a persisted session id must
                // not outlive them.
                self.persistence.clear();
                self.session_id = None;
            }
        }
        result
    }

    async fn connect_inner(&mut self, session_id: &str) -> Result<(), ConnectError> {
        self.state = ConnectionState::Connecting;
        self.session_id = Some(session_id.to_string());
        self.persistence.persist(session_id);

        let access_token = self.tokens.access_token().await?;
        let url = self.config.collaborate_url(session_id, &access_token)?;
        self.transport.open(url.as_str()).await?;

        self.reconnect_attempts = 0;
        self.state = ConnectionState::Open;
        info!(session_id, "collaboration session connected");
        Ok(())
    }

    /// Leave the session: clean close, all handlers removed, persisted
    /// record cleared. Idempotent.
    pub async fn disconnect(&mut self) {
        if matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            self.transport.close(NORMAL_CLOSURE).await;
        }
        self.state = ConnectionState::Closed(Closure::Clean);
        self.session_id = None;
        self.reconnect_attempts = 0;
        self.is_reconnecting = false;
        self.is_manual_retry = false;
        self.dispatcher.clear();
        self.persistence.clear();
        info!("collaboration session disconnected");
    }

    // ── Event pump ─────────────────────────────────────────────────

    /// Drive the session: receive the next inbound message while open,
    /// or perform the next scheduled reconnection attempt after an
    /// abnormal closure. Returns `None` when there is nothing left to
    /// do (idle, cleanly closed, or reconnection given up).
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            match self.state {
                ConnectionState::Open => match self.transport.recv().await {
                    Ok(Incoming::Frame(frame)) => {
                        if let Some(envelope) = self.dispatcher.dispatch_frame(&frame) {
                            return Some(SessionEvent::Message(envelope));
                        }
                        // Malformed frame dropped; keep pumping.
                    }
                    Ok(Incoming::Closed(close)) => return Some(self.handle_closure(close)),
                    Err(transport_error) => {
                        warn!(error = %transport_error, "collaboration transport failed");
                        return Some(self.handle_closure(CloseReason {
                            code: ABNORMAL_CLOSURE,
                            reason: transport_error.to_string(),
                        }));
                    }
                },
                ConnectionState::Closed(Closure::Abnormal) if self.is_reconnecting => {
                    if let Some(event) = self.reconnect_step().await {
                        return Some(event);
                    }
                    // Schedule was disarmed (disconnect raced the
                    // timer); re-evaluate state.
                }
                _ => return None,
            }
        }
    }

    fn handle_closure(&mut self, close: CloseReason) -> SessionEvent {
        if close.is_clean() {
            info!(code = close.code, "collaboration socket closed cleanly");
            self.state = ConnectionState::Closed(Closure::Clean);
            self.persistence.clear();
            SessionEvent::Closed { code: close.code, clean: true }
        } else {
            warn!(code = close.code, reason = %close.reason, "collaboration socket closed abnormally");
            self.state = ConnectionState::Closed(Closure::Abnormal);
            if self.reconnect_attempts < self.policy.max_attempts {
                self.is_reconnecting = true;
            }
            SessionEvent::Closed { code: close.code, clean: false }
        }
    }

    /// One scheduled reconnection attempt: wait out the backoff, then
    /// try to connect. Returns `None` when the schedule was disarmed.
    async fn reconnect_step(&mut self) -> Option<SessionEvent> {
        let Some(session_id) = self.session_id.clone() else {
            self.is_reconnecting = false;
            return None;
        };
        if self.state != ConnectionState::Closed(Closure::Abnormal) {
            self.is_reconnecting = false;
            return None;
        }

        if self.reconnect_attempts >= self.policy.max_attempts {
            return Some(self.give_up());
        }

        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        let delay = self.policy.delay_for_attempt(attempt);
        info!(
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnection attempt scheduled"
        );
        tokio::time::sleep(delay).await;

        // disconnect() during the wait disarms the schedule.
        if self.session_id.is_none() || self.state != ConnectionState::Closed(Closure::Abnormal) {
            self.is_reconnecting = false;
            return None;
        }

        match self.connect(&session_id).await {
            Ok(()) => {
                self.is_reconnecting = false;
                info!(attempt, "reconnected to collaboration session");
                Some(SessionEvent::Reconnected)
            }
            Err(ConnectError::Auth(AuthError::AuthRequired)) => Some(self.require_reauth()),
            Err(connect_error) => {
                warn!(attempt, error = %connect_error, "reconnection attempt failed");
                if self.reconnect_attempts >= self.policy.max_attempts {
                    Some(self.give_up())
                } else {
                    Some(SessionEvent::Reconnecting { attempt })
                }
            }
        }
    }

    fn give_up(&mut self) -> SessionEvent {
        error!(attempts = self.reconnect_attempts, "reconnection budget exhausted");
        self.is_reconnecting = false;
        self.dispatcher.dispatch(&Envelope::empty(MessageKind::ReconnectionFailed));
        SessionEvent::ReconnectionFailed
    }

    fn require_reauth(&mut self) -> SessionEvent {
        warn!("re-authentication required; abandoning reconnection");
        self.is_reconnecting = false;
        self.dispatcher.dispatch(&Envelope::empty(MessageKind::ReconnectionFailed));
        SessionEvent::AuthRequired
    }

    /// Manual reconnection, outside the backoff schedule. Resets the
    /// attempt budget. No-op while connected, while another attempt is
    /// in flight, or without a session to resume.
    pub async fn retry_connection(&mut self) -> Option<SessionEvent> {
        if self.state.is_open() {
            debug!("already connected; manual retry ignored");
            return None;
        }
        if self.is_connecting {
            warn!("connection attempt already in progress; manual retry ignored");
            return None;
        }
        let Some(session_id) = self.session_id.clone() else {
            warn!("no session to retry");
            return None;
        };

        info!(session_id, "manual reconnection requested; attempt budget reset");
        self.reconnect_attempts = 0;
        self.is_manual_retry = true;
        let result = self.connect(&session_id).await;
        self.is_manual_retry = false;

        match result {
            Ok(()) => {
                self.is_reconnecting = false;
                Some(SessionEvent::Reconnected)
            }
            Err(ConnectError::Auth(AuthError::AuthRequired)) => Some(self.require_reauth()),
            Err(connect_error) => {
                warn!(error = %connect_error, "manual reconnection failed; resuming scheduled retries");
                self.is_reconnecting = true;
                Some(SessionEvent::Reconnecting { attempt: 0 })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{SystemTime, UNIX_EPOCH};

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use tokio::time::Instant;

    use crate::auth::store::{AuthTokens, MemoryCredentialStore};
    use crate::error::TransportError;
    use crate::session::{MemorySessionStore, SessionRecord, SessionRecordStore};

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Default)]
    pub(crate) struct MockTransport {
        /// Scripted recv results, in order. An exhausted script reads
        /// as an abnormal close.
        pub(crate) recv_queue: VecDeque<Incoming>,
        /// Frames written via send().
        pub(crate) sent: Vec<String>,
        /// URLs from successful open() calls.
        pub(crate) opened: Vec<String>,
        /// Number of open() calls to fail before succeeding again.
        pub(crate) open_failures: u32,
        /// Every open() call, successful or not.
        pub(crate) open_calls: u32,
        /// Close code from the last close() call.
        pub(crate) closed_with: Option<u16>,
        live: bool,
    }

    impl MockTransport {
        fn queue_frame(&mut self, frame: &str) {
            self.recv_queue.push_back(Incoming::Frame(frame.to_string()));
        }

        fn queue_close(&mut self, code: u16) {
            self.recv_queue
                .push_back(Incoming::Closed(CloseReason { code, reason: String::new() }));
        }
    }

    /// A transport scripted to close with `code` after connecting.
    pub(crate) fn mock_transport_with_close(code: u16) -> MockTransport {
        let mut transport = MockTransport::default();
        transport.queue_close(code);
        transport
    }

    impl Transport for MockTransport {
        async fn open(&mut self, url: &str) -> Result<(), TransportError> {
            self.open_calls += 1;
            if self.open_failures > 0 {
                self.open_failures -= 1;
                return Err(TransportError::WebSocket("connection refused".into()));
            }
            assert!(!self.live, "opened a second transport while one is live");
            self.live = true;
            self.opened.push(url.to_string());
            Ok(())
        }

        async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
            if !self.live {
                return Err(TransportError::NotOpen);
            }
            self.sent.push(frame.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Incoming, TransportError> {
            let incoming = self.recv_queue.pop_front().unwrap_or_else(|| {
                Incoming::Closed(CloseReason {
                    code: ABNORMAL_CLOSURE,
                    reason: "script exhausted".into(),
                })
            });
            if matches!(incoming, Incoming::Closed(_)) {
                self.live = false;
            }
            Ok(incoming)
        }

        async fn close(&mut self, code: u16) {
            self.live = false;
            self.closed_with = Some(code);
        }
    }

    // ── Stub auth endpoint ──────────────────────────────────────────

    #[derive(Clone, Copy)]
    enum StubBehavior {
        Succeed,
        Reject,
        Offline,
    }

    pub(crate) struct StubAuth {
        behavior: StubBehavior,
        calls: Arc<AtomicU32>,
    }

    impl AuthApi for StubAuth {
        async fn refresh(&self, _refresh_token: &str) -> Result<String, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                StubBehavior::Succeed => Ok(token_with_exp(unix_now() + 3_600)),
                StubBehavior::Reject => Err(AuthError::AuthRequired),
                StubBehavior::Offline => Err(AuthError::Network("offline".into())),
            }
        }
    }

    // ── Fixtures ────────────────────────────────────────────────────

    fn unix_now() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
    }

    fn token_with_exp(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("e30.{payload}.sig")
    }

    struct Fixture {
        credentials: Arc<MemoryCredentialStore>,
        refresh_calls: Arc<AtomicU32>,
    }

    fn client(
        transport: MockTransport,
        behavior: StubBehavior,
        access_exp_offset: i64,
    ) -> (CollabClient<MockTransport, StubAuth>, Fixture) {
        let credentials = Arc::new(MemoryCredentialStore::with_tokens(AuthTokens {
            access_token: token_with_exp(unix_now() + access_exp_offset),
            refresh_token: "refresh-1".into(),
        }));
        let refresh_calls = Arc::new(AtomicU32::new(0));
        let tokens = TokenManager::new(
            Arc::clone(&credentials) as Arc<dyn CredentialStore>,
            StubAuth { behavior, calls: Arc::clone(&refresh_calls) },
        );
        let client = CollabClient::new(
            ClientConfig::default(),
            transport,
            tokens,
            SessionPersistence::in_memory(),
        );
        (client, Fixture { credentials, refresh_calls })
    }

    pub(crate) fn fresh_client(transport: MockTransport) -> CollabClient<MockTransport, StubAuth> {
        client(transport, StubBehavior::Succeed, 3_600).0
    }

    // ── Connect ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn connect_opens_the_socket_with_the_token_in_the_uri() {
        let mut client = fresh_client(MockTransport::default());
        client.connect("abc123").await.expect("connect");

        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.transport.opened.len(), 1);
        assert!(client.transport.opened[0]
            .starts_with("ws://localhost:8000/ws/collaborate/abc123/?token=e30."));
    }

    #[tokio::test]
    async fn connect_while_open_is_a_noop() {
        let mut client = fresh_client(MockTransport::default());
        client.connect("abc123").await.expect("connect");
        client.connect("abc123").await.expect("second connect is a no-op");
        client.connect("other-session").await.expect("still a no-op");

        assert_eq!(client.transport.open_calls, 1, "exactly one physical transport");
        assert_eq!(client.session_id(), Some("abc123"));
    }

    #[tokio::test]
    async fn connect_refreshes_an_expiring_token_first() {
        // 30s of validity left: inside the 60s leeway, so the client
        // must refresh before opening rather than risk a mid-handshake
        // rejection.
        let (mut client, fixture) = client(MockTransport::default(), StubBehavior::Succeed, 30);
        client.connect("abc123").await.expect("connect");

        assert_eq!(fixture.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn connect_surfaces_open_failure_and_marks_abnormal() {
        let transport = MockTransport { open_failures: 1, ..Default::default() };
        let mut client = fresh_client(transport);

        let error = client.connect("abc123").await.expect_err("open should fail");
        assert!(matches!(error, ConnectError::Transport(_)));
        assert_eq!(client.state(), ConnectionState::Closed(Closure::Abnormal));
    }

    #[tokio::test]
    async fn connect_without_credentials_fails_before_opening() {
        let mut client = fresh_client(MockTransport::default());
        client.tokens.credentials().clear().expect("clear");

        let error = client.connect("abc123").await.expect_err("connect should fail");
        assert!(matches!(error, ConnectError::Auth(AuthError::NotAuthenticated)));
        assert_eq!(client.transport.open_calls, 0);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_credentials_and_session() {
        let (mut client, fixture) = client(MockTransport::default(), StubBehavior::Reject, 0);

        let error = client.connect("abc123").await.expect_err("connect should fail");
        assert!(matches!(error, ConnectError::Auth(AuthError::AuthRequired)));
        assert_eq!(fixture.credentials.load().unwrap(), None, "credentials cleared");
        assert_eq!(client.session_id(), None, "persisted session cleared with them");

        // A later connect must not run with the stale token.
        let error = client.connect("abc123").await.expect_err("still unauthenticated");
        assert!(matches!(error, ConnectError::Auth(AuthError::NotAuthenticated)));
        assert_eq!(client.transport.open_calls, 0);
    }

    // ── Inbound dispatch ────────────────────────────────────────────

    #[tokio::test]
    async fn inbound_frames_are_dispatched_and_surfaced() {
        let mut transport = MockTransport::default();
        transport.queue_frame(r#"{"type":"draw","user_id":7,"data":{}}"#);
        let mut client = fresh_client(transport);

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            client.on(MessageKind::Draw, move |envelope| {
                seen.lock().unwrap().push(envelope.kind.clone());
            });
        }

        client.connect("abc123").await.expect("connect");
        let event = client.next_event().await.expect("event");
        match event {
            SessionEvent::Message(envelope) => assert_eq!(envelope.kind, "draw"),
            other => panic!("expected Message, got {other:?}"),
        }
        assert_eq!(*seen.lock().unwrap(), vec!["draw"]);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped_without_ending_the_pump() {
        let mut transport = MockTransport::default();
        transport.queue_frame("not json at all");
        transport.queue_frame(r#"{"type":"clear"}"#);
        let mut client = fresh_client(transport);
        client.connect("abc123").await.expect("connect");

        let event = client.next_event().await.expect("event");
        match event {
            SessionEvent::Message(envelope) => assert_eq!(envelope.kind, "clear"),
            other => panic!("expected the clear message, got {other:?}"),
        }
    }

    // ── Closure handling ────────────────────────────────────────────

    #[tokio::test]
    async fn clean_close_clears_the_record_and_stops() {
        let mut transport = MockTransport::default();
        transport.queue_close(NORMAL_CLOSURE);
        let mut client = fresh_client(transport);
        client.connect("abc123").await.expect("connect");

        let event = client.next_event().await.expect("close event");
        assert_eq!(event, SessionEvent::Closed { code: NORMAL_CLOSURE, clean: true });
        assert_eq!(client.state(), ConnectionState::Closed(Closure::Clean));
        assert!(!client.is_reconnecting());
        assert_eq!(client.persistence.restore(), None, "record cleared on clean close");

        assert_eq!(client.next_event().await, None, "no reconnection after clean close");
        assert_eq!(client.transport.open_calls, 1);
    }

    #[tokio::test]
    async fn abnormal_close_arms_reconnection() {
        let mut transport = MockTransport::default();
        transport.queue_close(1006);
        let mut client = fresh_client(transport);
        client.connect("abc123").await.expect("connect");

        let event = client.next_event().await.expect("close event");
        assert_eq!(event, SessionEvent::Closed { code: 1006, clean: false });
        assert_eq!(client.state(), ConnectionState::Closed(Closure::Abnormal));
        assert!(client.is_reconnecting());
    }

    // ── Reconnection schedule ───────────────────────────────────────

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_per_attempt_and_stops_after_the_budget() {
        init_tracing();
        let mut transport = MockTransport::default();
        transport.queue_close(1006);
        let mut client = fresh_client(transport);

        let failed_signal = Arc::new(AtomicU32::new(0));
        {
            let failed_signal = Arc::clone(&failed_signal);
            client.on(MessageKind::ReconnectionFailed, move |_| {
                failed_signal.fetch_add(1, Ordering::SeqCst);
            });
        }

        client.connect("abc123").await.expect("connect");
        client.transport.open_failures = u32::MAX; // every reconnect attempt fails
        assert_eq!(
            client.next_event().await,
            Some(SessionEvent::Closed { code: 1006, clean: false })
        );

        let mut delays = Vec::new();
        for expected_attempt in 1..=4u32 {
            let before = Instant::now();
            let event = client.next_event().await.expect("scheduled attempt");
            delays.push(before.elapsed());
            assert_eq!(event, SessionEvent::Reconnecting { attempt: expected_attempt });
        }

        // Fifth attempt fails and exhausts the budget in one step.
        let before = Instant::now();
        let event = client.next_event().await.expect("terminal event");
        delays.push(before.elapsed());
        assert_eq!(event, SessionEvent::ReconnectionFailed);

        let expected: Vec<Duration> =
            [1_000u64, 2_000, 4_000, 8_000, 16_000].iter().map(|ms| Duration::from_millis(*ms)).collect();
        assert_eq!(delays, expected);

        assert_eq!(failed_signal.load(Ordering::SeqCst), 1, "terminal signal reaches subscribers");
        assert_eq!(client.transport.open_calls, 1 + 5, "exactly five automatic attempts");

        // And no sixth attempt afterwards.
        assert_eq!(client.next_event().await, None);
        assert_eq!(client.transport.open_calls, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_attempt_resets_the_budget() {
        let mut transport = MockTransport::default();
        transport.queue_close(1006);
        let mut client = fresh_client(transport);

        client.connect("abc123").await.expect("connect");
        client.transport.open_failures = 2; // third attempt succeeds
        client.next_event().await.expect("close event");

        assert_eq!(client.next_event().await, Some(SessionEvent::Reconnecting { attempt: 1 }));
        assert_eq!(client.next_event().await, Some(SessionEvent::Reconnecting { attempt: 2 }));
        assert_eq!(client.next_event().await, Some(SessionEvent::Reconnected));

        assert_eq!(client.state(), ConnectionState::Open);
        assert!(!client.is_reconnecting());
        assert_eq!(client.reconnect_attempts(), 0, "budget reset for the next outage");
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_refresh_during_reconnect_aborts_the_schedule() {
        let mut transport = MockTransport::default();
        transport.queue_close(1006);
        let (mut client, fixture) = client(transport, StubBehavior::Reject, 3_600);

        client.connect("abc123").await.expect("initial token is valid; no refresh needed");
        client.next_event().await.expect("close event");

        // The access token expires while we are disconnected.
        fixture
            .credentials
            .store(&AuthTokens {
                access_token: token_with_exp(0),
                refresh_token: "refresh-1".into(),
            })
            .expect("store");

        let event = client.next_event().await.expect("auth failure event");
        assert_eq!(event, SessionEvent::AuthRequired);
        assert!(!client.is_reconnecting());
        assert_eq!(fixture.credentials.load().unwrap(), None);
        assert_eq!(client.next_event().await, None, "no further attempts");
        assert_eq!(client.transport.open_calls, 1, "no attempt ran with a stale token");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_refresh_failure_keeps_retrying() {
        let mut transport = MockTransport::default();
        transport.queue_close(1006);
        let (mut client, fixture) = client(transport, StubBehavior::Offline, 3_600);

        client.connect("abc123").await.expect("connect");
        client.next_event().await.expect("close event");

        fixture
            .credentials
            .store(&AuthTokens {
                access_token: token_with_exp(0),
                refresh_token: "refresh-1".into(),
            })
            .expect("store");

        assert_eq!(client.next_event().await, Some(SessionEvent::Reconnecting { attempt: 1 }));
        assert!(fixture.credentials.load().unwrap().is_some(), "offline never clears credentials");
        assert!(client.is_reconnecting(), "transient failures stay on the schedule");
    }

    // ── Manual retry ────────────────────────────────────────────────

    #[tokio::test]
    async fn retry_while_open_is_a_noop() {
        let mut client = fresh_client(MockTransport::default());
        client.connect("abc123").await.expect("connect");

        assert_eq!(client.retry_connection().await, None);
        assert_eq!(client.transport.open_calls, 1, "no new transport handle");
    }

    #[tokio::test(start_paused = true)]
    async fn manual_retry_resets_the_budget_and_skips_the_backoff() {
        let mut transport = MockTransport::default();
        transport.queue_close(1006);
        let mut client = fresh_client(transport);

        client.connect("abc123").await.expect("connect");
        client.transport.open_failures = 5; // exhaust the automatic budget
        client.next_event().await.expect("close event");
        while let Some(event) = client.next_event().await {
            if event == SessionEvent::ReconnectionFailed {
                break;
            }
        }

        let before = Instant::now();
        let event = client.retry_connection().await;
        assert_eq!(event, Some(SessionEvent::Reconnected));
        assert_eq!(before.elapsed(), Duration::ZERO, "manual retry runs immediately");
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_manual_retry_falls_back_to_the_schedule() {
        let mut transport = MockTransport::default();
        transport.queue_close(1006);
        let mut client = fresh_client(transport);

        client.connect("abc123").await.expect("connect");
        client.transport.open_failures = 2; // manual retry fails, next scheduled attempt succeeds
        client.next_event().await.expect("close event");

        let event = client.retry_connection().await;
        assert_eq!(event, Some(SessionEvent::Reconnecting { attempt: 0 }));
        assert!(client.is_reconnecting());

        assert_eq!(client.next_event().await, Some(SessionEvent::Reconnecting { attempt: 1 }));
        assert_eq!(client.next_event().await, Some(SessionEvent::Reconnected));
    }

    #[tokio::test]
    async fn retry_without_a_session_is_a_noop() {
        let mut client = fresh_client(MockTransport::default());
        assert_eq!(client.retry_connection().await, None);
        assert_eq!(client.transport.open_calls, 0);
    }

    // ── Disconnect ──────────────────────────────────────────────────

    #[tokio::test]
    async fn disconnect_closes_cleanly_and_clears_everything() {
        let mut client = fresh_client(MockTransport::default());
        client.on(MessageKind::Draw, |_| {});
        client.connect("abc123").await.expect("connect");

        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Closed(Closure::Clean));
        assert_eq!(client.transport.closed_with, Some(NORMAL_CLOSURE));
        assert_eq!(client.session_id(), None);
        assert_eq!(client.dispatcher.handler_count(), 0);
        assert_eq!(client.persistence.restore(), None);

        // Idempotent.
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Closed(Closure::Clean));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_disarms_a_pending_reconnection() {
        let mut transport = MockTransport::default();
        transport.queue_close(1006);
        let mut client = fresh_client(transport);

        client.connect("abc123").await.expect("connect");
        client.transport.open_failures = u32::MAX;
        client.next_event().await.expect("close event");
        assert!(client.is_reconnecting());

        client.disconnect().await;
        assert_eq!(client.next_event().await, None);
        assert_eq!(client.transport.open_calls, 1, "no attempt fired after disconnect");
    }

    // ── Session restoration ─────────────────────────────────────────

    fn epoch_ms_now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }

    fn persistence_with_record(age_ms: u64) -> SessionPersistence {
        let mut store = MemorySessionStore::default();
        store.write(&SessionRecord {
            session_id: "abc123".into(),
            persisted_at_epoch_ms: epoch_ms_now().saturating_sub(age_ms),
        });
        SessionPersistence::new(Box::new(store))
    }

    #[tokio::test]
    async fn a_recent_record_is_restored_on_construction() {
        let credentials = Arc::new(MemoryCredentialStore::with_tokens(AuthTokens {
            access_token: token_with_exp(unix_now() + 3_600),
            refresh_token: "refresh-1".into(),
        }));
        let tokens = TokenManager::new(
            credentials as Arc<dyn CredentialStore>,
            StubAuth { behavior: StubBehavior::Succeed, calls: Arc::new(AtomicU32::new(0)) },
        );
        let client = CollabClient::new(
            ClientConfig::default(),
            MockTransport::default(),
            tokens,
            persistence_with_record(10_000),
        );
        assert_eq!(client.session_id(), Some("abc123"));
    }

    #[tokio::test]
    async fn a_stale_record_is_ignored_and_cleared() {
        let credentials = Arc::new(MemoryCredentialStore::with_tokens(AuthTokens {
            access_token: token_with_exp(unix_now() + 3_600),
            refresh_token: "refresh-1".into(),
        }));
        let tokens = TokenManager::new(
            credentials as Arc<dyn CredentialStore>,
            StubAuth { behavior: StubBehavior::Succeed, calls: Arc::new(AtomicU32::new(0)) },
        );
        let client = CollabClient::new(
            ClientConfig::default(),
            MockTransport::default(),
            tokens,
            persistence_with_record(61 * 60 * 1000),
        );
        assert_eq!(client.session_id(), None, "an hour-old session is not resumable");
    }

    // ── Policy math ─────────────────────────────────────────────────

    #[test]
    fn backoff_delays_match_the_doubling_schedule() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> =
            (1..=5).map(|n| policy.delay_for_attempt(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
    }

    #[test]
    fn backoff_shift_saturates_instead_of_overflowing() {
        let policy = ReconnectPolicy::default();
        assert!(policy.delay_for_attempt(u32::MAX) > Duration::from_secs(1));
    }
}
