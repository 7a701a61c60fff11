//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O. Every mock writes
//! to a shared [`CallLog`] so tests can assert on call order.

use super::traits::*;
use super::{spawn_session, RuntimeOptions, SessionHandle, SessionServices, SessionUpdate};
use crate::backend::{AccessToken, Package, PackageId, SessionGrant};
use crate::error::SessionError;
use crate::state_machine::SessionContext;
use crate::transcript::{Speaker, TranscriptEntry};
use crate::transport::{MediaCapability, RealtimeTransport, TransportConnection, TransportLink};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

/// Ordered record of collaborator calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    pub fn record(&self, call: &'static str) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, call: &str) -> bool {
        self.0.lock().unwrap().iter().any(|c| *c == call)
    }
}

// ============================================================================
// Start protocol collaborators
// ============================================================================

pub struct MockPermissions {
    status: PermissionStatus,
    log: CallLog,
}

#[async_trait]
impl PermissionProvider for MockPermissions {
    async fn request_microphone(&self) -> PermissionStatus {
        self.log.record("permission");
        self.status
    }
}

/// Token broker that returns queued responses after an optional delay
pub struct MockTokenBroker {
    responses: Mutex<VecDeque<Result<SessionGrant, SessionError>>>,
    delay: Duration,
    log: CallLog,
    /// Signalled when a request arrives
    pub started: Notify,
    pub names: Mutex<Vec<String>>,
}

#[async_trait]
impl TokenBroker for MockTokenBroker {
    async fn acquire_token(&self, display_name: &str) -> Result<SessionGrant, SessionError> {
        self.log.record("token");
        self.names.lock().unwrap().push(display_name.to_string());
        self.started.notify_one();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SessionError::network("No mock token queued")))
    }
}

pub struct MockBillingGate {
    responses: Mutex<VecDeque<Result<(), SessionError>>>,
    log: CallLog,
    pub charged: Mutex<Vec<PackageId>>,
}

#[async_trait]
impl BillingGate for MockBillingGate {
    async fn charge_for_package(&self, package_id: &PackageId) -> Result<(), SessionError> {
        self.log.record("charge");
        self.charged.lock().unwrap().push(package_id.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

pub struct MockLedger {
    balance: Mutex<u64>,
    log: CallLog,
    pub debits: Mutex<Vec<u64>>,
}

#[async_trait]
impl Ledger for MockLedger {
    async fn balance(&self) -> Result<u64, SessionError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn refresh(&self) -> Result<u64, SessionError> {
        self.log.record("refresh");
        Ok(*self.balance.lock().unwrap())
    }

    fn assume_debit(&self, amount: u64) {
        self.debits.lock().unwrap().push(amount);
        let mut balance = self.balance.lock().unwrap();
        *balance = balance.saturating_sub(amount);
    }
}

pub struct MockCatalog {
    packages: Vec<Package>,
    delay: Duration,
}

#[async_trait]
impl PackageCatalog for MockCatalog {
    async fn fetch_packages(&self) -> Result<Vec<Package>, SessionError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.packages.clone())
    }
}

/// Transcript store backed by memory; can be told to fail every write
pub struct InMemoryTranscriptStore {
    saved: Mutex<Option<Vec<TranscriptEntry>>>,
    fail: bool,
    log: CallLog,
}

impl InMemoryTranscriptStore {
    pub fn saved(&self) -> Option<Vec<TranscriptEntry>> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn save(&self, entries: &[TranscriptEntry]) -> Result<(), SessionError> {
        self.log.record("save");
        if self.fail {
            return Err(SessionError::persistence("storage unavailable"));
        }
        *self.saved.lock().unwrap() = Some(entries.to_vec());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<TranscriptEntry>>, SessionError> {
        Ok(self.saved())
    }
}

// ============================================================================
// Scripted transport
// ============================================================================

/// What the fake transport does once connected. Offsets are from connect time.
#[derive(Debug, Clone, Default)]
pub struct TransportScript {
    pub utterances: Vec<(Duration, Speaker, &'static str)>,
    pub disconnect_after: Option<Duration>,
    pub connect_error: Option<SessionError>,
}

pub struct ScriptedTransport {
    script: TransportScript,
    log: CallLog,
    pub connects: AtomicUsize,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedTransport {
    fn utterances_for(&self, speaker: Speaker) -> futures::stream::BoxStream<'static, String> {
        let start = tokio::time::Instant::now();
        let lines: Vec<_> = self
            .script
            .utterances
            .iter()
            .filter(|(_, s, _)| *s == speaker)
            .map(|(offset, _, text)| (*offset, (*text).to_string()))
            .collect();
        futures::stream::iter(lines)
            .then(move |(offset, text)| async move {
                tokio::time::sleep_until(start + offset).await;
                text
            })
            .boxed()
    }
}

struct MockLink {
    closed: Arc<AtomicBool>,
    log: CallLog,
}

#[async_trait]
impl TransportLink for MockLink {
    async fn close(&mut self) {
        self.log.record("close");
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    fn initialize(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn connect(&self, _grant: &SessionGrant) -> Result<TransportConnection, SessionError> {
        self.log.record("connect");
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.script.connect_error {
            return Err(error.clone());
        }

        let disconnected: BoxFuture<'static, ()> = match self.script.disconnect_after {
            Some(after) => Box::pin(tokio::time::sleep(after)),
            None => Box::pin(std::future::pending()),
        };

        Ok(TransportConnection {
            assistant_utterances: self.utterances_for(Speaker::Assistant),
            user_utterances: self.utterances_for(Speaker::User),
            disconnected,
            link: Box::new(MockLink {
                closed: self.closed.clone(),
                log: self.log.clone(),
            }),
        })
    }
}

// ============================================================================
// Test harness
// ============================================================================

pub fn grant() -> SessionGrant {
    SessionGrant::new(AccessToken::new("jwt-abc"), "wss://rtc.example")
}

/// Builder for a runtime wired to mocks
pub struct TestSession {
    balance: u64,
    packages: Vec<Package>,
    catalog_delay: Duration,
    permission: PermissionStatus,
    token_responses: Vec<Result<SessionGrant, SessionError>>,
    token_delay: Duration,
    charge_responses: Vec<Result<(), SessionError>>,
    store_fails: bool,
    script: TransportScript,
}

impl TestSession {
    pub fn new() -> Self {
        Self {
            balance: 100,
            packages: vec![Package::new("p50", 50, 5), Package::new("p20", 20, 2)],
            catalog_delay: Duration::ZERO,
            permission: PermissionStatus::Granted,
            token_responses: vec![Ok(grant())],
            token_delay: Duration::ZERO,
            charge_responses: vec![Ok(())],
            store_fails: false,
            script: TransportScript::default(),
        }
    }

    pub fn balance(mut self, balance: u64) -> Self {
        self.balance = balance;
        self
    }

    pub fn catalog_delay(mut self, delay: Duration) -> Self {
        self.catalog_delay = delay;
        self
    }

    pub fn permission(mut self, status: PermissionStatus) -> Self {
        self.permission = status;
        self
    }

    pub fn token(mut self, response: Result<SessionGrant, SessionError>) -> Self {
        self.token_responses = vec![response];
        self
    }

    pub fn token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn charge(mut self, response: Result<(), SessionError>) -> Self {
        self.charge_responses = vec![response];
        self
    }

    pub fn failing_store(mut self) -> Self {
        self.store_fails = true;
        self
    }

    pub fn script(mut self, script: TransportScript) -> Self {
        self.script = script;
        self
    }

    pub fn build(self) -> RunningSession {
        let log = CallLog::default();
        let tokens = Arc::new(MockTokenBroker {
            responses: Mutex::new(self.token_responses.into()),
            delay: self.token_delay,
            log: log.clone(),
            started: Notify::new(),
            names: Mutex::new(Vec::new()),
        });
        let billing = Arc::new(MockBillingGate {
            responses: Mutex::new(self.charge_responses.into()),
            log: log.clone(),
            charged: Mutex::new(Vec::new()),
        });
        let ledger = Arc::new(MockLedger {
            balance: Mutex::new(self.balance),
            log: log.clone(),
            debits: Mutex::new(Vec::new()),
        });
        let store = Arc::new(InMemoryTranscriptStore {
            saved: Mutex::new(None),
            fail: self.store_fails,
            log: log.clone(),
        });
        let transport = Arc::new(ScriptedTransport {
            script: self.script,
            log: log.clone(),
            connects: AtomicUsize::new(0),
            closed: Arc::new(AtomicBool::new(false)),
        });

        let services = SessionServices {
            permissions: Arc::new(MockPermissions {
                status: self.permission,
                log: log.clone(),
            }),
            tokens: tokens.clone(),
            billing: billing.clone(),
            ledger: ledger.clone(),
            catalog: Arc::new(MockCatalog {
                packages: self.packages,
                delay: self.catalog_delay,
            }),
            transcripts: store.clone(),
            media: MediaCapability::initialize(transport.clone()).unwrap(),
        };

        let (handle, task) = spawn_session(
            SessionContext::new("Mina"),
            services,
            RuntimeOptions::default(),
        );

        RunningSession {
            handle,
            task,
            log,
            tokens,
            billing,
            ledger,
            store,
            transport,
        }
    }
}

pub struct RunningSession {
    pub handle: SessionHandle,
    pub task: JoinHandle<()>,
    pub log: CallLog,
    pub tokens: Arc<MockTokenBroker>,
    pub billing: Arc<MockBillingGate>,
    pub ledger: Arc<MockLedger>,
    pub store: Arc<InMemoryTranscriptStore>,
    pub transport: Arc<ScriptedTransport>,
}

/// Wait for the first update matching `pred`, skipping the rest
pub async fn next_matching(
    updates: &mut broadcast::Receiver<SessionUpdate>,
    mut pred: impl FnMut(&SessionUpdate) -> bool,
) -> SessionUpdate {
    loop {
        match tokio::time::timeout(Duration::from_secs(3600), updates.recv()).await {
            Ok(Ok(update)) if pred(&update) => return update,
            Ok(Ok(_) | Err(broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("update channel closed"),
            Err(_) => panic!("timed out waiting for update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::state_machine::{SessionNotice, SessionPhase};
    use tokio::time::Instant;

    fn is_active(update: &SessionUpdate) -> bool {
        matches!(update, SessionUpdate::StateChanged { snapshot } if snapshot.active)
    }

    fn is_feedback(update: &SessionUpdate) -> bool {
        matches!(update, SessionUpdate::NavigateToFeedback)
    }

    fn failure_kind(update: &SessionUpdate) -> Option<ErrorKind> {
        match update {
            SessionUpdate::Notice {
                notice: SessionNotice::Failed { kind, .. },
            } => Some(*kind),
            _ => None,
        }
    }

    fn is_notice(update: &SessionUpdate, expected: &SessionNotice) -> bool {
        matches!(update, SessionUpdate::Notice { notice } if notice == expected)
    }

    fn tutoring_script() -> TransportScript {
        TransportScript {
            utterances: vec![
                (Duration::from_secs(5), Speaker::Assistant, "Hi! What shall we practise?"),
                (Duration::from_secs(12), Speaker::User, "Past tense verbs"),
                (Duration::from_secs(20), Speaker::Assistant, "Hi! What shall we practise?"),
                (Duration::from_secs(30), Speaker::User, "   "),
            ],
            ..TransportScript::default()
        }
    }

    async fn shut_down(session: RunningSession) {
        session.handle.unmount().await.unwrap();
        session.task.await.unwrap();
    }

    /// Integration test: a paid session runs to time-up and hands off its transcript
    #[tokio::test(start_paused = true)]
    async fn test_session_times_out_and_hands_off_transcript() {
        let session = TestSession::new().script(tutoring_script()).build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p50").await.unwrap();
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Selecting);

        let started = Instant::now();
        session.handle.start().await.unwrap();

        match next_matching(&mut updates, is_active).await {
            SessionUpdate::StateChanged { snapshot } => {
                assert_eq!(snapshot.remaining_seconds, 300);
                assert!(snapshot.has_token);
                assert_eq!(snapshot.routing_address.as_deref(), Some("wss://rtc.example"));
            }
            other => panic!("unexpected update {other:?}"),
        }

        next_matching(&mut updates, is_feedback).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(300), "ended early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(301), "ended late: {elapsed:?}");

        let snapshot = session.handle.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(!snapshot.has_token);
        assert_eq!(snapshot.remaining_seconds, 0);

        let saved = session.store.saved().expect("transcript saved");
        let texts: Vec<_> = saved.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Hi! What shall we practise?", "Past tense verbs"]);
        assert!(saved[1].is_user());

        assert_eq!(&session.log.calls()[..3], &["permission", "token", "charge"]);
        assert_eq!(*session.tokens.names.lock().unwrap(), vec!["Mina".to_string()]);
        assert_eq!(*session.ledger.debits.lock().unwrap(), vec![50]);
        assert!(session.transport.closed.load(Ordering::SeqCst));

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unaffordable_package_rejected_without_side_effects() {
        let session = TestSession::new().balance(10).build();

        let error = session.handle.select("p50").await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InsufficientFunds);
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);

        // Nothing selected, so start is refused too
        let error = session.handle.start().await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
        assert!(session.log.calls().is_empty());

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_failure_returns_to_idle_without_charge() {
        let session = TestSession::new()
            .token(Err(SessionError::network("connection refused")))
            .build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p50").await.unwrap();
        session.handle.start().await.unwrap();

        let update = next_matching(&mut updates, |u| failure_kind(u).is_some()).await;
        assert_eq!(failure_kind(&update), Some(ErrorKind::Network));

        let snapshot = session.handle.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(!snapshot.has_token);
        assert_eq!(session.log.calls(), vec!["permission", "token"]);
        assert!(session.billing.charged.lock().unwrap().is_empty());

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_charge_failure_discards_token() {
        let session = TestSession::new()
            .charge(Err(SessionError::insufficient_funds("COIN4001")))
            .build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p50").await.unwrap();
        session.handle.start().await.unwrap();

        let update = next_matching(&mut updates, |u| failure_kind(u).is_some()).await;
        assert_eq!(failure_kind(&update), Some(ErrorKind::InsufficientFunds));

        let snapshot = session.handle.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(!snapshot.has_token);
        assert!(snapshot.routing_address.is_none());
        assert_eq!(session.log.calls(), vec!["permission", "token", "charge"]);
        assert_eq!(session.transport.connects.load(Ordering::SeqCst), 0);

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_stops_before_token() {
        let session = TestSession::new()
            .permission(PermissionStatus::Denied)
            .build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p20").await.unwrap();
        session.handle.start().await.unwrap();

        let update = next_matching(&mut updates, |u| failure_kind(u).is_some()).await;
        assert_eq!(failure_kind(&update), Some(ErrorKind::PermissionDenied));
        assert_eq!(session.log.calls(), vec!["permission"]);
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected_while_starting() {
        let session = TestSession::new()
            .token_delay(Duration::from_secs(10))
            .build();

        session.handle.select("p50").await.unwrap();
        session.handle.start().await.unwrap();

        let error = session.handle.start().await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
        let error = session.handle.select("p20").await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Starting);

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_mid_start_cancels_and_skips_charge() {
        let session = TestSession::new()
            .token_delay(Duration::from_secs(10))
            .build();

        session.handle.select("p50").await.unwrap();
        session.handle.start().await.unwrap();
        session.tokens.started.notified().await;

        session.handle.unmount().await.unwrap();
        session.task.await.unwrap();

        // Long after the token would have arrived, no charge was attempted
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(session.log.calls(), vec!["permission", "token"]);
        assert!(session.billing.charged.lock().unwrap().is_empty());
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_catalog_does_not_stall_active_countdown() {
        let session = TestSession::new()
            .catalog_delay(Duration::from_secs(200))
            .build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p20").await.unwrap();
        let started = Instant::now();
        session.handle.start().await.unwrap();
        next_matching(&mut updates, is_active).await;

        tokio::time::sleep(Duration::from_secs(100)).await;
        let asked = Instant::now();
        let error = session.handle.select("p20").await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
        assert_eq!(asked.elapsed(), Duration::ZERO);

        next_matching(&mut updates, |u| is_notice(u, &SessionNotice::ConversationEnded)).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(120), "ended early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(121), "ended late: {elapsed:?}");

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_served_while_selection_lookup_pending() {
        let session = TestSession::new()
            .catalog_delay(Duration::from_secs(30))
            .build();

        let handle = session.handle.clone();
        let pending = tokio::spawn(async move { handle.select("p50").await });
        tokio::task::yield_now().await;

        // Nothing is selected yet, and the loop answers without waiting on the catalog
        let asked = Instant::now();
        let error = session.handle.start().await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
        assert_eq!(asked.elapsed(), Duration::ZERO);
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);

        pending.await.unwrap().unwrap();
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Selecting);
        assert!(asked.elapsed() >= Duration::from_secs(30));

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_while_active_persists_and_stops_countdown() {
        let session = TestSession::new()
            .script(TransportScript {
                utterances: vec![(Duration::from_secs(4), Speaker::User, "Is this thing on?")],
                ..TransportScript::default()
            })
            .build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p50").await.unwrap();
        session.handle.start().await.unwrap();
        next_matching(&mut updates, |u| {
            matches!(u, SessionUpdate::TranscriptAppended { .. })
        })
        .await;

        let RunningSession {
            handle,
            task,
            log,
            store,
            transport,
            ..
        } = session;
        handle.unmount().await.unwrap();
        task.await.unwrap();

        assert!(transport.closed.load(Ordering::SeqCst));
        assert!(log.contains("save"));
        let saved = store.saved().expect("transcript saved");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].text, "Is this thing on?");

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.snapshot().remaining_seconds, snapshot.remaining_seconds);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_disconnect_ends_session_early() {
        let session = TestSession::new()
            .script(TransportScript {
                utterances: vec![(Duration::from_secs(5), Speaker::User, "Can we start?")],
                disconnect_after: Some(Duration::from_secs(60)),
                ..TransportScript::default()
            })
            .build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p50").await.unwrap();
        let started = Instant::now();
        session.handle.start().await.unwrap();

        next_matching(&mut updates, is_feedback).await;
        assert!(started.elapsed() < Duration::from_secs(61));

        let saved = session.store.saved().expect("transcript saved");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].text, "Can we start?");
        assert!(session.transport.closed.load(Ordering::SeqCst));
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_end_with_empty_transcript_reports_ended() {
        let session = TestSession::new().build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p20").await.unwrap();
        session.handle.start().await.unwrap();
        next_matching(&mut updates, is_active).await;

        session.handle.end().await.unwrap();
        next_matching(&mut updates, |u| is_notice(u, &SessionNotice::ConversationEnded)).await;

        assert!(session.store.saved().is_none());
        assert!(!session.log.contains("save"));
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_still_reaches_idle() {
        let session = TestSession::new()
            .failing_store()
            .script(TransportScript {
                utterances: vec![(Duration::from_secs(2), Speaker::Assistant, "Welcome back")],
                ..TransportScript::default()
            })
            .build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p50").await.unwrap();
        session.handle.start().await.unwrap();
        next_matching(&mut updates, |u| {
            matches!(u, SessionUpdate::TranscriptAppended { .. })
        })
        .await;

        session.handle.end().await.unwrap();
        next_matching(&mut updates, |u| is_notice(u, &SessionNotice::TeardownFailed)).await;
        assert!(session.log.contains("save"));
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_tears_down() {
        let session = TestSession::new()
            .script(TransportScript {
                connect_error: Some(SessionError::network("ice failed")),
                ..TransportScript::default()
            })
            .build();
        let mut updates = session.handle.subscribe();

        session.handle.select("p50").await.unwrap();
        session.handle.start().await.unwrap();

        next_matching(&mut updates, |u| is_notice(u, &SessionNotice::ConversationEnded)).await;
        assert_eq!(session.transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_package_and_idle_end() {
        let session = TestSession::new().build();

        let error = session.handle.select("p999").await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);

        // Ending with nothing running is a no-op
        session.handle.end().await.unwrap();
        assert_eq!(session.handle.snapshot().phase, SessionPhase::Idle);

        shut_down(session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_stops_runtime() {
        let RunningSession { handle, task, .. } = TestSession::new().build();
        handle.select("p20").await.unwrap();
        drop(handle);
        task.await.unwrap();
    }
}
