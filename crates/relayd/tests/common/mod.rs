//! Common test utilities: scripted transports and in-memory stores.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use relayd::session::{
    SessionHandle, SessionId, SessionPhase, SessionRegistry, SessionSettings, SessionView,
};
use relayd::store::{AuthStore, HistoryRecord, HistoryStore, StorageError, StorageResult};
use relayd::transport::{
    EventSink, TransportError, TransportEvent, TransportFactory, TransportHandle,
};

/// Upper bound for any wait in these tests.
pub const WAIT: Duration = Duration::from_secs(30);

// ============================================================================
// Instrumentation log
// ============================================================================

/// Ordered record of every store and transport call, shared by all fakes.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    /// Index of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    /// Index of the last occurrence of `entry` before index `before`.
    pub fn last_before(&self, entry: &str, before: usize) -> Option<usize> {
        self.entries()[..before].iter().rposition(|e| e == entry)
    }
}

// ============================================================================
// Auth store
// ============================================================================

/// In-memory `AuthStore` that only records resets.
pub struct RecordingAuth {
    log: CallLog,
    fail: AtomicBool,
}

impl RecordingAuth {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail: AtomicBool::new(false),
        }
    }

    /// Make every subsequent reset fail.
    pub fn fail_resets(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthStore for RecordingAuth {
    fn credential_path(&self, session_id: &SessionId) -> PathBuf {
        PathBuf::from(format!("/nonexistent/auth/session-{session_id}"))
    }

    async fn reset(&self, session_id: &SessionId) -> StorageResult<()> {
        self.log.push(format!("reset:{session_id}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::reset_exhausted(
                self.credential_path(session_id),
                3,
                std::io::Error::other("resource busy"),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Scripted transport
// ============================================================================

/// `TransportFactory` whose transports are driven by the test.
///
/// Constructions are numbered from 1 and logged as `construct:N`; the Nth
/// transport logs `initialize:N`, `destroy:N` and `send:N:{to}:{body}`.
#[derive(Default)]
pub struct ScriptedFactory {
    log: CallLog,
    constructions: AtomicUsize,
    construct_failures: AtomicUsize,
    on_initialize: Mutex<Vec<TransportEvent>>,
    sinks: Mutex<Vec<EventSink>>,
    transports: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedFactory {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Fail the next `n` constructions.
    pub fn fail_constructions(&self, n: usize) {
        self.construct_failures.store(n, Ordering::SeqCst);
    }

    /// Events every new transport emits while initializing.
    pub fn emit_on_initialize(&self, events: Vec<TransportEvent>) {
        *self.on_initialize.lock().unwrap() = events;
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Event sink of the Nth successful construction (1-based).
    ///
    /// Resolves once that transport's `initialize` has been called, by which
    /// point the session actor has been handed the transport, so events sent
    /// through the sink are processed after it is in place.
    pub async fn sink(&self, n: usize) -> EventSink {
        tokio::time::timeout(WAIT, async {
            loop {
                let started = self
                    .transports
                    .lock()
                    .unwrap()
                    .get(n - 1)
                    .is_some_and(|t| t.started.load(Ordering::SeqCst));
                if started {
                    return self.sinks.lock().unwrap()[n - 1].clone();
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("transport was never started")
    }

    /// The Nth successfully constructed transport (1-based).
    pub fn transport(&self, n: usize) -> Arc<ScriptedTransport> {
        self.transports.lock().unwrap()[n - 1].clone()
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn construct(
        &self,
        _session_id: &SessionId,
        _credential_path: &Path,
        events: EventSink,
    ) -> Result<Arc<dyn TransportHandle>, TransportError> {
        let attempt = self.constructions.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.push(format!("construct:{attempt}"));

        let failed = self
            .construct_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Rejected("browser failed to launch".into()));
        }

        let transport = Arc::new(ScriptedTransport {
            index: attempt,
            log: self.log.clone(),
            events: events.clone(),
            on_initialize: self.on_initialize.lock().unwrap().clone(),
            started: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        });
        self.sinks.lock().unwrap().push(events);
        self.transports.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

pub struct ScriptedTransport {
    index: usize,
    log: CallLog,
    events: EventSink,
    on_initialize: Vec<TransportEvent>,
    started: AtomicBool,
    fail_sends: AtomicBool,
}

impl ScriptedTransport {
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportHandle for ScriptedTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        self.log.push(format!("initialize:{}", self.index));
        self.started.store(true, Ordering::SeqCst);
        for event in &self.on_initialize {
            self.events.emit(event.clone()).await;
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.log.push(format!("destroy:{}", self.index));
        Ok(())
    }

    async fn send_to(&self, address: &str, body: &str) -> Result<(), TransportError> {
        self.log
            .push(format!("send:{}:{address}:{body}", self.index));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("chat not found".into()));
        }
        Ok(())
    }
}

// ============================================================================
// History stores
// ============================================================================

#[derive(Default)]
pub struct RecordingHistory {
    pub records: Mutex<Vec<HistoryRecord>>,
}

#[async_trait]
impl HistoryStore for RecordingHistory {
    async fn append(&self, record: &HistoryRecord) -> StorageResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub struct FailingHistory;

#[async_trait]
impl HistoryStore for FailingHistory {
    async fn append(&self, _record: &HistoryRecord) -> StorageResult<()> {
        Err(StorageError::serialization("disk full"))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Settings with no teardown pause and short, distinct retry delays.
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        retry_delay: Duration::from_millis(50),
        construct_error_delay: Duration::from_secs(1),
        max_retry_attempts: None,
        teardown_grace: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
        poll_attempts: 3,
    }
}

pub struct TestRig {
    pub log: CallLog,
    pub factory: Arc<ScriptedFactory>,
    pub auth: Arc<RecordingAuth>,
    pub registry: SessionRegistry,
}

impl TestRig {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        let log = CallLog::default();
        let factory = Arc::new(ScriptedFactory::new(log.clone()));
        let auth = Arc::new(RecordingAuth::new(log.clone()));
        let registry = SessionRegistry::new(factory.clone(), auth.clone(), settings);
        Self {
            log,
            factory,
            auth,
            registry,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.registry = self.registry.with_history(history);
        self
    }

    pub fn handle(&self, id: &str) -> SessionHandle {
        self.registry.get(id).expect("session exists")
    }

    /// Initialize `id` and drive it to `Connected` through transport N.
    pub async fn connect(&self, id: &str, n: usize) {
        self.registry.initialize(id).await.unwrap();
        self.factory.sink(n).await.emit(TransportEvent::Ready).await;
        wait_for_phase(&self.handle(id), SessionPhase::Connected).await;
    }

    /// Wait until the actor has processed everything queued before this call.
    pub async fn settle(&self, id: &str) -> SessionView {
        self.handle(id).current_view().await.unwrap()
    }
}

pub async fn wait_for_phase(handle: &SessionHandle, phase: SessionPhase) {
    let mut rx = handle.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|view| view.phase == phase))
        .await
        .unwrap_or_else(|_| panic!("session never reached {phase}"))
        .expect("session actor stopped");
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}
