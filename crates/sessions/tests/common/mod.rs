//! Fakes shared by the lifecycle integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use lh_domain::config::MediaConfig;
use lh_domain::error::{Error, Result};
use lh_media::{MediaNormalizer, TranscodePlan, Transcoder};
use lh_sessions::{
    CloseReason, CredentialState, CredentialStore, LifecycleManager, OutboundMessage, RawOperation,
    RetryPolicy, SessionStatus, StartRequest, StoredSession, TransportConnection,
    TransportConnector, TransportEvent, TransportHandle,
};

// ── Transport ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeHandle {
    pub sent: Mutex<Vec<(String, OutboundMessage)>>,
    pub calls: Mutex<Vec<RawOperation>>,
    pub logouts: AtomicUsize,
    pub ended: AtomicBool,
    /// When set, `logout` drops the link with a transient close and then
    /// takes a while to return, like a remote that hangs up mid-logout.
    pub drop_on_logout: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl FakeHandle {
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportHandle for FakeHandle {
    async fn send_message(&self, to: &str, message: OutboundMessage) -> Result<Value> {
        let mut sent = self.sent.lock();
        sent.push((to.to_owned(), message));
        Ok(json!({ "key": { "id": format!("MSG-{}", sent.len()) } }))
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        let dropper = self.drop_on_logout.lock().take();
        if let Some(events) = dropper {
            let _ = events
                .send(TransportEvent::Closed(CloseReason::new(None, "stream errored")))
                .await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    async fn call(&self, op: &RawOperation) -> Result<Value> {
        self.calls.lock().push(op.clone());
        Ok(json!({ "method": op.method_name(), "args": op.args() }))
    }
}

/// One opened connection as seen by the test.
#[derive(Clone)]
pub struct Link {
    pub events: mpsc::Sender<TransportEvent>,
    pub handle: Arc<FakeHandle>,
    pub credentials: CredentialState,
    pub opened_at: Instant,
}

impl Link {
    pub async fn emit(&self, event: TransportEvent) {
        // The receiver may already be gone if the session was torn down.
        let _ = self.events.send(event).await;
    }

    pub async fn close(&self, code: Option<u16>, message: &str) {
        self.emit(TransportEvent::Closed(CloseReason::new(code, message)))
            .await;
    }
}

#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<HashMap<String, Vec<Link>>>,
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    default_script: Mutex<Vec<TransportEvent>>,
    open_delay: Mutex<Duration>,
    failing: AtomicBool,
    opens: AtomicUsize,
}

impl FakeConnector {
    /// Events delivered right after the next open (one script per open).
    pub fn push_script(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// Events delivered after every open with no queued script.
    pub fn set_default_script(&self, events: Vec<TransportEvent>) {
        *self.default_script.lock() = events;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn links(&self, id: &str) -> Vec<Link> {
        self.links.lock().get(id).cloned().unwrap_or_default()
    }

    pub fn last_link(&self, id: &str) -> Link {
        self.links(id)
            .pop()
            .unwrap_or_else(|| panic!("no transport opened for {id}"))
    }
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn open(&self, session_id: &str, credentials: &CredentialState) -> Result<TransportConnection> {
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::TransientTransport("bridge unavailable".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        let handle = Arc::new(FakeHandle::default());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_script.lock().clone());
        for event in script {
            tx.try_send(event).expect("script fits in channel");
        }

        let link = Link {
            events: tx,
            handle: handle.clone(),
            credentials: credentials.clone(),
            opened_at: Instant::now(),
        };
        self.links
            .lock()
            .entry(session_id.to_owned())
            .or_default()
            .push(link);

        Ok(TransportConnection { handle, events: rx })
    }
}

// ── Store ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<HashMap<String, StoredSession>>,
    failing: AtomicBool,
    save_delay: Mutex<Duration>,
    saves: AtomicUsize,
    saves_in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock() = delay;
    }

    pub fn row(&self, id: &str) -> Option<StoredSession> {
        self.rows.lock().get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<SessionStatus> {
        self.row(id).map(|r| r.status)
    }

    pub fn drop_row(&self, id: &str) {
        self.rows.lock().remove(id);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn peak_saves_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Persistence("store offline".into()));
        }
        Ok(())
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut StoredSession)) -> Result<()> {
        self.check()?;
        if let Some(row) = self.rows.lock().get_mut(id) {
            f(row);
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FakeStore {
    async fn load_all(&self) -> Result<Vec<StoredSession>> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|r| r.status != SessionStatus::Disconnected)
            .cloned()
            .collect())
    }

    async fn load_one(&self, id: &str) -> Result<Option<StoredSession>> {
        self.check()?;
        Ok(self.row(id))
    }

    async fn save_blob(&self, id: &str, blob: &str) -> Result<()> {
        self.check()?;
        let now = self.saves_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.save_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.saves_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.update(id, |row| row.credentials = Some(blob.to_owned()))
    }

    async fn set_status(&self, id: &str, status: SessionStatus, qr: Option<&str>) -> Result<()> {
        self.update(id, |row| {
            row.status = status;
            if let Some(qr) = qr {
                row.qr = Some(qr.to_owned());
            }
        })
    }

    async fn clear_qr(&self, id: &str) -> Result<()> {
        self.update(id, |row| row.qr = None)
    }

    async fn erase_credentials(&self, id: &str) -> Result<()> {
        self.update(id, |row| {
            row.credentials = None;
            row.qr = None;
            row.status = SessionStatus::Disconnected;
        })
    }

    async fn upsert(&self, id: &str, display_name: &str, owner_id: &str) -> Result<()> {
        self.check()?;
        let mut rows = self.rows.lock();
        let row = rows.entry(id.to_owned()).or_insert_with(|| StoredSession {
            id: id.to_owned(),
            display_name: String::new(),
            owner_id: String::new(),
            credentials: None,
            status: SessionStatus::Connecting,
            qr: None,
            updated_at: chrono::Utc::now(),
        });
        row.display_name = display_name.to_owned();
        row.owner_id = owner_id.to_owned();
        row.status = SessionStatus::Connecting;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.check()?;
        self.rows.lock().remove(id);
        Ok(())
    }
}

// ── Media ──────────────────────────────────────────────────────────

/// Returns `"<label>:<input len>"` so tests can see which plan ran.
pub struct LabelTranscoder;

#[async_trait]
impl Transcoder for LabelTranscoder {
    async fn run(&self, plan: &TranscodePlan, input: &[u8]) -> Result<Vec<u8>> {
        Ok(format!("{}:{}", plan.label, input.len()).into_bytes())
    }
}

// ── Harness ────────────────────────────────────────────────────────

pub const BASE_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(4);
pub const MAX_ATTEMPTS: u32 = 3;

pub struct Harness {
    pub manager: LifecycleManager,
    pub connector: Arc<FakeConnector>,
    pub store: Arc<FakeStore>,
}

impl Harness {
    pub fn new() -> Self {
        let connector = Arc::new(FakeConnector::default());
        let store = Arc::new(FakeStore::default());
        let media = Arc::new(MediaNormalizer::new(LabelTranscoder, MediaConfig::default()));
        let manager = LifecycleManager::with_policy(
            connector.clone(),
            store.clone(),
            media,
            RetryPolicy {
                base_delay: BASE_DELAY,
                max_delay: MAX_DELAY,
                max_attempts: MAX_ATTEMPTS,
            },
            Duration::from_secs(30),
        );
        Self {
            manager,
            connector,
            store,
        }
    }
}

pub fn request(id: &str) -> StartRequest {
    StartRequest {
        id: id.to_owned(),
        display_name: format!("Session {id}"),
        owner_id: "company-1".to_owned(),
        prior_credentials: None,
    }
}

pub fn opened() -> TransportEvent {
    TransportEvent::Opened { is_new_login: false }
}

pub fn qr(payload: &str) -> TransportEvent {
    TransportEvent::QrIssued(payload.to_owned())
}

/// Let spawned tasks and due timers run.  Under a paused clock this also
/// advances virtual time.
pub async fn settle_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}
