//! The session lifecycle manager.
//!
//! [`LifecycleManager`] owns every session the process runs.  State lives
//! in a handful of maps behind `parking_lot` mutexes; no lock is held
//! across an `.await`, and the only nested acquisition is `attempts`
//! before `sessions` (see `connect::claim_attempt`).
//!
//! Each opened transport gets one event task that applies its events in
//! order.  Slots carry a generation number so a task left over from a
//! torn-down connection can never touch the slot of a newer one.

mod commands;
mod connect;
mod reconcile;
mod retry;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use lh_domain::config::SessionsConfig;
use lh_domain::media::MediaPipeline;
use lh_domain::trace::TraceEvent;

use crate::backoff::RetryPolicy;
use crate::events::{EventBus, SessionEvent};
use crate::model::{SessionInfo, SessionStatus, StartOutcome};
use crate::persist::CredentialCell;
use crate::store::CredentialStore;
use crate::transport::{TransportConnector, TransportHandle};

pub use reconcile::ReconcileReport;

/// Cloneable handle to the lifecycle manager.  All clones share state.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    connector: Arc<dyn TransportConnector>,
    store: Arc<dyn CredentialStore>,
    media: Arc<dyn MediaPipeline>,
    events: EventBus,
    policy: RetryPolicy,
    connect_timeout: Duration,

    /// In-flight connection attempts.  Joiners clone the receiver.
    attempts: Mutex<HashMap<String, watch::Receiver<Option<StartOutcome>>>>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
    /// Consecutive transient failures per session.
    retries: Mutex<HashMap<String, u32>>,
    timers: Mutex<HashMap<String, PendingRestart>>,
    /// Ids deleted since the last reconciliation pass.
    deleted: Mutex<HashSet<String>>,
    next_generation: AtomicU64,
}

struct SessionSlot {
    info: SessionInfo,
    generation: u64,
    handle: Arc<dyn TransportHandle>,
    credentials: Arc<CredentialCell>,
    /// Resolved by the first settling event (QR, open or close).
    pending_start: Option<oneshot::Sender<StartOutcome>>,
}

impl SessionSlot {
    fn transition(&mut self, to: SessionStatus) {
        let from = self.info.status;
        if from == to {
            return;
        }
        self.info.status = to;
        TraceEvent::SessionStatusChanged {
            session_id: self.info.id.clone(),
            from: from.to_string(),
            to: to.to_string(),
        }
        .emit();
    }

    fn resolve_start(&mut self, outcome: StartOutcome) {
        if let Some(tx) = self.pending_start.take() {
            let _ = tx.send(outcome);
        }
    }
}

struct PendingRestart {
    token: u64,
    task: JoinHandle<()>,
}

/// Who a scheduled restart is for.
#[derive(Debug, Clone)]
struct RestartTarget {
    id: String,
    display_name: String,
    owner_id: String,
}

impl From<&SessionInfo> for RestartTarget {
    fn from(info: &SessionInfo) -> Self {
        Self {
            id: info.id.clone(),
            display_name: info.display_name.clone(),
            owner_id: info.owner_id.clone(),
        }
    }
}

impl LifecycleManager {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        store: Arc<dyn CredentialStore>,
        media: Arc<dyn MediaPipeline>,
        config: &SessionsConfig,
    ) -> Self {
        Self::with_policy(
            connector,
            store,
            media,
            RetryPolicy::from_config(config),
            config.connect_timeout(),
        )
    }

    pub fn with_policy(
        connector: Arc<dyn TransportConnector>,
        store: Arc<dyn CredentialStore>,
        media: Arc<dyn MediaPipeline>,
        policy: RetryPolicy,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                store,
                media,
                events: EventBus::new(),
                policy,
                connect_timeout,
                attempts: Mutex::new(HashMap::new()),
                sessions: Mutex::new(HashMap::new()),
                retries: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                deleted: Mutex::new(HashSet::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Snapshot of every registered session, sorted by id.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = self
            .inner
            .sessions
            .lock()
            .values()
            .map(|s| s.info.clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.inner.sessions.lock().get(id).map(|s| s.info.clone())
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Consecutive failed restarts recorded for `id`.
    pub fn retry_count(&self, id: &str) -> u32 {
        self.inner.retries.lock().get(id).copied().unwrap_or(0)
    }

    pub fn has_pending_restart(&self, id: &str) -> bool {
        self.inner.timers.lock().contains_key(id)
    }

    pub fn is_connecting(&self, id: &str) -> bool {
        self.inner.attempts.lock().contains_key(id)
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Run `f` on the slot for `id` if it still belongs to `generation`.
    fn with_current<R>(
        &self,
        id: &str,
        generation: u64,
        f: impl FnOnce(&mut SessionSlot) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.lock();
        sessions
            .get_mut(id)
            .filter(|s| s.generation == generation)
            .map(f)
    }

    fn publish_status(&self, id: &str, owner_id: &str, status: SessionStatus, detail: Option<String>) {
        self.events.publish(SessionEvent::StatusChanged {
            session_id: id.to_owned(),
            owner_id: owner_id.to_owned(),
            status,
            detail,
        });
    }

    /// Remove the slot for `id` (any generation), end its transport and
    /// wait for pending credential writes.  Safe when nothing is registered.
    async fn release_slot(&self, id: &str) -> Option<SessionInfo> {
        let slot = self.sessions.lock().remove(id)?;
        Some(self.dispose(slot).await)
    }

    /// Like [`Inner::release_slot`] but only for the given generation.
    async fn release_generation(&self, id: &str, generation: u64) -> Option<SessionInfo> {
        let slot = {
            let mut sessions = self.sessions.lock();
            match sessions.get(id) {
                Some(s) if s.generation == generation => sessions.remove(id),
                _ => None,
            }
        }?;
        Some(self.dispose(slot).await)
    }

    async fn dispose(&self, mut slot: SessionSlot) -> SessionInfo {
        slot.transition(SessionStatus::Disconnected);
        slot.info.qr = None;
        slot.handle.end().await;
        slot.credentials.settle().await;
        slot.info
    }

    /// Cancel a scheduled restart.  A restart that already fired is left
    /// to finish.
    fn cancel_timer(&self, id: &str) -> bool {
        match self.timers.lock().remove(id) {
            Some(pending) => {
                pending.task.abort();
                tracing::debug!(session_id = %id, "pending restart cancelled");
                true
            }
            None => false,
        }
    }
}
