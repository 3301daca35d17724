//! Start/join and the per-session connect state machine.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use lh_domain::error::{Error, Result};

use super::{Inner, LifecycleManager, RestartTarget, SessionSlot};
use crate::credentials;
use crate::events::SessionEvent;
use crate::model::{SessionInfo, SessionStatus, StartOutcome, StartRequest};
use crate::persist::CredentialCell;
use crate::transport::{CloseKind, CloseReason, TransportEvent};

pub(super) enum Claim {
    Lead(watch::Sender<Option<StartOutcome>>),
    Join(watch::Receiver<Option<StartOutcome>>),
    AlreadyConnected,
}

impl LifecycleManager {
    /// Start (or join) a connection attempt for `req.id`.
    ///
    /// Concurrent callers for the same id share one attempt and all
    /// observe its outcome.  A session that is already connected is
    /// reported as such without touching the transport.  Never fails:
    /// errors come back as an unsuccessful [`StartOutcome`].
    pub async fn start_connection(&self, req: StartRequest) -> StartOutcome {
        self.inner.deleted.lock().remove(&req.id);

        let rx = match self.inner.claim_attempt(&req.id) {
            Claim::AlreadyConnected => return StartOutcome::connected("already connected"),
            Claim::Join(rx) => {
                tracing::debug!(session_id = %req.id, "joining in-flight connection attempt");
                rx
            }
            Claim::Lead(tx) => {
                // An explicit start supersedes any restart still waiting.
                self.inner.cancel_timer(&req.id);
                self.inner.retries.lock().remove(&req.id);
                let rx = tx.subscribe();
                let inner = self.inner.clone();
                // Detached so the attempt completes even if this caller goes away.
                tokio::spawn(async move {
                    let outcome = match inner.connect(&req).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::warn!(session_id = %req.id, error = %e, "connection attempt failed");
                            StartOutcome::failed(e.to_string())
                        }
                    };
                    inner.finish_attempt(&req.id, tx, outcome);
                });
                rx
            }
        };
        await_outcome(rx).await
    }
}

async fn await_outcome(mut rx: watch::Receiver<Option<StartOutcome>>) -> StartOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome)
            .clone()
            .unwrap_or_else(|| StartOutcome::failed("connection attempt produced no outcome")),
        Err(_) => StartOutcome::failed("connection attempt abandoned"),
    }
}

/// Whether an inbound message is real content rather than a protocol stub.
fn is_content(payload: &Option<Value>, stub_code: Option<u32>) -> bool {
    if stub_code.is_some() {
        return false;
    }
    match payload {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

impl Inner {
    pub(super) fn claim_attempt(&self, id: &str) -> Claim {
        let mut attempts = self.attempts.lock();
        if let Some(rx) = attempts.get(id) {
            return Claim::Join(rx.clone());
        }
        let connected = self
            .sessions
            .lock()
            .get(id)
            .is_some_and(|s| s.info.status == SessionStatus::Connected);
        if connected {
            return Claim::AlreadyConnected;
        }
        let (tx, rx) = watch::channel(None);
        attempts.insert(id.to_owned(), rx);
        Claim::Lead(tx)
    }

    pub(super) fn finish_attempt(
        &self,
        id: &str,
        tx: watch::Sender<Option<StartOutcome>>,
        outcome: StartOutcome,
    ) {
        tx.send_replace(Some(outcome));
        self.attempts.lock().remove(id);
    }

    /// Open the transport and wait for it to settle.
    ///
    /// `Err` means the transport could not be opened (or never settled);
    /// an unsuccessful `Ok` means it opened and was then closed.
    pub(super) async fn connect(self: &Arc<Self>, req: &StartRequest) -> Result<StartOutcome> {
        self.release_slot(&req.id).await;

        let (state, fresh) = credentials::decode_or_fresh(&req.id, req.prior_credentials.as_deref());
        tracing::info!(
            session_id = %req.id,
            owner_id = %req.owner_id,
            fresh_identity = fresh,
            "opening transport"
        );

        if let Err(e) = self
            .store
            .upsert(&req.id, &req.display_name, &req.owner_id)
            .await
        {
            tracing::warn!(session_id = %req.id, error = %e, "failed to record session row");
        }

        let conn = self.connector.open(&req.id, &state).await?;

        if self.deleted.lock().contains(&req.id) {
            tracing::info!(session_id = %req.id, "session deleted while connecting; discarding transport");
            conn.handle.end().await;
            if let Err(e) = self.store.remove(&req.id).await {
                tracing::warn!(session_id = %req.id, error = %e, "failed to drop row of deleted session");
            }
            return Ok(StartOutcome::failed("session was deleted"));
        }

        let generation = self.next_generation();
        let (start_tx, start_rx) = oneshot::channel();
        let slot = SessionSlot {
            info: SessionInfo::connecting(req),
            generation,
            handle: conn.handle,
            credentials: CredentialCell::new(req.id.clone(), state, self.store.clone()),
            pending_start: Some(start_tx),
        };
        // Anything left here was registered by a concurrent restart path;
        // it is superseded and must be ended.
        let displaced = self.sessions.lock().insert(req.id.clone(), slot);
        if let Some(old) = displaced {
            self.dispose(old).await;
        }

        self.publish_status(&req.id, &req.owner_id, SessionStatus::Connecting, None);
        tokio::spawn(self.clone().run_events(req.id.clone(), generation, conn.events));

        match tokio::time::timeout(self.connect_timeout, start_rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Ok(StartOutcome::failed("connection torn down before it settled")),
            Err(_) => {
                self.release_generation(&req.id, generation).await;
                self.publish_status(
                    &req.id,
                    &req.owner_id,
                    SessionStatus::Disconnected,
                    Some("connect timed out".into()),
                );
                Err(Error::Timeout(format!(
                    "session {} did not settle within {}s",
                    req.id,
                    self.connect_timeout.as_secs()
                )))
            }
        }
    }

    /// Apply one connection's events in order until it closes or is
    /// superseded.
    async fn run_events(
        self: Arc<Self>,
        id: String,
        generation: u64,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(&id, generation) {
                return;
            }
            if let TransportEvent::Closed(reason) = event {
                self.handle_close(&id, generation, reason).await;
                return;
            }
            self.handle_event(&id, generation, event).await;
        }
        if self.is_current(&id, generation) {
            self.handle_close(&id, generation, CloseReason::new(None, "transport event stream ended"))
                .await;
        }
    }

    fn is_current(&self, id: &str, generation: u64) -> bool {
        self.with_current(id, generation, |_| ()).is_some()
    }

    async fn handle_event(self: &Arc<Self>, id: &str, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::QrIssued(qr) => self.on_qr(id, generation, qr).await,
            TransportEvent::Opened { is_new_login } => self.on_opened(id, generation, is_new_login).await,
            TransportEvent::CredentialsChanged(update) => {
                if let Some(cell) = self.with_current(id, generation, |s| s.credentials.clone()) {
                    cell.apply(update);
                    cell.request_save();
                }
            }
            TransportEvent::MessageReceived {
                payload,
                stub_code,
                timestamp,
            } => {
                if !is_content(&payload, stub_code) {
                    tracing::trace!(session_id = %id, ?stub_code, "dropping protocol stub");
                    return;
                }
                let Some(owner_id) = self.with_current(id, generation, |s| s.info.owner_id.clone())
                else {
                    return;
                };
                self.events.publish(SessionEvent::MessageReceived {
                    session_id: id.to_owned(),
                    owner_id,
                    payload: payload.unwrap_or(Value::Null),
                    timestamp: timestamp.unwrap_or_else(|| Utc::now().timestamp()),
                });
            }
            TransportEvent::Closed(reason) => self.handle_close(id, generation, reason).await,
        }
    }

    async fn on_qr(&self, id: &str, generation: u64, qr: String) {
        let Some(owner_id) = self.with_current(id, generation, |s| {
            s.transition(SessionStatus::QrPending);
            s.info.qr = Some(qr.clone());
            s.info.owner_id.clone()
        }) else {
            return;
        };

        if let Err(e) = self
            .store
            .set_status(id, SessionStatus::QrPending, Some(&qr))
            .await
        {
            tracing::warn!(session_id = %id, error = %e, "failed to persist QR state");
        }

        self.with_current(id, generation, |s| {
            s.resolve_start(StartOutcome::qr_pending(qr.clone()))
        });
        self.events.publish(SessionEvent::QrGenerated {
            session_id: id.to_owned(),
            owner_id: owner_id.clone(),
            qr,
        });
        self.publish_status(id, &owner_id, SessionStatus::QrPending, None);
    }

    async fn on_opened(&self, id: &str, generation: u64, is_new_login: bool) {
        let Some((owner_id, cell)) = self.with_current(id, generation, |s| {
            s.transition(SessionStatus::Connected);
            s.info.qr = None;
            s.info.connected_at = Some(Utc::now());
            (s.info.owner_id.clone(), s.credentials.clone())
        }) else {
            return;
        };
        self.retries.lock().remove(id);
        self.cancel_timer(id);

        if is_new_login {
            // A fresh pairing must be on disk before anyone is told it worked.
            // If the write fails the session stays up; the next credential
            // change or restart writes again.
            if let Err(e) = cell.persist_now().await {
                tracing::error!(
                    session_id = %id,
                    error = %e,
                    "failed to persist credentials after pairing; continuing connected"
                );
            }
        }

        if let Err(e) = self
            .store
            .set_status(id, SessionStatus::Connected, None)
            .await
        {
            tracing::warn!(session_id = %id, error = %e, "failed to persist connected status");
        }
        if let Err(e) = self.store.clear_qr(id).await {
            tracing::warn!(session_id = %id, error = %e, "failed to clear stored QR");
        }

        self.with_current(id, generation, |s| {
            s.resolve_start(StartOutcome::connected("connected"))
        });
        tracing::info!(session_id = %id, is_new_login, "session connected");
        self.publish_status(id, &owner_id, SessionStatus::Connected, None);
    }

    async fn handle_close(self: &Arc<Self>, id: &str, generation: u64, reason: CloseReason) {
        let slot = {
            let mut sessions = self.sessions.lock();
            match sessions.get(id) {
                Some(s) if s.generation == generation => sessions.remove(id),
                _ => None,
            }
        };
        let Some(mut slot) = slot else {
            return;
        };
        let pending = slot.pending_start.take();
        let info = self.dispose(slot).await;
        let kind = reason.classify();

        tracing::info!(
            session_id = %id,
            code = ?reason.code,
            reason = %reason.message,
            terminal = kind == CloseKind::Terminal,
            "transport closed"
        );

        match kind {
            CloseKind::Terminal => {
                self.retries.lock().remove(id);
                if let Err(e) = self
                    .store
                    .set_status(id, SessionStatus::Disconnected, None)
                    .await
                {
                    tracing::warn!(session_id = %id, error = %e, "failed to persist terminal status");
                }
                self.events.publish(SessionEvent::Error {
                    session_id: id.to_owned(),
                    owner_id: info.owner_id.clone(),
                    error: reason.message.clone(),
                    code: reason.code,
                });
                self.publish_status(id, &info.owner_id, SessionStatus::Disconnected, Some(reason.to_string()));
                if let Some(tx) = pending {
                    let _ = tx.send(StartOutcome::failed(format!("connection rejected: {reason}")));
                }
            }
            CloseKind::Transient => {
                self.publish_status(
                    id,
                    &info.owner_id,
                    SessionStatus::Disconnected,
                    Some(format!("reconnecting: {reason}")),
                );
                if let Some(tx) = pending {
                    let _ = tx.send(StartOutcome::failed(format!(
                        "connection closed ({reason}); restart scheduled"
                    )));
                }
                self.schedule_restart(RestartTarget::from(&info));
            }
        }
    }
}
