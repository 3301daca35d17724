//! Restart scheduling after transient closes.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use lh_domain::trace::TraceEvent;

use super::connect::Claim;
use super::{Inner, PendingRestart, RestartTarget};
use crate::model::{SessionStatus, StartOutcome, StartRequest};

impl Inner {
    /// Count a failure for `target` and arm a restart timer, or give up
    /// once the attempt budget is spent.
    pub(super) fn schedule_restart(self: &Arc<Self>, target: RestartTarget) {
        if self.deleted.lock().contains(&target.id) {
            tracing::debug!(session_id = %target.id, "not restarting deleted session");
            return;
        }

        let attempt = {
            let mut retries = self.retries.lock();
            let count = retries.entry(target.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if self.policy.should_give_up(attempt) {
            self.abandon(&target, attempt - 1);
            return;
        }

        let delay = self.policy.delay_for_attempt(attempt);
        let token = self.next_generation();
        let id = target.id.clone();

        // Held while spawning so the timer cannot fire before it is registered.
        let mut timers = self.timers.lock();
        let inner = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_restart(target, token).await;
        });
        if let Some(previous) = timers.insert(id.clone(), PendingRestart { token, task }) {
            previous.task.abort();
        }
        drop(timers);

        tracing::info!(
            session_id = %id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "restart scheduled"
        );
        TraceEvent::ReconnectScheduled {
            session_id: id,
            attempt,
            delay_ms: delay.as_millis() as u64,
        }
        .emit();
    }

    fn abandon(self: &Arc<Self>, target: &RestartTarget, attempts: u32) {
        self.retries.lock().remove(&target.id);
        tracing::warn!(session_id = %target.id, attempts, "giving up on session after repeated failures");
        TraceEvent::ReconnectAbandoned {
            session_id: target.id.clone(),
            attempts,
        }
        .emit();

        let inner = self.clone();
        let id = target.id.clone();
        tokio::spawn(async move {
            if let Err(e) = inner
                .store
                .set_status(&id, SessionStatus::Disconnected, None)
                .await
            {
                tracing::warn!(session_id = %id, error = %e, "failed to persist abandoned status");
            }
        });

        self.publish_status(
            &target.id,
            &target.owner_id,
            SessionStatus::Disconnected,
            Some(format!("restart abandoned after {attempts} attempts")),
        );
    }

    /// Timer callback.  Boxed because the restart path re-enters
    /// `connect`, which can schedule another restart.
    fn fire_restart(self: Arc<Self>, target: RestartTarget, token: u64) -> BoxFuture<'static, ()> {
        async move {
            // Claim the timer.  Once claimed the restart runs to completion
            // even if a cancel arrives meanwhile.
            {
                let mut timers = self.timers.lock();
                match timers.get(&target.id) {
                    Some(pending) if pending.token == token => {
                        timers.remove(&target.id);
                    }
                    _ => return,
                }
            }

            if self.deleted.lock().contains(&target.id) {
                tracing::debug!(session_id = %target.id, "restart skipped: session deleted");
                return;
            }

            // Claim before touching the slot: a session brought back by hand
            // in the meantime must not be torn down by a stale timer.
            let tx = match self.claim_attempt(&target.id) {
                Claim::Lead(tx) => tx,
                Claim::Join(_) | Claim::AlreadyConnected => {
                    tracing::debug!(session_id = %target.id, "restart superseded by another attempt");
                    return;
                }
            };
            if self.sessions.lock().contains_key(&target.id) {
                tracing::debug!(session_id = %target.id, "restart superseded by a live connection");
                self.finish_attempt(&target.id, tx, StartOutcome::failed("restart superseded"));
                return;
            }

            // Restart from whatever was saved last, never from an older blob.
            let row = match self.store.load_one(&target.id).await {
                Ok(Some(row)) if row.status != SessionStatus::Disconnected => row,
                Ok(found) => {
                    let why = if found.is_some() { "session logged out" } else { "session row gone" };
                    tracing::info!(session_id = %target.id, why, "dropping restart");
                    self.retries.lock().remove(&target.id);
                    self.finish_attempt(&target.id, tx, StartOutcome::failed(why));
                    return;
                }
                Err(e) => {
                    tracing::warn!(session_id = %target.id, error = %e, "store unavailable for restart");
                    self.finish_attempt(&target.id, tx, StartOutcome::failed(e.to_string()));
                    self.schedule_restart(target);
                    return;
                }
            };

            let req = StartRequest {
                id: target.id.clone(),
                display_name: target.display_name.clone(),
                owner_id: target.owner_id.clone(),
                prior_credentials: row.credentials,
            };
            tracing::info!(session_id = %req.id, "restarting session");

            let outcome = match self.connect(&req).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(session_id = %req.id, error = %e, "restart failed to connect");
                    self.schedule_restart(target);
                    StartOutcome::failed(e.to_string())
                }
            };
            self.finish_attempt(&req.id, tx, outcome);
        }
        .boxed()
    }
}
