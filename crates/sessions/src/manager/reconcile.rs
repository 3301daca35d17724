//! Registry reconciliation, boot-time resume and shutdown.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use lh_domain::error::Result;
use lh_domain::trace::TraceEvent;

use super::LifecycleManager;
use crate::model::{SessionStatus, StartRequest};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Sessions the store says should exist.
    pub expected: usize,
    /// Ids torn down because the store no longer lists them.
    pub evicted: Vec<String>,
    /// Deleted markers cleared at the end of the pass.
    pub cleared_markers: usize,
}

impl LifecycleManager {
    /// Align the in-memory registry with the store.
    ///
    /// Every registered session, pending restart or retry counter whose id
    /// the store does not list is torn down.  A store error aborts the
    /// pass before anything is touched.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let started = Instant::now();
        let expected: HashSet<String> = self
            .inner
            .store
            .load_all()
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();

        let mut stale: HashSet<String> = self
            .inner
            .sessions
            .lock()
            .keys()
            .filter(|id| !expected.contains(*id))
            .cloned()
            .collect();
        stale.extend(
            self.inner
                .timers
                .lock()
                .keys()
                .filter(|id| !expected.contains(*id))
                .cloned(),
        );
        stale.extend(
            self.inner
                .retries
                .lock()
                .keys()
                .filter(|id| !expected.contains(*id))
                .cloned(),
        );

        let mut evicted: Vec<String> = stale.into_iter().collect();
        evicted.sort();
        for id in &evicted {
            self.inner.cancel_timer(id);
            self.inner.retries.lock().remove(id);
            if let Some(info) = self.inner.release_slot(id).await {
                self.inner.publish_status(
                    id,
                    &info.owner_id,
                    SessionStatus::Disconnected,
                    Some("evicted".into()),
                );
            }
            TraceEvent::SessionEvicted {
                session_id: id.clone(),
                reason: "absent from store".into(),
            }
            .emit();
        }

        let cleared_markers = {
            let mut deleted = self.inner.deleted.lock();
            let n = deleted.len();
            deleted.clear();
            n
        };

        TraceEvent::ReconcileCompleted {
            expected: expected.len(),
            evicted: evicted.len(),
            cleared_markers,
        }
        .emit();
        tracing::debug!(
            expected = expected.len(),
            evicted = evicted.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconciliation pass complete"
        );

        Ok(ReconcileReport {
            expected: expected.len(),
            evicted,
            cleared_markers,
        })
    }

    /// Run [`Self::reconcile_once`] every `interval` until `cancel` fires.
    /// A failed pass is logged and the loop carries on.
    pub fn run_reconciler(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("reconciler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.reconcile_once().await {
                            tracing::warn!(error = %e, "reconciliation pass failed; will retry next interval");
                        }
                    }
                }
            }
        })
    }

    /// Start every session the store lists, concurrently.  Returns how many
    /// came up connected or waiting for a QR scan.
    pub async fn resume_all(&self) -> Result<usize> {
        let rows = self.inner.store.load_all().await?;
        tracing::info!(sessions = rows.len(), "resuming stored sessions");

        let starts = rows.into_iter().map(|row| {
            let manager = self.clone();
            async move {
                let id = row.id.clone();
                let outcome = manager
                    .start_connection(StartRequest {
                        id: row.id,
                        display_name: row.display_name,
                        owner_id: row.owner_id,
                        prior_credentials: row.credentials,
                    })
                    .await;
                if !outcome.success {
                    tracing::warn!(session_id = %id, message = %outcome.message, "session did not resume");
                }
                outcome.success
            }
        });
        let resumed = join_all(starts).await.into_iter().filter(|ok| *ok).count();
        Ok(resumed)
    }

    /// Cancel every pending restart and end every live transport without
    /// logging out, so sessions resume on the next boot.
    pub async fn shutdown(&self) {
        let timers: Vec<_> = self.inner.timers.lock().drain().collect();
        for (_, pending) in timers {
            pending.task.abort();
        }
        self.inner.retries.lock().clear();

        let ids: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        for id in &ids {
            self.inner.release_slot(id).await;
        }
        tracing::info!(sessions = ids.len(), "lifecycle manager shut down");
    }
}
