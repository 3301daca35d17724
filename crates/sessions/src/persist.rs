//! Coalesced credential persistence.
//!
//! Credential changes arrive in bursts.  Writing each one independently
//! lets two writes built from different snapshots race on the same row,
//! so every session funnels its saves through a [`SaveCoalescer`]:
//!
//! - `Idle` + request → `Saving`, the caller becomes the writer.
//! - `Saving` + request → set `dirty` and return immediately.
//! - writer finishes with `dirty` set → clear it and write once more,
//!   serializing the state as it is *now*.
//!
//! At most one physical write per session is in flight and the last
//! write always reflects the latest state.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use lh_domain::error::Result;
use lh_domain::trace::TraceEvent;

use crate::credentials::{self, CredentialState, CredentialUpdate};
use crate::store::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SavePhase {
    Idle,
    Saving,
}

#[derive(Debug)]
struct SaveFlags {
    phase: SavePhase,
    dirty: bool,
}

/// Two-state save machine with a one-bit dirty marker.
///
/// Transitions happen under a single mutex guarding just this pair, so it
/// is safe with writers on different worker threads.
#[derive(Debug)]
pub struct SaveCoalescer {
    flags: Mutex<SaveFlags>,
    idle: Notify,
}

impl Default for SaveCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveCoalescer {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(SaveFlags {
                phase: SavePhase::Idle,
                dirty: false,
            }),
            idle: Notify::new(),
        }
    }

    /// Request a save.  Returns `true` when the caller must perform it;
    /// `false` when a write is already running (it will pick this up).
    pub fn try_begin(&self) -> bool {
        let mut flags = self.flags.lock();
        match flags.phase {
            SavePhase::Idle => {
                flags.phase = SavePhase::Saving;
                flags.dirty = false;
                true
            }
            SavePhase::Saving => {
                flags.dirty = true;
                false
            }
        }
    }

    /// Called by the writer after each write.  Returns `true` when another
    /// save was requested meanwhile and the writer must go again.
    pub fn finish(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.dirty {
            flags.dirty = false;
            return true;
        }
        flags.phase = SavePhase::Idle;
        drop(flags);
        self.idle.notify_waiters();
        false
    }

    pub fn is_idle(&self) -> bool {
        self.flags.lock().phase == SavePhase::Idle
    }

    /// Resolve once no write is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// A session's live credential state plus its coalesced writer.
pub struct CredentialCell {
    session_id: String,
    state: Mutex<CredentialState>,
    coalescer: SaveCoalescer,
    store: Arc<dyn CredentialStore>,
}

impl CredentialCell {
    pub fn new(
        session_id: impl Into<String>,
        state: CredentialState,
        store: Arc<dyn CredentialStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            state: Mutex::new(state),
            coalescer: SaveCoalescer::new(),
            store,
        })
    }

    pub fn snapshot(&self) -> CredentialState {
        self.state.lock().clone()
    }

    pub fn apply(&self, update: CredentialUpdate) {
        self.state.lock().apply(update);
    }

    /// Schedule a save without waiting for it.
    pub fn request_save(self: &Arc<Self>) {
        if self.coalescer.try_begin() {
            let cell = self.clone();
            tokio::spawn(async move {
                let _ = cell.drain().await;
            });
        }
    }

    /// Write the current state and wait until it is stored.
    ///
    /// If another write is in flight, waits for it to settle and then
    /// performs its own, so the result reflects this call's state.
    pub async fn persist_now(self: &Arc<Self>) -> Result<()> {
        loop {
            if self.coalescer.try_begin() {
                return self.drain().await;
            }
            self.coalescer.wait_idle().await;
        }
    }

    /// Wait for any in-flight write to finish.
    pub async fn settle(&self) {
        self.coalescer.wait_idle().await;
    }

    async fn drain(&self) -> Result<()> {
        loop {
            let result = self.write_current().await;
            if let Err(e) = &result {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "credential save failed"
                );
            }
            if !self.coalescer.finish() {
                return result;
            }
        }
    }

    async fn write_current(&self) -> Result<()> {
        let blob = {
            let state = self.state.lock();
            credentials::encode(&state)?
        };
        let started = Instant::now();
        self.store.save_blob(&self.session_id, &blob).await?;
        TraceEvent::CredentialsPersisted {
            session_id: self.session_id.clone(),
            bytes: blob.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        Ok(())
    }
}
