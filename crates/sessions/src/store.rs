//! Durable session rows.
//!
//! The lifecycle manager only needs a narrow view of the store: enumerate
//! live sessions, fetch one row, and update the credential blob, status
//! and QR columns.  [`CredentialStore`] is that view; [`JsonFileStore`] is
//! the bundled implementation, a single JSON document rewritten
//! atomically on every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use lh_domain::error::{Error, Result};

use crate::model::SessionStatus;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stored row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub owner_id: String,
    /// Opaque credential blob (see [`crate::credentials::encode`]).
    #[serde(default)]
    pub credentials: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub qr: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persistence seam for session rows.
///
/// Mutations addressed to a missing row are no-ops, so a row removed
/// while a session is still winding down is never resurrected.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Every row whose status is not `DISCONNECTED`.
    async fn load_all(&self) -> Result<Vec<StoredSession>>;

    async fn load_one(&self, id: &str) -> Result<Option<StoredSession>>;

    async fn save_blob(&self, id: &str, blob: &str) -> Result<()>;

    async fn set_status(&self, id: &str, status: SessionStatus, qr: Option<&str>) -> Result<()>;

    async fn clear_qr(&self, id: &str) -> Result<()>;

    /// Drop the credential blob and mark the row `DISCONNECTED`.
    async fn erase_credentials(&self, id: &str) -> Result<()>;

    /// Create the row if missing, refresh its descriptive fields and mark
    /// it `CONNECTING`.
    async fn upsert(&self, id: &str, display_name: &str, owner_id: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON file store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session rows backed by a JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, StoredSession>>,
    /// Serializes flushes so an older snapshot never lands after a newer one.
    write_gate: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Load the store at `path`, creating parent directories as needed.
    /// A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| persistence("creating store directory", &path, e))?;
        }

        let rows: HashMap<String, StoredSession> = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => HashMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::Persistence(format!("parsing {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(persistence("reading store", &path, e)),
        };

        tracing::info!(
            sessions = rows.len(),
            path = %path.display(),
            "session store loaded"
        );

        Ok(Self {
            path,
            rows: RwLock::new(rows),
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to the row if it exists and flush.  Missing rows are left
    /// alone and nothing is written.
    async fn mutate(&self, id: &str, f: impl FnOnce(&mut StoredSession)) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let changed = {
            let mut rows = self.rows.write();
            match rows.get_mut(id) {
                Some(row) => {
                    f(row);
                    row.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        };
        if changed {
            self.flush_locked().await?;
        }
        Ok(())
    }

    /// Write the whole document through a temp file and rename.
    /// Callers must hold `write_gate`.
    async fn flush_locked(&self) -> Result<()> {
        let json = {
            let rows = self.rows.read();
            serde_json::to_vec_pretty(&*rows)?
        };
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| persistence("writing", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| persistence("renaming into", &self.path, e))?;
        Ok(())
    }
}

fn persistence(what: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Persistence(format!("{what} {}: {e}", path.display()))
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<StoredSession>> {
        let mut rows: Vec<StoredSession> = self
            .rows
            .read()
            .values()
            .filter(|r| r.status != SessionStatus::Disconnected)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn load_one(&self, id: &str) -> Result<Option<StoredSession>> {
        Ok(self.rows.read().get(id).cloned())
    }

    async fn save_blob(&self, id: &str, blob: &str) -> Result<()> {
        let blob = blob.to_owned();
        self.mutate(id, move |row| row.credentials = Some(blob)).await
    }

    async fn set_status(&self, id: &str, status: SessionStatus, qr: Option<&str>) -> Result<()> {
        let qr = qr.map(str::to_owned);
        self.mutate(id, move |row| {
            row.status = status;
            if qr.is_some() {
                row.qr = qr;
            }
        })
        .await
    }

    async fn clear_qr(&self, id: &str) -> Result<()> {
        self.mutate(id, |row| row.qr = None).await
    }

    async fn erase_credentials(&self, id: &str) -> Result<()> {
        self.mutate(id, |row| {
            row.credentials = None;
            row.qr = None;
            row.status = SessionStatus::Disconnected;
        })
        .await
    }

    async fn upsert(&self, id: &str, display_name: &str, owner_id: &str) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        {
            let mut rows = self.rows.write();
            let now = Utc::now();
            let row = rows.entry(id.to_owned()).or_insert_with(|| StoredSession {
                id: id.to_owned(),
                display_name: String::new(),
                owner_id: String::new(),
                credentials: None,
                status: SessionStatus::Connecting,
                qr: None,
                updated_at: now,
            });
            row.display_name = display_name.to_owned();
            row.owner_id = owner_id.to_owned();
            row.status = SessionStatus::Connecting;
            row.updated_at = now;
        }
        self.flush_locked().await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let removed = self.rows.write().remove(id).is_some();
        if removed {
            self.flush_locked().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_in(dir: &tempfile::TempDir) -> JsonFileStore {
        JsonFileStore::open(dir.path().join("data/sessions.json"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(store.load_one("42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(&dir).await;
            store.upsert("42", "Sales", "owner-1").await.unwrap();
            store.save_blob("42", "blob-v1").await.unwrap();
            store
                .set_status("42", SessionStatus::QrPending, Some("qr-data"))
                .await
                .unwrap();
        }
        let store = store_in(&dir).await;
        let row = store.load_one("42").await.unwrap().unwrap();
        assert_eq!(row.display_name, "Sales");
        assert_eq!(row.credentials.as_deref(), Some("blob-v1"));
        assert_eq!(row.status, SessionStatus::QrPending);
        assert_eq!(row.qr.as_deref(), Some("qr-data"));
    }

    #[tokio::test]
    async fn load_all_skips_disconnected_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        store.upsert("a", "A", "o").await.unwrap();
        store.upsert("b", "B", "o").await.unwrap();
        store.erase_credentials("b").await.unwrap();

        let ids: Vec<_> = store
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string()]);

        let b = store.load_one("b").await.unwrap().unwrap();
        assert!(b.credentials.is_none());
        assert_eq!(b.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn mutations_on_missing_rows_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        store.save_blob("ghost", "blob").await.unwrap();
        store
            .set_status("ghost", SessionStatus::Connected, None)
            .await
            .unwrap();
        store.remove("ghost").await.unwrap();
        assert!(store.load_one("ghost").await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn clear_qr_keeps_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        store.upsert("42", "x", "o").await.unwrap();
        store
            .set_status("42", SessionStatus::QrPending, Some("qr"))
            .await
            .unwrap();
        store.clear_qr("42").await.unwrap();
        let row = store.load_one("42").await.unwrap().unwrap();
        assert!(row.qr.is_none());
        assert_eq!(row.status, SessionStatus::QrPending);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::open(&path).await.err().unwrap();
        assert_eq!(err.code(), "persistence_failure");
    }
}
