use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Location of the durable session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding one row per session (credential blob, status, QR).
    #[serde(default = "d_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: d_store_path(),
        }
    }
}

fn d_store_path() -> PathBuf {
    PathBuf::from("./data/sessions.json")
}
