//! Credential state codec.
//!
//! A session's durable identity is an opaque credential document plus a
//! key store split into fixed categories.  The whole state is stored as a
//! single versioned JSON blob:
//!
//! ```json
//! { "v": 1, "creds": { ... }, "keys": { "pre-key": { "1": "<hex>" } } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use lh_domain::error::{Error, Result};

/// Current blob format version.
pub const BLOB_VERSION: u32 = 1;

/// Fixed key-store categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyCategory {
    PreKey,
    Session,
    SenderKey,
    AppStateSyncKey,
    AppStateSyncVersion,
    SenderKeyMemory,
    LidMapping,
    DeviceList,
    DeviceIndex,
}

/// Raw key bytes, hex-encoded inside the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlob(pub Vec<u8>);

impl Serialize for KeyBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for KeyBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(KeyBlob).map_err(serde::de::Error::custom)
    }
}

pub type KeyMaterial = BTreeMap<KeyCategory, BTreeMap<String, KeyBlob>>;

/// Identity + key material needed to resume a session without re-pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialState {
    pub credentials: Value,
    pub keys: KeyMaterial,
}

impl CredentialState {
    /// A brand-new, unpaired identity.
    pub fn fresh() -> Self {
        Self {
            credentials: serde_json::json!({ "registered": false }),
            keys: BTreeMap::new(),
        }
    }

    /// Whether the identity has completed pairing at least once.
    pub fn is_registered(&self) -> bool {
        self.credentials
            .get("registered")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn key_count(&self) -> usize {
        self.keys.values().map(BTreeMap::len).sum()
    }

    pub fn get_key(&self, category: KeyCategory, id: &str) -> Option<&KeyBlob> {
        self.keys.get(&category).and_then(|m| m.get(id))
    }

    /// Apply a transport-reported change.  Credential objects are merged
    /// shallowly (later fields win); a `None` key value deletes the key.
    pub fn apply(&mut self, update: CredentialUpdate) {
        if let Some(creds) = update.credentials {
            match (&mut self.credentials, creds) {
                (Value::Object(current), Value::Object(patch)) => {
                    for (k, v) in patch {
                        current.insert(k, v);
                    }
                }
                (slot, replacement) => *slot = replacement,
            }
        }

        for write in update.keys {
            match write.value {
                Some(blob) => {
                    self.keys
                        .entry(write.category)
                        .or_default()
                        .insert(write.id, blob);
                }
                None => {
                    if let Some(bucket) = self.keys.get_mut(&write.category) {
                        bucket.remove(&write.id);
                        if bucket.is_empty() {
                            self.keys.remove(&write.category);
                        }
                    }
                }
            }
        }
    }
}

/// A single key-store write reported by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyWrite {
    pub category: KeyCategory,
    pub id: String,
    /// `None` removes the key.
    #[serde(default)]
    pub value: Option<KeyBlob>,
}

/// Payload of a `credentialsChanged` transport event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    #[serde(default)]
    pub credentials: Option<Value>,
    #[serde(default)]
    pub keys: Vec<KeyWrite>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u32,
    creds: Value,
    #[serde(default)]
    keys: KeyMaterial,
}

/// Serialize the state into the store's blob format.
pub fn encode(state: &CredentialState) -> Result<String> {
    let envelope = Envelope {
        v: BLOB_VERSION,
        creds: state.credentials.clone(),
        keys: state.keys.clone(),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Parse a stored blob.
pub fn decode(blob: &str) -> Result<CredentialState> {
    let envelope: Envelope = serde_json::from_str(blob)?;
    if envelope.v != BLOB_VERSION {
        return Err(Error::Other(format!(
            "unsupported credential blob version {} (expected {BLOB_VERSION})",
            envelope.v
        )));
    }
    if !envelope.creds.is_object() {
        return Err(Error::Other("credential document must be an object".into()));
    }
    Ok(CredentialState {
        credentials: envelope.creds,
        keys: envelope.keys,
    })
}

/// Decode `blob` if present, falling back to a fresh identity when it is
/// absent or unreadable.  Returns `(state, is_fresh)`.
pub fn decode_or_fresh(session_id: &str, blob: Option<&str>) -> (CredentialState, bool) {
    let Some(raw) = blob.filter(|b| !b.trim().is_empty()) else {
        return (CredentialState::fresh(), true);
    };
    match decode(raw) {
        Ok(state) => (state, false),
        Err(e) => {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "stored credentials unreadable, starting with a fresh identity"
            );
            (CredentialState::fresh(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(category: KeyCategory, id: &str, bytes: Option<&[u8]>) -> KeyWrite {
        KeyWrite {
            category,
            id: id.into(),
            value: bytes.map(|b| KeyBlob(b.to_vec())),
        }
    }

    #[test]
    fn blob_layout_uses_kebab_categories_and_hex() {
        let mut state = CredentialState::fresh();
        state.apply(CredentialUpdate {
            credentials: None,
            keys: vec![write(KeyCategory::AppStateSyncKey, "k1", Some(&[0xde, 0xad]))],
        });
        let blob = encode(&state).unwrap();
        let v: Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(v["v"], 1);
        assert_eq!(v["keys"]["app-state-sync-key"]["k1"], "dead");
        assert_eq!(decode(&blob).unwrap(), state);
    }

    #[test]
    fn apply_merges_credentials_and_deletes_keys() {
        let mut state = CredentialState::fresh();
        state.apply(CredentialUpdate {
            credentials: Some(serde_json::json!({ "registered": true, "me": "123" })),
            keys: vec![
                write(KeyCategory::PreKey, "1", Some(b"a")),
                write(KeyCategory::PreKey, "2", Some(b"b")),
            ],
        });
        assert!(state.is_registered());
        assert_eq!(state.credentials["me"], "123");
        assert_eq!(state.key_count(), 2);

        state.apply(CredentialUpdate {
            credentials: Some(serde_json::json!({ "me": "456" })),
            keys: vec![write(KeyCategory::PreKey, "1", None)],
        });
        assert!(state.is_registered(), "merge must keep untouched fields");
        assert_eq!(state.credentials["me"], "456");
        assert_eq!(state.key_count(), 1);
        assert!(state.get_key(KeyCategory::PreKey, "1").is_none());
    }

    #[test]
    fn removing_last_key_drops_category() {
        let mut state = CredentialState::fresh();
        state.apply(CredentialUpdate {
            credentials: None,
            keys: vec![write(KeyCategory::Session, "s", Some(b"x"))],
        });
        state.apply(CredentialUpdate {
            credentials: None,
            keys: vec![write(KeyCategory::Session, "s", None)],
        });
        assert!(state.keys.is_empty());
    }

    #[test]
    fn corrupt_blob_falls_back_to_fresh() {
        let (state, fresh) = decode_or_fresh("42", Some("{not json"));
        assert!(fresh);
        assert_eq!(state, CredentialState::fresh());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let err = decode(r#"{"v":9,"creds":{}}"#).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn missing_or_blank_blob_is_fresh() {
        assert!(decode_or_fresh("42", None).1);
        assert!(decode_or_fresh("42", Some("  ")).1);
    }

    #[test]
    fn valid_blob_is_not_fresh() {
        let mut state = CredentialState::fresh();
        state.credentials["registered"] = Value::Bool(true);
        let blob = encode(&state).unwrap();
        let (decoded, fresh) = decode_or_fresh("42", Some(&blob));
        assert!(!fresh);
        assert!(decoded.is_registered());
    }
}
