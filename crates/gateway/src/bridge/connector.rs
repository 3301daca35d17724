//! Bridge-backed implementation of the session transport seams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lh_domain::media::NormalizedMedia;
use lh_domain::{Error, Result};
use lh_protocol::content::encode_bytes;
use lh_protocol::{BridgeEvent, BridgeMessage};
use lh_sessions::credentials::{self, CredentialState, CredentialUpdate};
use lh_sessions::{
    CloseReason, OutboundMessage, RawOperation, TransportConnection, TransportConnector,
    TransportEvent, TransportHandle,
};
use serde_json::{json, Value};

use super::registry::BridgeRegistry;

/// Opens sessions on the least-loaded connected bridge.
pub struct BridgeConnector {
    registry: Arc<BridgeRegistry>,
}

impl BridgeConnector {
    pub fn new(registry: Arc<BridgeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TransportConnector for BridgeConnector {
    async fn open(
        &self,
        session_id: &str,
        credentials: &CredentialState,
    ) -> Result<TransportConnection> {
        let (bridge_id, sink) = self
            .registry
            .least_loaded()
            .ok_or_else(|| Error::TransientTransport("no transport bridge connected".into()))?;

        let blob = credentials::encode(credentials)?;
        let (epoch, events) = self.registry.bind_session(session_id, &bridge_id);

        let open = BridgeMessage::OpenSession {
            session_id: session_id.to_owned(),
            credentials: blob,
        };
        if sink.send(open).await.is_err() {
            self.registry.unbind_session(session_id, epoch);
            return Err(Error::TransientTransport(format!(
                "bridge {bridge_id} went away during open"
            )));
        }

        tracing::debug!(session_id = %session_id, bridge_id = %bridge_id, "session opened on bridge");

        Ok(TransportConnection {
            handle: Arc::new(BridgeHandle {
                registry: self.registry.clone(),
                bridge_id,
                session_id: session_id.to_owned(),
                epoch,
                ended: AtomicBool::new(false),
            }),
            events,
        })
    }
}

/// Operation handle for one session routed through a bridge.
pub struct BridgeHandle {
    registry: Arc<BridgeRegistry>,
    bridge_id: String,
    session_id: String,
    epoch: u64,
    ended: AtomicBool,
}

impl BridgeHandle {
    async fn request(&self, op: &str, args: Value) -> Result<Value> {
        self.registry
            .request(&self.bridge_id, &self.session_id, op, args)
            .await
    }
}

#[async_trait]
impl TransportHandle for BridgeHandle {
    async fn send_message(&self, to: &str, message: OutboundMessage) -> Result<Value> {
        self.request("send_message", json!({ "to": to, "message": message_json(&message) }))
            .await
    }

    async fn logout(&self) -> Result<()> {
        self.request("logout", Value::Null).await.map(|_| ())
    }

    async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.request("end", Value::Null).await {
            tracing::debug!(session_id = %self.session_id, error = %e, "bridge end failed");
        }
        self.registry.unbind_session(&self.session_id, self.epoch);
    }

    async fn call(&self, op: &RawOperation) -> Result<Value> {
        self.request(op.method_name(), op.args()).await
    }
}

fn message_json(message: &OutboundMessage) -> Value {
    match message {
        OutboundMessage::Text { text } => json!({ "text": text }),
        OutboundMessage::Media { media, caption } => json!({
            "media": media_json(media),
            "caption": caption,
        }),
    }
}

fn media_json(media: &NormalizedMedia) -> Value {
    json!({
        "kind": media.kind,
        "data": encode_bytes(&media.data),
        "mimetype": media.mimetype,
        "ptt": media.ptt,
        "file_name": media.file_name,
        "thumbnail": media.thumbnail.as_deref().map(encode_bytes),
    })
}

/// Translate a wire event into the manager's event type.  Malformed
/// credential updates are dropped with a warning.
pub fn transport_event(session_id: &str, event: BridgeEvent) -> Option<TransportEvent> {
    let ev = match event {
        BridgeEvent::QrIssued { payload } => TransportEvent::QrIssued(payload),
        BridgeEvent::Opened { is_new_login } => TransportEvent::Opened { is_new_login },
        BridgeEvent::Closed { code, message } => {
            TransportEvent::Closed(CloseReason::new(code, message))
        }
        BridgeEvent::CredentialsChanged { update } => {
            match serde_json::from_value::<CredentialUpdate>(update) {
                Ok(u) => TransportEvent::CredentialsChanged(u),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "malformed credential update from bridge"
                    );
                    return None;
                }
            }
        }
        BridgeEvent::MessageReceived {
            payload,
            stub_code,
            timestamp,
        } => TransportEvent::MessageReceived {
            payload,
            stub_code,
            timestamp: timestamp.map(|t| t.timestamp()),
        },
    };
    Some(ev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lh_domain::media::MediaKind;
    use lh_sessions::KeyCategory;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::bridge::registry::ConnectedBridge;

    fn registry_with(id: &str) -> (Arc<BridgeRegistry>, mpsc::Receiver<BridgeMessage>) {
        let reg = Arc::new(BridgeRegistry::new(Duration::from_secs(5)));
        let (tx, rx) = mpsc::channel(8);
        reg.register(ConnectedBridge {
            bridge_id: id.into(),
            version: "0.1.0".into(),
            connected_at: Utc::now(),
            last_seen: Utc::now(),
            sink: tx,
        });
        (reg, rx)
    }

    #[tokio::test]
    async fn open_without_bridges_is_transient() {
        let reg = Arc::new(BridgeRegistry::new(Duration::from_secs(5)));
        let connector = BridgeConnector::new(reg);
        let err = connector
            .open("42", &CredentialState::fresh())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "transient_transport_failure");
    }

    #[tokio::test]
    async fn open_sends_encoded_credentials() {
        let (reg, mut rx) = registry_with("a");
        let connector = BridgeConnector::new(reg.clone());
        let conn = connector.open("42", &CredentialState::fresh()).await.unwrap();

        match rx.recv().await {
            Some(BridgeMessage::OpenSession { session_id, credentials: blob }) => {
                assert_eq!(session_id, "42");
                let decoded = credentials::decode(&blob).unwrap();
                assert!(!decoded.is_registered());
            }
            other => panic!("expected open_session, got {other:?}"),
        }
        assert_eq!(reg.routed_sessions(), 1);
        drop(conn);
    }

    #[tokio::test]
    async fn end_unbinds_the_route() {
        let (reg, mut rx) = registry_with("a");
        let connector = BridgeConnector::new(reg.clone());
        let conn = connector.open("42", &CredentialState::fresh()).await.unwrap();
        let _ = rx.recv().await;

        let r = reg.clone();
        let bridge = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let BridgeMessage::Request { request_id, op, .. } = msg {
                    assert_eq!(op, "end");
                    r.complete_request(&request_id, true, None, None);
                }
            }
        });

        conn.handle.end().await;
        conn.handle.end().await;
        assert_eq!(reg.routed_sessions(), 0);
        bridge.abort();
    }

    #[test]
    fn media_message_is_base64_on_the_wire() {
        let msg = OutboundMessage::Media {
            media: NormalizedMedia {
                kind: MediaKind::Audio,
                data: vec![1, 2, 3],
                mimetype: "audio/ogg; codecs=opus".into(),
                ptt: true,
                file_name: None,
                thumbnail: None,
            },
            caption: Some("hi".into()),
        };
        let v = message_json(&msg);
        assert_eq!(v["media"]["data"], "AQID");
        assert_eq!(v["media"]["kind"], "audio");
        assert_eq!(v["media"]["ptt"], true);
        assert_eq!(v["caption"], "hi");
        assert!(v["media"]["thumbnail"].is_null());
    }

    #[test]
    fn credential_update_event_converts() {
        let ev = BridgeEvent::CredentialsChanged {
            update: json!({
                "credentials": {"registered": true},
                "keys": [{"category": "pre-key", "id": "1", "value": "0a0b"}]
            }),
        };
        match transport_event("42", ev) {
            Some(TransportEvent::CredentialsChanged(u)) => {
                assert_eq!(u.keys.len(), 1);
                assert_eq!(u.keys[0].category, KeyCategory::PreKey);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_credential_update_is_dropped() {
        let ev = BridgeEvent::CredentialsChanged {
            update: json!({"keys": "nope"}),
        };
        assert!(transport_event("42", ev).is_none());
    }

    #[test]
    fn close_code_survives_translation() {
        let ev = BridgeEvent::Closed {
            code: Some(401),
            message: "logged out".into(),
        };
        match transport_event("42", ev) {
            Some(TransportEvent::Closed(reason)) => {
                assert_eq!(reason.classify(), lh_sessions::CloseKind::Terminal)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
