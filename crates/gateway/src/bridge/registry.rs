//! In-memory registry of connected transport bridges, the sessions routed
//! through each, and in-flight request/response round trips.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lh_domain::{Error, Result};
use lh_protocol::BridgeMessage;
use lh_sessions::TransportEvent;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Channel to a connected bridge's WebSocket writer task.
pub type BridgeSink = mpsc::Sender<BridgeMessage>;

/// Per-session transport event buffer.
const SESSION_EVENT_BUFFER: usize = 64;

/// A connected bridge.
pub struct ConnectedBridge {
    pub bridge_id: String,
    pub version: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sink: BridgeSink,
}

/// Summary returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeInfo {
    pub bridge_id: String,
    pub version: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sessions: usize,
}

/// Where one session's transport events go.
struct Route {
    bridge_id: String,
    epoch: u64,
    events: mpsc::Sender<TransportEvent>,
}

struct PendingRequest {
    bridge_id: String,
    tx: oneshot::Sender<Result<Value>>,
}

/// Thread-safe registry shared by the bridge socket handler and the
/// [`crate::bridge::BridgeConnector`].
pub struct BridgeRegistry {
    bridges: RwLock<HashMap<String, ConnectedBridge>>,
    routes: Mutex<HashMap<String, Route>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    next_epoch: Mutex<u64>,
    request_timeout: Duration,
}

impl BridgeRegistry {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            bridges: RwLock::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_epoch: Mutex::new(1),
            request_timeout,
        }
    }

    /// Register a bridge connection, replacing any earlier one with the
    /// same id.
    pub fn register(&self, bridge: ConnectedBridge) {
        tracing::info!(
            bridge_id = %bridge.bridge_id,
            version = %bridge.version,
            "bridge registered"
        );
        self.bridges.write().insert(bridge.bridge_id.clone(), bridge);
    }

    /// Forget a bridge and close every session routed through it.
    ///
    /// In-flight requests fail immediately and each routed session
    /// receives a synthetic transient close so the manager restarts it
    /// (possibly on another bridge).
    pub async fn disconnect(&self, bridge_id: &str) -> usize {
        if self.bridges.write().remove(bridge_id).is_some() {
            tracing::info!(bridge_id = %bridge_id, "bridge removed");
        }
        self.fail_pending_for_bridge(bridge_id);

        let orphaned: Vec<(String, mpsc::Sender<TransportEvent>)> = {
            let mut routes = self.routes.lock();
            let ids: Vec<String> = routes
                .iter()
                .filter(|(_, r)| r.bridge_id == bridge_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| routes.remove(&id).map(|r| (id, r.events)))
                .collect()
        };

        for (session_id, events) in &orphaned {
            let closed = TransportEvent::Closed(lh_sessions::CloseReason::new(
                None,
                "bridge disconnected",
            ));
            if events.send(closed).await.is_err() {
                tracing::debug!(session_id = %session_id, "session stream already gone");
            }
        }
        orphaned.len()
    }

    pub fn touch(&self, bridge_id: &str) {
        if let Some(bridge) = self.bridges.write().get_mut(bridge_id) {
            bridge.last_seen = Utc::now();
        }
    }

    pub fn get_sink(&self, bridge_id: &str) -> Option<BridgeSink> {
        self.bridges.read().get(bridge_id).map(|b| b.sink.clone())
    }

    /// The connected bridge carrying the fewest sessions.  Ties go to the
    /// lexically smallest id so placement is stable.
    pub fn least_loaded(&self) -> Option<(String, BridgeSink)> {
        let bridges = self.bridges.read();
        let routes = self.routes.lock();
        bridges
            .values()
            .map(|b| {
                let load = routes.values().filter(|r| r.bridge_id == b.bridge_id).count();
                (load, b)
            })
            .min_by(|(la, a), (lb, b)| la.cmp(lb).then_with(|| a.bridge_id.cmp(&b.bridge_id)))
            .map(|(_, b)| (b.bridge_id.clone(), b.sink.clone()))
    }

    /// Route `session_id`'s events from `bridge_id` into a fresh channel.
    /// Any earlier route for the session is dropped, which ends its stream.
    pub fn bind_session(
        &self,
        session_id: &str,
        bridge_id: &str,
    ) -> (u64, mpsc::Receiver<TransportEvent>) {
        let epoch = {
            let mut next = self.next_epoch.lock();
            let e = *next;
            *next += 1;
            e
        };
        let (tx, rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        self.routes.lock().insert(
            session_id.to_owned(),
            Route {
                bridge_id: bridge_id.to_owned(),
                epoch,
                events: tx,
            },
        );
        (epoch, rx)
    }

    /// Drop the route if it is still the one created at `epoch`.
    pub fn unbind_session(&self, session_id: &str, epoch: u64) -> bool {
        let mut routes = self.routes.lock();
        if routes.get(session_id).is_some_and(|r| r.epoch == epoch) {
            routes.remove(session_id);
            true
        } else {
            false
        }
    }

    /// Deliver a transport event reported by `bridge_id`.  Events for
    /// sessions not routed through that bridge are ignored.
    pub async fn deliver(&self, bridge_id: &str, session_id: &str, event: TransportEvent) {
        let sender = {
            let routes = self.routes.lock();
            match routes.get(session_id) {
                Some(r) if r.bridge_id == bridge_id => Some(r.events.clone()),
                _ => None,
            }
        };
        match sender {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    tracing::debug!(session_id = %session_id, "session stream closed, event dropped");
                }
            }
            None => tracing::debug!(
                bridge_id = %bridge_id,
                session_id = %session_id,
                "event for unrouted session ignored"
            ),
        }
    }

    /// Number of sessions currently routed through any bridge.
    pub fn routed_sessions(&self) -> usize {
        self.routes.lock().len()
    }

    /// Send a `request` to `bridge_id` and wait for its `response`.
    pub async fn request(
        &self,
        bridge_id: &str,
        session_id: &str,
        op: &str,
        args: Value,
    ) -> Result<Value> {
        let sink = self.get_sink(bridge_id).ok_or_else(|| {
            Error::TransientTransport(format!("bridge {bridge_id} not connected"))
        })?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id.clone(),
            PendingRequest {
                bridge_id: bridge_id.to_owned(),
                tx,
            },
        );

        let msg = BridgeMessage::Request {
            request_id: request_id.clone(),
            session_id: session_id.to_owned(),
            op: op.to_owned(),
            args,
        };
        if sink.send(msg).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(Error::TransientTransport(format!(
                "failed to send to bridge {bridge_id}"
            )));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::TransientTransport(format!(
                "bridge {bridge_id} disconnected before responding"
            ))),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(Error::Timeout(format!(
                    "{op} on bridge {bridge_id} timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
        }
    }

    /// Called by the socket handler when a bridge sends a `response`.
    pub fn complete_request(
        &self,
        request_id: &str,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let Some(pending) = self.pending.lock().remove(request_id) else {
            tracing::warn!(request_id = %request_id, "response for unknown request");
            return;
        };
        let outcome = if success {
            Ok(result.unwrap_or(Value::Null))
        } else {
            Err(Error::TransientTransport(
                error.unwrap_or_else(|| "bridge reported failure".into()),
            ))
        };
        let _ = pending.tx.send(outcome);
    }

    /// Fail every in-flight request addressed to `bridge_id`.
    pub fn fail_pending_for_bridge(&self, bridge_id: &str) -> usize {
        let mut pending = self.pending.lock();
        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.bridge_id == bridge_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(p) = pending.remove(id) {
                let _ = p.tx.send(Err(Error::TransientTransport(format!(
                    "bridge {bridge_id} disconnected"
                ))));
            }
        }
        if !ids.is_empty() {
            tracing::warn!(
                bridge_id = %bridge_id,
                failed_requests = ids.len(),
                "failed in-flight requests for disconnected bridge"
            );
        }
        ids.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn count(&self) -> usize {
        self.bridges.read().len()
    }

    pub fn list(&self) -> Vec<BridgeInfo> {
        let bridges = self.bridges.read();
        let routes = self.routes.lock();
        let mut out: Vec<BridgeInfo> = bridges
            .values()
            .map(|b| BridgeInfo {
                bridge_id: b.bridge_id.clone(),
                version: b.version.clone(),
                connected_at: b.connected_at,
                last_seen: b.last_seen,
                sessions: routes.values().filter(|r| r.bridge_id == b.bridge_id).count(),
            })
            .collect();
        out.sort_by(|a, b| a.bridge_id.cmp(&b.bridge_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(reg: &BridgeRegistry, id: &str) -> mpsc::Receiver<BridgeMessage> {
        let (tx, rx) = mpsc::channel(8);
        reg.register(ConnectedBridge {
            bridge_id: id.into(),
            version: "0.1.0".into(),
            connected_at: Utc::now(),
            last_seen: Utc::now(),
            sink: tx,
        });
        rx
    }

    #[test]
    fn least_loaded_prefers_idle_bridge() {
        let reg = BridgeRegistry::new(Duration::from_secs(5));
        let _a = connect(&reg, "a");
        let _b = connect(&reg, "b");

        let _ = reg.bind_session("s1", "a");
        assert_eq!(reg.least_loaded().map(|(id, _)| id).as_deref(), Some("b"));

        let _ = reg.bind_session("s2", "b");
        assert_eq!(reg.least_loaded().map(|(id, _)| id).as_deref(), Some("a"));
    }

    #[test]
    fn unbind_ignores_stale_epoch() {
        let reg = BridgeRegistry::new(Duration::from_secs(5));
        let (old, _rx1) = reg.bind_session("s1", "a");
        let (new, _rx2) = reg.bind_session("s1", "a");
        assert!(!reg.unbind_session("s1", old));
        assert_eq!(reg.routed_sessions(), 1);
        assert!(reg.unbind_session("s1", new));
        assert_eq!(reg.routed_sessions(), 0);
    }

    #[tokio::test]
    async fn request_resolves_on_response() {
        let reg = std::sync::Arc::new(BridgeRegistry::new(Duration::from_secs(5)));
        let mut rx = connect(&reg, "a");

        let r = reg.clone();
        let answer = tokio::spawn(async move {
            if let Some(BridgeMessage::Request { request_id, op, .. }) = rx.recv().await {
                assert_eq!(op, "fetchBlocklist");
                r.complete_request(&request_id, true, Some(serde_json::json!(["x"])), None);
            }
        });

        let v = reg
            .request("a", "s1", "fetchBlocklist", serde_json::json!([]))
            .await
            .unwrap();
        assert_eq!(v, serde_json::json!(["x"]));
        answer.await.unwrap();
        assert_eq!(reg.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out() {
        let reg = BridgeRegistry::new(Duration::from_secs(2));
        let _rx = connect(&reg, "a");
        let err = reg
            .request("a", "s1", "logout", serde_json::json!([]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "timeout");
        assert_eq!(reg.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_bridge_is_transient() {
        let reg = BridgeRegistry::new(Duration::from_secs(2));
        let err = reg.request("ghost", "s1", "end", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "transient_transport_failure");
    }

    #[tokio::test]
    async fn disconnect_closes_routed_sessions() {
        let reg = BridgeRegistry::new(Duration::from_secs(5));
        let _a = connect(&reg, "a");
        let _b = connect(&reg, "b");
        let (_, mut s1) = reg.bind_session("s1", "a");
        let (_, mut s2) = reg.bind_session("s2", "b");

        assert_eq!(reg.disconnect("a").await, 1);
        match s1.recv().await {
            Some(TransportEvent::Closed(reason)) => {
                assert_eq!(reason.message, "bridge disconnected");
                assert_eq!(reason.classify(), lh_sessions::CloseKind::Transient);
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert!(s2.try_recv().is_err());
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.routed_sessions(), 1);
    }

    #[tokio::test]
    async fn events_from_other_bridge_are_ignored() {
        let reg = BridgeRegistry::new(Duration::from_secs(5));
        let (_, mut s1) = reg.bind_session("s1", "a");
        reg.deliver("b", "s1", TransportEvent::QrIssued("x".into())).await;
        assert!(s1.try_recv().is_err());
        reg.deliver("a", "s1", TransportEvent::QrIssued("y".into())).await;
        assert!(matches!(s1.recv().await, Some(TransportEvent::QrIssued(q)) if q == "y"));
    }
}
