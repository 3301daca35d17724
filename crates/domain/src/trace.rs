use serde::Serialize;

/// Structured trace events emitted across all LinkHub crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionStatusChanged {
        session_id: String,
        from: String,
        to: String,
    },
    ReconnectScheduled {
        session_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    ReconnectAbandoned {
        session_id: String,
        attempts: u32,
    },
    CredentialsPersisted {
        session_id: String,
        bytes: usize,
        duration_ms: u64,
    },
    SessionEvicted {
        session_id: String,
        reason: String,
    },
    ReconcileCompleted {
        expected: usize,
        evicted: usize,
        cleared_markers: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "lh_event");
    }
}
