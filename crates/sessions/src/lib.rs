//! Session lifecycle management for LinkHub.
//!
//! One [`LifecycleManager`] owns every messaging session the process runs:
//! it deduplicates connection attempts, drives each session's state
//! machine from transport events, persists credential state through a
//! coalescing writer, restarts sessions after transient failures with
//! capped exponential back-off, and periodically reconciles its registry
//! against the durable store.

pub mod backoff;
pub mod credentials;
pub mod events;
pub mod manager;
pub mod model;
pub mod persist;
pub mod store;
pub mod transport;

pub use backoff::RetryPolicy;
pub use credentials::{CredentialState, CredentialUpdate, KeyCategory};
pub use events::{EventBus, SessionEvent};
pub use manager::{LifecycleManager, ReconcileReport};
pub use model::{SendReceipt, SessionInfo, SessionStatus, StartOutcome, StartRequest};
pub use store::{CredentialStore, JsonFileStore, StoredSession};
pub use transport::{
    CloseKind, CloseReason, OutboundMessage, RawOperation, TransportConnection,
    TransportConnector, TransportEvent, TransportHandle,
};
