//! Wire types for LinkHub's two WebSocket protocols.
//!
//! - [`control`]: operators issue commands and receive lifecycle broadcasts.
//! - [`bridge`]: transport bridges open sessions on behalf of the gateway
//!   and stream protocol events back.
//!
//! [`content`] holds the message payload shapes shared by both.

pub mod bridge;
pub mod content;
pub mod control;

pub use bridge::{BridgeEvent, BridgeMessage};
pub use content::{MediaPayload, OutboundContent};
pub use control::{Broadcast, ControlEnvelope, ControlRequest, ControlResponse};

/// Bumped on any incompatible change to either protocol.
pub const PROTOCOL_VERSION: u32 = 1;
