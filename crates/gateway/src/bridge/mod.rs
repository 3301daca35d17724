//! Transport bridges: external protocol workers that hold the actual
//! messaging connections and talk to the gateway over a WebSocket.

pub mod connector;
pub mod registry;
pub mod ws;

pub use connector::{BridgeConnector, BridgeHandle};
pub use registry::{BridgeInfo, BridgeRegistry};
