//! Remote debugging protocol plumbing: the shared websocket transport and the
//! per-page session bridges layered on top of it.

mod bridge;
mod transport;

pub use bridge::{
    BridgeError, BridgeEvent, BridgeReply, Observer, ObserverId, PageSession, SessionBridge,
};
pub use transport::{CdpEvent, CdpTransport, TransportError, WsTransport};
