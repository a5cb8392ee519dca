//! Relay server implementation
//!
//! Handles WebSocket connections, channel membership, and message fan-out.

mod connections;
mod keepalive;
mod messages;
mod relay;
mod router;
pub mod transport;
pub mod websocket;

pub use connections::{
    ClientConnection, ConnectionId, ConnectionManager, Frame, LinkState, PeerRole, SendError,
};
pub use keepalive::KeepAlive;
pub use messages::{AckAction, AckStatus, ClientCommand, FrameError, ServerMessage};
pub use relay::RelayEngine;
pub use router::ChannelRouter;
pub use transport::{RelayServer, RelayServerConfig, RelayStats};
pub use websocket::{create_router, WsState};
