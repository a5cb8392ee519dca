//! wsrelay - WebSocket channel relay
//!
//! Clients join named channels and exchange JSON frames that the relay fans
//! out to the other members. Peers that identify as observers additionally
//! receive a verbatim mirror of every frame any other peer sends.

pub mod channels;
pub mod server;

pub use channels::{Channel, ChannelError};
pub use server::{RelayEngine, RelayServer, RelayServerConfig};
