//! Channel routing and message fan-out

use crate::server::connections::{ClientConnection, ConnectionId, ConnectionManager, Frame};
use crate::server::messages::ServerMessage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes frames to channel members, observers, or every peer.
///
/// Every write is a non-blocking push onto the peer's bounded queue. A full
/// or closed queue drops the frame for that peer only and the loop carries on.
#[derive(Clone)]
pub struct ChannelRouter {
    connections: Arc<ConnectionManager>,
}

impl ChannelRouter {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Deliver `frame` to every member of `channel`. Returns how many peers
    /// accepted it. Unknown channels deliver to nobody.
    pub fn route(&self, channel: &str, frame: &Frame) -> usize {
        let members = self.connections.members(channel);

        if members.is_empty() {
            debug!(channel = channel, "No subscribers for channel");
            return 0;
        }

        debug!(channel = channel, subscriber_count = members.len(), "Routing message");
        deliver_all(members.iter(), frame)
    }

    /// Deliver `frame` to every observer except `sender`
    pub fn mirror(&self, frame: &Frame, sender: ConnectionId) -> usize {
        let observers = self.connections.observers();
        deliver_all(observers.iter().filter(|conn| conn.id != sender), frame)
    }

    /// Deliver `frame` to every registered connection
    pub fn broadcast(&self, frame: &Frame) -> usize {
        deliver_all(self.connections.all().iter(), frame)
    }

    /// Encode `msg` and send it to a single peer
    pub fn reply(&self, conn: &ClientConnection, msg: &ServerMessage) -> bool {
        match msg.encode() {
            Ok(frame) => deliver(conn, &frame),
            Err(e) => {
                warn!(conn_id = %conn.id, error = %e, "Failed to encode reply");
                false
            }
        }
    }
}

fn deliver_all<'a, I>(targets: I, frame: &Frame) -> usize
where
    I: Iterator<Item = &'a Arc<ClientConnection>>,
{
    targets.filter(|conn| deliver(conn, frame)).count()
}

fn deliver(conn: &ClientConnection, frame: &Frame) -> bool {
    match conn.send(frame.clone()) {
        Ok(()) => true,
        Err(e) => {
            // Expected while a peer is disconnecting or falling behind
            debug!(conn_id = %conn.id, error = %e, "Dropping frame for peer");
            false
        }
    }
}
