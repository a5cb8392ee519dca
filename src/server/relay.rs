//! Per-frame protocol handling

use crate::server::connections::{ClientConnection, ConnectionManager, Frame};
use crate::server::messages::{ClientCommand, ServerMessage};
use crate::server::router::ChannelRouter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Parses inbound frames and applies them to the registry.
///
/// Callers must feed frames from one connection in arrival order and must
/// not process two frames from the same connection at once. Frames from
/// different connections may be handled concurrently.
#[derive(Clone)]
pub struct RelayEngine {
    connections: Arc<ConnectionManager>,
    router: ChannelRouter,
}

impl RelayEngine {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        let router = ChannelRouter::new(connections.clone());
        Self { connections, router }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// Register a freshly accepted socket
    pub fn accept(&self, tx: mpsc::Sender<Frame>) -> Arc<ClientConnection> {
        let conn = self.connections.accept(tx);
        info!(conn_id = %conn.id, "Client connected");
        conn
    }

    /// Handle one raw inbound frame from `conn`
    pub fn handle_frame(&self, conn: &Arc<ClientConnection>, raw: Frame) {
        // Observers see everything, parseable or not
        self.router.mirror(&raw, conn.id);

        let command = match ClientCommand::parse(raw.as_str()) {
            Ok(command) => command,
            Err(e) => {
                debug!(conn_id = %conn.id, error = ?e, "Rejected frame");
                self.router.reply(conn, &ServerMessage::rejected(&e));
                return;
            }
        };

        self.dispatch(conn, command, raw);
    }

    fn dispatch(&self, conn: &Arc<ClientConnection>, command: ClientCommand, raw: Frame) {
        match command {
            ClientCommand::Identify { role } => {
                if conn.mark_observer() {
                    info!(conn_id = %conn.id, "Client identified as observer");
                }
                self.router.reply(conn, &ServerMessage::identified(role));
            }
            ClientCommand::Subscribe { channel } => {
                self.connections.subscribe(conn, &channel);
                info!(conn_id = %conn.id, channel = %channel, "Subscribed");
                self.router.reply(conn, &ServerMessage::subscribed(&channel));
            }
            ClientCommand::Unsubscribe { channel } => {
                self.connections.unsubscribe(conn, channel.as_str());
                info!(conn_id = %conn.id, channel = %channel, "Unsubscribed");
                self.router.reply(conn, &ServerMessage::unsubscribed(&channel));
            }
            ClientCommand::Send { channel, message } => {
                info!(conn_id = %conn.id, channel = %channel, message = %message, "Send");
                self.router.reply(conn, &ServerMessage::delivered(&channel));
                // Forward the client's bytes untouched, not a re-encoding
                self.router.route(channel.as_str(), &raw);
            }
        }
    }

    /// Tear down a connection whose socket has closed. Safe to call more
    /// than once.
    pub fn disconnect(&self, conn: &ClientConnection) {
        conn.begin_close();
        if self.connections.teardown(conn) {
            info!(conn_id = %conn.id, "Client disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::connections::PeerRole;

    struct Peer {
        conn: Arc<ClientConnection>,
        rx: mpsc::Receiver<Frame>,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<String> {
            let mut out = vec![];
            while let Ok(frame) = self.rx.try_recv() {
                out.push(frame.as_str().to_string());
            }
            out
        }
    }

    fn peer(engine: &RelayEngine) -> Peer {
        let (tx, rx) = mpsc::channel(32);
        Peer { conn: engine.accept(tx), rx }
    }

    fn send(engine: &RelayEngine, peer: &Peer, raw: &str) {
        engine.handle_frame(&peer.conn, Frame::from(raw));
    }

    fn engine() -> RelayEngine {
        RelayEngine::new(Arc::new(ConnectionManager::new()))
    }

    #[test]
    fn test_identify_acks_and_sets_role() {
        let engine = engine();
        let mut x = peer(&engine);

        send(&engine, &x, r#"{"type":"identify","role":"ui"}"#);

        assert_eq!(x.conn.role(), PeerRole::Observer);
        assert_eq!(
            x.drain(),
            vec![r#"{"type":"ack","action":"identify","role":"ui","status":"ok"}"#]
        );
    }

    #[test]
    fn test_repeat_identify_is_acked() {
        let engine = engine();
        let mut x = peer(&engine);

        send(&engine, &x, r#"{"type":"identify","role":"ui"}"#);
        send(&engine, &x, r#"{"type":"identify","role":"ui"}"#);

        assert_eq!(x.drain().len(), 2);
        assert!(x.conn.is_observer());
    }

    #[test]
    fn test_identify_other_role_is_unknown() {
        let engine = engine();
        let mut x = peer(&engine);

        send(&engine, &x, r#"{"type":"identify","role":"bot"}"#);

        assert_eq!(x.conn.role(), PeerRole::Participant);
        assert_eq!(
            x.drain(),
            vec![r#"{"type":"error","message":"Unknown message format"}"#]
        );
    }

    #[test]
    fn test_full_scenario() {
        let engine = engine();
        let mut x = peer(&engine);
        let mut y = peer(&engine);
        let mut z = peer(&engine);
        let mut w = peer(&engine);

        send(&engine, &x, r#"{"type":"identify","role":"ui"}"#);
        assert_eq!(
            x.drain(),
            vec![r#"{"type":"ack","action":"identify","role":"ui","status":"ok"}"#]
        );

        let subscribe = r#"{"type":"subscribe","channel":"orders"}"#;
        send(&engine, &y, subscribe);
        assert_eq!(
            y.drain(),
            vec![r#"{"type":"ack","action":"subscribe","channel":"orders","status":"ok"}"#]
        );
        // x mirrors y's subscribe
        assert_eq!(x.drain(), vec![subscribe]);

        let raw = r#"{ "message":"hello",  "type":"send","channel":"orders" }"#;
        send(&engine, &z, raw);

        assert_eq!(
            z.drain(),
            vec![r#"{"type":"ack","action":"send","channel":"orders","status":"delivered"}"#]
        );
        assert_eq!(y.drain(), vec![raw]);
        assert_eq!(x.drain(), vec![raw]);
        assert!(w.drain().is_empty());
    }

    #[test]
    fn test_invalid_json_only_mirrors() {
        let engine = engine();
        let mut observer = peer(&engine);
        let mut member = peer(&engine);
        let mut sender = peer(&engine);

        send(&engine, &observer, r#"{"type":"identify","role":"ui"}"#);
        send(&engine, &member, r#"{"type":"subscribe","channel":"orders"}"#);
        observer.drain();
        member.drain();

        send(&engine, &sender, "not json");

        assert_eq!(
            sender.drain(),
            vec![r#"{"type":"error","message":"Invalid JSON"}"#]
        );
        assert_eq!(observer.drain(), vec!["not json"]);
        assert!(member.drain().is_empty());
    }

    #[test]
    fn test_observer_does_not_mirror_itself() {
        let engine = engine();
        let mut a = peer(&engine);
        let mut b = peer(&engine);

        send(&engine, &a, r#"{"type":"identify","role":"ui"}"#);
        send(&engine, &b, r#"{"type":"identify","role":"ui"}"#);
        a.drain();
        b.drain();

        send(&engine, &a, r#"{"type":"send","channel":"nobody","message":"m"}"#);

        assert_eq!(
            a.drain(),
            vec![r#"{"type":"ack","action":"send","channel":"nobody","status":"delivered"}"#]
        );
        assert_eq!(
            b.drain(),
            vec![r#"{"type":"send","channel":"nobody","message":"m"}"#]
        );
    }

    #[test]
    fn test_sender_subscribed_receives_own_frame() {
        let engine = engine();
        let mut a = peer(&engine);

        send(&engine, &a, r#"{"type":"subscribe","channel":"echo"}"#);
        a.drain();

        let raw = r#"{"type":"send","channel":"echo","message":"hi"}"#;
        send(&engine, &a, raw);

        assert_eq!(
            a.drain(),
            vec![
                r#"{"type":"ack","action":"send","channel":"echo","status":"delivered"}"#,
                raw,
            ]
        );
    }

    #[test]
    fn test_observer_and_member_receives_twice() {
        let engine = engine();
        let mut both = peer(&engine);
        let sender = peer(&engine);

        send(&engine, &both, r#"{"type":"identify","role":"ui"}"#);
        send(&engine, &both, r#"{"type":"subscribe","channel":"orders"}"#);
        both.drain();

        let raw = r#"{"type":"send","channel":"orders","message":"x"}"#;
        send(&engine, &sender, raw);

        // once from the mirror, once from the channel
        assert_eq!(both.drain(), vec![raw, raw]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let engine = engine();
        let mut y = peer(&engine);
        let z = peer(&engine);

        send(&engine, &y, r#"{"type":"subscribe","channel":"orders"}"#);
        send(&engine, &y, r#"{"type":"unsubscribe","channel":"orders"}"#);
        assert_eq!(
            y.drain(),
            vec![
                r#"{"type":"ack","action":"subscribe","channel":"orders","status":"ok"}"#,
                r#"{"type":"ack","action":"unsubscribe","channel":"orders","status":"ok"}"#,
            ]
        );

        send(&engine, &z, r#"{"type":"send","channel":"orders","message":"late"}"#);
        assert!(y.drain().is_empty());
    }

    #[test]
    fn test_unsubscribe_never_joined_is_acked() {
        let engine = engine();
        let mut y = peer(&engine);

        send(&engine, &y, r#"{"type":"unsubscribe","channel":"ghost"}"#);

        assert_eq!(
            y.drain(),
            vec![r#"{"type":"ack","action":"unsubscribe","channel":"ghost","status":"ok"}"#]
        );
        assert_eq!(engine.connections().channel_count(), 0);
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let engine = engine();
        let mut y = peer(&engine);
        let z = peer(&engine);

        send(&engine, &y, r#"{"type":"subscribe","channel":"orders"}"#);
        y.drain();

        engine.disconnect(&y.conn);
        engine.disconnect(&y.conn);

        send(&engine, &z, r#"{"type":"send","channel":"orders","message":"gone"}"#);
        assert!(y.drain().is_empty());
        assert!(!engine.connections().is_member("orders", y.conn.id));
        assert_eq!(engine.connections().count(), 1);
    }

    #[test]
    fn test_subscribe_missing_channel() {
        let engine = engine();
        let mut y = peer(&engine);

        send(&engine, &y, r#"{"type":"subscribe"}"#);

        assert_eq!(
            y.drain(),
            vec![r#"{"type":"error","message":"Unknown message format"}"#]
        );
        assert_eq!(engine.connections().channel_count(), 0);
    }
}
