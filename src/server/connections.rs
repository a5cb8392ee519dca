//! Connection state and channel membership

use crate::channels::Channel;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// One text frame. Backed by shared bytes: cloning is a refcount bump, and an
/// inbound WebSocket text message is forwarded to every peer in the same
/// buffer it arrived in.
pub type Frame = axum::extract::ws::Utf8Bytes;

/// Connection identity, rendered as `client-N`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// What a peer has opted in to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerRole {
    /// Receives only frames for the channels it joined
    #[serde(rename = "participant")]
    Participant,
    /// Additionally receives a raw mirror of every other peer's frames
    #[serde(rename = "ui")]
    Observer,
}

impl PeerRole {
    /// Parse the `role` field of an `identify` frame. Only `ui` grants a role.
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "ui" => Some(PeerRole::Observer),
            _ => None,
        }
    }
}

/// Liveness of the underlying socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl LinkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LinkState::Open,
            1 => LinkState::Closing,
            _ => LinkState::Closed,
        }
    }
}

/// Why a frame could not be queued for a peer
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// A connected peer
pub struct ClientConnection {
    /// Unique connection ID
    pub id: ConnectionId,
    observer: AtomicBool,
    state: AtomicU8,
    /// Channels this peer has joined. Only mutated by [`ConnectionManager`]
    /// while it holds the matching channel entry.
    subscriptions: Mutex<HashSet<Channel>>,
    /// Queue drained by the socket writer task
    tx: mpsc::Sender<Frame>,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            observer: AtomicBool::new(false),
            state: AtomicU8::new(LinkState::Open as u8),
            subscriptions: Mutex::new(HashSet::new()),
            tx,
        }
    }

    pub fn role(&self) -> PeerRole {
        if self.is_observer() {
            PeerRole::Observer
        } else {
            PeerRole::Participant
        }
    }

    pub fn is_observer(&self) -> bool {
        self.observer.load(Ordering::Acquire)
    }

    /// Upgrade to observer. Returns `true` only for the call that performed
    /// the transition; the role never goes back.
    pub fn mark_observer(&self) -> bool {
        !self.observer.swap(true, Ordering::AcqRel)
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Open -> Closing. Returns `false` if the connection was already
    /// closing or closed.
    pub fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                LinkState::Open as u8,
                LinkState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to Closed. Returns `false` if it already was.
    fn mark_closed(&self) -> bool {
        self.state.swap(LinkState::Closed as u8, Ordering::AcqRel) != LinkState::Closed as u8
    }

    /// Snapshot of joined channels, sorted by name
    pub fn subscriptions(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.subscriptions.lock().iter().cloned().collect();
        channels.sort();
        channels
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.lock().contains(channel)
    }

    /// Queue a frame for this peer without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }

        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("role", &self.role())
            .field("state", &self.state())
            .field("subscriptions", &self.subscriptions())
            .finish()
    }
}

type Members = HashMap<ConnectionId, Arc<ClientConnection>>;

/// Registry of live connections and of channel membership.
///
/// Each channel entry lives in one `DashMap` shard; membership changes and
/// broadcast snapshots for a channel both go through that shard's lock, so a
/// broadcast never observes a half-applied subscribe or teardown. A peer's own
/// subscription set is updated while the channel entry is held.
#[derive(Clone)]
pub struct ConnectionManager {
    connections: Arc<DashMap<ConnectionId, Arc<ClientConnection>>>,
    channels: Arc<DashMap<Channel, Members>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a new connection whose outbound frames go to `tx`
    pub fn accept(&self, tx: mpsc::Sender<Frame>) -> Arc<ClientConnection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(ClientConnection::new(id, tx));
        self.connections.insert(id, conn.clone());
        conn
    }

    /// Join `conn` to `channel`. Returns `true` if it was not already a
    /// member. Closed connections are never added.
    pub fn subscribe(&self, conn: &Arc<ClientConnection>, channel: &Channel) -> bool {
        if !conn.is_open() {
            return false;
        }

        let mut members = self.channels.entry(channel.clone()).or_default();
        let added = members.insert(conn.id, conn.clone()).is_none();
        conn.subscriptions.lock().insert(channel.clone());
        added
    }

    /// Remove `conn` from `channel`. Returns `true` if it was a member.
    pub fn unsubscribe(&self, conn: &ClientConnection, channel: &str) -> bool {
        self.detach(conn, channel)
    }

    /// Drop `conn` from every channel and from the connection set.
    ///
    /// Only the first call does anything; later calls return `false`.
    pub fn teardown(&self, conn: &ClientConnection) -> bool {
        if !conn.mark_closed() {
            return false;
        }

        for channel in conn.subscriptions() {
            self.detach(conn, channel.as_str());
        }
        self.connections.remove(&conn.id);
        true
    }

    fn detach(&self, conn: &ClientConnection, channel: &str) -> bool {
        let removed = match self.channels.get_mut(channel) {
            Some(mut members) => {
                let removed = members.remove(&conn.id).is_some();
                conn.subscriptions.lock().remove(channel);
                removed
            }
            None => {
                conn.subscriptions.lock().remove(channel);
                false
            }
        };

        // Empty channels are pruned so they look exactly like unknown ones
        self.channels.remove_if(channel, |_, members| members.is_empty());
        removed
    }

    /// Get a connection by ID
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(&id).map(|r| r.clone())
    }

    /// Snapshot of a channel's current members. Unknown channels are empty.
    pub fn members(&self, channel: &str) -> Vec<Arc<ClientConnection>> {
        self.channels
            .get(channel)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every observer connection
    pub fn observers(&self) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_observer())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot of every registered connection
    pub fn all(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Get total connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of channels with at least one member
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether `conn` is listed as a member of `channel`
    pub fn is_member(&self, channel: &str, id: ConnectionId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|members| members.contains_key(&id))
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
