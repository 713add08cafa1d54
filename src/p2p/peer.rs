//! Peer management
//!
//! Tracks connected peers and, per peer, which sync-checkpoint it has
//! already been sent. Transport is out of scope: outgoing messages are
//! queued on the peer and drained by whatever owns the socket.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;

use super::Message;
use crate::crypto::Hash;

/// What the checkpoint protocol needs from a peer connection
pub trait PeerConnection {
    /// Hash of the last checkpoint relayed to this peer (zero if none)
    fn checkpoint_known(&self) -> Hash;

    fn set_checkpoint_known(&mut self, hash: Hash);

    /// Queue a message for sending; never blocks
    fn push_message(&mut self, message: Message);
}

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connected,
}

/// Information about a peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer's network address
    pub addr: SocketAddr,
    /// Current connection state
    pub state: PeerState,
    /// Last sync-checkpoint relayed to this peer
    pub checkpoint_known: Hash,
    /// Messages waiting to be written to the socket
    pub outbound: VecDeque<Message>,
}

impl PeerInfo {
    /// Create new peer info
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            state: PeerState::Disconnected,
            checkpoint_known: Hash::zero(),
            outbound: VecDeque::new(),
        }
    }

    /// Take everything queued for sending
    pub fn drain_outbound(&mut self) -> Vec<Message> {
        self.outbound.drain(..).collect()
    }
}

impl PeerConnection for PeerInfo {
    fn checkpoint_known(&self) -> Hash {
        self.checkpoint_known
    }

    fn set_checkpoint_known(&mut self, hash: Hash) {
        self.checkpoint_known = hash;
    }

    fn push_message(&mut self, message: Message) {
        self.outbound.push_back(message);
    }
}

/// Peer manager
#[derive(Debug, Default)]
pub struct PeerManager {
    /// Known peers
    peers: HashMap<SocketAddr, PeerInfo>,
    /// Connected peer addresses
    connected: HashSet<SocketAddr>,
    /// Maximum number of connections
    max_connections: usize,
}

impl PeerManager {
    /// Create a new peer manager
    pub fn new(max_connections: usize) -> Self {
        Self {
            peers: HashMap::new(),
            connected: HashSet::new(),
            max_connections,
        }
    }

    /// Add a new peer address
    pub fn add_peer(&mut self, addr: SocketAddr) {
        self.peers.entry(addr).or_insert_with(|| PeerInfo::new(addr));
    }

    /// Mark peer as connected. Refused once the connection limit is reached.
    pub fn peer_connected(&mut self, addr: SocketAddr) -> bool {
        if self.connected.len() >= self.max_connections && !self.connected.contains(&addr) {
            return false;
        }
        match self.peers.get_mut(&addr) {
            Some(peer) => {
                peer.state = PeerState::Connected;
                self.connected.insert(addr);
                true
            }
            None => false,
        }
    }

    /// Mark peer as disconnected. Its relay record and queue are reset so a
    /// reconnect is sent the current checkpoint again.
    pub fn peer_disconnected(&mut self, addr: &SocketAddr) {
        if let Some(peer) = self.peers.get_mut(addr) {
            peer.state = PeerState::Disconnected;
            peer.checkpoint_known = Hash::zero();
            peer.outbound.clear();
        }
        self.connected.remove(addr);
    }

    pub fn get_peer_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerInfo> {
        self.peers.get_mut(addr)
    }

    /// Mutable access to every connected peer, for relaying
    pub fn connected_peers_mut(&mut self) -> impl Iterator<Item = &mut PeerInfo> {
        self.peers
            .values_mut()
            .filter(|p| p.state == PeerState::Connected)
    }

    /// Get number of connected peers
    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }
}
