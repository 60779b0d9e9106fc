//! # Peer Registry
//!
//! Resolves the sender of an incoming datagram to a known session
//! member. Keys are derived from the address ([`NetworkAddress::key`]),
//! never stored; at most one peer exists per distinct address, last
//! registration wins.
//!
//! No locking: the registry is owned by the single-threaded session
//! state machine, and the discovery service never touches it.

use std::collections::HashMap;

use crate::protocol::NetworkAddress;
use crate::session::peer::Peer;

/// Address-keyed map of session members.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    members: HashMap<u64, Peer>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a peer, overwriting any previous entry at its address.
    pub fn register(&mut self, peer: Peer) {
        self.members.insert(peer.address().key(), peer);
    }

    /// Looks up the peer registered at `addr`.
    #[must_use]
    pub fn lookup(&self, addr: NetworkAddress) -> Option<Peer> {
        self.members.get(&addr.key()).copied()
    }

    /// Removes and returns the peer registered at `addr`.
    pub fn remove(&mut self, addr: NetworkAddress) -> Option<Peer> {
        self.members.remove(&addr.key())
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Returns the number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if no peer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
