//! # Session Peers
//!
//! A peer is the identity of a network participant: the one server of
//! the session, or one of its clients. Peers are small value types -
//! the registry and the join/leave queues copy them freely, and a peer
//! popped from the leave queue is just a value, safe to inspect after
//! the member is long gone.

use crate::protocol::NetworkAddress;

/// Role of a session participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerKind {
    /// The session owner; exactly one per session.
    Server,
    /// A joined member.
    Client,
}

/// A network participant: role plus endpoint address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Peer {
    kind: PeerKind,
    address: NetworkAddress,
}

impl Peer {
    /// Creates the server peer for the given address.
    #[inline]
    #[must_use]
    pub const fn server_at(address: NetworkAddress) -> Self {
        Self {
            kind: PeerKind::Server,
            address,
        }
    }

    /// Creates a client peer for the given address.
    #[inline]
    #[must_use]
    pub const fn client_at(address: NetworkAddress) -> Self {
        Self {
            kind: PeerKind::Client,
            address,
        }
    }

    /// Returns the peer's role.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PeerKind {
        self.kind
    }

    /// Returns true if this peer is the session server.
    #[inline]
    #[must_use]
    pub const fn is_server(&self) -> bool {
        matches!(self.kind, PeerKind::Server)
    }

    /// Returns the peer's endpoint address.
    #[inline]
    #[must_use]
    pub const fn address(&self) -> NetworkAddress {
        self.address
    }
}
