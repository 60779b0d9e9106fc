//! # Reserved Descriptors
//!
//! The closed set of protocol-internal message opcodes. Everything at
//! or above [`RESERVED_DESCRIPTOR_BASE`] belongs to the session layer;
//! applications must keep their own descriptors below it.

/// First descriptor value reserved for the protocol.
pub const RESERVED_DESCRIPTOR_BASE: u32 = 1000;

/// Protocol-internal message opcodes.
///
/// Matched exhaustively by the session dispatch; a raw descriptor that
/// maps to none of these is an opaque application payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ReservedDescriptor {
    /// New client -> server: request to join the session.
    ClientJoin = 1000,
    /// Leaving client -> session: best-effort departure notice.
    ClientLeft = 1001,
    /// Server -> clients: a new member joined, payload is its encoded
    /// address.
    IntroduceClient = 1002,
    /// Server -> joining client: join granted, payload is the encoded
    /// address list of all current members.
    ConnectionAccepted = 1003,
    /// Server -> clients: the server is going away, tear down the
    /// session.
    ServerDisconnected = 1004,
    /// Discovery requester -> server: payload is the session key.
    SessionRequest = 1005,
    /// Server -> discovery requester: payload is the session
    /// description.
    SessionAnswer = 1006,
    /// Old server -> promoted client: take over server permission.
    BecomeServer = 1007,
    /// Old server -> remaining clients: payload is the encoded address
    /// of the new server.
    ClientTransfersServer = 1008,
}

impl ReservedDescriptor {
    /// Maps a raw descriptor to its reserved opcode, if it is one.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1000 => Some(Self::ClientJoin),
            1001 => Some(Self::ClientLeft),
            1002 => Some(Self::IntroduceClient),
            1003 => Some(Self::ConnectionAccepted),
            1004 => Some(Self::ServerDisconnected),
            1005 => Some(Self::SessionRequest),
            1006 => Some(Self::SessionAnswer),
            1007 => Some(Self::BecomeServer),
            1008 => Some(Self::ClientTransfersServer),
            _ => None,
        }
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}
