//! # LUMEN Networking - The Beacon Protocol
//!
//! Peer-to-peer session networking over connectionless UDP.
//!
//! ## Architecture
//!
//! This crate implements the complete session layer for LUMEN:
//!
//! - **Protocol**: 4-byte descriptor header in front of every payload,
//!   6-byte address codec shared by all reserved messages
//! - **Session**: join/leave membership state machine with join/leave
//!   queues and server-permission transfer
//! - **Transport**: non-blocking UDP behind a small adapter trait
//! - **Discovery**: request/answer broadcast protocol to find open
//!   sessions on a LAN, polled by a background reception thread
//!
//! ## Threading Model
//!
//! The session state machine is single-threaded by design: the
//! application drives it by calling [`NetworkSession::receive_packet`]
//! (or [`NetworkSession::process_packets`]) once per frame. Nothing in
//! the session path blocks or locks. The one real thread in this crate
//! is the discovery reception poller, which shares nothing with the
//! session state machine.
//!
//! ## Delivery Model
//!
//! ```text
//! CLIENT                            SERVER
//!   |                                 |
//!   |--- CLIENT_JOIN ---------------->|  <- registers client,
//!   |                                 |     introduces it to the others
//!   |<-- CONNECTION_ACCEPTED ---------|
//!   |    (current member list)        |
//!   |                                 |
//! ```
//!
//! Everything is best-effort UDP. The protocol does not retry, reorder
//! or deduplicate; reserved-message handling is idempotent enough that
//! duplicates are harmless.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lumen_networking::{UdpSession, NetworkPacket};
//!
//! let mut session = UdpSession::new();
//! session.host_server(8100)?;
//!
//! // once per frame:
//! while let Some((packet, sender)) = session.receive_packet() {
//!     // application payload from a registered member
//! }
//! while let Some(joined) = session.pop_client_join_stack() {
//!     // a new client joined
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::NetworkConfig;
pub use discovery::{SessionAnswerCallback, SessionLogin, SessionReception};
pub use error::{NetError, NetResult};
pub use protocol::{
    AddressClass, NetworkAddress, NetworkPacket, ReservedDescriptor, ADDR_SIZE, DESCRIPTOR_SIZE,
    IP_SIZE, PORT_SIZE, RESERVED_DESCRIPTOR_BASE,
};
pub use session::{NetworkSession, Peer, PeerKind, PeerRegistry, UdpSession};
pub use transport::{Transport, TransportStats, UdpTransport};

/// Default session port, used when the application does not care.
pub const DEFAULT_PORT: u16 = 8100;

/// Size of the receive buffer handed to the transport.
///
/// Any datagram larger than this is truncated by the OS; the protocol
/// itself never builds reserved messages anywhere near this size.
pub const RECV_BUFFER_SIZE: usize = 4096;
