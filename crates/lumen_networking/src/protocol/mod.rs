//! # Wire Protocol
//!
//! The value types every other module is built on: the 6-byte address
//! codec, the descriptor-prefixed packet, and the closed set of reserved
//! descriptors that drive the membership protocol.
//!
//! ## Wire Layout
//!
//! ```text
//! packet:   [u32 descriptor (LE)] [payload bytes ...]
//! address:  [u16 port (BE)] [u32 ip (BE)]          -> 6 bytes
//! ```
//!
//! The descriptor is little-endian on the wire; address fields use
//! network byte order, matching what the OS hands back for a socket
//! address.

mod address;
mod descriptor;
mod packet;

pub use address::{AddressClass, NetworkAddress, ADDR_SIZE, IP_SIZE, PORT_SIZE};
pub use descriptor::{ReservedDescriptor, RESERVED_DESCRIPTOR_BASE};
pub use packet::{NetworkPacket, DESCRIPTOR_SIZE};
