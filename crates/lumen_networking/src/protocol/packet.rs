//! # Network Packet
//!
//! A packet is one byte buffer with a 4-byte reserved header in front:
//! the 32-bit descriptor that tells the session layer whether the
//! payload is protocol-internal or application data. Application code
//! only ever sees the payload; the header belongs to the protocol.

use crate::protocol::descriptor::RESERVED_DESCRIPTOR_BASE;

/// Size of the reserved descriptor header in bytes.
pub const DESCRIPTOR_SIZE: usize = 4;

/// A descriptor-prefixed byte buffer.
///
/// Internally the full wire image is stored (`descriptor || payload`),
/// so handing the packet to the transport is a single slice borrow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkPacket {
    /// Full wire image, always at least [`DESCRIPTOR_SIZE`] bytes.
    buffer: Vec<u8>,
}

impl NetworkPacket {
    /// Creates an empty packet with descriptor 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; DESCRIPTOR_SIZE],
        }
    }

    /// Creates an empty packet with the given descriptor.
    #[must_use]
    pub fn with_descriptor(descriptor: u32) -> Self {
        let mut packet = Self::new();
        packet.set_descriptor(descriptor);
        packet
    }

    /// Creates a packet with the given descriptor and payload bytes.
    #[must_use]
    pub fn with_payload(descriptor: u32, payload: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(DESCRIPTOR_SIZE + payload.len());
        buffer.extend_from_slice(&descriptor.to_le_bytes());
        buffer.extend_from_slice(payload);
        Self { buffer }
    }

    /// Creates a text packet with descriptor 0.
    ///
    /// The payload is the string bytes plus a terminating NUL, so the
    /// receiving side can recover it with [`NetworkPacket::as_str`].
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self::from_text_with_descriptor(text, 0)
    }

    /// Creates a NUL-terminated text packet with the given descriptor.
    #[must_use]
    pub fn from_text_with_descriptor(text: &str, descriptor: u32) -> Self {
        let mut buffer = Vec::with_capacity(DESCRIPTOR_SIZE + text.len() + 1);
        buffer.extend_from_slice(&descriptor.to_le_bytes());
        buffer.extend_from_slice(text.as_bytes());
        buffer.push(0);
        Self { buffer }
    }

    /// Creates a packet from a raw buffer.
    ///
    /// With `already_has_header` the buffer is taken as a full wire
    /// image; a buffer shorter than [`DESCRIPTOR_SIZE`] yields the empty
    /// packet (descriptor 0, no payload) - an under-sized reception is
    /// "no packet", never an error. Without the flag the buffer becomes
    /// the payload of a fresh descriptor-0 packet.
    #[must_use]
    pub fn from_raw(buf: &[u8], already_has_header: bool) -> Self {
        if already_has_header {
            if buf.len() < DESCRIPTOR_SIZE {
                return Self::new();
            }
            Self {
                buffer: buf.to_vec(),
            }
        } else {
            Self::with_payload(0, buf)
        }
    }

    /// Returns the descriptor.
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> u32 {
        let mut raw = [0u8; DESCRIPTOR_SIZE];
        raw.copy_from_slice(&self.buffer[..DESCRIPTOR_SIZE]);
        u32::from_le_bytes(raw)
    }

    /// Overwrites the descriptor.
    #[inline]
    pub fn set_descriptor(&mut self, descriptor: u32) {
        self.buffer[..DESCRIPTOR_SIZE].copy_from_slice(&descriptor.to_le_bytes());
    }

    /// Returns true if the descriptor is in the reserved range.
    #[inline]
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.descriptor() >= RESERVED_DESCRIPTOR_BASE
    }

    /// Returns the application payload (header excluded).
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buffer[DESCRIPTOR_SIZE..]
    }

    /// Returns the payload for in-place writing (header excluded).
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[DESCRIPTOR_SIZE..]
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.buffer.len() - DESCRIPTOR_SIZE
    }

    /// Returns the full wire image including the header.
    ///
    /// Only used when handing bytes to the transport.
    #[inline]
    #[must_use]
    pub fn raw_buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Returns the wire length including the header.
    #[inline]
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.buffer.len()
    }

    /// Interprets the payload as a NUL-terminated UTF-8 string.
    ///
    /// Only meaningful for packets built with the `from_text`
    /// constructors; returns `None` when there is no terminator or the
    /// bytes are not UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        let payload = self.payload();
        let nul = payload.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&payload[..nul]).ok()
    }

    /// Compares the text payload against `text`.
    #[must_use]
    pub fn equals_str(&self, text: &str) -> bool {
        self.as_str() == Some(text)
    }
}

impl Default for NetworkPacket {
    fn default() -> Self {
        Self::new()
    }
}
