//! # Transport Layer
//!
//! The thin seam between the protocol and the OS. The session state
//! machine and the discovery service only ever talk to the [`Transport`]
//! trait; [`UdpTransport`] is the one real implementation, a
//! non-blocking wrapper around std UDP.
//!
//! ## Design
//!
//! - Raw UDP, no reliability - the protocol above is best-effort by
//!   design
//! - Never blocks: "no data" is a regular return, not an error
//! - Packet statistics for diagnostics

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::protocol::NetworkAddress;

/// The socket capability consumed by the session and discovery layers.
///
/// One instance is owned exclusively by one protocol role (a session or
/// a single discovery endpoint); the handle is never shared.
pub trait Transport: Sized {
    /// Binds a new transport to the given local address.
    ///
    /// Port 0 asks the OS for an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error if the bind fails.
    fn bind(addr: NetworkAddress) -> io::Result<Self>;

    /// Returns the bound local address.
    fn local_addr(&self) -> NetworkAddress;

    /// Sends one datagram to `addr`.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error if the send fails.
    fn send_to(&mut self, data: &[u8], addr: NetworkAddress) -> io::Result<usize>;

    /// Receives one datagram, without blocking.
    ///
    /// `Ok(None)` means no data is pending right now.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error for genuine failures
    /// (would-block is not one).
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, NetworkAddress)>>;

    /// Enables or disables broadcast sends on this transport.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error if the option cannot be set.
    fn set_broadcast(&mut self, enabled: bool) -> io::Result<()>;
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
}

/// Non-blocking UDP socket adapter.
pub struct UdpTransport {
    /// The underlying socket.
    socket: UdpSocket,
    /// Local address captured at bind time.
    local_addr: NetworkAddress,
    /// Statistics.
    stats: TransportStats,
}

impl UdpTransport {
    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TransportStats::default();
    }
}

impl Transport for UdpTransport {
    fn bind(addr: NetworkAddress) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr.to_socket_addr())?;
        socket.set_nonblocking(true)?;

        // For port 0 the OS picks the port; read back what we got.
        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(v4) => NetworkAddress::from_socket_addr(v4),
            SocketAddr::V6(_) => addr,
        };

        Ok(Self {
            socket,
            local_addr,
            stats: TransportStats::default(),
        })
    }

    fn local_addr(&self) -> NetworkAddress {
        self.local_addr
    }

    fn send_to(&mut self, data: &[u8], addr: NetworkAddress) -> io::Result<usize> {
        match self.socket.send_to(data, addr.to_socket_addr()) {
            Ok(n) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(e)
            }
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, NetworkAddress)>> {
        match self.socket.recv_from(buf) {
            Ok((len, sender)) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += len as u64;
                match NetworkAddress::from_std(sender) {
                    Some(addr) => Ok(Some((len, addr))),
                    // IPv4-only protocol; an IPv6 sender cannot be a member
                    None => Ok(None),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                self.stats.recv_errors += 1;
                Err(e)
            }
        }
    }

    fn set_broadcast(&mut self, enabled: bool) -> io::Result<()> {
        self.socket.set_broadcast(enabled)
    }
}
