//! # Session State Machine
//!
//! The heart of the Beacon Protocol: hosting, joining, membership
//! bookkeeping and packet dispatch for one peer-to-peer session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NETWORK SESSION                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ Transport    │  │ Reserved     │  │ Join/Leave   │      │
//! │  │ (UDP, poll)  │──│ Dispatch     │──│ Queues       │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         │                 │                 │               │
//! │         └────────────────┼─────────────────┘               │
//! │                          │                                  │
//! │              ┌───────────▼───────────┐                     │
//! │              │ Peer Registry         │                     │
//! │              │ - server reference    │                     │
//! │              │ - ordered client set  │                     │
//! │              └───────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reserved messages never reach the application: the dispatch consumes
//! them and mutates the registry and the join/leave queues instead.
//! [`NetworkSession::receive_packet`] only ever hands out application
//! payloads from registered members.
//!
//! ## Threading
//!
//! Single-threaded, cooperative: the application polls from one thread,
//! once per frame. No locks anywhere in this module.

mod peer;
mod registry;

pub use peer::{Peer, PeerKind};
pub use registry::PeerRegistry;

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::discovery::SessionAnswerCallback;
use crate::error::{NetError, NetResult};
use crate::protocol::{
    NetworkAddress, NetworkPacket, ReservedDescriptor, ADDR_SIZE, DESCRIPTOR_SIZE,
};
use crate::transport::{Transport, UdpTransport};
use crate::RECV_BUFFER_SIZE;

/// A session over the standard UDP transport.
pub type UdpSession = NetworkSession<UdpTransport>;

/// One peer-to-peer session: state machine, registry and queues.
///
/// Created idle; [`NetworkSession::host_server`] or
/// [`NetworkSession::join_server`] starts a session,
/// [`NetworkSession::disconnect`] returns to idle from any state.
pub struct NetworkSession<T: Transport> {
    /// The owned socket; `None` while idle.
    transport: Option<T>,
    /// The session server: ourselves when hosting, remote when joined.
    server: Option<Peer>,
    /// Ordered set of known clients.
    clients: Vec<Peer>,
    /// Sender resolution for incoming datagrams.
    registry: PeerRegistry,
    /// Members that joined since the application last looked.
    join_queue: VecDeque<Peer>,
    /// Members that left since the application last looked.
    leave_queue: VecDeque<Peer>,
    /// A session is running (hosted or joined).
    running: bool,
    /// The server granted our join (always true while hosting).
    connected: bool,
    /// This process holds the server permission.
    is_server: bool,
    /// Key compared against incoming discovery requests.
    session_key: String,
    /// Text carried in discovery answers.
    session_description: String,
    /// Invoked on received session answers.
    answer_callback: Option<SessionAnswerCallback>,
    /// Flush window for the good-bye notification.
    disconnect_grace: Duration,
    /// Receive buffer handed to the transport.
    recv_buffer: [u8; RECV_BUFFER_SIZE],
}

impl<T: Transport> NetworkSession<T> {
    /// Creates an idle session with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&NetworkConfig::default())
    }

    /// Creates an idle session configured from `config`.
    #[must_use]
    pub fn with_config(config: &NetworkConfig) -> Self {
        Self {
            transport: None,
            server: None,
            clients: Vec::new(),
            registry: PeerRegistry::new(),
            join_queue: VecDeque::new(),
            leave_queue: VecDeque::new(),
            running: false,
            connected: false,
            is_server: false,
            session_key: config.session_key.clone(),
            session_description: config.session_description.clone(),
            answer_callback: None,
            disconnect_grace: Duration::from_millis(config.disconnect_grace_ms),
            recv_buffer: [0u8; RECV_BUFFER_SIZE],
        }
    }

    /// Hosts a new session on `port` (0 for an ephemeral port).
    ///
    /// Any previous session is disconnected first. Hosting needs no
    /// handshake: the server is connected to itself immediately.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Bind`] if the port cannot be bound; the
    /// session stays idle and the caller may retry with another port.
    pub fn host_server(&mut self, port: u16) -> NetResult<()> {
        self.disconnect();

        let transport = T::bind(NetworkAddress::from_port(port)).map_err(|e| {
            error!("Could not open network server on port {}: {}", port, e);
            NetError::Bind { port, source: e }
        })?;
        let local = transport.local_addr();

        self.transport = Some(transport);
        self.server = Some(Peer::server_at(local));
        self.running = true;
        self.is_server = true;
        self.connected = true;

        info!("Opened network server ( {} )", local.port());
        Ok(())
    }

    /// Joins the session hosted at `ip:port`.
    ///
    /// Any previous session is disconnected first. The local socket is
    /// bound to an ephemeral port and a join request goes out;
    /// [`NetworkSession::is_connected`] stays false until the server
    /// answers (see [`NetworkSession::wait_for_connection`]).
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Bind`] if no local socket could be opened.
    pub fn join_server(&mut self, ip: Ipv4Addr, port: u16) -> NetResult<()> {
        self.disconnect();

        let transport = T::bind(NetworkAddress::from_port(0)).map_err(|e| {
            error!("Could not open socket for joining {}:{}: {}", ip, port, e);
            NetError::Bind { port: 0, source: e }
        })?;
        self.transport = Some(transport);

        let server_addr = NetworkAddress::from_port_and_ip(port, ip);
        let server = Peer::server_at(server_addr);
        self.server = Some(server);
        self.registry.register(server);
        self.running = true;

        let join = NetworkPacket::with_descriptor(ReservedDescriptor::ClientJoin.as_u32());
        self.send_to_address(&join, server_addr);

        info!("Joined network server ( {} )", server_addr.description());
        Ok(())
    }

    /// Resolves `host` and joins the session hosted there.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Resolve`] if the name has no IPv4 address,
    /// or [`NetError::Bind`] if no local socket could be opened.
    pub fn join_server_by_name(&mut self, host: &str, port: u16) -> NetResult<()> {
        let addr = NetworkAddress::resolve_host(host, port).ok_or_else(|| NetError::Resolve {
            host: host.to_owned(),
        })?;
        self.join_server(addr.ip(), port)
    }

    /// Leaves the session and returns to idle.
    ///
    /// A best-effort good-bye (`SERVER_DISCONNECTED` when hosting,
    /// `CLIENT_LEFT` otherwise) goes out first, followed by a short
    /// grace sleep so the datagram can flush through the non-blocking
    /// socket. No-op while idle.
    pub fn disconnect(&mut self) {
        if !self.running {
            return;
        }

        let descriptor = if self.is_server {
            ReservedDescriptor::ServerDisconnected
        } else {
            ReservedDescriptor::ClientLeft
        };
        self.send_packet(&NetworkPacket::with_descriptor(descriptor.as_u32()), None);

        std::thread::sleep(self.disconnect_grace);

        self.close_network_session();
        self.transport = None;

        info!("Disconnected from network session");
    }

    /// Sends `packet` to one member, or fans it out.
    ///
    /// With a receiver the packet goes to that member only. Without
    /// one, a server sends to every client and a client sends to the
    /// server. The fan-out stops at the first failed send; what was
    /// already sent stays sent - best-effort UDP, nothing is rolled
    /// back.
    ///
    /// Returns false on a transport error or while idle.
    pub fn send_packet(&mut self, packet: &NetworkPacket, receiver: Option<&Peer>) -> bool {
        if self.transport.is_none() {
            return false;
        }

        match receiver {
            Some(peer) => self.send_to_address(packet, peer.address()),
            None if self.is_server => {
                let targets: Vec<NetworkAddress> =
                    self.clients.iter().map(|c| c.address()).collect();
                for addr in targets {
                    if !self.send_to_address(packet, addr) {
                        return false;
                    }
                }
                true
            }
            None => match self.server {
                Some(server) => self.send_to_address(packet, server.address()),
                None => false,
            },
        }
    }

    /// Receives the next application packet, without blocking.
    ///
    /// Reserved protocol messages are consumed on the way: they mutate
    /// the registry and the join/leave queues and are never returned.
    /// Application packets from senders that are not registered members
    /// are dropped. `None` means no application packet is pending right
    /// now (receive errors are logged and look the same).
    pub fn receive_packet(&mut self) -> Option<(NetworkPacket, Peer)> {
        loop {
            let (len, sender_addr) = {
                let transport = self.transport.as_mut()?;
                match transport.recv_from(&mut self.recv_buffer) {
                    Ok(Some(received)) => received,
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("Network receive failed: {}", e);
                        return None;
                    }
                }
            };

            if len < DESCRIPTOR_SIZE {
                debug!("Dropped under-sized datagram ({} bytes)", len);
                continue;
            }

            let packet = NetworkPacket::from_raw(&self.recv_buffer[..len], true);
            let sender = self.registry.lookup(sender_addr);

            if let Some(reserved) = ReservedDescriptor::from_raw(packet.descriptor()) {
                self.handle_reserved(reserved, &packet, sender, sender_addr);
                continue;
            }

            match sender {
                Some(peer) => return Some((packet, peer)),
                None => {
                    debug!(
                        "Dropped packet from unknown sender {}",
                        sender_addr.description()
                    );
                }
            }
        }
    }

    /// Drains all pending packets for their protocol side effects.
    ///
    /// Application payloads received along the way are discarded; use
    /// [`NetworkSession::receive_packet`] directly when they matter.
    pub fn process_packets(&mut self) {
        while self.receive_packet().is_some() {}
    }

    /// Polls until the server accepts the connection or nothing is
    /// pending.
    ///
    /// Non-blocking: with no answer on the wire yet this returns false
    /// immediately; call it again next frame.
    pub fn wait_for_connection(&mut self) -> bool {
        loop {
            if self.connected {
                return true;
            }
            if self.receive_packet().is_none() {
                return self.connected;
            }
        }
    }

    /// Pops the next client that joined since the last call.
    pub fn pop_client_join_stack(&mut self) -> Option<Peer> {
        self.join_queue.pop_front()
    }

    /// Pops the next client that left since the last call.
    ///
    /// The returned value is an announcement, nothing more - the member
    /// behind it is already gone from the session.
    pub fn pop_client_leave_stack(&mut self) -> Option<Peer> {
        self.leave_queue.pop_front()
    }

    /// Hands the server permission to `client`, or to the first client.
    ///
    /// The chosen client receives `BECOME_SERVER`; every other client
    /// receives `CLIENT_TRANSFERS_SERVER` with the new server's encoded
    /// address. Locally the promoted client stops being tracked as a
    /// client and becomes our server reference.
    ///
    /// Returns false when not hosting, when there are no clients, or
    /// when `client` is not a member.
    pub fn transfer_server_permission(&mut self, client: Option<&Peer>) -> bool {
        if !self.is_server || self.clients.is_empty() {
            return false;
        }

        let target = match client {
            Some(peer) => {
                let addr = peer.address();
                match self.clients.iter().find(|c| c.address() == addr) {
                    Some(found) => *found,
                    None => return false,
                }
            }
            None => self.clients[0],
        };
        let target_addr = target.address();

        let promote = NetworkPacket::with_descriptor(ReservedDescriptor::BecomeServer.as_u32());
        self.send_to_address(&promote, target_addr);

        let transfer = NetworkPacket::with_payload(
            ReservedDescriptor::ClientTransfersServer.as_u32(),
            &target_addr.encoded(),
        );
        let others: Vec<NetworkAddress> = self
            .clients
            .iter()
            .map(|c| c.address())
            .filter(|a| *a != target_addr)
            .collect();
        for other in others {
            self.send_to_address(&transfer, other);
        }

        // This process is a plain client of the new server from here on
        self.is_server = false;
        self.clients.retain(|c| c.address() != target_addr);
        self.join_queue.retain(|c| c.address() != target_addr);
        let new_server = Peer::server_at(target_addr);
        self.registry.register(new_server);
        self.server = Some(new_server);

        info!(
            "Transferred server permission to {}",
            target_addr.description()
        );
        true
    }

    /// Returns the member registered at `addr`.
    #[must_use]
    pub fn get_member_by_address(&self, addr: NetworkAddress) -> Option<Peer> {
        self.registry.lookup(addr)
    }

    /// Returns the session server peer.
    #[inline]
    #[must_use]
    pub fn server(&self) -> Option<&Peer> {
        self.server.as_ref()
    }

    /// Returns the known clients, in join order.
    #[inline]
    #[must_use]
    pub fn clients(&self) -> &[Peer] {
        &self.clients
    }

    /// Returns the bound local address while a session is running.
    #[must_use]
    pub fn local_address(&self) -> Option<NetworkAddress> {
        self.transport.as_ref().map(Transport::local_addr)
    }

    /// Returns true if a session is running (hosted or joined).
    #[inline]
    #[must_use]
    pub const fn is_session_running(&self) -> bool {
        self.running
    }

    /// Returns true once the server accepted us (or we are the server).
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns true if this process holds the server permission.
    #[inline]
    #[must_use]
    pub const fn is_server(&self) -> bool {
        self.is_server
    }

    /// Sets the key matched against incoming discovery requests.
    ///
    /// Game name plus version is a good choice, so scanning the LAN
    /// only finds sessions of the same game.
    pub fn set_session_key(&mut self, key: impl Into<String>) {
        self.session_key = key.into();
    }

    /// Returns the session key.
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Sets the text carried in discovery answers.
    pub fn set_session_description(&mut self, description: impl Into<String>) {
        self.session_description = description.into();
    }

    /// Returns the session description.
    #[must_use]
    pub fn session_description(&self) -> &str {
        &self.session_description
    }

    /// Sets the callback invoked for received session answers.
    ///
    /// Runs on whatever thread polls [`NetworkSession::receive_packet`].
    pub fn set_session_answer_callback(&mut self, callback: SessionAnswerCallback) {
        self.answer_callback = Some(callback);
    }

    // === Reserved dispatch ===

    /// Applies one reserved message to the session state.
    fn handle_reserved(
        &mut self,
        descriptor: ReservedDescriptor,
        packet: &NetworkPacket,
        sender: Option<Peer>,
        sender_addr: NetworkAddress,
    ) {
        match descriptor {
            ReservedDescriptor::ClientJoin => {
                // A known sender re-joining is a duplicate; the first
                // registration already covers it
                if sender.is_none() {
                    self.accept_new_client(sender_addr);
                }
            }
            ReservedDescriptor::ClientLeft => {
                if let Some(peer) = sender {
                    if !peer.is_server() {
                        self.delete_client(peer);
                        info!("Client left: {}", sender_addr.description());
                    }
                }
            }
            ReservedDescriptor::IntroduceClient => {
                if let Some(addr) = NetworkAddress::read_from(packet.payload()) {
                    self.create_client(addr);
                } else {
                    warn!(
                        "Malformed client introduction from {}",
                        sender_addr.description()
                    );
                }
            }
            ReservedDescriptor::ConnectionAccepted => {
                if !self.connected {
                    self.connected = true;
                    // The payload lists every member present before us
                    for chunk in packet.payload().chunks_exact(ADDR_SIZE) {
                        if let Some(addr) = NetworkAddress::read_from(chunk) {
                            self.create_client(addr);
                        }
                    }
                    info!("Connection accepted by server");
                }
            }
            ReservedDescriptor::ServerDisconnected => {
                if self.running {
                    self.close_network_session();
                    info!("Disconnected by server");
                }
            }
            ReservedDescriptor::SessionRequest => {
                self.answer_session_request(packet, sender_addr);
            }
            ReservedDescriptor::SessionAnswer => {
                let description = packet.as_str().unwrap_or_default().to_owned();
                if let Some(callback) = self.answer_callback.as_mut() {
                    callback(sender_addr, &description);
                }
            }
            ReservedDescriptor::BecomeServer => {
                self.take_over_server(sender_addr);
            }
            ReservedDescriptor::ClientTransfersServer => {
                self.follow_server_transfer(packet, sender_addr);
            }
        }
    }

    /// Server side of a join: grant it and introduce the newcomer.
    fn accept_new_client(&mut self, addr: NetworkAddress) {
        if self.is_server {
            // The newcomer gets the current member list with the grant
            let mut member_list = Vec::with_capacity(self.clients.len() * ADDR_SIZE);
            for client in &self.clients {
                member_list.extend_from_slice(&client.address().encoded());
            }
            let accepted = NetworkPacket::with_payload(
                ReservedDescriptor::ConnectionAccepted.as_u32(),
                &member_list,
            );
            self.send_to_address(&accepted, addr);

            // Everyone already here learns about the newcomer
            let introduce = NetworkPacket::with_payload(
                ReservedDescriptor::IntroduceClient.as_u32(),
                &addr.encoded(),
            );
            let others: Vec<NetworkAddress> = self.clients.iter().map(|c| c.address()).collect();
            for other in others {
                self.send_to_address(&introduce, other);
            }
        }

        self.create_client(addr);
        info!("Client joined: {}", addr.description());
    }

    /// Registers a client and queues the join announcement.
    ///
    /// Idempotent: an address that is already a member is returned
    /// as-is, with no second queue entry.
    fn create_client(&mut self, addr: NetworkAddress) -> Peer {
        if let Some(existing) = self.registry.lookup(addr) {
            return existing;
        }

        let client = Peer::client_at(addr);
        self.registry.register(client);
        self.clients.push(client);
        self.join_queue.push_back(client);
        client
    }

    /// Forgets a client and queues the leave announcement.
    fn delete_client(&mut self, peer: Peer) {
        let addr = peer.address();
        self.clients.retain(|c| c.address() != addr);
        self.join_queue.retain(|c| c.address() != addr);
        self.registry.remove(addr);
        self.leave_queue.push_back(peer);
    }

    /// Answers a discovery request aimed at this session.
    fn answer_session_request(&mut self, packet: &NetworkPacket, sender_addr: NetworkAddress) {
        if self.is_server && packet.equals_str(&self.session_key) {
            let answer = NetworkPacket::from_text_with_descriptor(
                &self.session_description,
                ReservedDescriptor::SessionAnswer.as_u32(),
            );
            self.send_to_address(&answer, sender_addr);
            debug!("Answered session request from {}", sender_addr.description());
        }
    }

    /// Receiver side of `BECOME_SERVER`: we are the server now.
    fn take_over_server(&mut self, old_server_addr: NetworkAddress) {
        if self.is_server {
            return;
        }

        // The old server is a plain member from here on
        self.registry.remove(old_server_addr);
        self.create_client(old_server_addr);

        let self_addr = self
            .transport
            .as_ref()
            .map_or(NetworkAddress::from_port(0), Transport::local_addr);
        self.server = Some(Peer::server_at(self_addr));
        self.is_server = true;

        info!(
            "Server permission received from {}",
            old_server_addr.description()
        );
    }

    /// Receiver side of `CLIENT_TRANSFERS_SERVER`: re-parent to the
    /// promoted member.
    fn follow_server_transfer(&mut self, packet: &NetworkPacket, sender_addr: NetworkAddress) {
        let Some(new_server_addr) = NetworkAddress::read_from(packet.payload()) else {
            error!("Malformed server transfer from {}", sender_addr.description());
            return;
        };

        match self.registry.lookup(new_server_addr) {
            Some(peer) if !peer.is_server() => {
                // The old server drops to a plain member
                if let Some(old) = self.server.take() {
                    self.registry.remove(old.address());
                    self.create_client(old.address());
                }

                self.clients.retain(|c| c.address() != new_server_addr);
                let new_server = Peer::server_at(new_server_addr);
                self.registry.register(new_server);
                self.server = Some(new_server);

                info!("Session server is now {}", new_server_addr.description());
            }
            Some(_) => {
                // Duplicate transfer, already following that server
                debug!(
                    "Ignoring repeated server transfer to {}",
                    new_server_addr.description()
                );
            }
            None => {
                error!(
                    "Server transfer to unknown member {}",
                    new_server_addr.description()
                );
            }
        }
    }

    /// One raw send; logs and reports failure.
    fn send_to_address(&mut self, packet: &NetworkPacket, addr: NetworkAddress) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send_to(packet.raw_buffer(), addr) {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Could not send network packet to {}: {}",
                    addr.description(),
                    e
                );
                false
            }
        }
    }

    /// Clears every piece of session state and returns to idle flags.
    ///
    /// The transport is left to the caller: a remote teardown keeps the
    /// socket until the next host/join/disconnect replaces it.
    fn close_network_session(&mut self) {
        self.server = None;
        self.clients.clear();
        self.join_queue.clear();
        self.leave_queue.clear();
        self.registry.clear();
        self.running = false;
        self.connected = false;
        self.is_server = false;
    }
}

impl<T: Transport> Default for NetworkSession<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    /// Records every send and receives from a scripted inbox.
    struct ScriptedTransport {
        local: NetworkAddress,
        sent: Vec<(Vec<u8>, NetworkAddress)>,
        inbox: VecDeque<(Vec<u8>, NetworkAddress)>,
    }

    impl Transport for ScriptedTransport {
        fn bind(addr: NetworkAddress) -> io::Result<Self> {
            Ok(Self {
                local: addr,
                sent: Vec::new(),
                inbox: VecDeque::new(),
            })
        }

        fn local_addr(&self) -> NetworkAddress {
            self.local
        }

        fn send_to(&mut self, data: &[u8], addr: NetworkAddress) -> io::Result<usize> {
            self.sent.push((data.to_vec(), addr));
            Ok(data.len())
        }

        fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, NetworkAddress)>> {
            match self.inbox.pop_front() {
                Some((data, addr)) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(Some((len, addr)))
                }
                None => Ok(None),
            }
        }

        fn set_broadcast(&mut self, _enabled: bool) -> io::Result<()> {
            Ok(())
        }
    }

    type TestSession = NetworkSession<ScriptedTransport>;

    fn quick_config() -> NetworkConfig {
        NetworkConfig {
            disconnect_grace_ms: 0,
            ..NetworkConfig::default()
        }
    }

    fn client_addr(n: u8) -> NetworkAddress {
        NetworkAddress::from_port_and_name(5000 + u16::from(n), &format!("10.0.0.{n}"))
    }

    fn inject(session: &mut TestSession, packet: &NetworkPacket, from: NetworkAddress) {
        session
            .transport
            .as_mut()
            .unwrap()
            .inbox
            .push_back((packet.raw_buffer().to_vec(), from));
    }

    fn inject_raw(session: &mut TestSession, data: &[u8], from: NetworkAddress) {
        session
            .transport
            .as_mut()
            .unwrap()
            .inbox
            .push_back((data.to_vec(), from));
    }

    fn sent_packets(session: &TestSession) -> Vec<(NetworkPacket, NetworkAddress)> {
        session
            .transport
            .as_ref()
            .unwrap()
            .sent
            .iter()
            .map(|(data, addr)| (NetworkPacket::from_raw(data, true), *addr))
            .collect()
    }

    fn clear_sent(session: &mut TestSession) {
        session.transport.as_mut().unwrap().sent.clear();
    }

    fn join(session: &mut TestSession, addr: NetworkAddress) {
        inject(
            session,
            &NetworkPacket::with_descriptor(ReservedDescriptor::ClientJoin.as_u32()),
            addr,
        );
        session.process_packets();
    }

    #[test]
    fn test_host_server_state() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();

        assert!(session.is_session_running());
        assert!(session.is_server());
        assert!(session.is_connected());
        assert!(session.clients().is_empty());
        assert_eq!(session.server().unwrap().address().port(), 9000);
    }

    #[test]
    fn test_join_leave_symmetry() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();

        let a = client_addr(1);
        join(&mut session, a);

        // Exactly one join announcement, and the member resolves
        let joined = session.pop_client_join_stack().unwrap();
        assert_eq!(joined.address(), a);
        assert!(session.pop_client_join_stack().is_none());
        assert!(session.get_member_by_address(a).is_some());

        inject(
            &mut session,
            &NetworkPacket::with_descriptor(ReservedDescriptor::ClientLeft.as_u32()),
            a,
        );
        session.process_packets();

        // Exactly one leave announcement, and the member is gone
        let left = session.pop_client_leave_stack().unwrap();
        assert_eq!(left.address(), a);
        assert!(session.pop_client_leave_stack().is_none());
        assert!(session.get_member_by_address(a).is_none());
        assert!(session.clients().is_empty());
    }

    #[test]
    fn test_duplicate_join_registers_once() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();

        let a = client_addr(1);
        join(&mut session, a);
        join(&mut session, a);

        assert_eq!(session.clients().len(), 1);
        assert!(session.pop_client_join_stack().is_some());
        assert!(session.pop_client_join_stack().is_none());
    }

    #[test]
    fn test_join_grant_and_introductions() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();

        let a = client_addr(1);
        let b = client_addr(2);
        join(&mut session, a);
        clear_sent(&mut session);
        join(&mut session, b);

        let sent = sent_packets(&session);
        assert_eq!(sent.len(), 2);

        // The newcomer gets the grant listing the one existing member
        let (accepted, to) = &sent[0];
        assert_eq!(
            accepted.descriptor(),
            ReservedDescriptor::ConnectionAccepted.as_u32()
        );
        assert_eq!(*to, b);
        assert_eq!(accepted.payload_len(), ADDR_SIZE);
        assert_eq!(NetworkAddress::read_from(accepted.payload()), Some(a));

        // The existing member gets the introduction
        let (introduce, to) = &sent[1];
        assert_eq!(
            introduce.descriptor(),
            ReservedDescriptor::IntroduceClient.as_u32()
        );
        assert_eq!(*to, a);
        assert_eq!(NetworkAddress::read_from(introduce.payload()), Some(b));
    }

    #[test]
    fn test_fan_out_reaches_every_client() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();

        let members = [client_addr(1), client_addr(2), client_addr(3)];
        for addr in members {
            join(&mut session, addr);
        }
        clear_sent(&mut session);

        let payload = NetworkPacket::with_payload(7, b"tick");
        assert!(session.send_packet(&payload, None));

        let sent = sent_packets(&session);
        assert_eq!(sent.len(), members.len());
        for ((packet, to), addr) in sent.iter().zip(members) {
            assert_eq!(packet.descriptor(), 7);
            assert_eq!(*to, addr);
        }
    }

    #[test]
    fn test_client_fan_out_goes_to_server_only() {
        let mut session = TestSession::new();
        session
            .join_server(std::net::Ipv4Addr::new(10, 0, 0, 99), 9000)
            .unwrap();
        clear_sent(&mut session);

        assert!(session.send_packet(&NetworkPacket::with_payload(7, b"hi"), None));

        let sent = sent_packets(&session);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, NetworkAddress::from_port_and_name(9000, "10.0.0.99"));
    }

    #[test]
    fn test_receive_is_non_blocking() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();
        // Empty inbox reports would-block; receive must return
        // immediately with nothing
        assert!(session.receive_packet().is_none());
    }

    #[test]
    fn test_send_without_session_fails() {
        let mut session = TestSession::new();
        assert!(!session.send_packet(&NetworkPacket::new(), None));
        assert!(session.receive_packet().is_none());
    }

    #[test]
    fn test_connection_accepted_registers_member_list() {
        let server_addr = NetworkAddress::from_port_and_name(9000, "10.0.0.99");
        let mut session = TestSession::new();
        session
            .join_server(std::net::Ipv4Addr::new(10, 0, 0, 99), 9000)
            .unwrap();
        assert!(!session.is_connected());

        let a = client_addr(1);
        let b = client_addr(2);
        let mut member_list = Vec::new();
        member_list.extend_from_slice(&a.encoded());
        member_list.extend_from_slice(&b.encoded());
        inject(
            &mut session,
            &NetworkPacket::with_payload(
                ReservedDescriptor::ConnectionAccepted.as_u32(),
                &member_list,
            ),
            server_addr,
        );

        assert!(session.wait_for_connection());
        assert!(session.is_connected());
        assert_eq!(session.clients().len(), 2);
        assert!(session.get_member_by_address(a).is_some());
        assert!(session.get_member_by_address(b).is_some());
    }

    #[test]
    fn test_server_disconnected_tears_down() {
        let server_addr = NetworkAddress::from_port_and_name(9000, "10.0.0.99");
        let mut session = TestSession::new();
        session
            .join_server(std::net::Ipv4Addr::new(10, 0, 0, 99), 9000)
            .unwrap();

        inject(
            &mut session,
            &NetworkPacket::with_descriptor(ReservedDescriptor::ServerDisconnected.as_u32()),
            server_addr,
        );
        session.process_packets();

        assert!(!session.is_session_running());
        assert!(!session.is_connected());
        assert!(session.server().is_none());
        assert!(session.clients().is_empty());
    }

    #[test]
    fn test_application_packets_require_membership() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();

        let stranger = client_addr(9);
        let member = client_addr(1);
        join(&mut session, member);

        // Unsolicited traffic is dropped silently
        inject(&mut session, &NetworkPacket::with_payload(7, b"spam"), stranger);
        assert!(session.receive_packet().is_none());

        // The same payload from a member is handed out
        inject(&mut session, &NetworkPacket::with_payload(7, b"data"), member);
        let (packet, sender) = session.receive_packet().unwrap();
        assert_eq!(packet.descriptor(), 7);
        assert_eq!(packet.payload(), b"data");
        assert_eq!(sender.address(), member);
    }

    #[test]
    fn test_undersized_datagram_is_no_packet() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();
        let member = client_addr(1);
        join(&mut session, member);

        inject_raw(&mut session, &[0xAB, 0xCD], member);
        assert!(session.receive_packet().is_none());
    }

    #[test]
    fn test_transfer_server_permission() {
        let mut session = TestSession::new();
        session.host_server(9000).unwrap();

        let a = client_addr(1);
        let b = client_addr(2);
        join(&mut session, a);
        join(&mut session, b);
        clear_sent(&mut session);

        let promoted = session.get_member_by_address(a).unwrap();
        assert!(session.transfer_server_permission(Some(&promoted)));

        let sent = sent_packets(&session);
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0].0.descriptor(),
            ReservedDescriptor::BecomeServer.as_u32()
        );
        assert_eq!(sent[0].1, a);
        assert_eq!(
            sent[1].0.descriptor(),
            ReservedDescriptor::ClientTransfersServer.as_u32()
        );
        assert_eq!(sent[1].1, b);
        assert_eq!(NetworkAddress::read_from(sent[1].0.payload()), Some(a));

        // Local view: a client of the new server, still tracking b
        assert!(!session.is_server());
        assert_eq!(session.server().unwrap().address(), a);
        assert_eq!(session.clients().len(), 1);
        assert_eq!(session.clients()[0].address(), b);
        assert!(session.get_member_by_address(a).unwrap().is_server());
    }

    #[test]
    fn test_transfer_requires_server_and_clients() {
        let mut session = TestSession::new();
        assert!(!session.transfer_server_permission(None));

        session.host_server(9000).unwrap();
        // No clients yet
        assert!(!session.transfer_server_permission(None));

        session
            .join_server(std::net::Ipv4Addr::new(10, 0, 0, 99), 9000)
            .unwrap();
        // Not the server
        assert!(!session.transfer_server_permission(None));
    }

    #[test]
    fn test_become_server_takes_over() {
        let server_addr = NetworkAddress::from_port_and_name(9000, "10.0.0.99");
        let mut session = TestSession::new();
        session
            .join_server(std::net::Ipv4Addr::new(10, 0, 0, 99), 9000)
            .unwrap();

        inject(
            &mut session,
            &NetworkPacket::with_descriptor(ReservedDescriptor::BecomeServer.as_u32()),
            server_addr,
        );
        session.process_packets();

        assert!(session.is_server());
        // The old server is tracked as a plain member now
        let old = session.get_member_by_address(server_addr).unwrap();
        assert!(!old.is_server());
        assert_eq!(session.clients().len(), 1);
    }

    #[test]
    fn test_client_follows_server_transfer() {
        let server_addr = NetworkAddress::from_port_and_name(9000, "10.0.0.99");
        let mut session = TestSession::new();
        session
            .join_server(std::net::Ipv4Addr::new(10, 0, 0, 99), 9000)
            .unwrap();

        // The server introduces a fellow client, then hands it the
        // session
        let promoted = client_addr(1);
        inject(
            &mut session,
            &NetworkPacket::with_payload(
                ReservedDescriptor::IntroduceClient.as_u32(),
                &promoted.encoded(),
            ),
            server_addr,
        );
        inject(
            &mut session,
            &NetworkPacket::with_payload(
                ReservedDescriptor::ClientTransfersServer.as_u32(),
                &promoted.encoded(),
            ),
            server_addr,
        );
        session.process_packets();

        assert!(!session.is_server());
        assert_eq!(session.server().unwrap().address(), promoted);
        assert!(session.get_member_by_address(promoted).unwrap().is_server());
        // The old server is a plain member now
        let old = session.get_member_by_address(server_addr).unwrap();
        assert!(!old.is_server());
    }

    #[test]
    fn test_transfer_to_unknown_member_is_ignored() {
        let server_addr = NetworkAddress::from_port_and_name(9000, "10.0.0.99");
        let mut session = TestSession::new();
        session
            .join_server(std::net::Ipv4Addr::new(10, 0, 0, 99), 9000)
            .unwrap();

        inject(
            &mut session,
            &NetworkPacket::with_payload(
                ReservedDescriptor::ClientTransfersServer.as_u32(),
                &client_addr(7).encoded(),
            ),
            server_addr,
        );
        session.process_packets();

        // Nothing changed: still following the original server
        assert_eq!(session.server().unwrap().address(), server_addr);
    }

    #[test]
    fn test_session_request_answered_for_matching_key() {
        let mut session = TestSession::with_config(&quick_config());
        session.set_session_key("lumen_demo_v1");
        session.set_session_description("Map: Harbor");
        session.host_server(9000).unwrap();
        clear_sent(&mut session);

        let scout = client_addr(9);
        inject(
            &mut session,
            &NetworkPacket::from_text_with_descriptor(
                "lumen_demo_v1",
                ReservedDescriptor::SessionRequest.as_u32(),
            ),
            scout,
        );
        session.process_packets();

        let sent = sent_packets(&session);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].0.descriptor(),
            ReservedDescriptor::SessionAnswer.as_u32()
        );
        assert_eq!(sent[0].1, scout);
        assert!(sent[0].0.equals_str("Map: Harbor"));
    }

    #[test]
    fn test_session_request_with_wrong_key_is_ignored() {
        let mut session = TestSession::with_config(&quick_config());
        session.set_session_key("lumen_demo_v1");
        session.host_server(9000).unwrap();
        clear_sent(&mut session);

        inject(
            &mut session,
            &NetworkPacket::from_text_with_descriptor(
                "wrong",
                ReservedDescriptor::SessionRequest.as_u32(),
            ),
            client_addr(9),
        );
        session.process_packets();

        assert!(sent_packets(&session).is_empty());
    }

    #[test]
    fn test_session_answer_invokes_callback() {
        let server_addr = NetworkAddress::from_port_and_name(9000, "10.0.0.99");
        let mut session = TestSession::new();
        session
            .join_server(std::net::Ipv4Addr::new(10, 0, 0, 99), 9000)
            .unwrap();

        let answers: Rc<RefCell<Vec<(NetworkAddress, String)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&answers);
        session.set_session_answer_callback(Box::new(move |addr, description| {
            sink.borrow_mut().push((addr, description.to_owned()));
        }));

        inject(
            &mut session,
            &NetworkPacket::from_text_with_descriptor(
                "Map: Harbor",
                ReservedDescriptor::SessionAnswer.as_u32(),
            ),
            server_addr,
        );
        session.process_packets();

        let answers = answers.borrow();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].0, server_addr);
        assert_eq!(answers[0].1, "Map: Harbor");
    }

    #[test]
    fn test_session_key_and_description_accessors() {
        let mut session = TestSession::new();
        session.set_session_key("lumen_demo_v1");
        session.set_session_description("Map: Harbor");

        assert_eq!(session.session_key(), "lumen_demo_v1");
        assert_eq!(session.session_description(), "Map: Harbor");
    }

    #[test]
    fn test_join_by_name() {
        let mut session = TestSession::new();
        // Resolves through the hosts file; no network traffic involved
        session.join_server_by_name("localhost", 9000).unwrap();
        assert!(session.is_session_running());

        let mut failed = TestSession::new();
        assert!(failed.join_server_by_name("", 9000).is_err());
    }

    #[test]
    fn test_disconnect_resets_state() {
        let mut session = TestSession::with_config(&quick_config());
        session.host_server(9000).unwrap();
        join(&mut session, client_addr(1));

        session.disconnect();

        assert!(!session.is_session_running());
        assert!(!session.is_connected());
        assert!(!session.is_server());
        assert!(session.server().is_none());
        assert!(session.clients().is_empty());
        assert!(session.pop_client_join_stack().is_none());
        assert!(session.local_address().is_none());

        // Idle disconnect is a no-op
        session.disconnect();
    }
}
