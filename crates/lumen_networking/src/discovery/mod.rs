//! # Session Discovery
//!
//! Finding an open session on the LAN before joining it. Two
//! independent roles, each with its own ephemeral transport and no
//! connection to the session state machine:
//!
//! - [`SessionLogin`] scans: it sends `SESSION_REQUEST` packets
//!   (payload = the session key) to candidate or broadcast addresses
//!   and polls for `SESSION_ANSWER` replies.
//! - [`SessionReception`] answers: a background thread polls its
//!   socket and replies to every request carrying the right key with
//!   the session description.
//!
//! ## Threading
//!
//! The reception poller is the one real thread in this crate. It owns
//! its transport outright and shares exactly two things with the
//! opener: the command channel used to stop it and the description
//! text behind an `RwLock`, so a running lobby can update its
//! advertised state. Shutdown is cooperative - the thread checks for
//! the stop command every pass and is joined before the socket drops.
//!
//! The login side runs on the caller's thread; the answer callback is
//! invoked synchronously from [`SessionLogin::receive_answers`].

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{NetError, NetResult};
use crate::protocol::{NetworkAddress, NetworkPacket, ReservedDescriptor, DESCRIPTOR_SIZE};
use crate::transport::{Transport, UdpTransport};
use crate::RECV_BUFFER_SIZE;

/// Invoked for every session answer: server address and description.
pub type SessionAnswerCallback = Box<dyn FnMut(NetworkAddress, &str)>;

/// The requester side of session discovery.
///
/// Generic over the transport for the same reason the session is: the
/// protocol logic has nothing socket-specific in it.
pub struct SessionLogin<T: Transport = UdpTransport> {
    /// Lazily bound on the first request.
    transport: Option<T>,
    /// Key sent with every request.
    session_key: String,
    /// Invoked for every answer received.
    answer_callback: Option<SessionAnswerCallback>,
    /// Receive buffer handed to the transport.
    recv_buffer: [u8; RECV_BUFFER_SIZE],
}

impl<T: Transport> SessionLogin<T> {
    /// Creates a login endpoint for sessions keyed by `session_key`.
    #[must_use]
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            transport: None,
            session_key: session_key.into(),
            answer_callback: None,
            recv_buffer: [0u8; RECV_BUFFER_SIZE],
        }
    }

    /// Sets the callback invoked for every received answer.
    ///
    /// Runs on whatever thread calls
    /// [`SessionLogin::receive_answers`].
    pub fn set_answer_callback(&mut self, callback: SessionAnswerCallback) {
        self.answer_callback = Some(callback);
    }

    /// Sends a session request to one candidate address.
    ///
    /// Returns false if no socket could be opened or the send failed.
    pub fn request(&mut self, address: NetworkAddress) -> bool {
        if !self.ensure_bound(address.port()) {
            return false;
        }

        let request = NetworkPacket::from_text_with_descriptor(
            &self.session_key,
            ReservedDescriptor::SessionRequest.as_u32(),
        );
        self.send(&request, address)
    }

    /// Sends a session request to every candidate IP on `port`.
    ///
    /// Returns true if at least one send succeeded.
    pub fn request_all(&mut self, port: u16, addresses: &[Ipv4Addr]) -> bool {
        let mut any = false;
        for ip in addresses {
            any |= self.request(NetworkAddress::from_port_and_ip(port, *ip));
        }
        any
    }

    /// Sends a session request to the global broadcast address.
    ///
    /// Returns false if no socket could be opened, broadcast could not
    /// be enabled, or the send failed.
    pub fn request_broadcast(&mut self, port: u16) -> bool {
        if !self.ensure_bound(port) {
            return false;
        }

        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.set_broadcast(true) {
                warn!("Could not enable broadcast sends: {}", e);
                return false;
            }
        }

        let request = NetworkPacket::from_text_with_descriptor(
            &self.session_key,
            ReservedDescriptor::SessionRequest.as_u32(),
        );
        self.send(
            &request,
            NetworkAddress::from_port_and_ip(port, Ipv4Addr::BROADCAST),
        )
    }

    /// Polls for one answer, without blocking.
    ///
    /// A `SESSION_ANSWER` invokes the registered callback with the
    /// sender's address and the carried description; any other
    /// datagram is discarded. Returns true if a datagram was consumed.
    pub fn receive_answers(&mut self) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };

        let (len, sender) = match transport.recv_from(&mut self.recv_buffer) {
            Ok(Some(received)) => received,
            Ok(None) => return false,
            Err(e) => {
                warn!("Discovery receive failed: {}", e);
                return false;
            }
        };
        if len < DESCRIPTOR_SIZE {
            return true;
        }

        let packet = NetworkPacket::from_raw(&self.recv_buffer[..len], true);
        if packet.descriptor() == ReservedDescriptor::SessionAnswer.as_u32() {
            let description = packet.as_str().unwrap_or_default().to_owned();
            info!(
                "Session answer from {}: {}",
                sender.description(),
                description
            );
            if let Some(callback) = self.answer_callback.as_mut() {
                callback(sender, &description);
            }
        }
        true
    }

    /// Opens the socket on first use.
    ///
    /// The protocol port is preferred so broadcast answers arrive on a
    /// predictable port; when it is taken (a reception on the same
    /// host) an ephemeral port works just as well, since the server
    /// answers whatever address the request came from.
    fn ensure_bound(&mut self, port: u16) -> bool {
        if self.transport.is_some() {
            return true;
        }

        match T::bind(NetworkAddress::from_port(port)) {
            Ok(transport) => {
                self.transport = Some(transport);
                true
            }
            Err(first) => match T::bind(NetworkAddress::from_port(0)) {
                Ok(transport) => {
                    debug!(
                        "Discovery port {} taken ({}), using an ephemeral port",
                        port, first
                    );
                    self.transport = Some(transport);
                    true
                }
                Err(e) => {
                    error!("Could not open discovery socket: {}", e);
                    false
                }
            },
        }
    }

    /// One raw send; logs and reports failure.
    fn send(&mut self, packet: &NetworkPacket, address: NetworkAddress) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send_to(packet.raw_buffer(), address) {
            Ok(_) => true,
            Err(e) => {
                error!("Session request to {} failed: {}", address.description(), e);
                false
            }
        }
    }
}

/// Command understood by the reception poller.
enum ReceptionCommand {
    /// Stop polling and exit the thread.
    Shutdown,
}

/// The responder side of session discovery.
///
/// Opening a session spawns the background poller; dropping the value
/// (or calling [`SessionReception::close_session`]) stops it again.
pub struct SessionReception {
    /// Stop channel into the poller.
    command_tx: Sender<ReceptionCommand>,
    /// The poller itself; `None` once stopped.
    thread: Option<JoinHandle<()>>,
    /// Bound address captured before the transport moved to the thread.
    local_addr: NetworkAddress,
    /// Description shared with the poller; updatable while running.
    description: Arc<RwLock<String>>,
}

impl SessionReception {
    /// Opens a reception on `port` answering to `session_key`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Bind`] if the port cannot be bound, or
    /// [`NetError::Spawn`] if the poller thread could not start.
    pub fn open_session(
        port: u16,
        session_key: impl Into<String>,
        description: impl Into<String>,
    ) -> NetResult<Self> {
        Self::open_session_with_idle(port, session_key, description, Duration::from_millis(1))
    }

    /// Opens a reception with a custom idle interval between empty
    /// polls.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SessionReception::open_session`].
    pub fn open_session_with_idle(
        port: u16,
        session_key: impl Into<String>,
        description: impl Into<String>,
        idle: Duration,
    ) -> NetResult<Self> {
        let transport = UdpTransport::bind(NetworkAddress::from_port(port)).map_err(|e| {
            error!("Could not open session reception on port {}: {}", port, e);
            NetError::Bind { port, source: e }
        })?;
        let local_addr = transport.local_addr();

        let session_key = session_key.into();
        let description = Arc::new(RwLock::new(description.into()));
        let shared = Arc::clone(&description);
        let (command_tx, command_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name("lumen-session-reception".into())
            .spawn(move || reception_loop(transport, &command_rx, &session_key, &shared, idle))
            .map_err(NetError::Spawn)?;

        info!("Opened session reception ( {} )", local_addr.port());

        Ok(Self {
            command_tx,
            thread: Some(thread),
            local_addr,
            description,
        })
    }

    /// Returns the bound local address.
    #[must_use]
    pub const fn local_address(&self) -> NetworkAddress {
        self.local_addr
    }

    /// Updates the description carried in future answers.
    pub fn set_description(&self, description: impl Into<String>) {
        *self.description.write() = description.into();
    }

    /// Stops the poller and releases the socket.
    ///
    /// Cooperative: the thread sees the command on its next pass and
    /// is joined here, so the socket never outlives its owner. Safe to
    /// call twice.
    pub fn close_session(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.command_tx.send(ReceptionCommand::Shutdown);
            if thread.join().is_err() {
                error!("Session reception thread panicked");
            }
            info!("Closed session reception");
        }
    }
}

impl Drop for SessionReception {
    fn drop(&mut self) {
        self.close_session();
    }
}

/// Body of the reception poller thread.
fn reception_loop(
    mut transport: UdpTransport,
    commands: &Receiver<ReceptionCommand>,
    session_key: &str,
    description: &Arc<RwLock<String>>,
    idle: Duration,
) {
    let mut recv_buffer = [0u8; RECV_BUFFER_SIZE];

    loop {
        match commands.try_recv() {
            Ok(ReceptionCommand::Shutdown) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let consumed = {
            let current = description.read();
            poll_session_request(&mut transport, &mut recv_buffer, session_key, &current)
        };
        if !consumed {
            // Nothing pending; yield instead of spinning
            thread::sleep(idle);
        }
    }
}

/// One reception poll step: receive, match the key, answer.
///
/// Returns true if a datagram was consumed (matching or not), false if
/// nothing was pending. Free of thread state so the answering rule is
/// testable on any transport.
fn poll_session_request<T: Transport>(
    transport: &mut T,
    recv_buffer: &mut [u8],
    session_key: &str,
    description: &str,
) -> bool {
    let (len, sender) = match transport.recv_from(recv_buffer) {
        Ok(Some(received)) => received,
        Ok(None) => return false,
        Err(e) => {
            warn!("Discovery receive failed: {}", e);
            return false;
        }
    };
    if len < DESCRIPTOR_SIZE {
        return true;
    }

    let packet = NetworkPacket::from_raw(&recv_buffer[..len], true);
    if packet.descriptor() == ReservedDescriptor::SessionRequest.as_u32()
        && packet.equals_str(session_key)
    {
        let answer = NetworkPacket::from_text_with_descriptor(
            description,
            ReservedDescriptor::SessionAnswer.as_u32(),
        );
        match transport.send_to(answer.raw_buffer(), sender) {
            Ok(_) => debug!("Answered session request from {}", sender.description()),
            Err(e) => error!("Session answer to {} failed: {}", sender.description(), e),
        }
    }
    true
}
