// Client session engine: one endpoint joining a host's session through the
// relay.
//
// Lifecycle: `Disconnected -> Connecting -> Connected -> Disconnected`.
// - `connect()` resolves the relay address, sends a `ConnectRequest`
//   (source 0, destination host) and moves to `Connecting`. It returns as
//   soon as the request is on the wire; admission is only known after a
//   later `process_packets()` sees the host's reply.
// - `process_packets()` drains every datagram the transport has right now,
//   decodes each one and dispatches it. It never blocks. A frame that fails
//   to decode is reported (event + diagnostic) and skipped; the rest of the
//   batch is still processed. After the batch it checks the connect timeout
//   and sends an automatic ping if one is due.
// - On admission the client echoes the accept back with its new id as
//   source, which lets the relay bind this address to that id.
//
// While `Connecting`, only accept/deny frames matter and their destination
// is not checked (the client has no id yet). Once `Connected`, any frame
// whose destination is not this client's id is reported as a wrong
// destination and otherwise ignored.
//
// Events queue up until the owner calls `drain_events()`, unless an
// observer is installed, in which case each `process_packets()` call ends by
// dispatching the queue to it.
//
// See also: `host.rs` for the other end of the handshake, `heartbeat.rs`
// for ping bookkeeping, `event.rs` for `ClientEvent`/`ClientObserver`.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use neon_protocol::{
    ClientId, ConnectAccept, ConnectRequest, DEFAULT_MAX_PACKET_SIZE, DisconnectNotice,
    FIRST_APPLICATION_TYPE, Frame, Message, PacketTypeRegistry, Ping, SessionConfig, SessionId,
};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::diagnostics::{ErrorSlot, fail};
use crate::error::{ConnectError, ProcessError, SendError, malformed};
use crate::event::{ClientEvent, ClientObserver};
use crate::heartbeat::Heartbeat;
use crate::transport::{RECV_BUFFER_SIZE, Transport, UdpTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A session client.
pub struct Client<T: Transport = UdpTransport> {
    name: String,
    config: ClientConfig,
    transport: T,
    clock: Arc<dyn Clock>,
    state: ConnectionState,
    relay_addr: Option<SocketAddr>,
    requested_session: SessionId,
    connect_started_at: u64,
    client_id: ClientId,
    session_id: SessionId,
    session_config: Option<SessionConfig>,
    registry: PacketTypeRegistry,
    heartbeat: Heartbeat,
    next_sequence: u16,
    events: Vec<ClientEvent>,
    observer: Option<Box<dyn ClientObserver + Send>>,
    /// Set while handling a batch when the connect attempt ends; returned
    /// once the batch is done.
    pending_failure: Option<ProcessError>,
    errors: ErrorSlot,
    recv_buf: Vec<u8>,
}

impl Client<UdpTransport> {
    /// A client on an ephemeral UDP port with default settings.
    pub fn new(name: impl Into<String>) -> io::Result<Self> {
        Self::with_config(name, ClientConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ClientConfig) -> io::Result<Self> {
        let transport = UdpTransport::bind("0.0.0.0:0").map_err(fail)?;
        Ok(Self::with_transport(
            name,
            config,
            transport,
            Arc::new(SystemClock),
        ))
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(
        name: impl Into<String>,
        config: ClientConfig,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let heartbeat = Heartbeat::new(config.auto_ping, config.ping_interval_ms);
        Self {
            name: name.into(),
            config,
            transport,
            clock,
            state: ConnectionState::Disconnected,
            relay_addr: None,
            requested_session: SessionId::UNSET,
            connect_started_at: 0,
            client_id: ClientId::UNASSIGNED,
            session_id: SessionId::UNSET,
            session_config: None,
            registry: PacketTypeRegistry::empty(),
            heartbeat,
            next_sequence: 0,
            events: Vec::new(),
            observer: None,
            pending_failure: None,
            errors: ErrorSlot::default(),
            recv_buf: vec![0; RECV_BUFFER_SIZE],
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Assigned id, or `ClientId::UNASSIGNED` (0) before admission.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Joined session, or `SessionId::UNSET` (0) before admission.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn session_config(&self) -> Option<SessionConfig> {
        self.session_config
    }

    /// The host's registry; empty until it arrives.
    pub fn registry(&self) -> &PacketTypeRegistry {
        &self.registry
    }

    pub fn relay_addr(&self) -> Option<SocketAddr> {
        self.relay_addr
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Most recent measured round trip, in milliseconds.
    pub fn last_rtt(&self) -> Option<u64> {
        self.heartbeat.last_rtt()
    }

    /// This client's most recent failure message.
    pub fn last_error(&self) -> Option<&str> {
        self.errors.get()
    }

    pub fn auto_ping(&self) -> bool {
        self.heartbeat.auto()
    }

    pub fn set_auto_ping(&mut self, enabled: bool) {
        self.heartbeat.set_auto(enabled);
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms())
    }

    pub fn set_ping_interval(&mut self, interval: Duration) {
        self.heartbeat
            .set_interval_ms(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
    }

    /// Deliver events to `observer` at the end of each `process_packets()`
    /// instead of queueing them for `drain_events()`.
    pub fn set_observer(&mut self, observer: impl ClientObserver + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Take all queued events, oldest first.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    // -- Operations ---------------------------------------------------------

    /// Ask the relay to join `session_id`. Succeeds once the request is
    /// sent; poll `is_connected()` after `process_packets()` for the outcome.
    pub fn connect(&mut self, session_id: SessionId, relay_addr: &str) -> Result<(), ConnectError> {
        if self.state != ConnectionState::Disconnected {
            return Err(self.errors.record(ConnectError::AlreadyConnected));
        }
        let relay = match resolve(relay_addr) {
            Ok(addr) => addr,
            Err(source) => {
                return Err(self.errors.record(ConnectError::Unreachable {
                    relay: relay_addr.to_owned(),
                    source,
                }));
            }
        };

        let request = Message::ConnectRequest(ConnectRequest {
            client_version: self.config.client_version,
            target_session_id: session_id,
            game_identifier: self.config.game_identifier,
            desired_name: self.name.clone(),
        });
        let sequence = self.bump_sequence();
        let bytes = request
            .into_frame(ClientId::UNASSIGNED, ClientId::HOST)
            .with_sequence(sequence)
            .encode();
        if let Err(source) = self.transport.send_to(&bytes, relay) {
            return Err(self.errors.record(ConnectError::Unreachable {
                relay: relay_addr.to_owned(),
                source,
            }));
        }

        self.clear_session();
        self.relay_addr = Some(relay);
        self.requested_session = session_id;
        self.connect_started_at = self.clock.now_millis();
        self.state = ConnectionState::Connecting;
        info!(client = %self.name, session_id = %session_id, %relay, "connect request sent");
        Ok(())
    }

    /// Drain and dispatch everything the transport has. Never blocks.
    pub fn process_packets(&mut self) -> Result<(), ProcessError> {
        let result = self.process_batch();
        if let Some(observer) = self.observer.as_mut() {
            for event in self.events.drain(..) {
                event.dispatch(&mut **observer);
            }
        }
        result.map_err(|err| self.errors.record(err))
    }

    fn process_batch(&mut self) -> Result<(), ProcessError> {
        let mut buf = std::mem::take(&mut self.recv_buf);
        let drained = self.drain_transport(&mut buf);
        self.recv_buf = buf;
        drained?;

        let now = self.clock.now_millis();
        if self.state == ConnectionState::Connecting
            && now.saturating_sub(self.connect_started_at) >= self.config.connect_timeout_ms
        {
            self.fail_connect(format!(
                "no reply to connect request within {} ms",
                self.config.connect_timeout_ms
            ));
        }
        if self.state == ConnectionState::Connected && self.heartbeat.is_due(now) {
            self.transmit_ping()?;
        }

        match self.pending_failure.take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn drain_transport(&mut self, buf: &mut [u8]) -> Result<(), ProcessError> {
        while let Some((len, from)) = self.transport.try_recv_from(buf)? {
            self.handle_datagram(&buf[..len], from)?;
        }
        Ok(())
    }

    /// Send a ping now. Does nothing unless connected.
    pub fn send_ping(&mut self) -> Result<(), SendError> {
        if self.state != ConnectionState::Connected {
            debug!(client = %self.name, "send_ping ignored while not connected");
            return Ok(());
        }
        self.transmit_ping()
            .map_err(|err| self.errors.record(SendError::Transport(err)))
    }

    /// Send an application packet to another endpoint in the session.
    pub fn send_packet(
        &mut self,
        packet_type: u8,
        destination: ClientId,
        payload: &[u8],
    ) -> Result<(), SendError> {
        if self.state != ConnectionState::Connected {
            return Err(self.errors.record(SendError::NotConnected));
        }
        if packet_type < FIRST_APPLICATION_TYPE {
            return Err(self.errors.record(SendError::ReservedType(packet_type)));
        }
        let sequence = self.bump_sequence();
        let frame = Frame::new(packet_type, self.client_id, destination, payload.to_vec())
            .with_sequence(sequence);
        let max = self.max_packet_size();
        if frame.encoded_len() > max {
            return Err(self.errors.record(SendError::Oversize {
                len: frame.encoded_len(),
                max,
            }));
        }
        self.send_frame(frame)
            .map_err(|err| self.errors.record(SendError::Transport(err)))
    }

    /// Leave the session. Tells the host if connected; always ends
    /// `Disconnected`.
    pub fn disconnect(&mut self) -> Result<(), SendError> {
        let result = if self.state == ConnectionState::Connected {
            let notice = Message::DisconnectNotice(DisconnectNotice {
                reason: "client disconnected".into(),
            })
            .into_frame(self.client_id, ClientId::HOST);
            self.send_frame(notice)
        } else {
            Ok(())
        };
        if self.state != ConnectionState::Disconnected {
            info!(client = %self.name, client_id = %self.client_id, "disconnected");
        }
        self.clear_session();
        self.state = ConnectionState::Disconnected;
        self.relay_addr = None;
        result.map_err(|err| self.errors.record(SendError::Transport(err)))
    }

    // -- Inbound ------------------------------------------------------------

    fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> Result<(), ProcessError> {
        if self.relay_addr != Some(from) {
            debug!(client = %self.name, %from, "ignoring datagram from outside the relay");
            return Ok(());
        }
        let decoded = Frame::decode(bytes, self.max_packet_size()).and_then(|frame| {
            let message = Message::from_frame(&frame)?;
            Ok((frame, message))
        });
        let (frame, message) = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                let reason = malformed(from, &err);
                warn!(client = %self.name, "{reason}");
                self.errors.note(reason.clone());
                self.events.push(ClientEvent::MalformedPacket { reason });
                return Ok(());
            }
        };

        match self.state {
            ConnectionState::Connecting => self.handle_handshake(message)?,
            ConnectionState::Connected => self.handle_connected(&frame, message),
            ConnectionState::Disconnected => {
                debug!(client = %self.name, packet_type = frame.packet_type, "ignoring packet while disconnected");
            }
        }
        Ok(())
    }

    fn handle_handshake(&mut self, message: Message) -> Result<(), ProcessError> {
        match message {
            Message::ConnectAccept(accept) => self.on_accept(accept)?,
            Message::ConnectDeny(deny) => {
                warn!(client = %self.name, reason = %deny.reason, "connection denied");
                self.errors.note(format!("connection denied: {}", deny.reason));
                self.clear_session();
                self.state = ConnectionState::Disconnected;
                self.events.push(ClientEvent::Denied {
                    reason: deny.reason.clone(),
                });
                self.pending_failure = Some(ProcessError::Denied(deny.reason));
            }
            other => {
                debug!(client = %self.name, packet_type = other.packet_type(), "ignoring packet while connecting");
            }
        }
        Ok(())
    }

    fn on_accept(&mut self, accept: ConnectAccept) -> Result<(), ProcessError> {
        if accept.session_id != self.requested_session {
            self.fail_connect(format!(
                "accept names session {} but {} was requested",
                accept.session_id, self.requested_session
            ));
            return Ok(());
        }
        if !accept.assigned_client_id.is_client() {
            self.fail_connect(format!(
                "host assigned reserved id {}",
                accept.assigned_client_id
            ));
            return Ok(());
        }

        self.client_id = accept.assigned_client_id;
        self.session_id = accept.session_id;
        self.state = ConnectionState::Connected;
        self.heartbeat.reset();
        info!(
            client = %self.name,
            client_id = %self.client_id,
            session_id = %self.session_id,
            "connected"
        );
        self.events.push(ClientEvent::Connected {
            client_id: self.client_id,
            session_id: self.session_id,
        });

        // Confirmation: lets the relay bind our address to the new id.
        let confirm = Message::ConnectAccept(accept).into_frame(self.client_id, ClientId::HOST);
        self.send_frame(confirm)?;
        Ok(())
    }

    fn handle_connected(&mut self, frame: &Frame, message: Message) {
        if frame.destination != self.client_id {
            debug!(
                client = %self.name,
                client_id = %self.client_id,
                destination = %frame.destination,
                packet_type = frame.packet_type,
                "packet for another destination"
            );
            self.events.push(ClientEvent::WrongDestination {
                own_id: self.client_id,
                destination: frame.destination,
                packet_type: frame.packet_type,
            });
            return;
        }

        match message {
            Message::SessionConfig(config) => {
                debug!(client = %self.name, tick_rate = config.tick_rate, max_packet_size = config.max_packet_size, "session config");
                self.session_config = Some(config);
                self.events.push(ClientEvent::SessionConfig(config));
            }
            Message::PacketTypeRegistry(registry) => {
                debug!(client = %self.name, entries = registry.len(), "packet type registry");
                self.registry = registry.clone();
                self.events.push(ClientEvent::Registry(registry));
            }
            Message::Pong(pong) => {
                let now = self.clock.now_millis();
                match self
                    .heartbeat
                    .complete(frame.sequence, pong.original_timestamp, now)
                {
                    Some(rtt_ms) => {
                        debug!(client = %self.name, rtt_ms, "pong");
                        self.events.push(ClientEvent::Pong {
                            rtt_ms,
                            original_timestamp: pong.original_timestamp,
                        });
                    }
                    None => debug!(client = %self.name, token = frame.sequence, "discarding unmatched pong"),
                }
            }
            Message::Ping(_) => {
                debug!(client = %self.name, from = %frame.source, "ignoring inbound ping");
            }
            Message::DisconnectNotice(notice) if frame.source.is_host() => {
                info!(client = %self.name, reason = %notice.reason, "host ended the session");
                self.clear_session();
                self.state = ConnectionState::Disconnected;
                self.events.push(ClientEvent::HostDisconnected {
                    reason: notice.reason,
                });
            }
            Message::ConnectAccept(_) | Message::ConnectDeny(_) => {
                debug!(client = %self.name, "ignoring handshake packet while connected");
            }
            Message::Application { packet_type, data } if self.registry.contains(packet_type) => {
                self.events.push(ClientEvent::Packet {
                    packet_type,
                    from: frame.source,
                    payload: data,
                });
            }
            other => {
                let packet_type = other.packet_type();
                debug!(client = %self.name, packet_type, from = %frame.source, "unhandled packet");
                self.events.push(ClientEvent::UnhandledPacket {
                    packet_type,
                    from: frame.source,
                });
            }
        }
    }

    // -- Helpers ------------------------------------------------------------

    fn fail_connect(&mut self, reason: String) {
        warn!(client = %self.name, %reason, "connect failed");
        self.errors.note(format!("connection failed: {reason}"));
        self.clear_session();
        self.state = ConnectionState::Disconnected;
        self.events.push(ClientEvent::ConnectFailed {
            reason: reason.clone(),
        });
        self.pending_failure = Some(ProcessError::ConnectFailed(reason));
    }

    fn transmit_ping(&mut self) -> io::Result<()> {
        let now = self.clock.now_millis();
        let ping = self.heartbeat.issue(now);
        let frame = Message::Ping(Ping { timestamp: now })
            .into_frame(self.client_id, ClientId::HOST)
            .with_sequence(ping.token);
        debug!(client = %self.name, token = ping.token, "ping");
        self.send_frame(frame)
    }

    fn send_frame(&mut self, frame: Frame) -> io::Result<()> {
        let relay = self
            .relay_addr
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "no relay address"))?;
        self.transport.send_to(&frame.encode(), relay)
    }

    fn bump_sequence(&mut self) -> u16 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    fn max_packet_size(&self) -> usize {
        usize::from(
            self.session_config
                .map_or(DEFAULT_MAX_PACKET_SIZE, |config| config.max_packet_size),
        )
    }

    fn clear_session(&mut self) {
        self.client_id = ClientId::UNASSIGNED;
        self.session_id = SessionId::UNSET;
        self.session_config = None;
        self.registry = PacketTypeRegistry::empty();
        self.heartbeat.reset();
    }
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "address resolved to nothing"))
}
