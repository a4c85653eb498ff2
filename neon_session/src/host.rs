// Host session engine: owns one session, admits clients, routes their
// traffic.
//
// A host is created for a fixed session id and relay address. `start()`
// registers the session with the relay (a `ConnectAccept` from the host id
// to itself carrying the session id) and then runs the receive loop on the
// calling thread until the stop signal is raised or the transport fails.
// `spawn()` moves the host onto its own thread and returns a `HostHandle`
// for stopping it, reading the client count, and draining events.
//
// One loop pass (`process_packets()`) drains every waiting datagram without
// blocking, then evicts members that have been silent for longer than
// `member_timeout_ms`. Tests drive passes directly instead of calling
// `start()`.
//
// Per inbound frame:
// - `ConnectRequest` for another session: dropped silently. Otherwise the
//   roster decides; a denial sends `ConnectDeny` to the unassigned id (the
//   relay routes it back to the pending client), an admission sends
//   `ConnectAccept`, `SessionConfig` and the registry, in that order.
// - `Ping` from a member: answered with a `Pong` echoing the timestamp and
//   the sequence token, plus the host's own clock.
// - `DisconnectNotice` from a member: membership removed.
// - Application packet to the host: delivered as an event if registered,
//   otherwise reported unhandled. To another member: forwarded unchanged. To
//   an id with no membership: dropped and reported as a wrong destination.
// - Anything else from a member: reported unhandled.
// Every frame from a member refreshes its `last_seen`.
//
// Threading: only the loop thread touches the roster. The member count is
// mirrored into an atomic after every change so `HostHandle::client_count`
// can read it from anywhere. Events go out over an mpsc channel and are
// never dispatched on the loop thread.
//
// See also: `roster.rs` for admission rules, `client.rs` for the other end
// of the handshake, `event.rs` for `HostEvent`/`HostObserver`.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use neon_protocol::{
    ClientId, ConnectAccept, ConnectDeny, ConnectRequest, DisconnectNotice,
    FIRST_APPLICATION_TYPE, Frame, Message, PacketTypeRegistry, Ping, Pong, SessionConfig,
    SessionId,
};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HostConfig;
use crate::diagnostics::{ErrorSlot, fail};
use crate::error::{HostError, SendError, malformed};
use crate::event::{HostEvent, HostObserver};
use crate::roster::{Membership, Roster};
use crate::transport::{RECV_BUFFER_SIZE, Transport, UdpTransport};

/// Cloneable flag that ends a running host loop.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot view of a host that is safe to read from any thread.
#[derive(Clone, Debug, Default)]
pub struct HostStatus {
    client_count: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl HostStatus {
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::SeqCst)
    }

    /// True between successful registration and loop exit.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A session host.
pub struct Host<T: Transport = UdpTransport> {
    session_id: SessionId,
    relay_addr: SocketAddr,
    config: HostConfig,
    session_config: SessionConfig,
    transport: T,
    clock: Arc<dyn Clock>,
    roster: Roster,
    registered: bool,
    status: HostStatus,
    stop: StopSignal,
    events_tx: Sender<HostEvent>,
    events_rx: Option<Receiver<HostEvent>>,
    errors: ErrorSlot,
    next_sequence: u16,
    recv_buf: Vec<u8>,
}

impl Host<UdpTransport> {
    /// A host on an ephemeral UDP port with default settings.
    pub fn new(session_id: SessionId, relay_addr: &str) -> Result<Self, HostError> {
        Self::with_config(session_id, relay_addr, HostConfig::default())
    }

    pub fn with_config(
        session_id: SessionId,
        relay_addr: &str,
        config: HostConfig,
    ) -> Result<Self, HostError> {
        let transport = UdpTransport::bind("0.0.0.0:0").map_err(|e| fail(HostError::Bind(e)))?;
        Self::with_transport(
            session_id,
            relay_addr,
            config,
            transport,
            Arc::new(SystemClock),
        )
    }
}

impl<T: Transport> Host<T> {
    pub fn with_transport(
        session_id: SessionId,
        relay_addr: &str,
        config: HostConfig,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HostError> {
        config.validate().map_err(|e| fail(HostError::Config(e)))?;
        let relay_addr = relay_addr
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
                })
            })
            .map_err(|source| {
                fail(HostError::InvalidRelayAddress {
                    relay: relay_addr.to_owned(),
                    source,
                })
            })?;
        let (events_tx, events_rx) = mpsc::channel();
        Ok(Self {
            session_id,
            relay_addr,
            session_config: config.session_config(),
            config,
            transport,
            clock,
            roster: Roster::new(),
            registered: false,
            status: HostStatus::default(),
            stop: StopSignal::default(),
            events_tx,
            events_rx: Some(events_rx),
            errors: ErrorSlot::default(),
            next_sequence: 0,
            recv_buf: vec![0; RECV_BUFFER_SIZE],
        })
    }

    // -- Accessors ----------------------------------------------------------

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn session_config(&self) -> SessionConfig {
        self.session_config
    }

    pub fn registry(&self) -> &PacketTypeRegistry {
        &self.config.registry
    }

    pub fn client_count(&self) -> usize {
        self.roster.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &Membership> {
        self.roster.iter()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn status(&self) -> HostStatus {
        self.status.clone()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// This host's most recent failure message.
    pub fn last_error(&self) -> Option<&str> {
        self.errors.get()
    }

    /// Take the event channel to read it elsewhere. After this,
    /// `poll_events` on the host returns nothing.
    pub fn take_event_receiver(&mut self) -> Option<Receiver<HostEvent>> {
        self.events_rx.take()
    }

    /// Queued events, oldest first.
    pub fn poll_events(&self) -> Vec<HostEvent> {
        self.events_rx
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }

    pub fn dispatch_events(&self, observer: &mut dyn HostObserver) -> usize {
        dispatch_all(self.events_rx.as_ref(), observer)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Announce this session to the relay.
    pub fn register(&mut self) -> Result<(), HostError> {
        let announce = Message::ConnectAccept(ConnectAccept {
            assigned_client_id: ClientId::HOST,
            session_id: self.session_id,
        });
        if let Err(e) = self.send(announce, ClientId::HOST) {
            return Err(self.errors.record(HostError::Registration(e)));
        }
        self.registered = true;
        info!(session_id = %self.session_id, relay = %self.relay_addr, "session registered");
        Ok(())
    }

    /// Register, then run the receive loop on this thread until the stop
    /// signal is raised (`Ok`) or the transport fails (`Err`). Members are
    /// sent a `DisconnectNotice` on a requested stop.
    pub fn start(&mut self) -> Result<(), HostError> {
        self.register()?;
        self.status.running.store(true, Ordering::SeqCst);
        let idle = Duration::from_millis(self.config.idle_sleep_ms);

        while !self.stop.is_stopped() {
            match self.process_packets() {
                Ok(0) => thread::sleep(idle),
                Ok(_) => {}
                Err(e) => {
                    self.status.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        let result = self.disconnect_all("host shutting down");
        self.status.running.store(false, Ordering::SeqCst);
        info!(session_id = %self.session_id, "host stopped");
        result
    }

    /// Run `start()` on a dedicated thread.
    pub fn spawn(mut self) -> Result<HostHandle, HostError>
    where
        T: 'static,
    {
        let events = self.events_rx.take();
        let stop = self.stop.clone();
        let status = self.status.clone();
        let session_id = self.session_id;
        let thread = thread::Builder::new()
            .name(format!("neon-host-{session_id}"))
            .spawn(move || self.start())
            .map_err(|e| fail(HostError::Spawn(e)))?;
        Ok(HostHandle {
            session_id,
            stop,
            status,
            events,
            thread: Some(thread),
        })
    }

    /// One non-blocking loop pass: drain the transport, then evict silent
    /// members. Returns how many datagrams were read.
    pub fn process_packets(&mut self) -> Result<usize, HostError> {
        let mut buf = std::mem::take(&mut self.recv_buf);
        let drained = self.drain_transport(&mut buf);
        self.recv_buf = buf;
        let result = drained.and_then(|count| self.evict_silent().map(|()| count));
        result.map_err(|e| {
            warn!(session_id = %self.session_id, error = %e, "host transport failed");
            self.errors.record(HostError::TransportFatal(e))
        })
    }

    fn drain_transport(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut count = 0;
        while let Some((len, from)) = self.transport.try_recv_from(buf)? {
            count += 1;
            self.handle_datagram(&buf[..len], from)?;
        }
        Ok(count)
    }

    /// Send an application packet from the host to one member.
    pub fn send_packet(
        &mut self,
        destination: ClientId,
        packet_type: u8,
        payload: &[u8],
    ) -> Result<(), SendError> {
        if packet_type < FIRST_APPLICATION_TYPE {
            return Err(self.errors.record(SendError::ReservedType(packet_type)));
        }
        if !self.roster.contains(destination) {
            return Err(self
                .errors
                .record(SendError::UnknownDestination(destination.0)));
        }
        let sequence = self.bump_sequence();
        let frame = Frame::new(packet_type, ClientId::HOST, destination, payload.to_vec())
            .with_sequence(sequence);
        let max = usize::from(self.config.max_packet_size);
        if frame.encoded_len() > max {
            return Err(self.errors.record(SendError::Oversize {
                len: frame.encoded_len(),
                max,
            }));
        }
        self.transport
            .send_to(&frame.encode(), self.relay_addr)
            .map_err(|e| self.errors.record(SendError::Transport(e)))
    }

    /// Remove every member, telling each one why.
    pub fn disconnect_all(&mut self, reason: &str) -> Result<(), HostError> {
        let members = self.roster.clear();
        self.sync_count();
        for member in members {
            let notice = Message::DisconnectNotice(DisconnectNotice {
                reason: reason.to_owned(),
            });
            if let Err(e) = self.send(notice, member.client_id) {
                return Err(self.errors.record(HostError::TransportFatal(e)));
            }
            info!(session_id = %self.session_id, client_id = %member.client_id, name = %member.name, "member disconnected by host");
        }
        Ok(())
    }

    // -- Inbound ------------------------------------------------------------

    fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> io::Result<()> {
        if from != self.relay_addr {
            debug!(session_id = %self.session_id, %from, "ignoring datagram from outside the relay");
            return Ok(());
        }
        let decoded = Frame::decode(bytes, usize::from(self.config.max_packet_size)).and_then(
            |frame| {
                let message = Message::from_frame(&frame)?;
                Ok((frame, message))
            },
        );
        let (frame, message) = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                let reason = malformed(from, &err);
                warn!(session_id = %self.session_id, "{reason}");
                self.errors.note(reason.clone());
                self.emit(HostEvent::MalformedPacket { reason });
                return Ok(());
            }
        };

        let now = self.clock.now_millis();
        let from_member = self.roster.touch(frame.source, now);

        match message {
            Message::ConnectRequest(request) => self.on_connect_request(request, now)?,
            Message::Ping(ping) if from_member => self.on_ping(&frame, ping, now)?,
            Message::DisconnectNotice(notice) if from_member => {
                if let Some(member) = self.roster.remove(frame.source) {
                    self.sync_count();
                    info!(
                        session_id = %self.session_id,
                        client_id = %member.client_id,
                        name = %member.name,
                        reason = %notice.reason,
                        "client disconnected"
                    );
                    self.emit(HostEvent::ClientDisconnected {
                        client_id: member.client_id,
                        name: member.name,
                    });
                }
            }
            Message::Application { packet_type, data } if from_member => {
                self.on_application(&frame, packet_type, data)?;
            }
            // Registration echo and client confirmations are for the relay.
            Message::ConnectAccept(_) => {
                debug!(session_id = %self.session_id, source = %frame.source, "ignoring relayed accept");
            }
            other if from_member => {
                let packet_type = other.packet_type();
                debug!(session_id = %self.session_id, packet_type, from = %frame.source, "unhandled packet");
                self.emit(HostEvent::UnhandledPacket {
                    packet_type,
                    from: frame.source,
                });
            }
            other => {
                debug!(
                    session_id = %self.session_id,
                    packet_type = other.packet_type(),
                    source = %frame.source,
                    "ignoring packet from non-member"
                );
            }
        }
        Ok(())
    }

    fn on_connect_request(&mut self, request: ConnectRequest, now: u64) -> io::Result<()> {
        if request.target_session_id != self.session_id {
            debug!(
                session_id = %self.session_id,
                target = %request.target_session_id,
                "connect request for another session"
            );
            return Ok(());
        }

        match self.roster.admit(&request, &self.config, now) {
            Ok(client_id) => {
                self.sync_count();
                info!(session_id = %self.session_id, %client_id, name = %request.desired_name, "client admitted");
                self.send(
                    Message::ConnectAccept(ConnectAccept {
                        assigned_client_id: client_id,
                        session_id: self.session_id,
                    }),
                    client_id,
                )?;
                self.send(Message::SessionConfig(self.session_config), client_id)?;
                self.send(
                    Message::PacketTypeRegistry(self.config.registry.clone()),
                    client_id,
                )?;
                self.emit(HostEvent::ClientConnected {
                    client_id,
                    name: request.desired_name,
                    session_id: self.session_id,
                });
            }
            Err(denied) => {
                let reason = denied.to_string();
                info!(session_id = %self.session_id, name = %request.desired_name, %reason, "connect denied");
                self.send(
                    Message::ConnectDeny(ConnectDeny {
                        reason: reason.clone(),
                    }),
                    ClientId::UNASSIGNED,
                )?;
                self.emit(HostEvent::ClientDenied {
                    name: request.desired_name,
                    reason,
                });
            }
        }
        Ok(())
    }

    fn on_ping(&mut self, frame: &Frame, ping: Ping, now: u64) -> io::Result<()> {
        let pong = Message::Pong(Pong {
            original_timestamp: ping.timestamp,
            responder_timestamp: now,
        })
        .into_frame(ClientId::HOST, frame.source)
        .with_sequence(frame.sequence);
        self.transport.send_to(&pong.encode(), self.relay_addr)?;
        self.emit(HostEvent::PingReceived { from: frame.source });
        Ok(())
    }

    fn on_application(&mut self, frame: &Frame, packet_type: u8, data: Vec<u8>) -> io::Result<()> {
        let destination = frame.destination;
        if destination.is_host() || destination.is_unassigned() {
            if self.config.registry.contains(packet_type) {
                self.emit(HostEvent::Packet {
                    packet_type,
                    from: frame.source,
                    payload: data,
                });
            } else {
                debug!(session_id = %self.session_id, packet_type, from = %frame.source, "unhandled packet");
                self.emit(HostEvent::UnhandledPacket {
                    packet_type,
                    from: frame.source,
                });
            }
        } else if self.roster.contains(destination) {
            debug!(session_id = %self.session_id, packet_type, from = %frame.source, to = %destination, "routing");
            self.transport.send_to(&frame.encode(), self.relay_addr)?;
        } else {
            warn!(session_id = %self.session_id, packet_type, from = %frame.source, to = %destination, "dropping packet for unknown destination");
            self.emit(HostEvent::WrongDestination {
                from: frame.source,
                destination,
                packet_type,
            });
        }
        Ok(())
    }

    fn evict_silent(&mut self) -> io::Result<()> {
        let now = self.clock.now_millis();
        let evicted = self.roster.evict_silent(now, self.config.member_timeout_ms);
        if evicted.is_empty() {
            return Ok(());
        }
        self.sync_count();
        for member in evicted {
            info!(session_id = %self.session_id, client_id = %member.client_id, name = %member.name, "client timed out");
            self.send(
                Message::DisconnectNotice(DisconnectNotice {
                    reason: "timed out".into(),
                }),
                member.client_id,
            )?;
            self.emit(HostEvent::ClientTimedOut {
                client_id: member.client_id,
                name: member.name,
            });
        }
        Ok(())
    }

    // -- Helpers ------------------------------------------------------------

    fn send(&mut self, message: Message, destination: ClientId) -> io::Result<()> {
        let sequence = self.bump_sequence();
        let frame = message
            .into_frame(ClientId::HOST, destination)
            .with_sequence(sequence);
        self.transport.send_to(&frame.encode(), self.relay_addr)
    }

    fn emit(&self, event: HostEvent) {
        // Nobody listening is not an error.
        let _ = self.events_tx.send(event);
    }

    fn sync_count(&self) {
        self.status
            .client_count
            .store(self.roster.len(), Ordering::SeqCst);
    }

    fn bump_sequence(&mut self) -> u16 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }
}

fn dispatch_all(events: Option<&Receiver<HostEvent>>, observer: &mut dyn HostObserver) -> usize {
    let Some(rx) = events else {
        return 0;
    };
    let mut count = 0;
    for event in rx.try_iter() {
        event.dispatch(observer);
        count += 1;
    }
    count
}

/// Control handle for a host running on its own thread.
pub struct HostHandle {
    session_id: SessionId,
    stop: StopSignal,
    status: HostStatus,
    events: Option<Receiver<HostEvent>>,
    thread: Option<JoinHandle<Result<(), HostError>>>,
}

impl HostHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn client_count(&self) -> usize {
        self.status.client_count()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn status(&self) -> HostStatus {
        self.status.clone()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Whether the loop thread has exited (stopped or failed).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn poll_events(&self) -> Vec<HostEvent> {
        self.events
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }

    pub fn dispatch_events(&self, observer: &mut dyn HostObserver) -> usize {
        dispatch_all(self.events.as_ref(), observer)
    }

    pub fn take_event_receiver(&mut self) -> Option<Receiver<HostEvent>> {
        self.events.take()
    }

    /// Signal the loop to stop and wait for it. Returns the loop's result.
    pub fn stop(mut self) -> Result<(), HostError> {
        self.stop.stop();
        self.join_thread()
    }

    /// Wait for the loop to end on its own (fatal error or an external
    /// stop signal).
    pub fn join(mut self) -> Result<(), HostError> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<(), HostError> {
        match self.thread.take() {
            // The loop recorded its failure on its own thread; copy it to ours.
            Some(thread) => match thread.join() {
                Ok(result) => result.map_err(fail),
                Err(_) => Err(fail(HostError::Panicked)),
            },
            None => Ok(()),
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.stop.stop();
        let _ = self.join_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::diagnostics;
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use neon_protocol::{PROTOCOL_VERSION, PacketTypeEntry};

    const SESSION: SessionId = SessionId(12345);
    const RELAY: &str = "127.0.0.1:7777";

    struct Fixture {
        network: MemoryNetwork,
        relay: MemoryTransport,
        clock: ManualClock,
        host: Host<MemoryTransport>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(HostConfig::default())
        }

        fn with_config(config: HostConfig) -> Self {
            let network = MemoryNetwork::new();
            let relay = network.bind(RELAY.parse().unwrap()).unwrap();
            let clock = ManualClock::new(0);
            let host = Host::with_transport(
                SESSION,
                RELAY,
                config,
                network.bind_any(),
                Arc::new(clock.clone()),
            )
            .unwrap();
            Self {
                network,
                relay,
                clock,
                host,
            }
        }

        fn host_addr(&self) -> SocketAddr {
            self.host.local_addr().unwrap()
        }

        fn to_host(&self, frame: Frame) {
            self.relay.send_to(&frame.encode(), self.host_addr()).unwrap();
        }

        fn request(&self, name: &str, session: SessionId) {
            self.to_host(
                Message::ConnectRequest(ConnectRequest {
                    client_version: PROTOCOL_VERSION,
                    target_session_id: session,
                    game_identifier: 0,
                    desired_name: name.into(),
                })
                .into_frame(ClientId::UNASSIGNED, ClientId::HOST),
            );
        }

        fn relay_frames(&self) -> Vec<Frame> {
            let mut buf = [0u8; 2048];
            let mut frames = Vec::new();
            while let Some((n, _)) = self.relay.try_recv_from(&mut buf).unwrap() {
                frames.push(Frame::decode(&buf[..n], 2048).unwrap());
            }
            frames
        }

        /// Admit `names` in order and clear the resulting frames and events.
        fn admit(&mut self, names: &[&str]) {
            for name in names {
                self.request(name, SESSION);
            }
            self.host.process_packets().unwrap();
            self.relay_frames();
            self.host.poll_events();
        }
    }

    #[test]
    fn registration_announces_session() {
        let mut fx = Fixture::new();
        fx.host.register().unwrap();
        assert!(fx.host.is_registered());
        let frames = fx.relay_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].source, ClientId::HOST);
        assert_eq!(
            Message::from_frame(&frames[0]).unwrap(),
            Message::ConnectAccept(ConnectAccept {
                assigned_client_id: ClientId::HOST,
                session_id: SESSION
            })
        );
    }

    #[test]
    fn registration_fails_without_relay() {
        let network = MemoryNetwork::new();
        let mut host = Host::with_transport(
            SESSION,
            RELAY,
            HostConfig::default(),
            network.bind_any(),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        assert!(matches!(host.start(), Err(HostError::Registration(_))));
        assert!(host.last_error().unwrap().contains("registration"));
        assert!(!host.status().is_running());
    }

    #[test]
    fn admission_sends_accept_config_registry() {
        let mut fx = Fixture::new();
        fx.request("Alice", SESSION);
        assert_eq!(fx.host.process_packets().unwrap(), 1);
        assert_eq!(fx.host.client_count(), 1);
        assert_eq!(fx.host.status().client_count(), 1);

        let frames = fx.relay_frames();
        let messages: Vec<Message> = frames
            .iter()
            .map(|f| Message::from_frame(f).unwrap())
            .collect();
        assert!(frames.iter().all(|f| f.destination == ClientId(1)));
        assert_eq!(
            messages,
            vec![
                Message::ConnectAccept(ConnectAccept {
                    assigned_client_id: ClientId(1),
                    session_id: SESSION
                }),
                Message::SessionConfig(SessionConfig::default()),
                Message::PacketTypeRegistry(PacketTypeRegistry::standard()),
            ]
        );
        assert_eq!(
            fx.host.poll_events(),
            vec![HostEvent::ClientConnected {
                client_id: ClientId(1),
                name: "Alice".into(),
                session_id: SESSION
            }]
        );
    }

    #[test]
    fn duplicate_name_denied() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice"]);
        fx.request("Alice", SESSION);
        fx.host.process_packets().unwrap();

        assert_eq!(fx.host.client_count(), 1);
        let frames = fx.relay_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].destination, ClientId::UNASSIGNED);
        assert_eq!(
            Message::from_frame(&frames[0]).unwrap(),
            Message::ConnectDeny(ConnectDeny {
                reason: "name already in use".into()
            })
        );
        assert_eq!(
            fx.host.poll_events(),
            vec![HostEvent::ClientDenied {
                name: "Alice".into(),
                reason: "name already in use".into()
            }]
        );
    }

    #[test]
    fn empty_name_denied() {
        let mut fx = Fixture::new();
        fx.request("", SESSION);
        fx.host.process_packets().unwrap();
        assert_eq!(fx.host.client_count(), 0);
        assert!(matches!(
            &fx.host.poll_events()[..],
            [HostEvent::ClientDenied { reason, .. }] if reason == "name must not be empty"
        ));
    }

    #[test]
    fn other_session_silently_dropped() {
        let mut fx = Fixture::new();
        fx.request("Alice", SessionId(999));
        fx.host.process_packets().unwrap();
        assert!(fx.relay_frames().is_empty());
        assert!(fx.host.poll_events().is_empty());
        assert_eq!(fx.host.client_count(), 0);
    }

    #[test]
    fn ping_answered_with_echo() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice"]);
        fx.clock.set_millis(500);
        fx.to_host(
            Message::Ping(Ping { timestamp: 480 })
                .into_frame(ClientId(1), ClientId::HOST)
                .with_sequence(42),
        );
        fx.host.process_packets().unwrap();

        let frames = fx.relay_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 42);
        assert_eq!(frames[0].destination, ClientId(1));
        assert_eq!(
            Message::from_frame(&frames[0]).unwrap(),
            Message::Pong(Pong {
                original_timestamp: 480,
                responder_timestamp: 500
            })
        );
        assert_eq!(
            fx.host.poll_events(),
            vec![HostEvent::PingReceived { from: ClientId(1) }]
        );
    }

    #[test]
    fn unknown_type_from_member_is_unhandled() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice"]);
        fx.to_host(Frame::new(99, ClientId(1), ClientId::HOST, vec![]));
        fx.host.process_packets().unwrap();
        assert_eq!(
            fx.host.poll_events(),
            vec![HostEvent::UnhandledPacket {
                packet_type: 99,
                from: ClientId(1)
            }]
        );
        assert_eq!(fx.host.client_count(), 1);
    }

    #[test]
    fn registered_packet_to_host_delivered() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice"]);
        fx.to_host(Frame::new(0x10, ClientId(1), ClientId::HOST, b"move".to_vec()));
        fx.host.process_packets().unwrap();
        assert_eq!(
            fx.host.poll_events(),
            vec![HostEvent::Packet {
                packet_type: 0x10,
                from: ClientId(1),
                payload: b"move".to_vec()
            }]
        );
    }

    #[test]
    fn packets_between_members_are_routed() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice", "Bob"]);
        let frame = Frame::new(0x10, ClientId(1), ClientId(2), b"hi bob".to_vec()).with_sequence(7);
        fx.to_host(frame.clone());
        fx.host.process_packets().unwrap();
        assert_eq!(fx.relay_frames(), vec![frame]);
        assert!(fx.host.poll_events().is_empty());
    }

    #[test]
    fn unknown_destination_dropped_and_reported() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice"]);
        fx.to_host(Frame::new(0x10, ClientId(1), ClientId(9), vec![]));
        fx.host.process_packets().unwrap();
        assert!(fx.relay_frames().is_empty());
        assert_eq!(
            fx.host.poll_events(),
            vec![HostEvent::WrongDestination {
                from: ClientId(1),
                destination: ClientId(9),
                packet_type: 0x10
            }]
        );
    }

    #[test]
    fn malformed_frame_does_not_stop_batch() {
        let mut fx = Fixture::new();
        let relay = fx.relay.addr();
        fx.network.inject(relay, fx.host_addr(), b"garbage!!").unwrap();
        fx.request("Alice", SESSION);
        assert_eq!(fx.host.process_packets().unwrap(), 2);
        assert_eq!(fx.host.client_count(), 1);
        let events = fx.host.poll_events();
        assert!(matches!(events[0], HostEvent::MalformedPacket { .. }));
        assert!(matches!(events[1], HostEvent::ClientConnected { .. }));
        assert!(fx.host.last_error().unwrap().contains("bad magic"));
    }

    #[test]
    fn silent_member_evicted() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice", "Bob"]);
        fx.clock.set_millis(10_000);
        fx.to_host(
            Message::Ping(Ping { timestamp: 10_000 }).into_frame(ClientId(2), ClientId::HOST),
        );
        fx.host.process_packets().unwrap();
        fx.relay_frames();
        fx.host.poll_events();

        fx.clock.set_millis(15_001);
        fx.host.process_packets().unwrap();
        assert_eq!(fx.host.client_count(), 1);
        assert!(fx.host.members().all(|m| m.name == "Bob"));
        assert_eq!(
            fx.host.poll_events(),
            vec![HostEvent::ClientTimedOut {
                client_id: ClientId(1),
                name: "Alice".into()
            }]
        );
        let frames = fx.relay_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].destination, ClientId(1));
    }

    #[test]
    fn disconnect_notice_removes_member() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice"]);
        fx.to_host(
            Message::DisconnectNotice(DisconnectNotice {
                reason: "bye".into(),
            })
            .into_frame(ClientId(1), ClientId::HOST),
        );
        fx.host.process_packets().unwrap();
        assert_eq!(fx.host.client_count(), 0);
        assert_eq!(
            fx.host.poll_events(),
            vec![HostEvent::ClientDisconnected {
                client_id: ClientId(1),
                name: "Alice".into()
            }]
        );
        // The name is free again.
        fx.request("Alice", SESSION);
        fx.host.process_packets().unwrap();
        assert_eq!(fx.host.client_count(), 1);
    }

    #[test]
    fn transport_failure_is_fatal() {
        let mut fx = Fixture::new();
        let addr = fx.host_addr();
        fx.network.set_faulty(addr, true);
        assert!(matches!(
            fx.host.process_packets(),
            Err(HostError::TransportFatal(_))
        ));
        assert!(diagnostics::last_error().unwrap().contains("fatal transport error"));
    }

    #[test]
    fn start_returns_after_stop_and_notifies_members() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice"]);
        fx.host.stop_signal().stop();
        fx.host.start().unwrap();

        assert_eq!(fx.host.client_count(), 0);
        assert_eq!(fx.host.status().client_count(), 0);
        let frames = fx.relay_frames();
        let types: Vec<u8> = frames.iter().map(|f| f.packet_type).collect();
        // Registration, then the goodbye to Alice.
        assert_eq!(types, vec![0x02, 0x0D]);
        assert_eq!(frames[1].destination, ClientId(1));
    }

    #[test]
    fn spawned_host_stops_cleanly() {
        let fx = Fixture::new();
        let relay = fx.relay;
        let handle = fx.host.spawn().unwrap();
        assert_eq!(handle.session_id(), SESSION);
        // Wait for registration to reach the relay.
        let mut buf = [0u8; 64];
        let mut registered = false;
        for _ in 0..500 {
            if relay.try_recv_from(&mut buf).unwrap().is_some() {
                registered = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(registered);
        assert_eq!(handle.client_count(), 0);
        handle.stop().unwrap();
    }

    #[test]
    fn send_packet_to_member() {
        let mut fx = Fixture::new();
        fx.admit(&["Alice"]);
        assert!(matches!(
            fx.host.send_packet(ClientId(5), 0x10, b"x"),
            Err(SendError::UnknownDestination(5))
        ));
        assert!(matches!(
            fx.host.send_packet(ClientId(1), 0x02, b"x"),
            Err(SendError::ReservedType(0x02))
        ));
        fx.host.send_packet(ClientId(1), 0x10, b"x").unwrap();
        let frames = fx.relay_frames();
        assert_eq!(frames[0].source, ClientId::HOST);
        assert_eq!(frames[0].destination, ClientId(1));
    }

    #[test]
    fn construction_validates() {
        let network = MemoryNetwork::new();
        let bad = HostConfig {
            tick_rate: 0,
            ..HostConfig::default()
        };
        assert!(matches!(
            Host::with_transport(SESSION, RELAY, bad, network.bind_any(), Arc::new(SystemClock)),
            Err(HostError::Config(_))
        ));
        assert!(matches!(
            Host::with_transport(
                SESSION,
                "not an address",
                HostConfig::default(),
                network.bind_any(),
                Arc::new(SystemClock)
            ),
            Err(HostError::InvalidRelayAddress { .. })
        ));
    }

    #[test]
    fn custom_registry_is_sent() {
        let registry = PacketTypeRegistry::from_entries(vec![
            PacketTypeEntry::new(0x20, "Move", "Player movement"),
            PacketTypeEntry::new(0x21, "Chat", "Text chat"),
        ])
        .unwrap();
        let mut fx = Fixture::with_config(HostConfig {
            registry: registry.clone(),
            ..HostConfig::default()
        });
        fx.request("Alice", SESSION);
        fx.host.process_packets().unwrap();
        let last = fx.relay_frames().pop().unwrap();
        assert_eq!(
            Message::from_frame(&last).unwrap(),
            Message::PacketTypeRegistry(registry)
        );
    }
}
