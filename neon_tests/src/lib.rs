// Test-only relay and session harness for end-to-end tests.
//
// `LoopbackRelay` is a minimal stand-in for the real relay. It implements
// only the relay's side of the wire contract:
// - A host registers by sending `ConnectAccept` from the host id with the
//   host id as the assigned id; the relay binds the host's address to that
//   session.
// - A `ConnectRequest` is forwarded to the named session's host and the
//   sender's address queued as pending (FIFO per session).
// - The host's reply to a pending connect (accept or deny) goes to the
//   oldest pending address. An accept also binds that address to the
//   assigned id.
// - A client's confirmation accept (source = its new id) rebinds its
//   address, and is not forwarded.
// - Everything else is routed by destination id within the sender's
//   session. Undeliverable frames are counted and dropped.
//
// It is generic over `Transport`, so the same relay runs over
// `MemoryNetwork` for deterministic tests and over UDP for the smoke test.
//
// `TestSession` wires a memory network, a relay, a `ManualClock`, and one
// host together and exposes `round()`, which moves traffic one full hop
// cycle: clients -> relay -> host -> relay -> clients.
//
// See also: `tests/` for the scenarios.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use neon_protocol::{ClientId, CorePacketType, Frame, Message, SessionId};
use neon_session::transport::RECV_BUFFER_SIZE;
use neon_session::{
    Client, ClientConfig, Host, HostConfig, ManualClock, MemoryNetwork, MemoryTransport,
    Transport,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Relay address used by `TestSession`.
pub const RELAY_ADDR: &str = "127.0.0.1:7777";

/// Default timeout for blocking waits in UDP tests.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between polls in blocking waits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Install a `tracing` subscriber for test output. Safe to call from every
/// test; only the first call installs. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("neon_session=debug,neon_tests=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
struct RelaySession {
    endpoints: HashMap<ClientId, SocketAddr>,
    pending: VecDeque<SocketAddr>,
}

/// In-process relay test double.
pub struct LoopbackRelay<T: Transport = MemoryTransport> {
    transport: T,
    sessions: HashMap<SessionId, RelaySession>,
    bindings: HashMap<SocketAddr, SessionId>,
    dropped: usize,
    buf: Vec<u8>,
}

impl<T: Transport> LoopbackRelay<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            sessions: HashMap::new(),
            bindings: HashMap::new(),
            dropped: 0,
            buf: vec![0; RECV_BUFFER_SIZE],
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Frames that could not be delivered so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Address the relay has bound to `client_id` in `session_id`.
    pub fn endpoint(&self, session_id: SessionId, client_id: ClientId) -> Option<SocketAddr> {
        self.sessions
            .get(&session_id)
            .and_then(|s| s.endpoints.get(&client_id).copied())
    }

    /// Route everything currently queued at the relay. Returns how many
    /// datagrams were handled (forwarded or consumed).
    pub fn pump(&mut self) -> io::Result<usize> {
        let mut buf = std::mem::take(&mut self.buf);
        let mut handled = 0;
        let result = loop {
            match self.transport.try_recv_from(&mut buf) {
                Ok(Some((len, from))) => match self.route(&buf[..len], from) {
                    Ok(true) => handled += 1,
                    Ok(false) => self.dropped += 1,
                    Err(e) => break Err(e),
                },
                Ok(None) => break Ok(handled),
                Err(e) => break Err(e),
            }
        };
        self.buf = buf;
        result
    }

    fn route(&mut self, bytes: &[u8], from: SocketAddr) -> io::Result<bool> {
        let Ok(frame) = Frame::decode(bytes, RECV_BUFFER_SIZE) else {
            debug!(%from, "relay dropping undecodable datagram");
            return Ok(false);
        };
        match (CorePacketType::from_id(frame.packet_type), Message::from_frame(&frame)) {
            (Some(CorePacketType::ConnectRequest), Ok(Message::ConnectRequest(request))) => {
                let Some(session) = self.sessions.get_mut(&request.target_session_id) else {
                    return Ok(false);
                };
                let Some(&host) = session.endpoints.get(&ClientId::HOST) else {
                    return Ok(false);
                };
                session.pending.push_back(from);
                self.transport.send_to(bytes, host)?;
                Ok(true)
            }
            (Some(CorePacketType::ConnectAccept), Ok(Message::ConnectAccept(accept))) => {
                let session = self.sessions.entry(accept.session_id).or_default();
                if frame.source.is_host() && accept.assigned_client_id.is_host() {
                    debug!(session_id = %accept.session_id, %from, "relay registered host");
                    session.endpoints.insert(ClientId::HOST, from);
                    self.bindings.insert(from, accept.session_id);
                    Ok(true)
                } else if frame.source.is_host() {
                    let Some(client) = session.pending.pop_front() else {
                        return Ok(false);
                    };
                    session.endpoints.insert(accept.assigned_client_id, client);
                    self.bindings.insert(client, accept.session_id);
                    self.transport.send_to(bytes, client)?;
                    Ok(true)
                } else {
                    session.endpoints.insert(frame.source, from);
                    self.bindings.insert(from, accept.session_id);
                    Ok(true)
                }
            }
            (Some(CorePacketType::ConnectDeny), _) if frame.source.is_host() => {
                let client = self
                    .bindings
                    .get(&from)
                    .and_then(|id| self.sessions.get_mut(id))
                    .and_then(|session| session.pending.pop_front());
                match client {
                    Some(client) => {
                        self.transport.send_to(bytes, client)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            _ => {
                let to = self
                    .bindings
                    .get(&from)
                    .and_then(|id| self.sessions.get(id))
                    .and_then(|session| session.endpoints.get(&frame.destination).copied());
                match to {
                    Some(to) => {
                        self.transport.send_to(bytes, to)?;
                        Ok(true)
                    }
                    None => {
                        debug!(%from, destination = %frame.destination, "relay has no route");
                        Ok(false)
                    }
                }
            }
        }
    }
}

/// One host, one relay, and any number of clients on a shared memory
/// network with simulated time.
pub struct TestSession {
    pub network: MemoryNetwork,
    pub relay: LoopbackRelay,
    pub clock: ManualClock,
    pub host: Host<MemoryTransport>,
}

impl TestSession {
    /// Create and register a host for `session_id` with default config.
    pub fn new(session_id: SessionId) -> Self {
        Self::with_config(session_id, HostConfig::default())
    }

    pub fn with_config(session_id: SessionId, config: HostConfig) -> Self {
        init_tracing();
        let network = MemoryNetwork::new();
        let relay_transport = network
            .bind(RELAY_ADDR.parse().expect("relay address"))
            .expect("bind relay");
        let clock = ManualClock::new(1_000);
        let mut host = Host::with_transport(
            session_id,
            RELAY_ADDR,
            config,
            network.bind_any(),
            Arc::new(clock.clone()),
        )
        .expect("create host");
        host.register().expect("register host");
        let mut relay = LoopbackRelay::new(relay_transport);
        relay.pump().expect("relay pump");
        Self {
            network,
            relay,
            clock,
            host,
        }
    }

    /// A client on this network with auto-ping off.
    pub fn client(&self, name: &str) -> Client<MemoryTransport> {
        self.client_with_config(
            name,
            ClientConfig {
                auto_ping: false,
                ..ClientConfig::default()
            },
        )
    }

    pub fn client_with_config(&self, name: &str, config: ClientConfig) -> Client<MemoryTransport> {
        Client::with_transport(
            name,
            config,
            self.network.bind_any(),
            Arc::new(self.clock.clone()),
        )
    }

    /// Relay forwards what clients sent, host takes one pass, relay forwards
    /// the host's output. Clients have not read anything yet.
    pub fn deliver(&mut self) {
        self.relay.pump().expect("relay pump");
        self.host.process_packets().expect("host pass");
        self.relay.pump().expect("relay pump");
    }

    /// Clients send, `deliver()`, clients read, relay forwards whatever the
    /// clients sent in reply. Client results are discarded; tests that care
    /// about them call `deliver()` and `process_packets()` themselves.
    pub fn round(&mut self, clients: &mut [&mut Client<MemoryTransport>]) {
        for client in clients.iter_mut() {
            let _ = client.process_packets();
        }
        self.deliver();
        for client in clients.iter_mut() {
            let _ = client.process_packets();
        }
        self.relay.pump().expect("relay pump");
    }

    /// Connect `client` and run one round.
    pub fn join(&mut self, client: &mut Client<MemoryTransport>, session_id: SessionId) {
        client.connect(session_id, RELAY_ADDR).expect("connect");
        self.round(&mut [client]);
    }
}

/// Poll `f` until it returns true or `POLL_TIMEOUT` passes.
pub fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < POLL_TIMEOUT {
        if f() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    false
}
