// Datagram transport seam for the session engines.
//
// Both engines talk to the relay through `Transport`: a non-blocking
// send/receive pair over `SocketAddr`. Two implementations live here:
//
// - `UdpTransport` wraps a std `UdpSocket` in non-blocking mode. This is
//   what `Client::new` and `Host::new` use.
// - `MemoryTransport` is an endpoint on a `MemoryNetwork`, an in-process
//   datagram hub. Each bound address owns a FIFO queue; `send_to` appends to
//   the destination's queue. Sending to an address nobody has bound fails
//   with `ConnectionRefused`, which is how tests exercise the unreachable
//   relay path. An address can be marked faulty to make its own sends and
//   receives fail, for exercising fatal transport errors.
//
// Receiving never blocks: "nothing available" is `Ok(None)`, matching the
// `WouldBlock` folding in a polling loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Largest datagram either engine will read in one call.
pub const RECV_BUFFER_SIZE: usize = 65_536;

/// Non-blocking datagram endpoint.
pub trait Transport: Send {
    fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<()>;

    /// Receive one datagram if one is waiting. `Ok(None)` means nothing is
    /// available right now. A datagram larger than `buf` is truncated.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// UDP socket in non-blocking mode.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        let sent = self.socket.send_to(bytes, addr)?;
        if sent != bytes.len() {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                format!("short datagram write: {sent} of {} bytes", bytes.len()),
            ));
        }
        Ok(())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, from))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            // An ICMP port-unreachable for an earlier send surfaces here on
            // some platforms; it says nothing about this socket.
            Err(e) if e.kind() == ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

// ---------------------------------------------------------------------------
// In-memory network
// ---------------------------------------------------------------------------

/// First port handed out by `MemoryNetwork::bind_any`.
const FIRST_EPHEMERAL_PORT: u16 = 40_000;

#[derive(Debug)]
struct Datagram {
    from: SocketAddr,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct NetworkState {
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    faulty: HashSet<SocketAddr>,
    next_port: u16,
}

/// In-process datagram hub. Cloning shares the same network.
#[derive(Clone, Debug)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                queues: HashMap::new(),
                faulty: HashSet::new(),
                next_port: FIRST_EPHEMERAL_PORT,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind an endpoint at a fixed address.
    pub fn bind(&self, addr: SocketAddr) -> io::Result<MemoryTransport> {
        let mut state = self.lock();
        if state.queues.contains_key(&addr) {
            return Err(io::Error::new(
                ErrorKind::AddrInUse,
                format!("{addr} already bound"),
            ));
        }
        state.queues.insert(addr, VecDeque::new());
        Ok(MemoryTransport {
            addr,
            network: self.clone(),
        })
    }

    /// Bind an endpoint at the next free loopback port.
    pub fn bind_any(&self) -> MemoryTransport {
        let mut state = self.lock();
        let addr = loop {
            let port = state.next_port;
            state.next_port = state.next_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
            let candidate = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
            if !state.queues.contains_key(&candidate) {
                break candidate;
            }
        };
        state.queues.insert(addr, VecDeque::new());
        MemoryTransport {
            addr,
            network: self.clone(),
        }
    }

    /// Deliver raw bytes to `to` as if `from` had sent them. Used by tests
    /// to inject malformed datagrams.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        self.deliver(from, to, bytes)
    }

    /// Datagrams waiting at `addr`.
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.lock().queues.get(&addr).map_or(0, VecDeque::len)
    }

    /// Make every send and receive on `addr` fail with `BrokenPipe` (or
    /// restore it).
    pub fn set_faulty(&self, addr: SocketAddr, faulty: bool) {
        let mut state = self.lock();
        if faulty {
            state.faulty.insert(addr);
        } else {
            state.faulty.remove(&addr);
        }
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.faulty.contains(&from) {
            return Err(broken(from));
        }
        match state.queues.get_mut(&to) {
            Some(queue) => {
                queue.push_back(Datagram {
                    from,
                    bytes: bytes.to_vec(),
                });
                Ok(())
            }
            None => Err(io::Error::new(
                ErrorKind::ConnectionRefused,
                format!("no endpoint bound at {to}"),
            )),
        }
    }

    fn take(&self, at: SocketAddr) -> io::Result<Option<Datagram>> {
        let mut state = self.lock();
        if state.faulty.contains(&at) {
            return Err(broken(at));
        }
        Ok(state.queues.get_mut(&at).and_then(VecDeque::pop_front))
    }

    fn unbind(&self, addr: SocketAddr) {
        let mut state = self.lock();
        state.queues.remove(&addr);
        state.faulty.remove(&addr);
    }
}

fn broken(addr: SocketAddr) -> io::Error {
    io::Error::new(ErrorKind::BrokenPipe, format!("endpoint {addr} is faulty"))
}

/// One bound endpoint on a `MemoryNetwork`. Dropping it unbinds the address.
#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<()> {
        self.network.deliver(self.addr, addr, bytes)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(self.network.take(self.addr)?.map(|datagram| {
            let n = datagram.bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&datagram.bytes[..n]);
            (n, datagram.from)
        }))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.unbind(self.addr);
    }
}
