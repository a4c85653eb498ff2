// Events raised by the session engines.
//
// Each engine turns what it sees on the wire into tagged event values. The
// owner either drains them (`Client::drain_events`, `HostHandle::poll_events`)
// or installs an observer, whose methods are called once per event at the
// end of the `process_packets` call that produced it. Observer methods all
// default to doing nothing, so an observer implements only what it cares
// about.
//
// The host's run loop never calls observers itself: its events go through a
// channel and are dispatched on the receiving side, so a misbehaving
// observer cannot stall the loop.

use neon_protocol::{ClientId, PacketTypeRegistry, SessionConfig, SessionId};

/// Something the client engine observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Admission confirmed; the client is now `Connected`.
    Connected {
        client_id: ClientId,
        session_id: SessionId,
    },
    /// The host refused the connect request.
    Denied { reason: String },
    /// The connect attempt ended without admission (timeout, mismatched
    /// session in the accept).
    ConnectFailed { reason: String },
    /// A pong matched the outstanding ping.
    Pong { rtt_ms: u64, original_timestamp: u64 },
    SessionConfig(SessionConfig),
    Registry(PacketTypeRegistry),
    /// A registered application packet addressed to this client.
    Packet {
        packet_type: u8,
        from: ClientId,
        payload: Vec<u8>,
    },
    /// A packet whose type this client does not interpret.
    UnhandledPacket { packet_type: u8, from: ClientId },
    /// A packet addressed to some other endpoint reached this client.
    WrongDestination {
        own_id: ClientId,
        destination: ClientId,
        packet_type: u8,
    },
    /// The host ended the session (or dropped this client).
    HostDisconnected { reason: String },
    /// A datagram that could not be decoded was dropped.
    MalformedPacket { reason: String },
}

impl ClientEvent {
    /// Call the matching observer method.
    pub fn dispatch(self, observer: &mut dyn ClientObserver) {
        match self {
            ClientEvent::Connected {
                client_id,
                session_id,
            } => observer.on_connected(client_id, session_id),
            ClientEvent::Denied { reason } => observer.on_denied(&reason),
            ClientEvent::ConnectFailed { reason } => observer.on_connect_failed(&reason),
            ClientEvent::Pong {
                rtt_ms,
                original_timestamp,
            } => observer.on_pong(rtt_ms, original_timestamp),
            ClientEvent::SessionConfig(config) => observer.on_session_config(&config),
            ClientEvent::Registry(registry) => observer.on_registry(&registry),
            ClientEvent::Packet {
                packet_type,
                from,
                payload,
            } => observer.on_packet(packet_type, from, &payload),
            ClientEvent::UnhandledPacket { packet_type, from } => {
                observer.on_unhandled_packet(packet_type, from)
            }
            ClientEvent::WrongDestination {
                own_id,
                destination,
                packet_type,
            } => observer.on_wrong_destination(own_id, destination, packet_type),
            ClientEvent::HostDisconnected { reason } => observer.on_host_disconnected(&reason),
            ClientEvent::MalformedPacket { reason } => observer.on_malformed_packet(&reason),
        }
    }
}

/// Observer for client events. One method per event kind.
#[allow(unused_variables)]
pub trait ClientObserver {
    fn on_connected(&mut self, client_id: ClientId, session_id: SessionId) {}
    fn on_denied(&mut self, reason: &str) {}
    fn on_connect_failed(&mut self, reason: &str) {}
    fn on_pong(&mut self, rtt_ms: u64, original_timestamp: u64) {}
    fn on_session_config(&mut self, config: &SessionConfig) {}
    fn on_registry(&mut self, registry: &PacketTypeRegistry) {}
    fn on_packet(&mut self, packet_type: u8, from: ClientId, payload: &[u8]) {}
    fn on_unhandled_packet(&mut self, packet_type: u8, from: ClientId) {}
    fn on_wrong_destination(&mut self, own_id: ClientId, destination: ClientId, packet_type: u8) {}
    fn on_host_disconnected(&mut self, reason: &str) {}
    fn on_malformed_packet(&mut self, reason: &str) {}
}

/// Something the host engine observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    ClientConnected {
        client_id: ClientId,
        name: String,
        session_id: SessionId,
    },
    ClientDenied { name: String, reason: String },
    PingReceived { from: ClientId },
    /// A registered application packet addressed to the host.
    Packet {
        packet_type: u8,
        from: ClientId,
        payload: Vec<u8>,
    },
    UnhandledPacket { packet_type: u8, from: ClientId },
    /// A member addressed a packet to an id with no membership; dropped.
    WrongDestination {
        from: ClientId,
        destination: ClientId,
        packet_type: u8,
    },
    ClientDisconnected { client_id: ClientId, name: String },
    /// A member went silent past the liveness timeout and was evicted.
    ClientTimedOut { client_id: ClientId, name: String },
    MalformedPacket { reason: String },
}

impl HostEvent {
    pub fn dispatch(self, observer: &mut dyn HostObserver) {
        match self {
            HostEvent::ClientConnected {
                client_id,
                name,
                session_id,
            } => observer.on_client_connected(client_id, &name, session_id),
            HostEvent::ClientDenied { name, reason } => observer.on_client_denied(&name, &reason),
            HostEvent::PingReceived { from } => observer.on_ping_received(from),
            HostEvent::Packet {
                packet_type,
                from,
                payload,
            } => observer.on_packet(packet_type, from, &payload),
            HostEvent::UnhandledPacket { packet_type, from } => {
                observer.on_unhandled_packet(packet_type, from)
            }
            HostEvent::WrongDestination {
                from,
                destination,
                packet_type,
            } => observer.on_wrong_destination(from, destination, packet_type),
            HostEvent::ClientDisconnected { client_id, name } => {
                observer.on_client_disconnected(client_id, &name)
            }
            HostEvent::ClientTimedOut { client_id, name } => {
                observer.on_client_timed_out(client_id, &name)
            }
            HostEvent::MalformedPacket { reason } => observer.on_malformed_packet(&reason),
        }
    }
}

#[allow(unused_variables)]
pub trait HostObserver {
    fn on_client_connected(&mut self, client_id: ClientId, name: &str, session_id: SessionId) {}
    fn on_client_denied(&mut self, name: &str, reason: &str) {}
    fn on_ping_received(&mut self, from: ClientId) {}
    fn on_packet(&mut self, packet_type: u8, from: ClientId, payload: &[u8]) {}
    fn on_unhandled_packet(&mut self, packet_type: u8, from: ClientId) {}
    fn on_wrong_destination(&mut self, from: ClientId, destination: ClientId, packet_type: u8) {}
    fn on_client_disconnected(&mut self, client_id: ClientId, name: &str) {}
    fn on_client_timed_out(&mut self, client_id: ClientId, name: &str) {}
    fn on_malformed_packet(&mut self, reason: &str) {}
}
