// neon_protocol: wire protocol for the Neon relay session protocol.
//
// This crate defines how session hosts and clients talk to each other
// through a relay: the datagram header, the typed payloads of the core
// packet kinds, and the packet-type registry a host shares with its
// clients. It does no I/O and holds no session state; both engines in
// `neon_session` (and any relay implementation) encode and decode through
// it.
//
// Module overview:
// - `types.rs`:    Endpoint and session id newtypes, reserved ids,
//                  `PROTOCOL_VERSION`.
// - `framing.rs`:  8-byte header, `Frame` encode/decode, `DecodeError`.
// - `message.rs`:  `CorePacketType` ids and the `Message` enum with payload
//                  layouts for each core kind.
// - `registry.rs`: `PacketTypeRegistry`, ordered application packet kinds
//                  with O(1) lookup.
//
// Design decisions:
// - **Binary little-endian layout.** Frames travel as single UDP datagrams
//   and must stay small, so payloads are hand-packed rather than serialized
//   through serde. Serde derives exist only for the types that also appear
//   in configuration files.
// - **Unknown types are not errors.** `Frame::decode` accepts any type id;
//   `Message::decode` maps unassigned core ids to `Message::Unknown` and
//   application ids to opaque `Message::Application`.

pub mod framing;
pub mod message;
pub mod registry;
pub mod types;

pub use framing::{DEFAULT_MAX_PACKET_SIZE, DecodeError, Frame, HEADER_SIZE, MAGIC, decode, encode};
pub use message::{
    ConnectAccept, ConnectDeny, ConnectRequest, CorePacketType, DisconnectNotice,
    FIRST_APPLICATION_TYPE, Message, Ping, Pong, SessionConfig,
};
pub use registry::{PacketTypeEntry, PacketTypeRegistry, RegistryError};
pub use types::{ClientId, PROTOCOL_VERSION, SessionId};

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a message into a full datagram and decode it back through the
    /// same path a receiver uses.
    fn through_the_wire(message: Message, source: ClientId, destination: ClientId) -> (Frame, Message) {
        let bytes = message.into_frame(source, destination).encode();
        let frame = Frame::decode(&bytes, usize::from(DEFAULT_MAX_PACKET_SIZE)).unwrap();
        let decoded = Message::from_frame(&frame).unwrap();
        (frame, decoded)
    }

    #[test]
    fn accept_reaches_assigned_client() {
        let accept = ConnectAccept {
            assigned_client_id: ClientId(1),
            session_id: SessionId(12345),
        };
        let (frame, decoded) =
            through_the_wire(Message::ConnectAccept(accept), ClientId::HOST, ClientId(1));
        assert_eq!(frame.destination, ClientId(1));
        assert_eq!(decoded, Message::ConnectAccept(accept));
    }

    #[test]
    fn session_config_defaults_match_host_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.version, PROTOCOL_VERSION);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.max_packet_size, 1024);
        let (_, decoded) =
            through_the_wire(Message::SessionConfig(config), ClientId::HOST, ClientId(4));
        assert_eq!(decoded, Message::SessionConfig(config));
    }

    #[test]
    fn deny_goes_to_unassigned() {
        let deny = Message::ConnectDeny(ConnectDeny {
            reason: "name already in use".into(),
        });
        let (frame, decoded) = through_the_wire(deny.clone(), ClientId::HOST, ClientId::UNASSIGNED);
        assert!(frame.destination.is_unassigned());
        assert_eq!(decoded, deny);
    }

    #[test]
    fn standard_registry_fits_default_packet_size() {
        let bytes = Message::PacketTypeRegistry(PacketTypeRegistry::standard())
            .into_frame(ClientId::HOST, ClientId(1))
            .encode();
        assert!(bytes.len() <= usize::from(DEFAULT_MAX_PACKET_SIZE));
    }
}
