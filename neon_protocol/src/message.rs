// Typed payloads for the core packet kinds.
//
// Type ids `0x01..=0x0F` belong to the protocol itself: handshake, session
// config, registry dissemination, heartbeat, and disconnect. Ids from
// `FIRST_APPLICATION_TYPE` upward carry opaque application data whose
// meaning is announced through the packet-type registry. Core ids without
// an assigned kind decode to `Message::Unknown`, which receivers report as
// an unhandled packet rather than a decode failure.
//
// Payload layouts (little-endian):
// - ConnectRequest:  client_version u8, session u32, game id u32, name bytes
// - ConnectAccept:   assigned id u8, session u32
// - ConnectDeny:     reason bytes
// - SessionConfig:   version u8, tick_rate u16, max_packet_size u16
// - Registry:        count u8, then (id u8, len u8, name, len u8, desc)*
// - Ping:            timestamp_ms u64
// - Pong:            original timestamp_ms u64, responder timestamp_ms u64
// - DisconnectNotice: reason bytes (may be empty)
//
// Text fields are UTF-8; anything else is a malformed payload.

use serde::{Deserialize, Serialize};

use crate::framing::{DEFAULT_MAX_PACKET_SIZE, DecodeError, Frame};
use crate::registry::{PacketTypeEntry, PacketTypeRegistry};
use crate::types::{ClientId, PROTOCOL_VERSION, SessionId};

/// First type id available to applications.
pub const FIRST_APPLICATION_TYPE: u8 = 0x10;

/// Type ids owned by the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CorePacketType {
    ConnectRequest = 0x01,
    ConnectAccept = 0x02,
    ConnectDeny = 0x03,
    SessionConfig = 0x04,
    PacketTypeRegistry = 0x05,
    Ping = 0x0B,
    Pong = 0x0C,
    DisconnectNotice = 0x0D,
}

impl CorePacketType {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Self::ConnectRequest),
            0x02 => Some(Self::ConnectAccept),
            0x03 => Some(Self::ConnectDeny),
            0x04 => Some(Self::SessionConfig),
            0x05 => Some(Self::PacketTypeRegistry),
            0x0B => Some(Self::Ping),
            0x0C => Some(Self::Pong),
            0x0D => Some(Self::DisconnectNotice),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

/// Join request sent by a client, forwarded by the relay to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    pub client_version: u8,
    pub target_session_id: SessionId,
    pub game_identifier: u32,
    pub desired_name: String,
}

/// Admission reply. Also used by the host to register its session with the
/// relay, and by a freshly admitted client to bind its address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectAccept {
    pub assigned_client_id: ClientId,
    pub session_id: SessionId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectDeny {
    pub reason: String,
}

/// Session parameters fixed at host creation and sent to every client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub version: u8,
    /// Simulation tick rate in Hz.
    pub tick_rate: u16,
    /// Largest frame, header included, that peers may send.
    pub max_packet_size: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            tick_rate: 60,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ping {
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pong {
    /// Timestamp copied from the ping being answered.
    pub original_timestamp: u64,
    /// Responder's clock when it answered.
    pub responder_timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectNotice {
    pub reason: String,
}

/// A frame payload interpreted according to its type id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    ConnectRequest(ConnectRequest),
    ConnectAccept(ConnectAccept),
    ConnectDeny(ConnectDeny),
    SessionConfig(SessionConfig),
    PacketTypeRegistry(PacketTypeRegistry),
    Ping(Ping),
    Pong(Pong),
    DisconnectNotice(DisconnectNotice),
    /// Application data (`0x10..=0xFF`), uninterpreted.
    Application { packet_type: u8, data: Vec<u8> },
    /// A core-range id with no assigned kind.
    Unknown { packet_type: u8 },
}

impl Message {
    pub fn packet_type(&self) -> u8 {
        match self {
            Message::ConnectRequest(_) => CorePacketType::ConnectRequest.id(),
            Message::ConnectAccept(_) => CorePacketType::ConnectAccept.id(),
            Message::ConnectDeny(_) => CorePacketType::ConnectDeny.id(),
            Message::SessionConfig(_) => CorePacketType::SessionConfig.id(),
            Message::PacketTypeRegistry(_) => CorePacketType::PacketTypeRegistry.id(),
            Message::Ping(_) => CorePacketType::Ping.id(),
            Message::Pong(_) => CorePacketType::Pong.id(),
            Message::DisconnectNotice(_) => CorePacketType::DisconnectNotice.id(),
            Message::Application { packet_type, .. } | Message::Unknown { packet_type } => {
                *packet_type
            }
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Message::ConnectRequest(req) => {
                let mut bytes = vec![req.client_version];
                bytes.extend_from_slice(&req.target_session_id.0.to_le_bytes());
                bytes.extend_from_slice(&req.game_identifier.to_le_bytes());
                bytes.extend_from_slice(req.desired_name.as_bytes());
                bytes
            }
            Message::ConnectAccept(accept) => {
                let mut bytes = vec![accept.assigned_client_id.0];
                bytes.extend_from_slice(&accept.session_id.0.to_le_bytes());
                bytes
            }
            Message::ConnectDeny(deny) => deny.reason.as_bytes().to_vec(),
            Message::SessionConfig(config) => {
                let mut bytes = vec![config.version];
                bytes.extend_from_slice(&config.tick_rate.to_le_bytes());
                bytes.extend_from_slice(&config.max_packet_size.to_le_bytes());
                bytes
            }
            Message::PacketTypeRegistry(registry) => {
                // Lengths fit in a byte: `PacketTypeRegistry` enforces it.
                #[expect(clippy::cast_possible_truncation)]
                let count = registry.len() as u8;
                let mut bytes = vec![count];
                for entry in registry.iter() {
                    #[expect(clippy::cast_possible_truncation)]
                    let (name_len, description_len) =
                        (entry.name.len() as u8, entry.description.len() as u8);
                    bytes.push(entry.packet_id);
                    bytes.push(name_len);
                    bytes.extend_from_slice(entry.name.as_bytes());
                    bytes.push(description_len);
                    bytes.extend_from_slice(entry.description.as_bytes());
                }
                bytes
            }
            Message::Ping(ping) => ping.timestamp.to_le_bytes().to_vec(),
            Message::Pong(pong) => {
                let mut bytes = pong.original_timestamp.to_le_bytes().to_vec();
                bytes.extend_from_slice(&pong.responder_timestamp.to_le_bytes());
                bytes
            }
            Message::DisconnectNotice(notice) => notice.reason.as_bytes().to_vec(),
            Message::Application { data, .. } => data.clone(),
            Message::Unknown { .. } => Vec::new(),
        }
    }

    /// Interpret `payload` as the kind named by `packet_type`.
    pub fn decode(packet_type: u8, payload: &[u8]) -> Result<Message, DecodeError> {
        if packet_type >= FIRST_APPLICATION_TYPE {
            return Ok(Message::Application {
                packet_type,
                data: payload.to_vec(),
            });
        }
        let Some(kind) = CorePacketType::from_id(packet_type) else {
            return Ok(Message::Unknown { packet_type });
        };
        let mut reader = PayloadReader::new(packet_type, payload);
        let message = match kind {
            CorePacketType::ConnectRequest => {
                let client_version = reader.u8("connect request too short")?;
                let target_session_id = SessionId(reader.u32("connect request too short")?);
                let game_identifier = reader.u32("connect request too short")?;
                let desired_name = reader.rest_utf8("name is not UTF-8")?;
                Message::ConnectRequest(ConnectRequest {
                    client_version,
                    target_session_id,
                    game_identifier,
                    desired_name,
                })
            }
            CorePacketType::ConnectAccept => {
                let assigned_client_id = ClientId(reader.u8("connect accept too short")?);
                let session_id = SessionId(reader.u32("connect accept too short")?);
                Message::ConnectAccept(ConnectAccept {
                    assigned_client_id,
                    session_id,
                })
            }
            CorePacketType::ConnectDeny => Message::ConnectDeny(ConnectDeny {
                reason: reader.rest_utf8("deny reason is not UTF-8")?,
            }),
            CorePacketType::SessionConfig => {
                let version = reader.u8("session config too short")?;
                let tick_rate = reader.u16("session config too short")?;
                let max_packet_size = reader.u16("session config too short")?;
                Message::SessionConfig(SessionConfig {
                    version,
                    tick_rate,
                    max_packet_size,
                })
            }
            CorePacketType::PacketTypeRegistry => {
                let count = reader.u8("registry missing entry count")?;
                let mut entries = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let packet_id = reader.u8("registry entry truncated")?;
                    let name = reader.short_utf8("registry entry truncated")?;
                    let description = reader.short_utf8("registry entry truncated")?;
                    entries.push(PacketTypeEntry {
                        packet_id,
                        name,
                        description,
                    });
                }
                reader.finish("trailing bytes after registry")?;
                let registry = PacketTypeRegistry::from_entries(entries)
                    .map_err(|_| reader.malformed("registry entries invalid"))?;
                Message::PacketTypeRegistry(registry)
            }
            CorePacketType::Ping => Message::Ping(Ping {
                timestamp: reader.u64("ping too short")?,
            }),
            CorePacketType::Pong => {
                let original_timestamp = reader.u64("pong too short")?;
                let responder_timestamp = reader.u64("pong too short")?;
                Message::Pong(Pong {
                    original_timestamp,
                    responder_timestamp,
                })
            }
            CorePacketType::DisconnectNotice => Message::DisconnectNotice(DisconnectNotice {
                reason: reader.rest_utf8("disconnect reason is not UTF-8")?,
            }),
        };
        Ok(message)
    }

    /// Wrap this message in a frame addressed `source -> destination`.
    pub fn into_frame(self, source: ClientId, destination: ClientId) -> Frame {
        Frame::new(self.packet_type(), source, destination, self.encode_payload())
    }

    pub fn from_frame(frame: &Frame) -> Result<Message, DecodeError> {
        Message::decode(frame.packet_type, &frame.payload)
    }
}

/// Bounds-checked cursor over a payload. Every read names the failure it
/// reports so the error says which field ran out.
struct PayloadReader<'a> {
    packet_type: u8,
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(packet_type: u8, data: &'a [u8]) -> Self {
        Self {
            packet_type,
            data,
            pos: 0,
        }
    }

    fn malformed(&self, reason: &'static str) -> DecodeError {
        DecodeError::Malformed {
            packet_type: self.packet_type,
            reason,
        }
    }

    fn take(&mut self, n: usize, reason: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.malformed(reason))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| self.malformed(reason))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, reason: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, reason)?[0])
    }

    fn u16(&mut self, reason: &'static str) -> Result<u16, DecodeError> {
        let b = self.take(2, reason)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, reason: &'static str) -> Result<u32, DecodeError> {
        let b = self.take(4, reason)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, reason: &'static str) -> Result<u64, DecodeError> {
        let b = self.take(8, reason)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// One-byte length followed by that many UTF-8 bytes.
    fn short_utf8(&mut self, reason: &'static str) -> Result<String, DecodeError> {
        let len = self.u8(reason)?;
        let bytes = self.take(usize::from(len), reason)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.malformed("registry text is not UTF-8"))
    }

    /// Everything left in the payload, as UTF-8.
    fn rest_utf8(&mut self, reason: &'static str) -> Result<String, DecodeError> {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        String::from_utf8(rest.to_vec()).map_err(|_| self.malformed(reason))
    }

    fn finish(&self, reason: &'static str) -> Result<(), DecodeError> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(self.malformed(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MAX_TEXT_LEN;

    fn reencode(message: &Message) -> Message {
        Message::decode(message.packet_type(), &message.encode_payload()).unwrap()
    }

    #[test]
    fn connect_request_carries_name_and_game() {
        let msg = Message::ConnectRequest(ConnectRequest {
            client_version: 1,
            target_session_id: SessionId(12345),
            game_identifier: 0xDEAD_BEEF,
            desired_name: "Alice".into(),
        });
        let payload = msg.encode_payload();
        assert_eq!(payload.len(), 9 + 5);
        assert_eq!(&payload[9..], b"Alice");
        assert_eq!(reencode(&msg), msg);
    }

    #[test]
    fn connect_request_with_empty_name_decodes() {
        let msg = Message::ConnectRequest(ConnectRequest {
            client_version: 1,
            target_session_id: SessionId(1),
            game_identifier: 0,
            desired_name: String::new(),
        });
        assert_eq!(reencode(&msg), msg);
    }

    #[test]
    fn short_connect_request_is_malformed() {
        let err = Message::decode(0x01, &[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Malformed {
                packet_type: 0x01,
                reason: "connect request too short"
            }
        );
    }

    #[test]
    fn non_utf8_name_is_malformed() {
        let mut payload = vec![1, 0, 0, 0, 0, 0, 0, 0, 0];
        payload.extend_from_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            Message::decode(0x01, &payload),
            Err(DecodeError::Malformed { packet_type: 0x01, .. })
        ));
    }

    #[test]
    fn pong_carries_both_timestamps() {
        let msg = Message::Pong(Pong {
            original_timestamp: 1_000,
            responder_timestamp: 1_017,
        });
        assert_eq!(msg.encode_payload().len(), 16);
        assert_eq!(reencode(&msg), msg);
        assert!(Message::decode(0x0C, &[0; 8]).is_err());
    }

    #[test]
    fn ping_too_short_is_malformed() {
        assert!(matches!(
            Message::decode(0x0B, &[1, 2, 3]),
            Err(DecodeError::Malformed { packet_type: 0x0B, .. })
        ));
    }

    #[test]
    fn registry_preserves_order_and_text() {
        let registry = PacketTypeRegistry::from_entries(vec![
            PacketTypeEntry::new(0x21, "Move", "Player movement"),
            PacketTypeEntry::new(0x10, "GamePacket", "Application-defined packet"),
        ])
        .unwrap();
        let msg = Message::PacketTypeRegistry(registry.clone());
        match reencode(&msg) {
            Message::PacketTypeRegistry(decoded) => assert_eq!(decoded, registry),
            other => panic!("expected registry, got {other:?}"),
        }
    }

    #[test]
    fn full_registry_with_longest_text_keeps_length_bytes() {
        let mut entries: Vec<_> = (0x11..=0xFF)
            .map(|id| PacketTypeEntry::new(id, "n", ""))
            .collect();
        entries.insert(
            0,
            PacketTypeEntry::new(0x10, "a".repeat(MAX_TEXT_LEN), "b".repeat(MAX_TEXT_LEN)),
        );
        let registry = PacketTypeRegistry::from_entries(entries).unwrap();
        let msg = Message::PacketTypeRegistry(registry);
        let payload = msg.encode_payload();
        assert_eq!(payload[0], 240);
        assert_eq!(payload[1], 0x10);
        assert_eq!(payload[2], 255);
        assert_eq!(payload[3 + MAX_TEXT_LEN], 255);
        assert_eq!(reencode(&msg), msg);
    }

    #[test]
    fn empty_registry_is_one_byte() {
        let msg = Message::PacketTypeRegistry(PacketTypeRegistry::empty());
        assert_eq!(msg.encode_payload(), vec![0]);
        assert_eq!(reencode(&msg), msg);
    }

    #[test]
    fn registry_with_overlong_count_is_malformed() {
        // Claims two entries, carries one.
        let payload = [2, 0x10, 1, b'A', 0];
        assert!(matches!(
            Message::decode(0x05, &payload),
            Err(DecodeError::Malformed { packet_type: 0x05, .. })
        ));
    }

    #[test]
    fn registry_with_name_running_past_end_is_malformed() {
        let payload = [1, 0x10, 200, b'A'];
        assert!(Message::decode(0x05, &payload).is_err());
    }

    #[test]
    fn application_types_pass_through() {
        let msg = Message::decode(99, b"payload").unwrap();
        assert_eq!(
            msg,
            Message::Application {
                packet_type: 99,
                data: b"payload".to_vec()
            }
        );
        assert_eq!(msg.packet_type(), 99);
    }

    #[test]
    fn unassigned_core_ids_are_unknown() {
        for id in [0x00, 0x06, 0x0A, 0x0E, 0x0F] {
            assert_eq!(
                Message::decode(id, &[1, 2, 3]).unwrap(),
                Message::Unknown { packet_type: id }
            );
        }
    }

    #[test]
    fn frame_wrapping_sets_header() {
        let frame = Message::Ping(Ping { timestamp: 5 }).into_frame(ClientId(2), ClientId::HOST);
        assert_eq!(frame.packet_type, 0x0B);
        assert_eq!(frame.source, ClientId(2));
        assert_eq!(frame.destination, ClientId::HOST);
        assert_eq!(
            Message::from_frame(&frame).unwrap(),
            Message::Ping(Ping { timestamp: 5 })
        );
    }
}
