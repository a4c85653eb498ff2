// Datagram framing: a fixed 8-byte header followed by a type-specific payload.
//
// Header layout (multi-byte fields little-endian):
//
//   0..2  magic 0x4E45
//   2     wire version
//   3     packet type id
//   4..6  sequence / correlation token
//   6     source endpoint id
//   7     destination endpoint id
//
// This module only knows about the header. It never interprets the payload,
// so a frame with a type id nobody has heard of still decodes cleanly; the
// receiver decides whether it cares (see `message.rs` for the core kinds and
// `registry.rs` for application kinds).
//
// Every datagram is one frame, so there is no length prefix: the payload is
// whatever follows the header. `decode` takes the receiver's maximum packet
// size and refuses anything larger.

use thiserror::Error;

use crate::types::{ClientId, PROTOCOL_VERSION};

/// Leading bytes of every frame ("NE" little-endian).
pub const MAGIC: u16 = 0x4E45;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum frame size used before a session config says otherwise.
pub const DEFAULT_MAX_PACKET_SIZE: u16 = 1024;

/// Why a datagram could not be turned into a frame or a typed message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame truncated: {len} bytes, header needs {}", HEADER_SIZE)]
    Truncated { len: usize },
    #[error("frame oversize: {len} bytes exceeds maximum packet size {max}")]
    Oversize { len: usize, max: usize },
    #[error("bad magic 0x{0:04X}")]
    BadMagic(u16),
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed payload for packet type 0x{packet_type:02X}: {reason}")]
    Malformed {
        packet_type: u8,
        reason: &'static str,
    },
}

/// One decoded datagram: header fields plus the raw payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub packet_type: u8,
    pub sequence: u16,
    pub source: ClientId,
    pub destination: ClientId,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(packet_type: u8, source: ClientId, destination: ClientId, payload: Vec<u8>) -> Self {
        Self {
            packet_type,
            sequence: 0,
            source,
            destination,
            payload,
        }
    }

    pub fn with_sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    /// Size of this frame on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.push(PROTOCOL_VERSION);
        bytes.push(self.packet_type);
        bytes.extend_from_slice(&self.sequence.to_le_bytes());
        bytes.push(self.source.0);
        bytes.push(self.destination.0);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse one datagram. Fails on short input, input longer than
    /// `max_packet_size`, a wrong magic, or a foreign wire version. Unknown
    /// packet types are not an error.
    pub fn decode(bytes: &[u8], max_packet_size: usize) -> Result<Frame, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated { len: bytes.len() });
        }
        if bytes.len() > max_packet_size {
            return Err(DecodeError::Oversize {
                len: bytes.len(),
                max: max_packet_size,
            });
        }
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        if bytes[2] != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(bytes[2]));
        }
        Ok(Frame {
            packet_type: bytes[3],
            sequence: u16::from_le_bytes([bytes[4], bytes[5]]),
            source: ClientId(bytes[6]),
            destination: ClientId(bytes[7]),
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }
}

/// Encode a frame from its parts (sequence 0).
pub fn encode(packet_type: u8, destination: ClientId, source: ClientId, payload: &[u8]) -> Vec<u8> {
    Frame::new(packet_type, source, destination, payload.to_vec()).encode()
}

/// Decode a datagram into `(packet_type, destination, source, payload)`.
pub fn decode(
    bytes: &[u8],
    max_packet_size: usize,
) -> Result<(u8, ClientId, ClientId, Vec<u8>), DecodeError> {
    let frame = Frame::decode(bytes, max_packet_size)?;
    Ok((frame.packet_type, frame.destination, frame.source, frame.payload))
}
