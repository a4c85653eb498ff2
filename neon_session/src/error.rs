// Error types for the session engines, one enum per operation family.
//
// `AdmissionDenied` doubles as the wire text of a `ConnectDeny`: its
// `Display` output is exactly the reason string the denied client receives.

use std::io;

use neon_protocol::{DecodeError, RegistryError};
use thiserror::Error;

/// Failure of `Client::connect`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("client is already connected or connecting")]
    AlreadyConnected,
    #[error("relay {relay} unreachable: {source}")]
    Unreachable {
        relay: String,
        #[source]
        source: io::Error,
    },
}

/// Failure of `Client::process_packets`.
///
/// Per-frame decode failures never abort a batch; they are reported as
/// events and through the diagnostic channel. `Denied` and `ConnectFailed`
/// are returned after the rest of the batch has been processed.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("transport failure: {0}")]
    TransportFailure(#[from] io::Error),
    #[error("connection denied: {0}")]
    Denied(String),
    #[error("connection failed: {0}")]
    ConnectFailed(String),
}

/// Failure to put a frame on the wire.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("packet type 0x{0:02X} is reserved for core protocol packets")]
    ReservedType(u8),
    #[error("frame of {len} bytes exceeds maximum packet size {max}")]
    Oversize { len: usize, max: usize },
    #[error("unknown destination client {0}")]
    UnknownDestination(u8),
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
}

/// Why the host refused a connect request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionDenied {
    #[error("protocol version mismatch")]
    VersionMismatch { expected: u8, got: u8 },
    #[error("game identifier mismatch")]
    GameMismatch { expected: u32, got: u32 },
    #[error("name must not be empty")]
    EmptyName,
    #[error("name too long")]
    NameTooLong { len: usize, max: usize },
    #[error("name already in use")]
    NameInUse,
    #[error("session is full")]
    SessionFull,
}

/// Failure of host construction, registration, or the run loop.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid relay address {relay}: {source}")]
    InvalidRelayAddress {
        relay: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind host socket: {0}")]
    Bind(#[source] io::Error),
    #[error("session registration with relay failed: {0}")]
    Registration(#[source] io::Error),
    #[error("fatal transport error: {0}")]
    TransportFatal(#[source] io::Error),
    #[error("invalid host config: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to spawn host thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("host thread panicked")]
    Panicked,
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("max_packet_size {0} is below the minimum of {}", crate::config::MIN_PACKET_SIZE)]
    PacketSizeTooSmall(u16),
    #[error("tick_rate must be positive")]
    ZeroTickRate,
    #[error("max_clients {0} outside 1..=254")]
    MaxClients(u8),
    #[error("registry needs {needed} bytes on the wire, max_packet_size is {max}")]
    RegistryTooLarge { needed: usize, max: usize },
}

/// A frame that was received but could not be decoded; reported, not fatal.
pub(crate) fn malformed(from: std::net::SocketAddr, err: &DecodeError) -> String {
    format!("dropping malformed frame from {from}: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_reasons_are_wire_text() {
        assert_eq!(AdmissionDenied::NameInUse.to_string(), "name already in use");
        assert_eq!(AdmissionDenied::SessionFull.to_string(), "session is full");
        assert_eq!(
            AdmissionDenied::VersionMismatch {
                expected: 1,
                got: 2
            }
            .to_string(),
            "protocol version mismatch"
        );
        assert_eq!(
            AdmissionDenied::NameTooLong { len: 40, max: 32 }.to_string(),
            "name too long"
        );
    }

    #[test]
    fn unreachable_names_relay() {
        let err = ConnectError::Unreachable {
            relay: "127.0.0.1:1".into(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(err.to_string(), "relay 127.0.0.1:1 unreachable: refused");
    }
}
