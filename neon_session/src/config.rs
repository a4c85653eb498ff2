// Data-driven engine configuration.
//
// `HostConfig` holds everything a host fixes at creation and broadcasts to
// its clients (protocol version, tick rate, maximum packet size, packet-type
// registry) plus its local policy (capacity, game identifier, liveness
// timeout, loop idle sleep). `ClientConfig` holds the client's handshake
// fields and heartbeat/timeout tuning.
//
// Both load from JSON with `#[serde(default)]`, so a file only names the
// fields it changes. Loading through `from_json` also validates; building a
// config in code and handing it to an engine validates at engine creation.
//
// See also: `host.rs` and `client.rs`, which own a config each, and
// `neon_protocol::SessionConfig`, the wire view of the broadcast fields.

use neon_protocol::{
    ClientId, DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE, Message, PROTOCOL_VERSION, PacketTypeRegistry,
    SessionConfig,
};
use serde::{Deserialize, Serialize};

use crate::diagnostics::fail;
use crate::error::ConfigError;
use crate::heartbeat::DEFAULT_PING_INTERVAL_MS;

/// Smallest maximum packet size a host accepts. Leaves room for the header,
/// a pong, and a short deny reason.
pub const MIN_PACKET_SIZE: u16 = 64;

/// Host configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Version a connecting client must declare.
    pub protocol_version: u8,
    /// Simulation tick rate in Hz, advertised to clients.
    pub tick_rate: u16,
    /// Largest frame either side may send, header included.
    pub max_packet_size: u16,
    /// Member capacity, at most 254 (ids 1..=254).
    pub max_clients: u8,
    /// Required game identifier; 0 accepts any.
    pub game_identifier: u32,
    /// A member silent for longer than this is evicted.
    pub member_timeout_ms: u64,
    /// Sleep between run-loop passes that received nothing.
    pub idle_sleep_ms: u64,
    /// Application packet kinds shared with every admitted client.
    pub registry: PacketTypeRegistry,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            tick_rate: 60,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_clients: ClientId::LAST_CLIENT.0,
            game_identifier: 0,
            member_timeout_ms: 3 * DEFAULT_PING_INTERVAL_MS,
            idle_sleep_ms: 10,
            registry: PacketTypeRegistry::standard(),
        }
    }
}

impl HostConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| fail(ConfigError::Parse(e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check().map_err(fail)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.max_packet_size < MIN_PACKET_SIZE {
            return Err(ConfigError::PacketSizeTooSmall(self.max_packet_size));
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.max_clients == 0 || self.max_clients > ClientId::LAST_CLIENT.0 {
            return Err(ConfigError::MaxClients(self.max_clients));
        }
        let needed =
            HEADER_SIZE + Message::PacketTypeRegistry(self.registry.clone()).encode_payload().len();
        if needed > usize::from(self.max_packet_size) {
            return Err(ConfigError::RegistryTooLarge {
                needed,
                max: usize::from(self.max_packet_size),
            });
        }
        Ok(())
    }

    /// The wire view sent to every admitted client.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            version: self.protocol_version,
            tick_rate: self.tick_rate,
            max_packet_size: self.max_packet_size,
        }
    }
}

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Version declared in connect requests.
    pub client_version: u8,
    /// Game identifier declared in connect requests.
    pub game_identifier: u32,
    /// Emit pings on `ping_interval_ms` while connected.
    pub auto_ping: bool,
    pub ping_interval_ms: u64,
    /// Give up on a connect that has had no reply for this long.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_version: PROTOCOL_VERSION,
            game_identifier: 0,
            auto_ping: true,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| fail(ConfigError::Parse(e)))
    }
}
