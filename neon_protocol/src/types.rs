// Core ID types for the session protocol.
//
// Endpoint ids are a single byte on the wire. Two values are reserved:
// `ClientId::UNASSIGNED` (0) marks a client that has not been admitted yet
// and is the destination of deny replies, and `ClientId::HOST` (255) names
// the session host. Everything in between is handed out by the host, lowest
// free id first.
//
// Session ids are chosen by whoever creates the host and never change for
// the lifetime of that host.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol version spoken by this implementation. Carried in the frame
/// header, in connect requests, and in the session config.
pub const PROTOCOL_VERSION: u8 = 1;

/// Endpoint identifier within a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u8);

impl ClientId {
    /// Not yet admitted. Also what accessors report before admission.
    pub const UNASSIGNED: ClientId = ClientId(0);
    /// The session host.
    pub const HOST: ClientId = ClientId(u8::MAX);
    /// Lowest id the host will assign to a client.
    pub const FIRST_CLIENT: ClientId = ClientId(1);
    /// Highest id the host will assign to a client.
    pub const LAST_CLIENT: ClientId = ClientId(u8::MAX - 1);

    pub fn is_unassigned(self) -> bool {
        self == Self::UNASSIGNED
    }

    pub fn is_host(self) -> bool {
        self == Self::HOST
    }

    /// True for ids in the range handed out to admitted clients.
    pub fn is_client(self) -> bool {
        (Self::FIRST_CLIENT..=Self::LAST_CLIENT).contains(&self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 32-bit session identifier, fixed when the host is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    /// What a client reports before it has been admitted anywhere.
    pub const UNSET: SessionId = SessionId(0);
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
