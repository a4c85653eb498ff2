// Packet-type registry: the ordered list of application packet kinds a
// session understands.
//
// The host builds one registry when it is created (from its config) and
// sends it verbatim to every admitted client, which keeps its own copy.
// Order is preserved end to end, so a client's copy compares equal to the
// host's.
//
// Only application type ids (`0x10..=0xFF`) may be registered; the core
// kinds in `message.rs` are fixed by the protocol. Lookup goes through a
// 256-slot index so it is a single array access.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::FIRST_APPLICATION_TYPE;

/// Longest name or description that fits the one-byte length on the wire.
pub const MAX_TEXT_LEN: usize = u8::MAX as usize;

/// Most entries a registry can hold (one-byte count on the wire).
pub const MAX_ENTRIES: usize = u8::MAX as usize;

/// One registered packet kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketTypeEntry {
    pub packet_id: u8,
    pub name: String,
    pub description: String,
}

impl PacketTypeEntry {
    pub fn new(packet_id: u8, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            packet_id,
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("packet type 0x{0:02X} is reserved for core protocol packets")]
    ReservedId(u8),
    #[error("packet type 0x{0:02X} registered twice")]
    DuplicateId(u8),
    #[error("text for packet type 0x{packet_id:02X} is {len} bytes (max {})", MAX_TEXT_LEN)]
    TextTooLong { packet_id: u8, len: usize },
    #[error("registry has {0} entries (max {})", MAX_ENTRIES)]
    TooManyEntries(usize),
}

/// Read-only ordered registry with O(1) lookup by type id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PacketTypeEntry>", into = "Vec<PacketTypeEntry>")]
pub struct PacketTypeRegistry {
    entries: Vec<PacketTypeEntry>,
    index: Box<[Option<u8>; 256]>,
}

impl PacketTypeRegistry {
    /// A registry with no entries. This is what a client holds before the
    /// host's registry arrives.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            index: Box::new([None; 256]),
        }
    }

    /// The registry a host uses when its config names none: a single
    /// generic application packet.
    pub fn standard() -> Self {
        Self::from_entries(vec![PacketTypeEntry::new(
            FIRST_APPLICATION_TYPE,
            "GamePacket",
            "Application-defined packet",
        )])
        .unwrap_or_else(|_| Self::empty())
    }

    /// Build a registry, validating ids and text lengths.
    pub fn from_entries(entries: Vec<PacketTypeEntry>) -> Result<Self, RegistryError> {
        if entries.len() > MAX_ENTRIES {
            return Err(RegistryError::TooManyEntries(entries.len()));
        }
        let mut index = Box::new([None; 256]);
        for (position, entry) in entries.iter().enumerate() {
            if entry.packet_id < FIRST_APPLICATION_TYPE {
                return Err(RegistryError::ReservedId(entry.packet_id));
            }
            for text in [&entry.name, &entry.description] {
                if text.len() > MAX_TEXT_LEN {
                    return Err(RegistryError::TextTooLong {
                        packet_id: entry.packet_id,
                        len: text.len(),
                    });
                }
            }
            let slot = &mut index[usize::from(entry.packet_id)];
            if slot.is_some() {
                return Err(RegistryError::DuplicateId(entry.packet_id));
            }
            // `position < MAX_ENTRIES`, checked above.
            #[expect(clippy::cast_possible_truncation)]
            let position = position as u8;
            *slot = Some(position);
        }
        Ok(Self { entries, index })
    }

    pub fn lookup(&self, packet_id: u8) -> Option<&PacketTypeEntry> {
        self.index[usize::from(packet_id)].map(|position| &self.entries[usize::from(position)])
    }

    pub fn contains(&self, packet_id: u8) -> bool {
        self.index[usize::from(packet_id)].is_some()
    }

    pub fn entries(&self) -> &[PacketTypeEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketTypeEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PacketTypeRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl TryFrom<Vec<PacketTypeEntry>> for PacketTypeRegistry {
    type Error = RegistryError;

    fn try_from(entries: Vec<PacketTypeEntry>) -> Result<Self, Self::Error> {
        Self::from_entries(entries)
    }
}

impl From<PacketTypeRegistry> for Vec<PacketTypeEntry> {
    fn from(registry: PacketTypeRegistry) -> Self {
        registry.entries
    }
}
