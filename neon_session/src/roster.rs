// Membership roster for a host's session.
//
// `Roster` is the host's record of admitted clients: id, display name, and
// when each was last heard from. The host's loop is its only writer, so it
// has no internal locking; the host mirrors `len()` into an atomic for
// readers on other threads.
//
// Admission checks run in a fixed order and stop at the first failure:
// protocol version, game identifier, empty name, name length, name already
// held by a live member, capacity. Ids are the lowest free value in
// `1..=254`, so an id freed by a departure is reused by the next admission.
//
// See also: `host.rs`, which turns `admit`'s result into accept or deny
// frames, and `error::AdmissionDenied` for the deny reasons.

use std::collections::BTreeMap;

use neon_protocol::{ClientId, ConnectRequest};

use crate::config::HostConfig;
use crate::error::AdmissionDenied;

/// Longest display name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// One admitted client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Membership {
    pub client_id: ClientId,
    pub name: String,
    /// Clock reading when the last frame from this member arrived.
    pub last_seen: u64,
}

#[derive(Debug, Default)]
pub struct Roster {
    members: BTreeMap<ClientId, Membership>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit the sender of `request` or say why not. On success the new
    /// membership is already recorded.
    pub fn admit(
        &mut self,
        request: &ConnectRequest,
        config: &HostConfig,
        now: u64,
    ) -> Result<ClientId, AdmissionDenied> {
        if request.client_version != config.protocol_version {
            return Err(AdmissionDenied::VersionMismatch {
                expected: config.protocol_version,
                got: request.client_version,
            });
        }
        if config.game_identifier != 0 && request.game_identifier != config.game_identifier {
            return Err(AdmissionDenied::GameMismatch {
                expected: config.game_identifier,
                got: request.game_identifier,
            });
        }
        let name = request.desired_name.as_str();
        if name.trim().is_empty() {
            return Err(AdmissionDenied::EmptyName);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(AdmissionDenied::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        if self.name_in_use(name) {
            return Err(AdmissionDenied::NameInUse);
        }
        if self.members.len() >= usize::from(config.max_clients) {
            return Err(AdmissionDenied::SessionFull);
        }
        let client_id = self.lowest_free_id().ok_or(AdmissionDenied::SessionFull)?;
        self.members.insert(
            client_id,
            Membership {
                client_id,
                name: name.to_owned(),
                last_seen: now,
            },
        );
        Ok(client_id)
    }

    fn lowest_free_id(&self) -> Option<ClientId> {
        (ClientId::FIRST_CLIENT.0..=ClientId::LAST_CLIENT.0)
            .map(ClientId)
            .find(|id| !self.members.contains_key(id))
    }

    pub fn name_in_use(&self, name: &str) -> bool {
        self.members.values().any(|m| m.name == name)
    }

    /// Note that `client_id` was heard from. Returns false for non-members.
    pub fn touch(&mut self, client_id: ClientId, now: u64) -> bool {
        match self.members.get_mut(&client_id) {
            Some(member) => {
                member.last_seen = member.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, client_id: ClientId) -> Option<Membership> {
        self.members.remove(&client_id)
    }

    /// Remove and return every member silent for longer than `timeout_ms`.
    pub fn evict_silent(&mut self, now: u64, timeout_ms: u64) -> Vec<Membership> {
        let silent: Vec<ClientId> = self
            .members
            .values()
            .filter(|m| now.saturating_sub(m.last_seen) > timeout_ms)
            .map(|m| m.client_id)
            .collect();
        silent
            .into_iter()
            .filter_map(|id| self.members.remove(&id))
            .collect()
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Membership> {
        self.members.get(&client_id)
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.members.contains_key(&client_id)
    }

    /// Members in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Membership> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) -> Vec<Membership> {
        std::mem::take(&mut self.members).into_values().collect()
    }
}
