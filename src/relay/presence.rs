//! Ephemeral presence table for one room.
//!
//! Maps awareness client ids to small JSON blobs (cursor, name, color).
//! The wire encoding matches the Yjs awareness update format: a varuint entry
//! count, then per entry a varuint client id, a varuint clock and a var-string
//! JSON state where the literal `"null"` marks an explicit removal. Removals
//! bump the clock so peers can tell "explicitly cleared" from "never set".

use std::collections::HashMap;

use tracing::debug;

use super::protocol::{write_var_string, write_var_uint, Decoder, ProtocolError};

pub type AwarenessClientId = u64;

const REMOVED_STATE: &str = "null";

/// Client ids touched by one applied delta, split by effect.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresenceDelta {
    pub added: Vec<AwarenessClientId>,
    pub updated: Vec<AwarenessClientId>,
    pub removed: Vec<AwarenessClientId>,
}

impl PresenceDelta {
    /// Every id this delta claims for its sender, minus the removed ones.
    pub fn touched(&self) -> impl Iterator<Item = AwarenessClientId> + '_ {
        self.added.iter().chain(self.updated.iter()).copied()
    }
}

#[derive(Default)]
pub struct PresenceTable {
    /// Live states; removed ids are absent here but keep a clock entry.
    states: HashMap<AwarenessClientId, String>,
    clocks: HashMap<AwarenessClientId, u64>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Current live states, for bootstrap and assertions.
    pub fn snapshot(&self) -> &HashMap<AwarenessClientId, String> {
        &self.states
    }

    /// Upsert one client's state. Last writer wins per client id; each id is
    /// written by exactly one connection so there is no cross-writer conflict.
    pub fn set_state(&mut self, client_id: AwarenessClientId, blob: &str) -> Vec<u8> {
        let clock = self.clocks.entry(client_id).or_insert(0);
        *clock += 1;
        let clock = *clock;
        self.states.insert(client_id, blob.to_string());
        encode_entries(&[(client_id, clock, blob)])
    }

    /// Apply an encoded presence delta received from a peer. Entries with a
    /// stale clock are ignored; `"null"` states clear the id.
    pub fn apply_update(&mut self, delta: &[u8]) -> Result<PresenceDelta, ProtocolError> {
        let mut dec = Decoder::new(delta);
        let count = dec.read_var_uint()?;
        let mut applied = PresenceDelta::default();
        for _ in 0..count {
            let client_id = dec.read_var_uint()?;
            let clock = dec.read_var_uint()?;
            let state = dec.read_var_string()?;

            let known = self.clocks.get(&client_id).copied();
            let removal = state == REMOVED_STATE;
            // Accept strictly newer clocks; at an equal clock a removal still
            // wins over a live state so disconnect races resolve to "gone".
            let accept = match known {
                None => true,
                Some(prev) => clock > prev || (clock == prev && removal && self.states.contains_key(&client_id)),
            };
            if !accept {
                continue;
            }
            self.clocks.insert(client_id, clock);
            if removal {
                self.states.remove(&client_id);
                applied.removed.push(client_id);
            } else if self.states.insert(client_id, state.to_string()).is_some() {
                applied.updated.push(client_id);
            } else {
                applied.added.push(client_id);
            }
        }
        Ok(applied)
    }

    /// Mark the listed ids absent and return the encoded removal delta to
    /// broadcast, or `None` when none of them were present.
    pub fn remove_states(&mut self, ids: &[AwarenessClientId], reason: &str) -> Option<Vec<u8>> {
        let mut entries: Vec<(AwarenessClientId, u64, &str)> = Vec::new();
        for id in ids {
            if self.states.remove(id).is_none() {
                continue;
            }
            let clock = self.clocks.entry(*id).or_insert(0);
            *clock += 1;
            entries.push((*id, *clock, REMOVED_STATE));
        }
        if entries.is_empty() {
            return None;
        }
        debug!(clients = entries.len(), reason, "removed presence states");
        Some(encode_entries(&entries))
    }

    /// Full snapshot encoded as one delta, used to bootstrap a new connection.
    pub fn snapshot_update(&self) -> Vec<u8> {
        let entries: Vec<(AwarenessClientId, u64, &str)> = self
            .states
            .iter()
            .map(|(id, state)| (*id, self.clocks.get(id).copied().unwrap_or(0), state.as_str()))
            .collect();
        encode_entries(&entries)
    }
}

fn encode_entries(entries: &[(AwarenessClientId, u64, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_var_uint(&mut buf, entries.len() as u64);
    for (client_id, clock, state) in entries {
        write_var_uint(&mut buf, *client_id);
        write_var_uint(&mut buf, *clock);
        write_var_string(&mut buf, state);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_state_is_visible_in_snapshot() {
        let mut table = PresenceTable::new();
        assert!(table.is_empty());
        table.set_state(7, r#"{"name":"ada"}"#);
        assert_eq!(table.snapshot().get(&7).map(String::as_str), Some(r#"{"name":"ada"}"#));
    }

    #[test]
    fn apply_update_roundtrips_through_snapshot() {
        let mut origin = PresenceTable::new();
        origin.set_state(1, r#"{"cursor":4}"#);
        origin.set_state(2, r#"{"cursor":9}"#);

        let mut peer = PresenceTable::new();
        let applied = peer.apply_update(&origin.snapshot_update()).unwrap();
        assert_eq!(applied.added.len(), 2);
        assert_eq!(peer.len(), 2);
        assert_eq!(peer.snapshot().get(&2).map(String::as_str), Some(r#"{"cursor":9}"#));
    }

    #[test]
    fn removal_is_relayed_not_a_no_op() {
        let mut origin = PresenceTable::new();
        origin.set_state(1, "{}");
        let mut peer = PresenceTable::new();
        peer.apply_update(&origin.snapshot_update()).unwrap();

        let removal = origin.remove_states(&[1], "connection closed").unwrap();
        let applied = peer.apply_update(&removal).unwrap();
        assert_eq!(applied.removed, vec![1]);
        assert!(peer.is_empty());
    }

    #[test]
    fn remove_states_for_unknown_ids_yields_nothing() {
        let mut table = PresenceTable::new();
        assert!(table.remove_states(&[42], "connection closed").is_none());
    }

    #[test]
    fn stale_clock_entries_are_ignored() {
        let mut table = PresenceTable::new();
        let fresh = table.set_state(1, r#"{"v":2}"#);
        // Re-applying our own older encoding must not clobber anything newer.
        table.set_state(1, r#"{"v":3}"#);
        let applied = table.apply_update(&fresh).unwrap();
        assert!(applied.added.is_empty() && applied.updated.is_empty());
        assert_eq!(table.snapshot().get(&1).map(String::as_str), Some(r#"{"v":3}"#));
    }

    #[test]
    fn cleared_differs_from_never_set() {
        let mut table = PresenceTable::new();
        table.set_state(5, "{}");
        table.remove_states(&[5], "test");
        // Re-adding after clear needs a clock beyond the removal bump.
        let mut buf = Vec::new();
        write_var_uint(&mut buf, 1);
        write_var_uint(&mut buf, 5);
        write_var_uint(&mut buf, 1); // clock 1 < removal clock 2
        write_var_string(&mut buf, "{}");
        let applied = table.apply_update(&buf).unwrap();
        assert!(applied.added.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn truncated_delta_is_an_error() {
        let mut table = PresenceTable::new();
        let mut buf = Vec::new();
        write_var_uint(&mut buf, 3); // claims three entries, has none
        assert!(table.apply_update(&buf).is_err());
    }
}
