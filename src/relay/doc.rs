//! Authoritative replica of a room's shared document.
//!
//! Wraps a `yrs::Doc`. Concurrent updates commute and redelivery is a no-op,
//! both guaranteed by the underlying CRDT; the relay only stores, diffs and
//! forwards opaque update bytes.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Transact, Update};

use super::protocol::ProtocolError;

/// Name of the shared text the editor binds to.
pub const SHARED_TEXT_NAME: &str = "monaco";

pub struct SharedDoc {
    doc: Doc,
}

impl SharedDoc {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Compact summary of everything this replica has seen.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Minimal update a peer at `vector` needs to catch up to current state.
    pub fn diff_since(&self, vector: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let remote = StateVector::decode_v1(vector).map_err(|e| ProtocolError::Crdt(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&remote))
    }

    /// Merge a remote update. Commutative and idempotent under redelivery.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), ProtocolError> {
        let decoded = Update::decode_v1(update).map_err(|e| ProtocolError::Crdt(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| ProtocolError::Crdt(e.to_string()))
    }

    /// Materialized text content, if the editor's shared text exists yet.
    /// Used only for the best-effort snapshot push, never for live sync.
    pub fn text_content(&self) -> Option<String> {
        let txn = self.doc.transact();
        let text = txn.get_text(SHARED_TEXT_NAME)?;
        Some(text.get_string(&txn))
    }
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new()
    }
}
