//! One collaboration room: a shared document, its presence table and the set
//! of connections currently joined.
//!
//! A room is always used behind one `tokio::sync::Mutex`, which is the
//! serialization domain for both the document and the presence table. Fan-out
//! happens here so the no-self-echo and room-isolation invariants live in one
//! place; delivery goes through per-connection unbounded channels, so a slow
//! consumer never stalls the rest of the room.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::doc::SharedDoc;
use super::presence::PresenceTable;

pub type ConnId = u64;
pub type Outbound = mpsc::UnboundedSender<Message>;

pub struct Room {
    pub name: String,
    pub doc: SharedDoc,
    pub presence: PresenceTable,
    connections: HashMap<ConnId, Outbound>,
}

impl Room {
    pub fn new(name: String) -> Self {
        Self {
            name,
            doc: SharedDoc::new(),
            presence: PresenceTable::new(),
            connections: HashMap::new(),
        }
    }

    pub fn join(&mut self, conn_id: ConnId, tx: Outbound) {
        self.connections.insert(conn_id, tx);
    }

    pub fn leave(&mut self, conn_id: ConnId) {
        self.connections.remove(&conn_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver `msg` to every joined connection except `from`.
    /// Connections whose channel is gone are dropped from the set.
    pub fn broadcast(&mut self, from: ConnId, msg: Message) {
        let mut dead: Vec<ConnId> = Vec::new();
        for (id, tx) in self.connections.iter() {
            if *id == from {
                continue;
            }
            if tx.send(msg.clone()).is_err() {
                dead.push(*id);
            }
        }
        if !dead.is_empty() {
            for id in &dead {
                self.connections.remove(id);
            }
            debug!(room = %self.name, removed = dead.len(), "dropped dead connections during broadcast");
        }
    }
}
