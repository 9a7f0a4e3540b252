//! Process-wide room registry.
//!
//! Rooms are created lazily on first join and reclaimed by a delayed sweep
//! once their last connection leaves. The sweep re-checks the connection
//! count when it fires, so a rejoin during the grace window keeps the room
//! alive without any timer cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::room::{ConnId, Outbound, Room};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

type SweepFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
/// Called with (room name, materialized text) after a room is reclaimed.
pub type SweepHook = Arc<dyn Fn(String, Option<String>) -> SweepFuture + Send + Sync>;

pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Mutex<Room>>>>,
    grace: Duration,
    on_sweep: Option<SweepHook>,
}

impl RoomRegistry {
    pub fn new(grace: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            grace,
            on_sweep: None,
        }
    }

    /// Attach a hook invoked after a room is swept, e.g. the best-effort
    /// snapshot push to the session store.
    pub fn with_sweep_hook(mut self, hook: SweepHook) -> Self {
        self.on_sweep = Some(hook);
        self
    }

    /// Resolve a room, creating it on first join. Concurrent first-joiners to
    /// the same unseen name observe exactly one room.
    pub async fn get_or_create(&self, name: &str) -> Arc<Mutex<Room>> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(name) {
            return room.clone();
        }
        info!(room = %name, "creating room");
        let room = Arc::new(Mutex::new(Room::new(name.to_string())));
        rooms.insert(name.to_string(), room.clone());
        room
    }

    /// Resolve a room and register a connection in one step. The connection
    /// is inserted while the registry lock is held, so a sweep firing between
    /// resolve and register cannot remove the room out from under the joiner
    /// (lock order registry -> room, same as `sweep`).
    pub async fn join(&self, name: &str, conn_id: ConnId, tx: Outbound) -> Arc<Mutex<Room>> {
        let mut rooms = self.rooms.lock().await;
        let room = match rooms.get(name) {
            Some(room) => room.clone(),
            None => {
                info!(room = %name, "creating room");
                let room = Arc::new(Mutex::new(Room::new(name.to_string())));
                rooms.insert(name.to_string(), room.clone());
                room
            }
        };
        room.lock().await.join(conn_id, tx);
        room
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.lock().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.rooms.lock().await.contains_key(name)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Called when a connection leaves its room. Schedules a sweep check
    /// after the grace interval; the check re-validates emptiness, so a new
    /// joiner arriving in the window cancels reclamation by count alone.
    pub fn release(self: &Arc<Self>, name: &str) {
        let registry = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(registry.grace).await;
            registry.sweep(&name).await;
        });
    }

    /// Remove the named room if it is still empty. Returns true on removal.
    pub async fn sweep(&self, name: &str) -> bool {
        let removed = {
            let mut rooms = self.rooms.lock().await;
            let Some(room) = rooms.get(name) else {
                return false;
            };
            if room.lock().await.connection_count() > 0 {
                debug!(room = %name, "sweep skipped, room regained connections");
                return false;
            }
            rooms.remove(name)
        };
        let Some(room) = removed else {
            return false;
        };
        info!(room = %name, "room reclaimed after grace interval");
        if let Some(hook) = &self.on_sweep {
            let text = room.lock().await.doc.text_content();
            (hook)(name.to_string(), text).await;
        }
        true
    }
}
