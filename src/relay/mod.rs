//! Real-time synchronization relay: room registry, replicated document
//! state, presence, the per-connection handler and the WebSocket gateway.

pub mod conn;
pub mod doc;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;

pub use doc::SharedDoc;
pub use presence::PresenceTable;
pub use registry::{RoomRegistry, DEFAULT_GRACE};
pub use room::Room;
