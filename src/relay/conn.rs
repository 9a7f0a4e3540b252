//! Per-connection relay loop.
//!
//! A connection that reaches this module is already authenticated and bound
//! to a room. The loop decodes inbound frames, dispatches them to the room's
//! document or presence table under the room lock, replies privately to
//! sync-step-1 and fans mutations out to every other joined connection.
//! Apply-then-broadcast happens under one lock acquisition, so all peers see
//! a single room's updates in one total order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::protocol::{encode_awareness, encode_sync_step1, encode_sync_step2, Frame};
use super::registry::RoomRegistry;
use super::room::ConnId;
use crate::services::auth_service::Identity;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Drive one authenticated connection until the transport closes.
pub async fn run_connection(
    ws: WebSocketStream<TcpStream>,
    identity: Identity,
    room_name: String,
    registry: Arc<RoomRegistry>,
) {
    let conn_id: ConnId = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    info!(room = %room_name, user = %identity.user_id, conn_id, "connection joined");

    // Outbound writer task: per-connection queue so one slow peer never
    // blocks delivery to the rest of the room.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let (mut sink, mut stream) = ws.split();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                debug!("outbound sink closed; writer exiting");
                break;
            }
        }
    });

    // Resolve and register atomically so a pending sweep cannot remove the
    // room between the two steps.
    let room = registry.join(&room_name, conn_id, tx.clone()).await;

    // Initial reconciliation step plus, if anyone is already present, a full
    // presence snapshot.
    {
        let r = room.lock().await;
        let _ = tx.send(Message::Binary(encode_sync_step1(&r.doc.state_vector()).into()));
        if !r.presence.is_empty() {
            let snapshot = r.presence.snapshot_update();
            let _ = tx.send(Message::Binary(encode_awareness(&snapshot).into()));
        }
    }

    // Awareness client ids this connection has announced; cleared on close.
    let mut owned_clients: HashSet<u64> = HashSet::new();

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn_id, %e, "transport error; closing");
                break;
            }
        };
        match msg {
            Message::Binary(data) => {
                let frame = match Frame::decode(data.as_ref()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        // A malformed frame fails that message only.
                        warn!(room = %room_name, conn_id, %e, "dropping undecodable frame");
                        continue;
                    }
                };
                match frame {
                    Frame::SyncStep1(vector) => {
                        let r = room.lock().await;
                        match r.doc.diff_since(&vector) {
                            Ok(diff) => {
                                let _ = tx.send(Message::Binary(encode_sync_step2(&diff).into()));
                            }
                            Err(e) => {
                                warn!(room = %room_name, conn_id, %e, "dropping invalid state vector");
                            }
                        }
                    }
                    Frame::SyncStep2(update) => {
                        let mut r = room.lock().await;
                        match r.doc.apply_update(&update) {
                            Ok(()) => r.broadcast(conn_id, Message::Binary(data)),
                            Err(e) => {
                                warn!(room = %room_name, conn_id, %e, "dropping invalid document update");
                            }
                        }
                    }
                    Frame::Awareness(delta) => {
                        let mut r = room.lock().await;
                        match r.presence.apply_update(&delta) {
                            Ok(applied) => {
                                owned_clients.extend(applied.touched());
                                for removed in &applied.removed {
                                    owned_clients.remove(removed);
                                }
                                r.broadcast(conn_id, Message::Binary(data));
                            }
                            Err(e) => {
                                warn!(room = %room_name, conn_id, %e, "dropping invalid presence delta");
                            }
                        }
                    }
                    Frame::Unknown(tag) => {
                        // Reserved for future message kinds.
                        debug!(room = %room_name, conn_id, tag, "ignoring unknown message kind");
                    }
                }
            }
            Message::Text(txt) => {
                if txt == "ping" {
                    let _ = tx.send(Message::Text("pong".into()));
                }
            }
            Message::Ping(payload) => {
                let _ = tx.send(Message::Pong(payload));
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Closing: clear this connection's presence, tell the survivors, then
    // deregister and let the registry schedule the idle sweep.
    {
        let mut r = room.lock().await;
        let ids: Vec<u64> = owned_clients.iter().copied().collect();
        if let Some(removal) = r.presence.remove_states(&ids, "connection closed") {
            r.broadcast(conn_id, Message::Binary(encode_awareness(&removal).into()));
        }
        r.leave(conn_id);
    }
    registry.release(&room_name);
    drop(tx);
    let _ = writer.await;
    info!(room = %room_name, user = %identity.user_id, conn_id, "connection closed");
}
