//! Gateway: accepts inbound WebSocket connections, derives the room name
//! from the request path and checks the credential before handing the socket
//! to the connection handler.
//!
//! Credential failures complete the upgrade and then close with code 1008
//! (policy violation) so the client sees a specific reason. No room is
//! created or touched before authentication succeeds.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::{self};
use tracing::{debug, error, info, warn};

use super::conn::run_connection;
use super::registry::RoomRegistry;
use crate::services::auth_service::{self, AuthError};

/// Accept relay connections until the listener fails.
pub async fn serve_incoming(
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(addr = %listener.local_addr()?, "relay listening");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(remote = %peer, "accepted TCP connection");
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_socket(stream, registry).await {
                        warn!(%e, "connection task ended with error");
                    }
                });
            }
            Err(e) => {
                error!(%e, "accept failed; continuing");
                continue;
            }
        }
    }
}

async fn handle_socket(
    stream: TcpStream,
    registry: Arc<RoomRegistry>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Snapshot path and credential during the HTTP upgrade; the handshake
    // callback runs synchronously, so stash them for the async part.
    let request_info: Arc<std::sync::Mutex<Option<(String, Option<String>)>>> =
        Arc::new(std::sync::Mutex::new(None));
    let request_info_c = request_info.clone();

    let mut ws = accept_hdr_async(
        stream,
        move |req: &tungstenite::handshake::server::Request,
              resp: tungstenite::handshake::server::Response| {
            let path = req.uri().path().to_string();
            let token = auth_service::get_auth_token(req);
            if let Ok(mut guard) = request_info_c.lock() {
                *guard = Some((path, token));
            }
            Ok(resp)
        },
    )
    .await?;

    let (path, token) = request_info
        .lock()
        .ok()
        .and_then(|g| g.clone())
        .unwrap_or((String::new(), None));

    // Credential check first: a refused connect must leave no room behind.
    let identity = match token {
        None => {
            return refuse(&mut ws, AuthError::MissingToken).await;
        }
        Some(token) => match auth_service::authenticate_token(&token) {
            Ok(identity) => identity,
            Err(e) => {
                return refuse(&mut ws, e).await;
            }
        },
    };

    let Some(room_name) = room_name_from_path(&path) else {
        warn!(%path, "connection refused: no room in path");
        ws.close(Some(CloseFrame {
            code: CloseCode::Unsupported,
            reason: "Missing room name".into(),
        }))
        .await?;
        return Ok(());
    };

    run_connection(ws, identity, room_name, registry).await;
    Ok(())
}

async fn refuse(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    error: AuthError,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    warn!(%error, "connection refused");
    ws.close(Some(CloseFrame {
        code: CloseCode::Policy,
        reason: error.to_string().into(),
    }))
    .await?;
    Ok(())
}

/// The trailing path segment names the room, e.g. `/yjs/abc` -> `abc`.
fn room_name_from_path(path: &str) -> Option<String> {
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
