//! End-to-end relay behavior over a live transport: state catch-up for late
//! joiners, fan-out without self-echo, room isolation and presence cleanup.

use std::sync::Arc;
use std::time::Duration;

use codesync_relay::config::{self, Config};
use codesync_relay::relay::protocol::{encode_awareness, encode_sync_step1, encode_sync_step2, Frame};
use codesync_relay::relay::registry::RoomRegistry;
use codesync_relay::relay::server;
use codesync_relay::relay::{PresenceTable, SharedDoc};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Text, Transact, WriteTxn};

const SECRET: &str = "integration-test-secret";

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_relay() -> (std::net::SocketAddr, Arc<RoomRegistry>) {
    config::init_config(Config {
        jwt_secret: Some(SECRET.to_string()),
        ..Config::default()
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(RoomRegistry::new(Duration::from_secs(30)));
    let reg = registry.clone();
    tokio::spawn(async move {
        server::serve_incoming(listener, reg).await.unwrap();
    });
    (addr, registry)
}

async fn connect(addr: std::net::SocketAddr, room: &str, user: &str) -> Client {
    let exp = chrono::Utc::now().timestamp() as usize + 3600;
    let claims = serde_json::json!({ "userId": user, "exp": exp });
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    let url = format!("ws://{}/yjs/{}", addr, room);
    let mut req = url.into_client_request().unwrap();
    req.headers_mut().insert(
        "Cookie",
        HeaderValue::from_str(&format!("token={}", token)).unwrap(),
    );
    let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
    ws
}

async fn next_frame(ws: &mut Client) -> Frame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended unexpectedly")
            .expect("transport error");
        if let Message::Binary(data) = msg {
            return Frame::decode(data.as_ref()).expect("received undecodable frame");
        }
    }
}

async fn expect_silence(ws: &mut Client) {
    let outcome = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(outcome.is_err(), "expected no frame, got {:?}", outcome);
}

fn update_with_text(content: &str) -> Vec<u8> {
    let doc = Doc::new();
    {
        let mut txn = doc.transact_mut();
        let text = txn.get_or_insert_text("monaco");
        text.insert(&mut txn, 0, content);
    }
    let txn = doc.transact();
    txn.encode_state_as_update_v1(&StateVector::default())
}

fn awareness_delta(client_id: u64, blob: &str) -> Vec<u8> {
    PresenceTable::new().set_state(client_id, blob)
}

#[tokio::test]
async fn late_joiner_catches_up_and_awareness_stays_separate() {
    let (addr, registry) = start_relay().await;

    // An uninvolved room to verify isolation at the end.
    let mut other = connect(addr, "other-room", "user-c").await;
    assert!(matches!(next_frame(&mut other).await, Frame::SyncStep1(_)));

    // A joins an empty room; initial reconciliation carries an empty vector.
    let mut a = connect(addr, "abc", "user-a").await;
    match next_frame(&mut a).await {
        Frame::SyncStep1(sv) => assert_eq!(sv, StateVector::default().encode_v1()),
        other => panic!("expected sync-step-1, got {:?}", other),
    }

    // A contributes "hello"; the server applies it to the room document.
    let u1 = update_with_text("hello");
    a.send(Message::Binary(encode_sync_step2(&u1).into()))
        .await
        .unwrap();
    let room = loop {
        if let Some(room) = registry.get("abc").await {
            if room.lock().await.doc.text_content().as_deref() == Some("hello") {
                break room;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(room.lock().await.connection_count(), 1);

    // B joins late and catches up through reconciliation, without U1 being
    // replayed explicitly by A.
    let mut b = connect(addr, "abc", "user-b").await;
    match next_frame(&mut b).await {
        Frame::SyncStep1(sv) => assert_ne!(sv, StateVector::default().encode_v1()),
        other => panic!("expected sync-step-1, got {:?}", other),
    }
    b.send(Message::Binary(
        encode_sync_step1(&StateVector::default().encode_v1()).into(),
    ))
    .await
    .unwrap();
    match next_frame(&mut b).await {
        Frame::SyncStep2(diff) => {
            let replica = SharedDoc::new();
            replica.apply_update(&diff).unwrap();
            assert_eq!(replica.text_content().as_deref(), Some("hello"));
        }
        other => panic!("expected sync-step-2, got {:?}", other),
    }

    // B announces presence; A receives exactly one awareness broadcast and
    // never a document mutation (and never saw its own U1 echoed back).
    let delta = awareness_delta(4242, r#"{"user":{"name":"bee"}}"#);
    b.send(Message::Binary(encode_awareness(&delta).into()))
        .await
        .unwrap();
    match next_frame(&mut a).await {
        Frame::Awareness(raw) => {
            let mut table = PresenceTable::new();
            let applied = table.apply_update(&raw).unwrap();
            assert_eq!(applied.added, vec![4242]);
        }
        other => panic!("expected awareness broadcast, got {:?}", other),
    }
    expect_silence(&mut a).await;

    // A third joiner bootstraps from the presence snapshot.
    let mut d = connect(addr, "abc", "user-d").await;
    assert!(matches!(next_frame(&mut d).await, Frame::SyncStep1(_)));
    match next_frame(&mut d).await {
        Frame::Awareness(raw) => {
            let mut table = PresenceTable::new();
            table.apply_update(&raw).unwrap();
            assert!(table.snapshot().contains_key(&4242));
        }
        other => panic!("expected presence snapshot, got {:?}", other),
    }

    // B disconnects: survivors get a removal notice and the table is clean.
    b.close(None).await.unwrap();
    match next_frame(&mut a).await {
        Frame::Awareness(raw) => {
            let mut table = PresenceTable::new();
            let applied = table.apply_update(&raw).unwrap();
            assert_eq!(applied.removed, vec![4242]);
        }
        other => panic!("expected awareness removal, got {:?}", other),
    }
    loop {
        if room.lock().await.presence.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Nothing that happened in "abc" ever reached the other room.
    expect_silence(&mut other).await;
}

#[tokio::test]
async fn document_updates_fan_out_to_other_connections_only() {
    let (addr, registry) = start_relay().await;

    let mut a = connect(addr, "fanout", "user-a").await;
    assert!(matches!(next_frame(&mut a).await, Frame::SyncStep1(_)));
    let mut b = connect(addr, "fanout", "user-b").await;
    assert!(matches!(next_frame(&mut b).await, Frame::SyncStep1(_)));
    let room = registry.get("fanout").await.unwrap();
    loop {
        if room.lock().await.connection_count() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let update = update_with_text("fan-out");
    a.send(Message::Binary(encode_sync_step2(&update).into()))
        .await
        .unwrap();

    // B receives the exact update bytes; A hears nothing back.
    match next_frame(&mut b).await {
        Frame::SyncStep2(received) => assert_eq!(received, update),
        other => panic!("expected relayed update, got {:?}", other),
    }
    expect_silence(&mut a).await;

    // Malformed frames fail only that message; the connection stays usable.
    a.send(Message::Binary(vec![1u8, 200, 200].into()))
        .await
        .unwrap();
    let update2 = update_with_text("still-alive");
    a.send(Message::Binary(encode_sync_step2(&update2).into()))
        .await
        .unwrap();
    match next_frame(&mut b).await {
        Frame::SyncStep2(received) => assert_eq!(received, update2),
        other => panic!("expected relayed update, got {:?}", other),
    }
}
