// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! End-to-end tests for the signaling relay over real WebSocket connections.
//!
//! Each test starts its own relay on an OS-assigned port, so connection
//! identifiers always start at `c1`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairline_proto::codec;
use pairline_proto::envelope::{Envelope, Signal};
use pairline_proto::identity::{PeerId, RoomName};
use pairline_relay::relay;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start() -> std::net::SocketAddr {
    let (addr, _handle) = relay::start_server("127.0.0.1:0").await.unwrap();
    addr
}

async fn connect(addr: std::net::SocketAddr, path: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .unwrap();
    ws
}

async fn recv_text(ws: &mut Ws) -> String {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

async fn recv(ws: &mut Ws) -> Envelope {
    codec::decode(&recv_text(ws).await).unwrap()
}

/// Receive until a `peers` message with `count` members arrives.
async fn recv_peers(ws: &mut Ws, count: usize) -> Vec<PeerId> {
    loop {
        if let Signal::Peers { count: c, ids } = recv(ws).await.signal
            && c == count
        {
            return ids;
        }
    }
}

async fn send(ws: &mut Ws, text: &str) {
    ws.send(Message::text(text.to_owned())).await.unwrap();
}

/// Assert no text frame arrives within a short window.
async fn assert_silent(ws: &mut Ws) {
    let got = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(got.is_err(), "expected silence, got {got:?}");
}

/// Connect and consume the greeting, returning the assigned id.
async fn join(addr: std::net::SocketAddr) -> (Ws, PeerId) {
    let mut ws = connect(addr, "/").await;
    let welcome = recv(&mut ws).await;
    let Signal::Welcome { id } = welcome.signal else {
        panic!("expected welcome, got {welcome:?}");
    };
    (ws, id)
}

#[tokio::test]
async fn connect_receives_welcome_then_peers() {
    let addr = start().await;
    let mut ws = connect(addr, "/").await;

    let welcome = recv(&mut ws).await;
    assert_eq!(
        welcome.signal,
        Signal::Welcome {
            id: PeerId::new("c1")
        }
    );
    assert_eq!(welcome.room, Some(RoomName::new("room-1")));

    let peers = recv(&mut ws).await;
    assert_eq!(peers.room, Some(RoomName::new("room-1")));
    assert_eq!(
        peers.signal,
        Signal::Peers {
            count: 1,
            ids: vec![PeerId::new("c1")]
        }
    );
}

#[tokio::test]
async fn ws_path_is_accepted() {
    let addr = start().await;
    let mut ws = connect(addr, "/ws").await;
    assert!(matches!(recv(&mut ws).await.signal, Signal::Welcome { .. }));
}

#[tokio::test]
async fn second_connection_is_announced_in_join_order() {
    let addr = start().await;
    let (mut a, a_id) = join(addr).await;
    recv_peers(&mut a, 1).await;

    let (mut b, b_id) = join(addr).await;
    assert_eq!(a_id, PeerId::new("c1"));
    assert_eq!(b_id, PeerId::new("c2"));

    let expected = vec![a_id, b_id];
    assert_eq!(recv_peers(&mut a, 2).await, expected);
    assert_eq!(recv_peers(&mut b, 2).await, expected);
}

#[tokio::test]
async fn relayed_messages_carry_relay_stamps() {
    let addr = start().await;
    let (mut a, _) = join(addr).await;
    let (mut b, _) = join(addr).await;
    recv_peers(&mut a, 2).await;
    recv_peers(&mut b, 2).await;

    send(
        &mut b,
        r#"{"type":"offer","sdp":{"type":"offer","sdp":"v=0\r\n"},"room":"elsewhere","from":"c99","senderId":"c2"}"#,
    )
    .await;

    let raw: Value = serde_json::from_str(&recv_text(&mut a).await).unwrap();
    assert_eq!(raw["type"], "offer");
    assert_eq!(raw["from"], "c2");
    assert_eq!(raw["room"], "room-1");
    assert_eq!(raw["senderId"], "c2");
    assert_eq!(raw["sdp"]["sdp"], "v=0\r\n");

    assert_silent(&mut b).await;
}

#[tokio::test]
async fn relay_fans_out_to_every_other_member() {
    let addr = start().await;
    let (mut a, _) = join(addr).await;
    let (mut b, _) = join(addr).await;
    let (mut c, _) = join(addr).await;
    recv_peers(&mut a, 3).await;
    recv_peers(&mut b, 3).await;
    recv_peers(&mut c, 3).await;

    send(&mut a, r#"{"type":"state","screen":"on"}"#).await;

    for ws in [&mut b, &mut c] {
        let env = recv(ws).await;
        assert_eq!(env.from, Some(PeerId::new("c1")));
        assert!(matches!(env.signal, Signal::State(_)));
    }
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn malformed_input_is_dropped_without_disconnect() {
    let addr = start().await;
    let (mut a, _) = join(addr).await;
    let (mut b, _) = join(addr).await;
    recv_peers(&mut a, 2).await;
    recv_peers(&mut b, 2).await;

    send(&mut a, "{not json").await;
    send(&mut a, r#"{"type":"teleport"}"#).await;
    send(&mut a, r#"{"type":"peers","count":9,"ids":[]}"#).await;
    send(&mut a, r#"{"type":"ice","candidate":{"candidate":"candidate:1"}}"#).await;

    let env = recv(&mut b).await;
    assert!(matches!(env.signal, Signal::Ice { .. }));
    assert_eq!(env.from, Some(PeerId::new("c1")));
}

#[tokio::test]
async fn join_moves_connection_to_another_room() {
    let addr = start().await;
    let (mut a, _) = join(addr).await;
    let (mut b, _) = join(addr).await;
    recv_peers(&mut a, 2).await;
    recv_peers(&mut b, 2).await;

    send(&mut b, r#"{"type":"join","room":"lobby"}"#).await;

    assert_eq!(recv_peers(&mut a, 1).await, vec![PeerId::new("c1")]);
    let welcome = recv(&mut b).await;
    assert_eq!(
        welcome.signal,
        Signal::Welcome {
            id: PeerId::new("c2")
        }
    );
    assert_eq!(welcome.room, Some(RoomName::new("lobby")));
    assert_eq!(recv_peers(&mut b, 1).await, vec![PeerId::new("c2")]);

    send(&mut a, r#"{"type":"state","screen":"off"}"#).await;
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn joining_current_room_changes_nothing() {
    let addr = start().await;
    let (mut a, _) = join(addr).await;
    recv_peers(&mut a, 1).await;

    send(&mut a, r#"{"type":"join","room":"room-1"}"#).await;
    send(&mut a, r#"{"type":"join"}"#).await;
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn disconnect_is_announced_to_the_room() {
    let addr = start().await;
    let (mut a, _) = join(addr).await;
    let (mut b, _) = join(addr).await;
    recv_peers(&mut a, 2).await;
    recv_peers(&mut b, 2).await;

    b.close(None).await.unwrap();
    drop(b);

    assert_eq!(recv_peers(&mut a, 1).await, vec![PeerId::new("c1")]);
}

#[tokio::test]
async fn identifiers_are_not_reused() {
    let addr = start().await;
    let (a, a_id) = join(addr).await;
    drop(a);
    let (_b, b_id) = join(addr).await;
    assert_eq!(a_id, PeerId::new("c1"));
    assert_eq!(b_id, PeerId::new("c2"));
}
