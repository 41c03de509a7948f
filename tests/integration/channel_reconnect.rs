#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Signaling channel behaviour against a scripted WebSocket server: join on
//! open, ping handling, sender stamping, and cold restarts after a close.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairline::signaling::{ChannelConfig, ChannelEvent, SignalingChannel};
use pairline_proto::envelope::{Envelope, Signal, StateUpdate};
use pairline_proto::identity::{PeerId, RoomName};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

type ServerWs = WebSocketStream<TcpStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept WebSocket connections forever, handing each one to the test.
async fn scripted_server() -> (String, mpsc::UnboundedReceiver<ServerWs>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            if tx.send(ws).is_err() {
                break;
            }
        }
    });
    (format!("ws://{addr}/"), rx)
}

fn channel_to(url: &str, room: &str) -> SignalingChannel {
    let mut config = ChannelConfig::new(url, RoomName::new(room));
    config.reconnect_delay = Duration::from_millis(200);
    SignalingChannel::spawn(config)
}

fn request_offer() -> Envelope {
    Envelope::new(Signal::State(StateUpdate::request_offer()))
}

async fn next_connection(server: &mut mpsc::UnboundedReceiver<ServerWs>) -> ServerWs {
    tokio::time::timeout(RECV_TIMEOUT, server.recv())
        .await
        .expect("client never connected")
        .unwrap()
}

async fn next_event(channel: &mut SignalingChannel) -> ChannelEvent {
    tokio::time::timeout(RECV_TIMEOUT, channel.recv())
        .await
        .expect("timed out waiting for a channel event")
        .expect("channel stopped")
}

async fn read_json(ws: &mut ServerWs) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client went away")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn write(ws: &mut ServerWs, text: &str) {
    ws.send(Message::text(text.to_owned())).await.unwrap();
}

#[tokio::test]
async fn open_joins_room_and_answers_pings() {
    let (url, mut server) = scripted_server().await;
    let mut channel = channel_to(&url, "standup");
    let mut ws = next_connection(&mut server).await;

    assert_eq!(next_event(&mut channel).await, ChannelEvent::Opened);
    let join = read_json(&mut ws).await;
    assert_eq!(join["type"], "join");
    assert_eq!(join["room"], "standup");
    assert!(join.get("senderId").is_none());

    write(&mut ws, r#"{"type":"ping","ts":42}"#).await;
    let pong = read_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["ts"], 42);

    // Pings are consumed by the channel, so the next event is the welcome.
    write(&mut ws, r#"{"type":"welcome","id":"c7","room":"standup"}"#).await;
    let ChannelEvent::Message(welcome) = next_event(&mut channel).await else {
        panic!("expected a message");
    };
    assert_eq!(
        welcome.signal,
        Signal::Welcome {
            id: PeerId::new("c7")
        }
    );
}

#[tokio::test]
async fn outbound_envelopes_carry_welcome_id() {
    let (url, mut server) = scripted_server().await;
    let mut channel = channel_to(&url, "room-1");
    let mut ws = next_connection(&mut server).await;
    assert_eq!(next_event(&mut channel).await, ChannelEvent::Opened);
    read_json(&mut ws).await;

    write(&mut ws, r#"{"type":"welcome","id":"c3","room":"room-1"}"#).await;
    next_event(&mut channel).await;

    channel
        .sender()
        .send(request_offer())
        .unwrap();
    let sent = read_json(&mut ws).await;
    assert_eq!(sent["type"], "state");
    assert_eq!(sent["subtype"], "request-offer");
    assert_eq!(sent["senderId"], "c3");
    assert_eq!(sent["room"], "room-1");
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let (url, mut server) = scripted_server().await;
    let mut channel = channel_to(&url, "room-1");
    let mut ws = next_connection(&mut server).await;
    assert_eq!(next_event(&mut channel).await, ChannelEvent::Opened);

    write(&mut ws, "{garbage").await;
    write(&mut ws, r#"{"type":"bogus"}"#).await;
    write(&mut ws, r#"{"type":"peers","room":"room-1","count":1,"ids":["c1"]}"#).await;

    let ChannelEvent::Message(peers) = next_event(&mut channel).await else {
        panic!("expected a message");
    };
    assert!(matches!(peers.signal, Signal::Peers { count: 1, .. }));
}

#[tokio::test]
async fn close_triggers_cold_restart_and_forgets_identity() {
    let (url, mut server) = scripted_server().await;
    let mut channel = channel_to(&url, "room-1");

    let mut first = next_connection(&mut server).await;
    assert_eq!(next_event(&mut channel).await, ChannelEvent::Opened);
    read_json(&mut first).await;
    write(&mut first, r#"{"type":"welcome","id":"c1","room":"room-1"}"#).await;
    next_event(&mut channel).await;

    first.close(None).await.unwrap();
    drop(first);
    assert_eq!(next_event(&mut channel).await, ChannelEvent::Closed);

    // Queued while down: must never reach the next connection.
    channel
        .sender()
        .send(request_offer())
        .unwrap();

    let mut second = next_connection(&mut server).await;
    assert_eq!(next_event(&mut channel).await, ChannelEvent::Opened);
    let join = read_json(&mut second).await;
    assert_eq!(join["type"], "join");

    channel
        .sender()
        .send(Envelope::new(Signal::Pong { ts: 1 }))
        .unwrap();
    let fresh = read_json(&mut second).await;
    assert_eq!(fresh["type"], "pong");
    assert!(fresh.get("senderId").is_none(), "old identity leaked: {fresh}");
}

#[tokio::test]
async fn full_event_queue_never_blocks_outbound_producers() {
    let (url, mut server) = scripted_server().await;
    let mut config = ChannelConfig::new(url.as_str(), RoomName::new("room-1"));
    config.capacity = 1;
    let mut channel = SignalingChannel::spawn(config);
    let mut ws = next_connection(&mut server).await;
    read_json(&mut ws).await;

    // Nobody reads events for now, so the supervisor stalls on the queue.
    for n in 0..8 {
        write(&mut ws, &format!(r#"{{"type":"peers","room":"room-1","count":{n},"ids":[]}}"#)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sender = channel.sender();
    for _ in 0..500 {
        sender.send(request_offer()).unwrap();
    }

    let mut peers = 0;
    while peers < 8 {
        if let ChannelEvent::Message(env) = next_event(&mut channel).await
            && matches!(env.signal, Signal::Peers { .. })
        {
            peers += 1;
        }
    }
    for _ in 0..500 {
        let sent = read_json(&mut ws).await;
        assert_eq!(sent["subtype"], "request-offer");
    }
}

#[tokio::test]
async fn dropping_the_channel_stops_the_supervisor() {
    let (url, mut server) = scripted_server().await;
    let channel = channel_to(&url, "room-1");
    let mut ws = next_connection(&mut server).await;
    read_json(&mut ws).await;

    let (sender, events, task) = channel.into_parts();
    drop(sender);
    drop(events);
    tokio::time::timeout(RECV_TIMEOUT, task)
        .await
        .expect("supervisor did not stop")
        .unwrap();
}
