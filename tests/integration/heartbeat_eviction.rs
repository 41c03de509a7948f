#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Heartbeat tests against a relay running with millisecond-scale timing.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairline_proto::codec;
use pairline_proto::envelope::{Envelope, Signal};
use pairline_proto::identity::PeerId;
use pairline_relay::config::RelayConfig;
use pairline_relay::heartbeat::HeartbeatConfig;
use pairline_relay::relay::{self, RelayState};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_fast_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let config = RelayConfig {
        heartbeat: HeartbeatConfig {
            interval: Duration::from_millis(100),
            timeout: Duration::from_millis(350),
        },
        ..RelayConfig::default()
    };
    let state = Arc::new(RelayState::with_config(&config));
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    ws
}

/// Spawn a client that answers every ping and reports everything else.
fn spawn_responsive(mut ws: Ws) -> mpsc::UnboundedReceiver<Envelope> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let env = codec::decode(text.as_str()).unwrap();
            if let Signal::Ping { ts } = env.signal {
                let pong = codec::encode(&Envelope::new(Signal::Pong { ts })).unwrap();
                if ws.send(Message::text(pong)).await.is_err() {
                    break;
                }
            } else if tx.send(env).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::test]
async fn silent_client_is_terminated_and_announced() {
    let (addr, state) = start_fast_relay().await;

    let alive = connect(addr).await;
    let mut events = spawn_responsive(alive);
    let welcome = events.recv().await.unwrap();
    assert!(matches!(welcome.signal, Signal::Welcome { .. }));
    let mut silent = connect(addr).await;

    let mut pings = 0;
    let ended = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match silent.next().await {
                Some(Ok(Message::Text(text))) => {
                    let env = codec::decode(text.as_str()).unwrap();
                    if let Signal::Ping { ts } = env.signal {
                        assert!(ts > 0);
                        pings += 1;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "silent client was never terminated");
    assert!(pings >= 1, "silent client should have been pinged first");

    let remaining = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Some(Envelope {
                signal: Signal::Peers { count: 1, ids },
                ..
            }) = events.recv().await
            {
                return ids;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(remaining, vec![PeerId::new("c1")]);
    assert_eq!(state.connection_count(), 1);
}

#[tokio::test]
async fn responsive_client_survives_many_timeouts() {
    let (addr, state) = start_fast_relay().await;
    let ws = connect(addr).await;
    let _events = spawn_responsive(ws);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(state.connection_count(), 1);
}
