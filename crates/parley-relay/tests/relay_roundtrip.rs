//! Integration tests for the relay over real WebSocket connections:
//! registration, roster broadcasts, envelope forwarding, and routing misses.
//!
//! Run with verbose output: RUST_LOG=debug cargo test --test relay_roundtrip -- --nocapture

use std::sync::Once;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use parley_common::protocol::{ClientEnvelope, ServerEnvelope};
use parley_common::PeerId;
use parley_relay::{serve, Registry};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "parley_relay=debug".into()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Bind the relay on an ephemeral port and return its ws:// URL.
async fn start_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(serve(listener, Registry::new()));
    format!("ws://{addr}")
}

async fn connect(url: &str) -> Client {
    let (ws, _) = connect_async(url).await.expect("connect failed");
    ws
}

/// Read the next envelope, failing the test on timeout or a non-text frame.
async fn recv_envelope(client: &mut Client) -> ServerEnvelope {
    loop {
        let frame = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("stream ended")
            .expect("ws error");
        match frame {
            Message::Text(text) => return ServerEnvelope::parse(&text).expect("bad envelope"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_envelope(client: &mut Client, envelope: &ClientEnvelope) {
    let json = serde_json::to_string(envelope).unwrap();
    client
        .send(Message::Text(json.into()))
        .await
        .expect("send failed");
}

/// Connect and consume the registration handshake (userInfo + first userList).
async fn join(url: &str) -> (Client, PeerId) {
    let mut client = connect(url).await;
    let id = match recv_envelope(&mut client).await {
        ServerEnvelope::UserInfo(id) => id,
        other => panic!("expected userInfo first, got {other:?}"),
    };
    match recv_envelope(&mut client).await {
        ServerEnvelope::UserList(list) => assert!(list.contains(&id)),
        other => panic!("expected userList after userInfo, got {other:?}"),
    }
    (client, id)
}

#[tokio::test]
async fn registration_assigns_distinct_ids() {
    init_tracing();
    let url = start_relay().await;

    let (_a, id_a) = join(&url).await;
    let (_b, id_b) = join(&url).await;
    let (_c, id_c) = join(&url).await;

    assert_ne!(id_a, id_b);
    assert_ne!(id_b, id_c);
    assert_ne!(id_a, id_c);
}

#[tokio::test]
async fn join_broadcasts_roster_to_everyone() {
    init_tracing();
    let url = start_relay().await;

    let (mut a, id_a) = join(&url).await;
    let (_b, id_b) = join(&url).await;

    // The earlier client gets exactly one refreshed roster for the join.
    match recv_envelope(&mut a).await {
        ServerEnvelope::UserList(list) => assert_eq!(list, vec![id_a, id_b]),
        other => panic!("expected userList, got {other:?}"),
    }
}

#[tokio::test]
async fn leave_broadcasts_shrunken_roster() {
    init_tracing();
    let url = start_relay().await;

    let (mut a, id_a) = join(&url).await;
    let (b, id_b) = join(&url).await;

    // Drain the join broadcast for b.
    match recv_envelope(&mut a).await {
        ServerEnvelope::UserList(list) => assert_eq!(list, vec![id_a, id_b]),
        other => panic!("expected userList, got {other:?}"),
    }

    drop(b);

    match recv_envelope(&mut a).await {
        ServerEnvelope::UserList(list) => assert_eq!(list, vec![id_a]),
        other => panic!("expected userList after leave, got {other:?}"),
    }
}

#[tokio::test]
async fn call_signaling_is_forwarded_to_the_addressed_peer() {
    init_tracing();
    let url = start_relay().await;

    let (mut a, id_a) = join(&url).await;
    let (mut b, id_b) = join(&url).await;
    // Drain a's roster refresh for b's join.
    recv_envelope(&mut a).await;

    // call → callIn carrying the caller's id.
    send_envelope(
        &mut a,
        &ClientEnvelope::Call {
            source_user_id: id_a,
            target_user_id: id_b,
        },
    )
    .await;
    assert_eq!(recv_envelope(&mut b).await, ServerEnvelope::CallIn(id_a));

    // acceptCall → payload-less acceptCall at the caller.
    send_envelope(&mut b, &ClientEnvelope::AcceptCall(id_a)).await;
    assert_eq!(recv_envelope(&mut a).await, ServerEnvelope::AcceptCall);

    // offer/answer/candidate payloads arrive verbatim.
    let offer = serde_json::json!({"type": "offer", "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1"});
    send_envelope(
        &mut a,
        &ClientEnvelope::Offer {
            user_id: id_b,
            offer: offer.clone(),
        },
    )
    .await;
    assert_eq!(recv_envelope(&mut b).await, ServerEnvelope::Offer(offer));

    let candidate = serde_json::json!({"candidate": "candidate:1", "sdpMLineIndex": 0});
    send_envelope(
        &mut b,
        &ClientEnvelope::Candidate {
            user_id: id_a,
            candidate: candidate.clone(),
        },
    )
    .await;
    assert_eq!(
        recv_envelope(&mut a).await,
        ServerEnvelope::Candidate(candidate)
    );
}

#[tokio::test]
async fn routing_miss_notifies_the_sender() {
    init_tracing();
    let url = start_relay().await;

    let (mut a, id_a) = join(&url).await;
    let ghost = PeerId::new(9999);

    send_envelope(
        &mut a,
        &ClientEnvelope::Offer {
            user_id: ghost,
            offer: serde_json::json!({"sdp": "v=0"}),
        },
    )
    .await;

    assert_eq!(
        recv_envelope(&mut a).await,
        ServerEnvelope::TargetUnavailable(ghost)
    );

    // The connection survived the miss: a self-addressed call still routes.
    send_envelope(
        &mut a,
        &ClientEnvelope::Call {
            source_user_id: id_a,
            target_user_id: id_a,
        },
    )
    .await;
    assert_eq!(recv_envelope(&mut a).await, ServerEnvelope::CallIn(id_a));
}

#[tokio::test]
async fn forward_to_departed_peer_does_not_disturb_the_sender() {
    init_tracing();
    let url = start_relay().await;

    let (mut a, id_a) = join(&url).await;
    let (b, id_b) = join(&url).await;
    recv_envelope(&mut a).await; // roster refresh for b's join

    drop(b);
    match recv_envelope(&mut a).await {
        ServerEnvelope::UserList(list) => assert_eq!(list, vec![id_a]),
        other => panic!("expected userList after leave, got {other:?}"),
    }

    send_envelope(
        &mut a,
        &ClientEnvelope::Offer {
            user_id: id_b,
            offer: serde_json::json!({"sdp": "v=0"}),
        },
    )
    .await;

    // No delivery happens; the sender just learns the target is gone.
    assert_eq!(
        recv_envelope(&mut a).await,
        ServerEnvelope::TargetUnavailable(id_b)
    );
}

#[tokio::test]
async fn malformed_frames_are_discarded_without_dropping_the_connection() {
    init_tracing();
    let url = start_relay().await;

    let (mut a, id_a) = join(&url).await;

    a.send(Message::Text("{definitely not json".into()))
        .await
        .expect("send failed");
    a.send(Message::Text(r#"{"type":"noSuchKind","data":1}"#.into()))
        .await
        .expect("send failed");

    // Still registered, still routable.
    send_envelope(
        &mut a,
        &ClientEnvelope::Call {
            source_user_id: id_a,
            target_user_id: id_a,
        },
    )
    .await;
    assert_eq!(recv_envelope(&mut a).await, ServerEnvelope::CallIn(id_a));
}
