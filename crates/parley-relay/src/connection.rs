//! Per-connection handler: register, broadcast membership, route envelopes.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use parley_common::id::new_correlation_id;
use parley_common::protocol::{ClientEnvelope, ServerEnvelope};
use parley_common::PeerId;

use crate::registry::Registry;

/// Outbound envelopes buffered per connection before backpressure kicks in.
const OUTBOUND_BUFFER: usize = 256;

/// Handle a single WebSocket connection from registration to deregistration.
pub async fn handle_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    addr: SocketAddr,
    registry: Registry,
) {
    let conn = new_correlation_id();
    let (mut sink, mut stream) = ws.split();

    // 1. Register and tell the client who it is.
    let (tx, mut rx) = mpsc::channel::<ServerEnvelope>(OUTBOUND_BUFFER);
    let peer_id = registry.register(tx).await;

    tracing::info!(conn = %conn, peer = %addr, id = %peer_id, "Client registered");

    if send_envelope(&mut sink, &ServerEnvelope::UserInfo(peer_id))
        .await
        .is_err()
    {
        registry.deregister(peer_id).await;
        return;
    }

    // 2. Refresh every client's roster, the new connection included.
    broadcast_user_list(&registry).await;

    let mut routing_misses: u64 = 0;

    // 3. Forwarding loop.
    loop {
        tokio::select! {
            // Envelopes routed to this client → its WebSocket.
            Some(envelope) = rx.recv() => {
                if send_envelope(&mut sink, &envelope).await.is_err() {
                    break;
                }
            }

            // Frames from this client → parse once, route by target id.
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match ClientEnvelope::parse(&text) {
                            Ok(envelope) => {
                                route(&registry, peer_id, envelope, &mut routing_misses).await;
                            }
                            Err(e) => {
                                // The frame is discarded; the connection lives on.
                                tracing::warn!(conn = %conn, id = %peer_id, error = %e, "Malformed envelope discarded");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(conn = %conn, peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 4. Cleanup. The roster is re-broadcast on leave as well as join, so
    // no client is left holding a stale peer list.
    registry.deregister(peer_id).await;
    broadcast_user_list(&registry).await;

    let remaining = registry.len().await;
    tracing::info!(
        conn = %conn,
        peer = %addr,
        id = %peer_id,
        routing_misses,
        remaining,
        "Client disconnected"
    );
}

/// Route one inbound envelope to the peer it addresses.
async fn route(
    registry: &Registry,
    from: PeerId,
    envelope: ClientEnvelope,
    routing_misses: &mut u64,
) {
    let (target, forward) = envelope.into_forward();
    match registry.sender(target).await {
        Some(peer_tx) => {
            tracing::debug!(from = %from, to = %target, kind = forward.kind(), "Forwarding envelope");
            if peer_tx.send(forward).await.is_err() {
                // Channel closed under us; the target is mid-disconnect.
                *routing_misses += 1;
                tracing::info!(from = %from, to = %target, "Routing miss: target disconnecting");
                notify_unavailable(registry, from, target).await;
            }
        }
        None => {
            *routing_misses += 1;
            tracing::info!(from = %from, to = %target, "Routing miss: target not registered");
            notify_unavailable(registry, from, target).await;
        }
    }
}

/// Tell the sender its target is gone, instead of dropping silently.
async fn notify_unavailable(registry: &Registry, from: PeerId, target: PeerId) {
    if let Some(tx) = registry.sender(from).await {
        // try_send: this runs on the sender's own handler task, which is
        // also the consumer of this channel; blocking here could deadlock.
        let _ = tx.try_send(ServerEnvelope::TargetUnavailable(target));
    }
}

/// Send the current membership to every connected client.
async fn broadcast_user_list(registry: &Registry) {
    let peers = registry.snapshot().await;
    let roster: Vec<PeerId> = peers.iter().map(|(id, _)| *id).collect();
    for (id, tx) in peers {
        if tx.send(ServerEnvelope::UserList(roster.clone())).await.is_err() {
            tracing::debug!(peer = %id, "Roster broadcast skipped: channel closed");
        }
    }
}

/// Serialize and send one envelope as a JSON text frame.
async fn send_envelope(
    sink: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        Message,
    >,
    envelope: &ServerEnvelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(envelope).unwrap();
    sink.send(Message::Text(json.into())).await
}
