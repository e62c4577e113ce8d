//! parley-relay: WebSocket signaling relay for two-party calls.
//!
//! Accepts WebSocket connections, assigns each an integer peer id, and
//! forwards call-signaling envelopes between peers by id. The relay never
//! interprets offer/answer/candidate payloads; media itself flows
//! peer-to-peer once negotiation completes.

pub mod connection;
pub mod registry;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

pub use connection::handle_connection;
pub use registry::Registry;

/// Accept loop: one spawned handler task per connection. A failed handshake
/// or a panicking handler never affects other connections.
pub async fn serve(listener: TcpListener, registry: Registry) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let registry = registry.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, registry).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
