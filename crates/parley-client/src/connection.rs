//! Background relay connection loop with auto-reconnect.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use parley_common::protocol::{ClientEnvelope, ServerEnvelope};
use parley_common::PeerId;

use crate::media::{MediaCapture, NegotiationEvent, PeerNegotiator};
use crate::session::CallSession;
use crate::types::{CallCommand, ClientConfig, ClientEvent};

/// Outbound envelopes buffered between the session and the socket writer.
const OUTBOUND_BUFFER: usize = 64;

/// Snapshot state shared with the [`crate::CallClient`] handle.
#[derive(Default)]
pub(crate) struct SharedState {
    pub(crate) local_id: Option<PeerId>,
    pub(crate) roster: Vec<PeerId>,
    pub(crate) connected: bool,
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

/// Background task managing the relay connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: ClientConfig,
    capture: Arc<dyn MediaCapture>,
    negotiator: Arc<dyn PeerNegotiator>,
    shared: Arc<RwLock<SharedState>>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut command_rx: mpsc::Receiver<CallCommand>,
    mut negotiation_rx: mpsc::Receiver<NegotiationEvent>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        info!(url = %config.relay_url, "Connecting to relay");

        match tokio::time::timeout(config.connect_timeout, connect_async(&config.relay_url)).await
        {
            Ok(Ok((ws, _))) => {
                reconnect_delay = config.reconnect_delay;
                shared.write().await.connected = true;
                let _ = event_tx.send(ClientEvent::Connected).await;

                let end = run_session(
                    ws,
                    &config,
                    &capture,
                    &negotiator,
                    &shared,
                    &event_tx,
                    &mut command_rx,
                    &mut negotiation_rx,
                )
                .await;

                // Identity and roster are per-connection; the relay assigns
                // a fresh id after reconnect.
                {
                    let mut state = shared.write().await;
                    state.connected = false;
                    state.local_id = None;
                    state.roster.clear();
                }
                let _ = event_tx.send(ClientEvent::Disconnected).await;

                match end {
                    SessionEnd::Shutdown => {
                        info!("Call client shutting down");
                        return;
                    }
                    SessionEnd::Dropped(reason) => {
                        warn!(reason = %reason, "Relay connection lost");
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to connect to relay");
                let _ = event_tx
                    .send(ClientEvent::Error(format!("connect failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                warn!(timeout = ?config.connect_timeout, "Relay connection timed out");
                let _ = event_tx
                    .send(ClientEvent::Error("connect timed out".into()))
                    .await;
            }
        }

        // Exponential backoff; a Disconnect command still exits promptly.
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            cmd = command_rx.recv() => match cmd {
                Some(CallCommand::Disconnect) | None => return,
                Some(other) => {
                    debug!(command = ?other, "Command ignored while disconnected");
                    let _ = event_tx
                        .send(ClientEvent::Error("not connected to the relay".into()))
                        .await;
                }
            }
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
    }
}

/// Drive one established connection until it drops or the client shuts down.
#[allow(clippy::too_many_arguments)]
async fn run_session(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &ClientConfig,
    capture: &Arc<dyn MediaCapture>,
    negotiator: &Arc<dyn PeerNegotiator>,
    shared: &Arc<RwLock<SharedState>>,
    event_tx: &mpsc::Sender<ClientEvent>,
    command_rx: &mut mpsc::Receiver<CallCommand>,
    negotiation_rx: &mut mpsc::Receiver<NegotiationEvent>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    // Dedicated writer task, so session transitions never block on the
    // socket and outbound envelopes keep flowing while media calls suspend.
    let (out_tx, mut out_rx) = mpsc::channel::<ClientEnvelope>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            let json = serde_json::to_string(&envelope).unwrap();
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = CallSession::new(
        config.ring_timeout,
        Arc::clone(capture),
        Arc::clone(negotiator),
        out_tx,
        event_tx.clone(),
    );

    let mut negotiation_open = true;

    let end = loop {
        let deadline = session.deadline();
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match ServerEnvelope::parse(&text) {
                            Ok(envelope) => {
                                dispatch(&mut session, envelope, shared, event_tx).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "Malformed envelope from relay discarded");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break SessionEnd::Dropped("relay closed connection".into());
                    }
                    Some(Err(e)) => {
                        break SessionEnd::Dropped(format!("ws error: {e}"));
                    }
                    _ => {}
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(CallCommand::Dial { target }) => session.dial(target).await,
                    Some(CallCommand::Accept) => session.accept().await,
                    Some(CallCommand::HangUp) => session.hang_up().await,
                    Some(CallCommand::Disconnect) | None => {
                        // Graceful exit: the peer is told before we vanish.
                        session.hang_up().await;
                        break SessionEnd::Shutdown;
                    }
                }
            }

            event = negotiation_rx.recv(), if negotiation_open => {
                match event {
                    Some(NegotiationEvent::LocalCandidate(candidate)) => {
                        session.on_local_candidate(candidate).await;
                    }
                    Some(NegotiationEvent::ConnectionState(state)) => {
                        session.on_conn_state(state).await;
                    }
                    Some(NegotiationEvent::RemoteMediaArrived) => {
                        session.on_remote_media().await;
                    }
                    None => {
                        debug!("Negotiation event channel closed");
                        negotiation_open = false;
                    }
                }
            }

            _ = ring_deadline(deadline) => {
                session.on_ring_timeout().await;
            }
        }
    };

    if matches!(end, SessionEnd::Dropped(_)) {
        debug!(phase = ?session.phase(), "Connection dropped; clearing session");
        session.on_signaling_lost().await;
        writer.abort();
    } else {
        // Graceful shutdown: dropping the session closes the outbound
        // channel, and the writer drains any farewell envelopes first.
        drop(session);
        let _ = writer.await;
    }
    end
}

/// Route one relay envelope into the shared snapshots and the session.
async fn dispatch(
    session: &mut CallSession,
    envelope: ServerEnvelope,
    shared: &Arc<RwLock<SharedState>>,
    event_tx: &mpsc::Sender<ClientEvent>,
) {
    match envelope {
        ServerEnvelope::UserInfo(id) => {
            shared.write().await.local_id = Some(id);
            session.set_local_id(id);
            info!(id = %id, "Registered with relay");
            let _ = event_tx.send(ClientEvent::Registered(id)).await;
        }
        ServerEnvelope::UserList(ids) => {
            let mut state = shared.write().await;
            let local = state.local_id;
            let roster: Vec<PeerId> = ids.into_iter().filter(|id| Some(*id) != local).collect();
            state.roster = roster.clone();
            drop(state);
            let _ = event_tx.send(ClientEvent::RosterUpdated(roster)).await;
        }
        ServerEnvelope::CallIn(source) => session.on_call_in(source).await,
        ServerEnvelope::RejectCall => session.on_reject_call().await,
        ServerEnvelope::AcceptCall => session.on_accept_call().await,
        ServerEnvelope::Offer(offer) => session.on_offer(offer).await,
        ServerEnvelope::Answer(answer) => session.on_answer(answer).await,
        ServerEnvelope::Candidate(candidate) => session.on_candidate(candidate).await,
        ServerEnvelope::TargetUnavailable(target) => session.on_target_unavailable(target).await,
    }
}

/// Pending forever while no ring deadline is armed.
async fn ring_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
