//! Call session state machine.
//!
//! One session per client: dial → ring → accept → offer/answer/candidate →
//! connected, and back to idle on rejection, timeout, or disconnection from
//! either side. All transitions run on the connection task, one at a time,
//! so a remote envelope and a local command can never interleave mid-update.

use std::sync::Arc;
use std::time::Duration;

use parley_common::protocol::ClientEnvelope;
use parley_common::PeerId;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::media::{ConnState, LocalMedia, MediaCapture, PeerNegotiator};
use crate::types::{ClientEvent, EndReason};

// ---------------------------------------------------------------------------
// Phases & roles
// ---------------------------------------------------------------------------

/// Where the session currently is in the call lifecycle. `Idle` is both the
/// initial phase and the one every other phase falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    /// Caller, waiting for the peer to answer or decline.
    Calling,
    /// Callee, waiting for the local user to answer or decline.
    Ringing,
    /// Offer/answer/candidate exchange in flight.
    Negotiating,
    /// The negotiation subsystem reports media flowing.
    Connected,
}

/// Which side of the call we are. The caller emits the initial offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-client state for one active or pending call.
pub(crate) struct CallSession {
    local_id: Option<PeerId>,
    peer: Option<PeerId>,
    role: Option<CallRole>,
    phase: CallPhase,
    media: Option<LocalMedia>,
    deadline: Option<Instant>,
    ring_timeout: Duration,
    capture: Arc<dyn MediaCapture>,
    negotiator: Arc<dyn PeerNegotiator>,
    out_tx: mpsc::Sender<ClientEnvelope>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl CallSession {
    pub(crate) fn new(
        ring_timeout: Duration,
        capture: Arc<dyn MediaCapture>,
        negotiator: Arc<dyn PeerNegotiator>,
        out_tx: mpsc::Sender<ClientEnvelope>,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            local_id: None,
            peer: None,
            role: None,
            phase: CallPhase::Idle,
            media: None,
            deadline: None,
            ring_timeout,
            capture,
            negotiator,
            out_tx,
            event_tx,
        }
    }

    pub(crate) fn set_local_id(&mut self, id: PeerId) {
        self.local_id = Some(id);
    }

    pub(crate) fn phase(&self) -> CallPhase {
        self.phase
    }

    /// Ring-timeout deadline while `Calling`/`Ringing`, for the select loop.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    // -----------------------------------------------------------------------
    // Local actions
    // -----------------------------------------------------------------------

    /// Ring a peer. Only valid while idle; one call at a time.
    pub(crate) async fn dial(&mut self, target: PeerId) {
        if self.phase != CallPhase::Idle {
            self.emit(ClientEvent::Error("already in a call".into())).await;
            return;
        }
        let Some(local) = self.local_id else {
            self.emit(ClientEvent::Error("not registered with the relay yet".into()))
                .await;
            return;
        };
        self.peer = Some(target);
        self.role = Some(CallRole::Caller);
        self.phase = CallPhase::Calling;
        self.deadline = Some(Instant::now() + self.ring_timeout);
        self.send(ClientEnvelope::Call {
            source_user_id: local,
            target_user_id: target,
        })
        .await;
        info!(peer = %target, "Dialing");
        self.emit(ClientEvent::OutgoingRinging { to: target }).await;
    }

    /// Answer the currently ringing incoming call.
    pub(crate) async fn accept(&mut self) {
        if self.phase != CallPhase::Ringing {
            self.emit(ClientEvent::Error("no incoming call to accept".into()))
                .await;
            return;
        }
        let Some(peer) = self.peer else { return };
        self.send(ClientEnvelope::AcceptCall(peer)).await;
        // Phase moves only after capture succeeds: while acquisition is
        // suspended there is no half-initialized negotiating session.
        if !self.acquire_media().await {
            return;
        }
        self.phase = CallPhase::Negotiating;
        self.deadline = None;
        info!(peer = %peer, "Call accepted, awaiting offer");
    }

    /// Decline the current call, or hang up an established one.
    pub(crate) async fn hang_up(&mut self) {
        if self.phase == CallPhase::Idle {
            return;
        }
        self.reject_and_finish(EndReason::LocalHangup).await;
    }

    // -----------------------------------------------------------------------
    // Relay envelopes
    // -----------------------------------------------------------------------

    /// A peer is ringing us.
    pub(crate) async fn on_call_in(&mut self, source: PeerId) {
        if self.phase != CallPhase::Idle {
            // Busy: decline the second call, leave the live session alone.
            debug!(from = %source, phase = ?self.phase, "Busy, auto-rejecting call");
            self.send(ClientEnvelope::RejectCall(source)).await;
            return;
        }
        self.peer = Some(source);
        self.role = Some(CallRole::Callee);
        self.phase = CallPhase::Ringing;
        self.deadline = Some(Instant::now() + self.ring_timeout);
        info!(peer = %source, "Incoming call");
        self.emit(ClientEvent::IncomingCall { from: source }).await;
    }

    /// The peer declined or hung up. Valid from any non-idle phase: idle is
    /// reachable from everywhere via rejection.
    pub(crate) async fn on_reject_call(&mut self) {
        if self.phase == CallPhase::Idle {
            debug!("rejectCall with no session, ignored");
            return;
        }
        self.finish(EndReason::PeerHungUp).await;
    }

    /// The peer answered our call; acquire media and open with the offer.
    pub(crate) async fn on_accept_call(&mut self) {
        if self.phase != CallPhase::Calling {
            debug!(phase = ?self.phase, "acceptCall out of phase, ignored");
            return;
        }
        let Some(peer) = self.peer else { return };
        if !self.acquire_media().await {
            return;
        }
        self.phase = CallPhase::Negotiating;
        self.deadline = None;
        match self.negotiator.create_offer().await {
            Ok(offer) => {
                self.send(ClientEnvelope::Offer {
                    user_id: peer,
                    offer,
                })
                .await;
            }
            Err(e) => {
                self.emit(ClientEvent::Error(format!("negotiation error: {e}")))
                    .await;
                self.reject_and_finish(EndReason::NegotiationFailure).await;
            }
        }
    }

    /// The caller's session description arrived; answer it.
    pub(crate) async fn on_offer(&mut self, offer: serde_json::Value) {
        if !matches!(self.phase, CallPhase::Ringing | CallPhase::Negotiating) {
            debug!(phase = ?self.phase, "offer out of phase, ignored");
            return;
        }
        let Some(peer) = self.peer else { return };
        // Under reordering an offer can outrun our own accept; make sure
        // capture exists so the answer carries local tracks.
        if self.media.is_none() && !self.acquire_media().await {
            return;
        }
        self.phase = CallPhase::Negotiating;
        self.deadline = None;
        match self.negotiator.apply_remote_offer(offer).await {
            Ok(answer) => {
                self.send(ClientEnvelope::Answer {
                    user_id: peer,
                    answer,
                })
                .await;
            }
            Err(e) => {
                self.emit(ClientEvent::Error(format!("negotiation error: {e}")))
                    .await;
                self.reject_and_finish(EndReason::NegotiationFailure).await;
            }
        }
    }

    /// The callee's answer to our offer.
    pub(crate) async fn on_answer(&mut self, answer: serde_json::Value) {
        if self.phase != CallPhase::Negotiating {
            debug!(phase = ?self.phase, "answer out of phase, ignored");
            return;
        }
        if let Err(e) = self.negotiator.apply_remote_answer(answer).await {
            self.emit(ClientEvent::Error(format!("negotiation error: {e}")))
                .await;
            self.reject_and_finish(EndReason::NegotiationFailure).await;
        }
    }

    /// A remote ICE candidate for the live negotiation.
    pub(crate) async fn on_candidate(&mut self, candidate: serde_json::Value) {
        if !matches!(self.phase, CallPhase::Negotiating | CallPhase::Connected) {
            debug!(phase = ?self.phase, "candidate out of phase, ignored");
            return;
        }
        if let Err(e) = self.negotiator.add_remote_candidate(candidate).await {
            // Individual candidates may be rejected without dooming the call.
            debug!(error = %e, "Remote candidate rejected");
        }
    }

    /// The relay reported our counterpart gone.
    pub(crate) async fn on_target_unavailable(&mut self, target: PeerId) {
        if self.peer == Some(target) && self.phase != CallPhase::Idle {
            info!(peer = %target, "Peer unavailable");
            self.finish(EndReason::PeerUnavailable).await;
        } else {
            debug!(target = %target, "targetUnavailable without a matching session, ignored");
        }
    }

    // -----------------------------------------------------------------------
    // Negotiation subsystem events
    // -----------------------------------------------------------------------

    /// A local ICE candidate was discovered. Always addressed to the stored
    /// peer, whichever role discovered it.
    pub(crate) async fn on_local_candidate(&mut self, candidate: serde_json::Value) {
        if !matches!(self.phase, CallPhase::Negotiating | CallPhase::Connected) {
            debug!(phase = ?self.phase, "local candidate with no negotiation, dropped");
            return;
        }
        let Some(peer) = self.peer else { return };
        self.send(ClientEnvelope::Candidate {
            user_id: peer,
            candidate,
        })
        .await;
    }

    /// Transport state reported by the negotiation subsystem.
    pub(crate) async fn on_conn_state(&mut self, state: ConnState) {
        match state {
            ConnState::Connected => {
                if self.phase == CallPhase::Negotiating {
                    self.phase = CallPhase::Connected;
                    self.deadline = None;
                    if let Some(peer) = self.peer {
                        info!(peer = %peer, role = ?self.role, "Call connected");
                        self.emit(ClientEvent::CallConnected { peer }).await;
                    }
                }
            }
            ConnState::Disconnected => {
                if self.phase == CallPhase::Connected {
                    self.finish(EndReason::PeerHungUp).await;
                }
            }
            ConnState::Failed => {
                if self.phase != CallPhase::Idle {
                    self.finish(EndReason::NegotiationFailure).await;
                }
            }
        }
    }

    /// The remote media stream arrived.
    pub(crate) async fn on_remote_media(&mut self) {
        if let Some(peer) = self.peer {
            self.emit(ClientEvent::RemoteMedia { peer }).await;
        }
    }

    // -----------------------------------------------------------------------
    // Timeout & transport loss
    // -----------------------------------------------------------------------

    /// The ring deadline expired with nobody answering.
    pub(crate) async fn on_ring_timeout(&mut self) {
        if !matches!(self.phase, CallPhase::Calling | CallPhase::Ringing) {
            self.deadline = None;
            return;
        }
        info!(peer = ?self.peer, phase = ?self.phase, "Ring timeout");
        self.reject_and_finish(EndReason::Timeout).await;
    }

    /// The relay connection dropped; an in-flight call cannot progress.
    pub(crate) async fn on_signaling_lost(&mut self) {
        if self.phase != CallPhase::Idle {
            self.finish(EndReason::SignalingLost).await;
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Acquire capture and attach tracks. On failure the peer is unstuck
    /// with a reject and the session returns to idle.
    async fn acquire_media(&mut self) -> bool {
        match self.capture.acquire().await {
            Ok(media) => match self.negotiator.add_tracks(&media).await {
                Ok(()) => {
                    self.media = Some(media);
                    true
                }
                Err(e) => {
                    self.emit(ClientEvent::Error(format!("negotiation error: {e}")))
                        .await;
                    self.capture.release(&media).await;
                    self.reject_and_finish(EndReason::NegotiationFailure).await;
                    false
                }
            },
            Err(e) => {
                self.emit(ClientEvent::Error(format!("media error: {e}"))).await;
                self.reject_and_finish(EndReason::MediaFailure).await;
                false
            }
        }
    }

    /// Notify the peer, then tear down and report.
    async fn reject_and_finish(&mut self, reason: EndReason) {
        if let Some(peer) = self.peer {
            self.send(ClientEnvelope::RejectCall(peer)).await;
        }
        self.finish(reason).await;
    }

    /// Tear down and report how the call ended.
    async fn finish(&mut self, reason: EndReason) {
        let peer = self.peer;
        self.teardown().await;
        if let Some(peer) = peer {
            self.emit(ClientEvent::CallEnded { peer, reason }).await;
        }
    }

    /// Release capture, close the negotiation, reset to idle. Every
    /// reject/disconnect/failure path funnels through here; a second
    /// invocation finds nothing left to release.
    async fn teardown(&mut self) {
        if let Some(media) = self.media.take() {
            self.capture.release(&media).await;
        }
        self.negotiator.close().await;
        self.peer = None;
        self.role = None;
        self.deadline = None;
        self.phase = CallPhase::Idle;
    }

    async fn send(&self, envelope: ClientEnvelope) {
        if self.out_tx.send(envelope).await.is_err() {
            debug!("Outbound channel closed; envelope dropped");
        }
    }

    async fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event).await;
    }
}
