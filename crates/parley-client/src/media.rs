//! Seams to the external media and negotiation subsystems.
//!
//! parley never touches devices or transports itself: the embedding
//! application supplies these capabilities and feeds negotiation
//! notifications back through [`NegotiationEvent`]. Session descriptions and
//! ICE candidates stay opaque `serde_json::Value`s end to end.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{MediaError, NegotiationError};

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Opaque handle to an acquired local audio/video stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub stream_id: String,
}

/// Local capture devices (microphone + camera).
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire the local audio/video stream. May suspend while the platform
    /// prompts for device permission.
    async fn acquire(&self) -> Result<LocalMedia, MediaError>;

    /// Stop the stream's tracks. Must tolerate an already-released stream.
    async fn release(&self, media: &LocalMedia);
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// One peer-to-peer negotiation, backed by the external RTC subsystem.
///
/// `close` releases the current peer connection; a subsequent
/// `create_offer`/`apply_remote_offer` is expected to start a fresh one.
#[async_trait]
pub trait PeerNegotiator: Send + Sync {
    /// Attach the acquired local tracks before creating or answering an
    /// offer.
    async fn add_tracks(&self, media: &LocalMedia) -> Result<(), NegotiationError>;

    /// Create the local session description (caller side).
    async fn create_offer(&self) -> Result<Value, NegotiationError>;

    /// Apply the remote offer and produce the local answer (callee side).
    async fn apply_remote_offer(&self, offer: Value) -> Result<Value, NegotiationError>;

    /// Apply the remote answer to a previously created offer (caller side).
    async fn apply_remote_answer(&self, answer: Value) -> Result<(), NegotiationError>;

    /// Feed a remote ICE candidate into the negotiation.
    async fn add_remote_candidate(&self, candidate: Value) -> Result<(), NegotiationError>;

    /// Tear the peer connection down. Must tolerate repeated calls.
    async fn close(&self);
}

/// Transport connection state reported by the negotiation subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    Disconnected,
    Failed,
}

/// Asynchronous notifications produced by the negotiation subsystem and
/// consumed by the client's connection loop.
#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    /// A local ICE candidate was discovered and must be relayed to the peer.
    LocalCandidate(Value),

    /// The peer-to-peer transport changed state.
    ConnectionState(ConnState),

    /// The remote media stream arrived and can be rendered.
    RemoteMediaArrived,
}
