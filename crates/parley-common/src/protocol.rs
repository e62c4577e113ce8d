//! Wire protocol for the signaling relay.
//!
//! Every message is a JSON envelope `{ "type": ..., "data": ... }` on a
//! persistent WebSocket, one per client. Client-bound and relay-bound
//! messages are separate closed enums so routing and the client state
//! machine both match exhaustively. Offer/answer/candidate payloads are
//! opaque `serde_json::Value`s produced by the negotiation subsystem and
//! forwarded verbatim.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::id::PeerId;

// ---------------------------------------------------------------------------
// Client → relay
// ---------------------------------------------------------------------------

/// Envelopes a client sends to the relay. Each carries the id of the peer
/// it should be delivered to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientEnvelope {
    /// Ring a peer.
    #[serde(rename_all = "camelCase")]
    Call {
        source_user_id: PeerId,
        target_user_id: PeerId,
    },

    /// Decline or hang up on the addressed peer.
    RejectCall(PeerId),

    /// Answer the addressed peer's call.
    AcceptCall(PeerId),

    /// Session description for the addressed peer.
    #[serde(rename_all = "camelCase")]
    Offer {
        user_id: PeerId,
        offer: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    Answer {
        user_id: PeerId,
        answer: serde_json::Value,
    },

    /// ICE candidate for the addressed peer.
    #[serde(rename_all = "camelCase")]
    Candidate {
        user_id: PeerId,
        candidate: serde_json::Value,
    },
}

impl ClientEnvelope {
    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEnvelope::Call { .. } => "call",
            ClientEnvelope::RejectCall(_) => "rejectCall",
            ClientEnvelope::AcceptCall(_) => "acceptCall",
            ClientEnvelope::Offer { .. } => "offer",
            ClientEnvelope::Answer { .. } => "answer",
            ClientEnvelope::Candidate { .. } => "candidate",
        }
    }

    /// Split an inbound envelope into its routing target and the envelope
    /// the relay delivers to that target. This is the relay's entire
    /// routing table; the relay never looks past the target id.
    pub fn into_forward(self) -> (PeerId, ServerEnvelope) {
        match self {
            ClientEnvelope::Call {
                source_user_id,
                target_user_id,
            } => (target_user_id, ServerEnvelope::CallIn(source_user_id)),
            ClientEnvelope::RejectCall(target) => (target, ServerEnvelope::RejectCall),
            ClientEnvelope::AcceptCall(target) => (target, ServerEnvelope::AcceptCall),
            ClientEnvelope::Offer { user_id, offer } => (user_id, ServerEnvelope::Offer(offer)),
            ClientEnvelope::Answer { user_id, answer } => (user_id, ServerEnvelope::Answer(answer)),
            ClientEnvelope::Candidate { user_id, candidate } => {
                (user_id, ServerEnvelope::Candidate(candidate))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Relay → client
// ---------------------------------------------------------------------------

/// Envelopes the relay delivers to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEnvelope {
    /// The id the relay assigned to this connection.
    UserInfo(PeerId),

    /// All currently connected ids, in join order. Sent to every client on
    /// each join and each leave.
    UserList(Vec<PeerId>),

    /// A peer is ringing you; carries the caller's id.
    CallIn(PeerId),

    /// The peer declined or hung up.
    RejectCall,

    /// The peer answered; the caller starts the offer exchange.
    AcceptCall,

    Offer(serde_json::Value),

    Answer(serde_json::Value),

    Candidate(serde_json::Value),

    /// A forwarded envelope addressed a peer that is not connected.
    TargetUnavailable(PeerId),
}

impl ServerEnvelope {
    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEnvelope::UserInfo(_) => "userInfo",
            ServerEnvelope::UserList(_) => "userList",
            ServerEnvelope::CallIn(_) => "callIn",
            ServerEnvelope::RejectCall => "rejectCall",
            ServerEnvelope::AcceptCall => "acceptCall",
            ServerEnvelope::Offer(_) => "offer",
            ServerEnvelope::Answer(_) => "answer",
            ServerEnvelope::Candidate(_) => "candidate",
            ServerEnvelope::TargetUnavailable(_) => "targetUnavailable",
        }
    }
}
