//! Configuration, events, and commands for the call client.

use std::time::Duration;

use parley_common::PeerId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A relay/reflection endpoint (STUN/TURN) handed to the negotiation
/// subsystem for NAT traversal. parley only carries these.
#[derive(Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl std::fmt::Debug for IceServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceServerConfig")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field(
                "credential",
                &self.credential.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Configuration for the call client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_url: String,
    /// STUN/TURN endpoints for the negotiation subsystem.
    pub ice_servers: Vec<IceServerConfig>,
    /// How long to wait for the relay connection to come up.
    pub connect_timeout: Duration,
    /// How long an unanswered outgoing or incoming call may ring before the
    /// session gives up and returns to idle.
    pub ring_timeout: Duration,
    /// Reconnect base delay.
    pub reconnect_delay: Duration,
    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:4100".into(),
            ice_servers: Vec::new(),
            connect_timeout: Duration::from_secs(15),
            ring_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The peer declined or hung up.
    PeerHungUp,
    /// The addressed peer was not connected to the relay.
    PeerUnavailable,
    /// Nobody answered within the ring timeout.
    Timeout,
    /// Local capture could not be acquired.
    MediaFailure,
    /// The peer-to-peer transport failed to come up or broke down.
    NegotiationFailure,
    /// The relay connection dropped mid-call.
    SignalingLost,
    /// The local user hung up.
    LocalHangup,
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Relay connection established.
    Connected,
    /// Relay connection lost; the client keeps reconnecting.
    Disconnected,
    /// The relay assigned us an identity.
    Registered(PeerId),
    /// The set of connected peers changed (local id already filtered out).
    RosterUpdated(Vec<PeerId>),
    /// A peer is calling us.
    IncomingCall { from: PeerId },
    /// Our outgoing call went out and is awaiting an answer.
    OutgoingRinging { to: PeerId },
    /// Media is flowing peer-to-peer.
    CallConnected { peer: PeerId },
    /// The remote media stream arrived and can be rendered.
    RemoteMedia { peer: PeerId },
    /// The call is over.
    CallEnded { peer: PeerId, reason: EndReason },
    /// Non-fatal error.
    Error(String),
}

/// Commands from the application to the connection task.
#[derive(Debug)]
pub(crate) enum CallCommand {
    Dial { target: PeerId },
    Accept,
    HangUp,
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ClientConfig::default();
        assert_eq!(config.relay_url, "ws://127.0.0.1:4100");
        assert!(config.ice_servers.is_empty());
        assert_eq!(config.ring_timeout, Duration::from_secs(30));
        assert!(config.reconnect_delay < config.max_reconnect_delay);
    }

    #[test]
    fn ice_server_debug_redacts_credential() {
        let server = IceServerConfig {
            urls: vec!["turn:turn.example.net:3479".into()],
            username: Some("parley".into()),
            credential: Some("hunter2".into()),
        };
        let debug = format!("{server:?}");
        assert!(debug.contains("turn.example.net"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn ice_server_serde_skips_absent_credentials() {
        let server = IceServerConfig {
            urls: vec!["stun:stun.example.net:3478".into()],
            username: None,
            credential: None,
        };
        let json = serde_json::to_string(&server).unwrap();
        assert_eq!(json, r#"{"urls":["stun:stun.example.net:3478"]}"#);
    }
}
