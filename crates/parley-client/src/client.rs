//! Public handle for the call client.

use std::sync::Arc;

use parley_common::PeerId;
use tokio::sync::{mpsc, RwLock};

use crate::connection::{connection_loop, SharedState};
use crate::media::{MediaCapture, NegotiationEvent, PeerNegotiator};
use crate::types::{CallCommand, ClientConfig, ClientEvent};

/// Handle for one relay connection and its call session.
///
/// All methods are non-blocking; they hand commands to the background
/// connection task, which applies every state transition in order.
pub struct CallClient {
    command_tx: mpsc::Sender<CallCommand>,
    shared: Arc<RwLock<SharedState>>,
}

impl CallClient {
    /// Start the background connection and return `(client, event_receiver)`.
    ///
    /// `capture` and `negotiator` are the seams to the external media
    /// subsystem; `negotiation_rx` carries its candidate/state notifications
    /// back into the client.
    pub fn connect(
        config: ClientConfig,
        capture: Arc<dyn MediaCapture>,
        negotiator: Arc<dyn PeerNegotiator>,
        negotiation_rx: mpsc::Receiver<NegotiationEvent>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let shared = Arc::new(RwLock::new(SharedState::default()));

        tokio::spawn(connection_loop(
            config,
            capture,
            negotiator,
            Arc::clone(&shared),
            event_tx,
            command_rx,
            negotiation_rx,
        ));

        (
            Self {
                command_tx,
                shared,
            },
            event_rx,
        )
    }

    /// Ring a peer from the roster.
    pub async fn dial(&self, target: PeerId) {
        let _ = self.command_tx.send(CallCommand::Dial { target }).await;
    }

    /// Answer the currently ringing incoming call.
    pub async fn accept(&self) {
        let _ = self.command_tx.send(CallCommand::Accept).await;
    }

    /// Decline the current call, or hang up an established one.
    pub async fn hang_up(&self) {
        let _ = self.command_tx.send(CallCommand::HangUp).await;
    }

    /// Hang up, close the relay connection, and stop the background task.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(CallCommand::Disconnect).await;
    }

    /// The id the relay assigned to this connection, once registered.
    pub async fn local_id(&self) -> Option<PeerId> {
        self.shared.read().await.local_id
    }

    /// Currently connected peers, local id filtered out.
    pub async fn roster(&self) -> Vec<PeerId> {
        self.shared.read().await.roster.clone()
    }

    /// Whether the relay connection is up.
    pub async fn is_connected(&self) -> bool {
        self.shared.read().await.connected
    }
}
