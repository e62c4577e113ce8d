//! parley-client: call session client for the parley signaling relay.
//!
//! Owns one WebSocket connection to the relay and drives the two-party call
//! state machine (dial → ring → accept → offer/answer/candidate → connected).
//! Media capture and peer negotiation are external subsystems reached through
//! the traits in [`media`]; this crate only sequences them and relays their
//! signaling payloads verbatim.

mod connection;

pub mod client;
pub mod error;
pub mod media;
pub mod session;
pub mod types;

pub use client::CallClient;
pub use error::{ClientError, MediaError, NegotiationError};
pub use media::{ConnState, LocalMedia, MediaCapture, NegotiationEvent, PeerNegotiator};
pub use session::{CallPhase, CallRole};
pub use types::{ClientConfig, ClientEvent, EndReason, IceServerConfig};
