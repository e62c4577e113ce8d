use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer handle naming a connection within one relay process.
///
/// Allocated by the relay registry from a monotonic counter, so an id is
/// unique among currently connected peers but carries no meaning across
/// relay restarts. Serializes as a bare integer on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(u32);

impl PeerId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short hex id used to correlate log lines belonging to one connection.
pub fn new_correlation_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_display() {
        assert_eq!(PeerId::new(42).to_string(), "42");
    }

    #[test]
    fn peer_id_serializes_as_bare_integer() {
        let json = serde_json::to_string(&PeerId::new(7)).unwrap();
        assert_eq!(json, "7");

        let back: PeerId = serde_json::from_str("7").unwrap();
        assert_eq!(back, PeerId::new(7));
    }

    #[test]
    fn peer_id_ordering() {
        assert!(PeerId::new(1) < PeerId::new(2));
    }

    #[test]
    fn correlation_id_length() {
        assert_eq!(new_correlation_id().len(), 8);
    }

    #[test]
    fn correlation_id_is_hex() {
        let cid = new_correlation_id();
        assert!(cid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn correlation_id_is_unique() {
        assert_ne!(new_correlation_id(), new_correlation_id());
    }
}
