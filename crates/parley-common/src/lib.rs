pub mod error;
pub mod id;
pub mod protocol;

pub use error::ProtocolError;
pub use id::PeerId;
pub use protocol::{ClientEnvelope, ServerEnvelope};
