#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("capture denied: {0}")]
    CaptureDenied(String),

    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("offer failed: {0}")]
    Offer(String),

    #[error("answer failed: {0}")]
    Answer(String),

    #[error("remote description rejected: {0}")]
    RemoteDescription(String),

    #[error("candidate rejected: {0}")]
    Candidate(String),

    #[error("track attach failed: {0}")]
    TrackAttach(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("transport error: {0}")]
    Transport(String),
}
