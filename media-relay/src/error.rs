pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// No chain of converters leads from `from` to `to`.
    #[error("conversion unsupported: {from} -> {to}")]
    ConversionUnsupported { from: String, to: String },

    /// A signaling continuation named a session that is not live.
    #[error("unknown rtc session: {0}")]
    UnknownSession(String),

    #[error("transcoder error: {0}")]
    Transcoder(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("peer connection error: {0}")]
    PeerConnection(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
