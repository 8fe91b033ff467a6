use thiserror::Error;

/// Errors raised by a video source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("video device {0} is unavailable: {1}")]
    DeviceUnavailable(String, String),

    #[error("end of stream")]
    EndOfStream,

    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transient failures talking to the signaling backend.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("signaling endpoint answered with status {0}")]
    Status(u16),

    #[error("malformed signaling payload: {0}")]
    Malformed(String),

    #[error("queue backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for ChannelError {
    fn from(e: redis::RedisError) -> Self {
        ChannelError::Backend(e.to_string())
    }
}

/// Failures while negotiating a single peer session.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("malformed remote description: {0}")]
    MalformedDescription(String),

    #[error("no codec matches preference {0}")]
    UnsupportedCodec(String),

    #[error("transport closed before negotiation completed")]
    TransportClosed,

    #[error("ICE gathering did not complete within {0:?}")]
    GatheringTimeout(std::time::Duration),

    #[error("negotiation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("webrtc error: {0}")]
    Webrtc(String),
}

impl From<webrtc::Error> for NegotiationError {
    fn from(e: webrtc::Error) -> Self {
        NegotiationError::Webrtc(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
