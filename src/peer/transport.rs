use crate::error::NegotiationError;
use crate::peer::state::{ConnectionState, GatheringState};
use crate::peer::types::{SessionId, SignalingEnvelope};
use crate::source::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Connection-state change of one session's transport.
pub type StateEvent = (SessionId, ConnectionState);

/// The underlying peer connection of one session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn set_remote_description(&self, offer: &SignalingEnvelope) -> Result<(), NegotiationError>;

    /// Adds an outgoing video track fed from `frames`.
    async fn attach_video(&self, frames: broadcast::Receiver<Frame>) -> Result<(), NegotiationError>;

    /// Creates the answer and installs it as the local description.
    async fn create_answer(&self) -> Result<(), NegotiationError>;

    fn gathering_state(&self) -> GatheringState;

    fn connection_state(&self) -> ConnectionState;

    async fn local_description(&self) -> Option<SignalingEnvelope>;

    async fn close(&self) -> Result<(), NegotiationError>;

    /// Diagnostics logged when the connection fails.
    async fn log_failure(&self) {}
}

/// Creates transports. Every state change of a created transport is sent
/// to `events` tagged with `id`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        id: &SessionId,
        events: mpsc::UnboundedSender<StateEvent>,
    ) -> Result<Arc<dyn Transport>, NegotiationError>;
}
