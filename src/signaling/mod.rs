//! Offer/answer exchange with the remote side.
//!
//! Two variants exist: [`HttpChannel`] polls a small HTTP service and
//! [`QueueChannel`] pops offers from and pushes answers onto a list-based queue.

pub mod http;
pub mod queue;

use crate::error::ChannelError;
use crate::peer::SignalingEnvelope;
use async_trait::async_trait;

pub use http::HttpChannel;
pub use queue::{MemoryQueue, QueueBackend, QueueChannel, RedisQueue, ANSWER_DELIMITER};

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Non-blocking poll for a pending offer. `Ok(None)` means nothing is
    /// pending yet; errors are transient backend failures.
    async fn fetch_offer(&self) -> Result<Option<SignalingEnvelope>, ChannelError>;

    /// Publishes `answer` for the offer identified by `correlation_id`
    /// (the offer SDP).
    async fn publish_answer(
        &self,
        correlation_id: &str,
        answer: &SignalingEnvelope,
    ) -> Result<(), ChannelError>;
}
