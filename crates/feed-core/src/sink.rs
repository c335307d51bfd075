//! Outbound messaging seam.

use async_trait::async_trait;

use crate::error::FeedResult;

/// Destination for rendered posts. Failures are reported, never retried.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send `text` to `channel_id`. Fails with `FeedError::Dispatch`.
    async fn send_message(&self, channel_id: &str, text: &str) -> FeedResult<()>;
}
