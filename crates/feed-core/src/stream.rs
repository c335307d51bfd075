//! Inbound stream seam.
//!
//! The transport pushes every signal it sees into one channel of
//! [`StreamEvent`]s. The channel closing means the transport terminated.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{FeedError, FeedResult};
use crate::types::PostEvent;

/// Buffer between the transport reader and the supervisor loop.
pub const EVENT_BUFFER: usize = 256;

/// Everything that can arrive on an open stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A post selected by one or more installed rules.
    Post(Box<PostEvent>),
    /// Informational message from the service.
    System(String),
    /// Transient `FeedError::StreamRuntime`; the stream stays open unless
    /// the channel closes.
    Error(FeedError),
    /// Heartbeat with no payload.
    KeepAlive,
}

/// Opens the long-lived filtered stream.
#[async_trait]
pub trait FeedStream: Send + Sync {
    /// Connect with the currently installed rules. Fails with
    /// `FeedError::StreamOpen`. Dropping the receiver disconnects.
    async fn open(&self) -> FeedResult<mpsc::Receiver<StreamEvent>>;
}
