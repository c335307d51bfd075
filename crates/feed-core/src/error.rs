//! Error taxonomy for the relay core.

use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

/// Every failure the core can observe.
///
/// Only [`FeedError::ConfigResolution`] is fatal, and only at startup. The
/// remaining variants are logged and retried on schedule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Channel map could not be resolved (config file, follow list).
    #[error("config resolution failed: {0}")]
    ConfigResolution(String),

    /// Installed rules could not be listed.
    #[error("failed to fetch existing filter rules: {0}")]
    RemoteFetch(String),

    /// A batch add or delete of filter rules failed as a whole.
    #[error("failed to update filter rules: {0}")]
    RemoteMutation(String),

    /// The streaming connection could not be opened.
    #[error("failed to open stream: {0}")]
    StreamOpen(String),

    /// Error reported while the stream was open.
    #[error("stream error: {0}")]
    StreamRuntime(String),

    /// Sending to one destination failed.
    #[error("failed to send to channel {channel}: {reason}")]
    Dispatch { channel: String, reason: String },

    /// A compiled rule would exceed the remote length limit.
    #[error("filter rule exceeds {limit} bytes: {value:?}")]
    RuleTooLong { value: String, limit: usize },
}

impl FeedError {
    /// Whether this error should abort startup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigResolution(_))
    }
}
