//! Inbound event source seam.
//!
//! A source pushes messages into a sink until cancelled, and commits
//! positions on request. Positions are only acknowledged after the reward in
//! the message has been stored, so a restart replays anything not yet
//! persisted.

use crate::events::{SourcePosition, SourceSink};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("event source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to acknowledge {position}: {reason}")]
    Acknowledge {
        position: SourcePosition,
        reason: String,
    },
    #[error("event source task aborted: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Push messages into `sink` until `cancel` fires or the sink closes.
    ///
    /// Returning `Ok` means the source finished cleanly. An error is fatal
    /// for the pipeline.
    async fn consume(&self, sink: SourceSink, cancel: CancellationToken)
    -> Result<(), SourceError>;

    /// Commit `position` so it is not delivered again.
    async fn acknowledge(&self, position: &SourcePosition) -> Result<(), SourceError>;
}
