//! Acknowledger processor.
//!
//! Drains the worker pool's results and commits the source position of each
//! successful one. Failed results are logged and left uncommitted so the
//! source delivers them again after a restart.
//!
//! It keeps running until the result channel closes, which happens once all
//! workers have exited, so no result produced during a graceful drain is
//! lost. Cancellation stops it immediately.

use crate::events::{ProcessResult, ResultReceiver};
use crate::source::EventSource;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters reported when the acknowledger exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckSummary {
    pub committed: u64,
    pub rejected: u64,
    pub commit_failures: u64,
}

pub struct Acknowledger {
    source: Arc<dyn EventSource>,
    results: ResultReceiver,
    cancel: CancellationToken,
}

impl Acknowledger {
    pub fn new(
        source: Arc<dyn EventSource>,
        results: ResultReceiver,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            results,
            cancel,
        }
    }

    pub async fn run(mut self) -> AckSummary {
        info!("Acknowledger started");
        let mut summary = AckSummary::default();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Acknowledger cancelled");
                    break;
                }
                result = self.results.recv() => match result {
                    Some(result) => self.handle(result, &mut summary).await,
                    None => {
                        info!("Result channel closed");
                        break;
                    }
                }
            }
        }

        info!(
            committed = summary.committed,
            rejected = summary.rejected,
            commit_failures = summary.commit_failures,
            "Acknowledger stopped"
        );
        summary
    }

    async fn handle(&self, result: ProcessResult, summary: &mut AckSummary) {
        let Some(position) = result.committable_position() else {
            summary.rejected += 1;
            match (&result.position, &result.error) {
                (Some(position), Some(e)) => {
                    warn!(position = %position, error = %e, "Not acknowledging failed message")
                }
                (None, Some(e)) => warn!(error = %e, "Not acknowledging unattributed failure"),
                (_, None) => warn!("Not acknowledging result without position"),
            }
            return;
        };

        let acknowledged = tokio::select! {
            _ = self.cancel.cancelled() => {
                summary.commit_failures += 1;
                warn!(position = %position, "Acknowledgment cancelled, message will be redelivered");
                return;
            }
            acknowledged = self.source.acknowledge(position) => acknowledged,
        };

        match acknowledged {
            Ok(()) => {
                summary.committed += 1;
                debug!(position = %position, "Message acknowledged");
            }
            Err(e) => {
                summary.commit_failures += 1;
                error!(position = %position, error = %e, "Failed to acknowledge message");
            }
        }
    }
}
