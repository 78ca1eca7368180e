//! Channel factories and handle aliases.

use super::types::{ProcessResult, SettlementInput, SourceMessage};
use tokio::sync::{mpsc, watch};

/// Default capacity of the job queue between ingestion and the worker pool.
///
/// When the queue is full ingestion waits, which in turn stops pulling from
/// the source.
pub const DEFAULT_JOB_BUFFER: usize = 100;

/// Default capacity of the settlement queue.
pub const DEFAULT_SETTLEMENT_BUFFER: usize = 100;

/// Capacity of the hand-off between a source adapter and ingestion.
pub const SOURCE_SINK_BUFFER: usize = 10;

/// Sender handle for raw messages produced by an event source.
pub type SourceSink = mpsc::Sender<SourceMessage>;
/// Receiver handle for raw messages produced by an event source.
pub type SourceStream = mpsc::Receiver<SourceMessage>;

/// Sender handle for jobs.
pub type JobSender = mpsc::Sender<SourceMessage>;
/// Receiver handle for jobs.
pub type JobReceiver = mpsc::Receiver<SourceMessage>;

/// Sender handle for processing results.
pub type ResultSender = mpsc::Sender<ProcessResult>;
/// Receiver handle for processing results.
pub type ResultReceiver = mpsc::Receiver<ProcessResult>;

/// Sender handle for settlement inputs.
pub type SettlementSender = mpsc::Sender<SettlementInput>;
/// Receiver handle for settlement inputs.
pub type SettlementReceiver = mpsc::Receiver<SettlementInput>;

/// Broadcast stop signal. `true` means stop.
pub type StopSender = watch::Sender<bool>;
/// Observer side of the stop signal.
pub type StopReceiver = watch::Receiver<bool>;

/// What the settlement stage should do with its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementControl {
    /// Keep consuming.
    Open,
    /// Refuse new items, settle what is already buffered, then exit.
    Drain,
    /// Refuse new items and exit without settling the buffer.
    Discard,
}

/// Sender handle for the settlement control signal.
pub type SettlementControlSender = watch::Sender<SettlementControl>;
/// Receiver handle for the settlement control signal.
pub type SettlementControlReceiver = watch::Receiver<SettlementControl>;

/// Create the hand-off channel between a source adapter and ingestion.
pub fn source_sink_channel() -> (SourceSink, SourceStream) {
    mpsc::channel(SOURCE_SINK_BUFFER)
}

/// Create the bounded job queue.
///
/// A capacity of zero is raised to one, since tokio channels cannot be
/// unbuffered.
pub fn job_channel(capacity: usize) -> (JobSender, JobReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Create the bounded settlement queue.
pub fn settlement_channel(capacity: usize) -> (SettlementSender, SettlementReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Create a stop signal, initially not set.
pub fn stop_channel() -> (StopSender, StopReceiver) {
    watch::channel(false)
}

/// Create the settlement control signal, initially [`SettlementControl::Open`].
pub fn settlement_control_channel() -> (SettlementControlSender, SettlementControlReceiver) {
    watch::channel(SettlementControl::Open)
}

/// Set the stop signal.
///
/// Returns `true` only for the call that actually flipped it, so callers can
/// log or act exactly once no matter how many paths request a stop.
pub fn request_stop(stop_tx: &StopSender) -> bool {
    stop_tx.send_if_modified(|stop| {
        if *stop {
            false
        } else {
            *stop = true;
            true
        }
    })
}

/// Wait until the stop signal is set.
///
/// Also returns when every sender is gone, which is treated as a stop.
pub async fn stop_requested(stop_rx: &mut StopReceiver) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}
