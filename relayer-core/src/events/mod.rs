//! Messages and channels of the relay pipeline.
//!
//! # Flow
//!
//! 1. `EventSource` pushes `SourceMessage` -> `Ingestor`
//! 2. `Ingestor` forwards `SourceMessage` (the job) -> `WorkerPool`
//! 3. `RewardProcessor` emits `ProcessResult` -> `Acknowledger`
//!    and `SettlementInput` -> `Settler`
//!
//! Every channel is bounded. Stop signals are `watch` channels so they can be
//! observed any number of times by any number of tasks.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_JOB_BUFFER, DEFAULT_SETTLEMENT_BUFFER, JobReceiver, JobSender, ResultReceiver,
    ResultSender, SOURCE_SINK_BUFFER, SettlementControl, SettlementControlReceiver,
    SettlementControlSender, SettlementReceiver, SettlementSender, SourceSink, SourceStream,
    StopReceiver, StopSender, job_channel, request_stop, settlement_channel,
    settlement_control_channel, source_sink_channel, stop_channel, stop_requested,
};
pub use types::{ProcessResult, SettlementInput, SourceMessage, SourcePosition};
