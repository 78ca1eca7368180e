//! Pipeline stages.
//!
//! - `Ingestor`: pulls `SourceMessage` from the `EventSource`, feeds the job queue
//! - `RewardProcessor`: the worker pool's handler, stores each reward and
//!   emits `ProcessResult` and `SettlementInput`
//! - `Acknowledger`: receives `ProcessResult`, commits source positions
//! - `Settler`: receives `SettlementInput`, mints sequentially

pub mod acknowledger;
pub mod ingestor;
pub mod reward_processor;
pub mod settler;

pub use acknowledger::{AckSummary, Acknowledger};
pub use ingestor::Ingestor;
pub use reward_processor::{ProcessError, RewardProcessor};
pub use settler::{SettlementError, SettlementSummary, Settler};
