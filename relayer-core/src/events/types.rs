//! Message types carried between stages.

use crate::processors::ProcessError;
use ethers::types::{Address, U256};
use relayer_sdk::objects::RewardView;

/// Where a message sits in its source, as needed to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl std::fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// One raw inbound event. This is the job type of the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub position: SourcePosition,
}

impl SourceMessage {
    /// The message key as text, for logging.
    pub fn key_lossy(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|key| String::from_utf8_lossy(key).into_owned())
    }
}

/// Outcome of processing one job.
///
/// `position` is absent only when the job could not be attributed, which
/// happens when the handler panicked.
#[derive(Debug)]
pub struct ProcessResult {
    pub position: Option<SourcePosition>,
    pub success: bool,
    pub error: Option<ProcessError>,
    pub output: Option<RewardView>,
}

impl ProcessResult {
    pub fn succeeded(position: SourcePosition, output: RewardView) -> Self {
        Self {
            position: Some(position),
            success: true,
            error: None,
            output: Some(output),
        }
    }

    pub fn failed(position: Option<SourcePosition>, error: ProcessError) -> Self {
        Self {
            position,
            success: false,
            error: Some(error),
            output: None,
        }
    }

    /// The position to commit, if this result warrants a commit.
    pub fn committable_position(&self) -> Option<&SourcePosition> {
        if self.success {
            self.position.as_ref()
        } else {
            None
        }
    }
}

/// Snapshot handed from processing to settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementInput {
    pub record_id: i64,
    pub receiver: Address,
    pub amount: U256,
}
