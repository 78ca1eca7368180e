//! RewardProcessor, the job handler run by every worker.
//!
//! For each message it:
//! - decodes the JSON payload into a `RewardGranted` event
//! - validates it into a `RewardUpsert` bound to the configured token
//! - upserts the reward keyed by its exact coordinates
//! - queues the stored reward for settlement
//!
//! The result carries the source position so the acknowledger can commit it.
//! Failures are reported in the result and never acknowledged.

use crate::entities::{RewardRecord, RewardUpsert, ValidationError, reward::address_to_string};
use crate::events::{ProcessResult, SettlementInput, SettlementSender, SourceMessage};
use crate::store::{RewardStore, StoreError};
use crate::workerpool::{JobHandler, TaskPanic};
use async_trait::async_trait;
use ethers::types::Address;
use relayer_sdk::objects::RewardGranted;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to decode event: {0}")]
    Deserialization(#[from] serde_json::Error),
    #[error("invalid reward: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to store reward: {0}")]
    Persistence(#[from] StoreError),
    #[error("processing cancelled")]
    Cancelled,
    #[error("{0}")]
    TaskPanicked(TaskPanic),
}

pub struct RewardProcessor {
    store: Arc<dyn RewardStore>,
    settlement_tx: SettlementSender,
    token: Address,
}

impl RewardProcessor {
    pub fn new(store: Arc<dyn RewardStore>, settlement_tx: SettlementSender, token: Address) -> Self {
        Self {
            store,
            settlement_tx,
            token,
        }
    }

    async fn persist(
        &self,
        message: &SourceMessage,
        cancel: &CancellationToken,
    ) -> Result<(RewardUpsert, RewardRecord), ProcessError> {
        let event = RewardGranted::decode(&message.payload)?;
        let reward = RewardUpsert::from_event(event, self.token)?;

        let record = tokio::select! {
            _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
            stored = self.store.upsert_by_location(reward.clone()) => stored?,
        };
        Ok((reward, record))
    }

    async fn enqueue_settlement(&self, input: SettlementInput, cancel: &CancellationToken) {
        let record_id = input.record_id;
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(record_id, "Cancelled before queueing settlement, reward stays pending");
            }
            sent = self.settlement_tx.send(input) => {
                if sent.is_err() {
                    warn!(record_id, "Settlement queue closed, reward stays pending");
                }
            }
        }
    }
}

#[async_trait]
impl JobHandler for RewardProcessor {
    type Job = SourceMessage;
    type Output = ProcessResult;

    async fn handle(&self, message: SourceMessage, cancel: &CancellationToken) -> ProcessResult {
        debug!(position = %message.position, key = ?message.key_lossy(), "Processing message");

        match self.persist(&message, cancel).await {
            Ok((reward, record)) => {
                info!(
                    id = record.id,
                    receiver = %record.receiver_address,
                    amount = %record.amount,
                    latitude = record.latitude,
                    longitude = record.longitude,
                    "Reward stored"
                );
                let input = SettlementInput {
                    record_id: record.id,
                    receiver: reward.receiver_address,
                    amount: reward.amount,
                };
                self.enqueue_settlement(input, cancel).await;
                ProcessResult::succeeded(message.position, record.view())
            }
            Err(e) => {
                match &e {
                    ProcessError::Deserialization(_) | ProcessError::Validation(_) => {
                        warn!(position = %message.position, error = %e, "Rejected message")
                    }
                    _ => error!(position = %message.position, error = %e, "Failed to process message"),
                }
                ProcessResult::failed(Some(message.position), e)
            }
        }
    }

    fn recover(&self, panic: TaskPanic) -> ProcessResult {
        ProcessResult::failed(None, ProcessError::TaskPanicked(panic))
    }
}

impl std::fmt::Debug for RewardProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardProcessor")
            .field("token", &address_to_string(&self.token))
            .finish_non_exhaustive()
    }
}
