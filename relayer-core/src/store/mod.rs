//! Persistence seam for rewards.

mod postgres;

pub use postgres::PgRewardStore;

use crate::entities::{RewardRecord, RewardUpsert};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("reward {0} not found")]
    NotFound(i64),
}

/// Storage of reward records keyed by exact coordinates.
#[async_trait]
pub trait RewardStore: Send + Sync {
    /// Insert the reward, or overwrite the one stored at the same
    /// coordinates. Returns the stored row.
    async fn upsert_by_location(&self, reward: RewardUpsert) -> Result<RewardRecord, StoreError>;

    /// Record the mint transaction hash of a reward.
    async fn set_settlement_ref(&self, id: i64, tx_hash: &str) -> Result<(), StoreError>;

    /// Rewards stored without a settlement reference, oldest first.
    async fn pending_settlements(&self, limit: i64) -> Result<Vec<RewardRecord>, StoreError>;

    /// Release the underlying connections. Called once on shutdown.
    async fn close(&self) -> Result<(), StoreError>;
}
