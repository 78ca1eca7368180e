use super::{RewardStore, StoreError};
use crate::entities::{
    ListPendingSettlements, RewardRecord, RewardUpsert, SetRewardSettlementRef,
    UpsertRewardByLocation,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use tracing::info;

/// [`RewardStore`] backed by the `rewards` table.
#[derive(Clone)]
pub struct PgRewardStore {
    db: DatabaseProcessor,
}

impl PgRewardStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RewardStore for PgRewardStore {
    async fn upsert_by_location(&self, reward: RewardUpsert) -> Result<RewardRecord, StoreError> {
        Ok(self.db.process(UpsertRewardByLocation { reward }).await?)
    }

    async fn set_settlement_ref(&self, id: i64, tx_hash: &str) -> Result<(), StoreError> {
        let updated = self
            .db
            .process(SetRewardSettlementRef {
                id,
                tx_hash: tx_hash.to_string(),
            })
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn pending_settlements(&self, limit: i64) -> Result<Vec<RewardRecord>, StoreError> {
        Ok(self.db.process(ListPendingSettlements { limit }).await?)
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.db.is_closed() {
            self.db.close().await;
            info!("Database pool closed");
        }
        Ok(())
    }
}
