pub mod reward;

pub use reward::{
    ListPendingSettlements, RewardRecord, RewardUpsert, SetRewardSettlementRef,
    UpsertRewardByLocation, ValidationError,
};
