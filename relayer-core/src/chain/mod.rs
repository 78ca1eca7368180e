//! Chain access seam used by settlement.

mod contract;

pub use contract::{EthersChainClient, RewardToken};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("contract call failed: {0}")]
    Contract(String),
}

/// Options of a mint transaction.
///
/// `nonce` is left empty in the template and filled per submission.
/// Empty gas fields are estimated by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOptions {
    pub from: Address,
    pub nonce: Option<U256>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
}

impl TxOptions {
    pub fn new(from: Address) -> Self {
        Self {
            from,
            nonce: None,
            gas_limit: None,
            gas_price: None,
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Next nonce of `address`, counting transactions still in the pool.
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

    /// Submit `mint(receiver, amount)` on the reward token and return the
    /// transaction hash without waiting for inclusion.
    async fn submit_mint(
        &self,
        options: TxOptions,
        receiver: Address,
        amount: U256,
    ) -> Result<H256, ChainError>;
}
