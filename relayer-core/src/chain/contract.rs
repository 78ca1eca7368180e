use super::{ChainClient, ChainError, TxOptions};
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, BlockNumber, H256, U256};
use std::sync::Arc;
use tracing::debug;

mod bindings {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    ethers::contract::abigen!(
        RewardToken,
        r#"[
            function mint(address to, uint256 amount) external
        ]"#,
    );
}

pub use bindings::RewardToken;

/// [`ChainClient`] that mints through a signing middleware.
pub struct EthersChainClient<M: Middleware> {
    client: Arc<M>,
    token: RewardToken<M>,
}

impl<M: Middleware + 'static> EthersChainClient<M> {
    pub fn new(client: Arc<M>, token_address: Address) -> Self {
        let token = RewardToken::new(token_address, Arc::clone(&client));
        Self { client, token }
    }

    pub fn token_address(&self) -> Address {
        self.token.address()
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let chain_id = self
            .client
            .get_chainid()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(chain_id.as_u64())
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainClient for EthersChainClient<M> {
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let nonce = self
            .client
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(nonce.as_u64())
    }

    async fn submit_mint(
        &self,
        options: TxOptions,
        receiver: Address,
        amount: U256,
    ) -> Result<H256, ChainError> {
        let mut call = self.token.mint(receiver, amount).from(options.from);
        if let Some(nonce) = options.nonce {
            call = call.nonce(nonce);
        }
        if let Some(gas) = options.gas_limit {
            call = call.gas(gas);
        }
        if let Some(gas_price) = options.gas_price {
            call = call.gas_price(gas_price);
        }

        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Contract(e.to_string()))?;
        let tx_hash = *pending;
        debug!(tx_hash = ?tx_hash, "Mint transaction submitted");
        Ok(tx_hash)
    }
}
