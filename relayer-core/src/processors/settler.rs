//! Settler processor.
//!
//! The only stage that talks to the chain. Settlement inputs are handled one
//! at a time, in queue order:
//!
//! 1. fetch the pending nonce of the signing account
//! 2. submit `mint(receiver, amount)` with that nonce
//! 3. store the transaction hash on the reward
//!
//! Running a single settler is what keeps nonces gap-free and strictly
//! increasing. A failed item is logged and skipped. The reward stays without
//! a transaction hash and can be found through the pending-settlement query.

use crate::chain::{ChainClient, ChainError, TxOptions};
use crate::events::{
    SettlementControl, SettlementControlReceiver, SettlementInput, SettlementReceiver,
};
use crate::store::{RewardStore, StoreError};
use ethers::types::H256;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("failed to fetch pending nonce: {0}")]
    Nonce(#[source] ChainError),
    #[error("failed to submit mint: {0}")]
    Submission(#[source] ChainError),
    #[error("mint {tx_hash} submitted but not recorded: {source}")]
    Record {
        tx_hash: String,
        #[source]
        source: StoreError,
    },
    #[error("mint {tx_hash} submitted but cancelled before it was recorded")]
    Unrecorded { tx_hash: String },
    #[error("settlement cancelled")]
    Cancelled,
}

/// Counters reported when the settler exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementSummary {
    pub settled: u64,
    pub failed: u64,
    pub discarded: u64,
}

pub struct Settler {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn RewardStore>,
    tx_options: TxOptions,
    queue: SettlementReceiver,
    control: SettlementControlReceiver,
    cancel: CancellationToken,
}

impl Settler {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn RewardStore>,
        tx_options: TxOptions,
        queue: SettlementReceiver,
        control: SettlementControlReceiver,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain,
            store,
            tx_options,
            queue,
            control,
            cancel,
        }
    }

    pub async fn run(mut self) -> SettlementSummary {
        info!(from = ?self.tx_options.from, "Settler started");
        let mut summary = SettlementSummary::default();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Settler cancelled");
                    break;
                }
                mode = closed(&mut self.control) => {
                    self.queue.close();
                    match mode {
                        SettlementControl::Drain => self.drain(&mut summary).await,
                        _ => self.discard(&mut summary),
                    }
                    break;
                }
                input = self.queue.recv() => match input {
                    Some(input) => self.settle(input, &mut summary).await,
                    None => {
                        info!("Settlement queue closed");
                        break;
                    }
                }
            }
        }

        info!(
            settled = summary.settled,
            failed = summary.failed,
            discarded = summary.discarded,
            "Settler stopped"
        );
        summary
    }

    async fn drain(&mut self, summary: &mut SettlementSummary) {
        info!(buffered = self.queue.len(), "Draining settlement queue");
        while let Some(input) = self.queue.recv().await {
            if self.cancel.is_cancelled() {
                summary.discarded += 1;
                self.discard(summary);
                return;
            }
            self.settle(input, summary).await;
        }
    }

    fn discard(&mut self, summary: &mut SettlementSummary) {
        while let Ok(input) = self.queue.try_recv() {
            summary.discarded += 1;
            warn!(record_id = input.record_id, "Discarding unsettled reward");
        }
    }

    async fn settle(&self, input: SettlementInput, summary: &mut SettlementSummary) {
        match self.mint(&input).await {
            Ok(tx_hash) => {
                summary.settled += 1;
                info!(
                    record_id = input.record_id,
                    receiver = ?input.receiver,
                    amount = %input.amount,
                    tx_hash = %tx_hash,
                    "Reward minted"
                );
            }
            Err(e) => {
                summary.failed += 1;
                error!(record_id = input.record_id, error = %e, "Settlement failed");
            }
        }
    }

    async fn mint(&self, input: &SettlementInput) -> Result<String, SettlementError> {
        let minted = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SettlementError::Cancelled),
            minted = self.submit(input) => minted?,
        };
        let tx_hash = format!("{minted:#x}");
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SettlementError::Unrecorded { tx_hash }),
            recorded = self.store.set_settlement_ref(input.record_id, &tx_hash) => match recorded {
                Ok(()) => Ok(tx_hash),
                Err(source) => Err(SettlementError::Record { tx_hash, source }),
            },
        }
    }

    async fn submit(&self, input: &SettlementInput) -> Result<H256, SettlementError> {
        let mut options = self.tx_options.clone();
        let nonce = self
            .chain
            .pending_nonce(options.from)
            .await
            .map_err(SettlementError::Nonce)?;
        options.nonce = Some(nonce.into());
        self.chain
            .submit_mint(options, input.receiver, input.amount)
            .await
            .map_err(SettlementError::Submission)
    }
}

async fn closed(control: &mut SettlementControlReceiver) -> SettlementControl {
    match control.wait_for(|mode| *mode != SettlementControl::Open).await {
        Ok(mode) => *mode,
        Err(_) => SettlementControl::Drain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RewardUpsert;
    use crate::events::{settlement_channel, settlement_control_channel};
    use crate::testing::{MemoryStore, MockChain, reward_event, signer_address, token_address};
    use ethers::types::{Address, U256};
    use std::time::Duration;

    async fn stored(store: &MemoryStore, latitude: f64) -> SettlementInput {
        let reward =
            RewardUpsert::from_event(reward_event("10", latitude, 0.0, "d"), token_address())
                .unwrap();
        let record = store.upsert_by_location(reward.clone()).await.unwrap();
        SettlementInput {
            record_id: record.id,
            receiver: reward.receiver_address,
            amount: reward.amount,
        }
    }

    fn settler(
        chain: Arc<MockChain>,
        store: Arc<MemoryStore>,
        queue: SettlementReceiver,
        control: SettlementControlReceiver,
        cancel: CancellationToken,
    ) -> Settler {
        Settler::new(
            chain,
            store,
            TxOptions::new(signer_address()),
            queue,
            control,
            cancel,
        )
    }

    #[tokio::test]
    async fn test_mints_and_records_hash() {
        let chain = Arc::new(MockChain::new(5));
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = settlement_channel(4);
        let (_control_tx, control_rx) = settlement_control_channel();

        let input = stored(&store, 1.0).await;
        tx.send(input.clone()).await.unwrap();
        drop(tx);

        let summary = settler(chain.clone(), store.clone(), rx, control_rx, CancellationToken::new())
            .run()
            .await;

        assert_eq!(summary.settled, 1);
        let submissions = chain.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].nonce, Some(U256::from(5u64)));
        assert_eq!(submissions[0].from, signer_address());
        assert_eq!(submissions[0].receiver, input.receiver);

        let record = store.record(input.record_id).unwrap();
        assert_eq!(record.tx_hash, Some(format!("{:#x}", MockChain::tx_hash(5))));
    }

    #[tokio::test]
    async fn test_nonces_gap_free_across_producers() {
        let chain = Arc::new(MockChain::new(0));
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = settlement_channel(2);
        let (_control_tx, control_rx) = settlement_control_channel();

        let enqueued = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut producers = Vec::new();
        for producer in 0..4u32 {
            let tx = tx.clone();
            let store = store.clone();
            let enqueued = enqueued.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..10u32 {
                    let tag = producer * 100 + i;
                    let mut input = stored(&store, f64::from(tag)).await;
                    input.amount = U256::from(tag);
                    tx.send(input.clone()).await.unwrap();
                    enqueued.lock().unwrap().push((input.receiver, input.amount));
                }
            }));
        }
        drop(tx);

        let run = tokio::spawn(
            settler(chain.clone(), store.clone(), rx, control_rx, CancellationToken::new()).run(),
        );
        for producer in producers {
            producer.await.unwrap();
        }
        let summary = run.await.unwrap();

        assert_eq!(summary.settled, 40);
        let nonces: Vec<U256> = chain
            .submissions()
            .iter()
            .map(|s| s.nonce.unwrap())
            .collect();
        let expected: Vec<U256> = (0..40u64).map(U256::from).collect();
        assert_eq!(nonces, expected);
        let submitted: Vec<(Address, U256)> = chain
            .submissions()
            .iter()
            .map(|s| (s.receiver, s.amount))
            .collect();
        assert_eq!(submitted, *enqueued.lock().unwrap());
        assert!(store.records().iter().all(|r| r.tx_hash.is_some()));
    }

    #[tokio::test]
    async fn test_submission_failure_skips_item() {
        let chain = Arc::new(MockChain::new(0));
        chain.reject_receiver(Address::repeat_byte(0xbb));
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = settlement_channel(4);
        let (_control_tx, control_rx) = settlement_control_channel();

        let input = stored(&store, 1.0).await;
        tx.send(input.clone()).await.unwrap();
        drop(tx);

        let summary = settler(chain, store.clone(), rx, control_rx, CancellationToken::new())
            .run()
            .await;
        assert_eq!(summary.failed, 1);
        assert_eq!(store.record(input.record_id).unwrap().tx_hash, None);
    }

    #[tokio::test]
    async fn test_drain_settles_buffered_items() {
        let chain = Arc::new(MockChain::new(0));
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = settlement_channel(8);
        let (control_tx, control_rx) = settlement_control_channel();

        for i in 0..3 {
            tx.send(stored(&store, f64::from(i)).await).await.unwrap();
        }
        control_tx.send(SettlementControl::Drain).unwrap();

        let summary = settler(chain.clone(), store, rx, control_rx, CancellationToken::new())
            .run()
            .await;
        assert_eq!(summary.settled, 3);
        assert_eq!(summary.discarded, 0);
        // The queue is closed to late producers.
        assert!(tx.send(SettlementInput {
            record_id: 99,
            receiver: Address::zero(),
            amount: U256::one(),
        })
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_discard_skips_buffered_items() {
        let chain = Arc::new(MockChain::new(0));
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = settlement_channel(8);
        let (control_tx, control_rx) = settlement_control_channel();

        for i in 0..3 {
            tx.send(stored(&store, f64::from(i)).await).await.unwrap();
        }
        control_tx.send(SettlementControl::Discard).unwrap();

        let summary = settler(chain.clone(), store, rx, control_rx, CancellationToken::new())
            .run()
            .await;
        assert_eq!(summary.discarded + summary.settled, 3);
        assert_eq!(chain.submissions().len() as u64, summary.settled);
    }

    #[tokio::test]
    async fn test_cancel_exits_immediately() {
        let chain = Arc::new(MockChain::new(0));
        let store = Arc::new(MemoryStore::new());
        let (_tx, rx) = settlement_channel(8);
        let (_control_tx, control_rx) = settlement_control_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = settler(chain.clone(), store, rx, control_rx, cancel).run().await;
        assert_eq!(summary, SettlementSummary::default());
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_record() {
        let chain = Arc::new(MockChain::new(3));
        let store = Arc::new(MemoryStore::new());
        let (_tx, rx) = settlement_channel(1);
        let (_control_tx, control_rx) = settlement_control_channel();
        let cancel = CancellationToken::new();
        let settler = settler(chain.clone(), store.clone(), rx, control_rx, cancel.clone());

        let input = stored(&store, 1.0).await;
        store.stall_settlement_refs(true);

        let canceller = {
            let chain = chain.clone();
            tokio::spawn(async move {
                while chain.submissions().is_empty() {
                    tokio::task::yield_now().await;
                }
                cancel.cancel();
            })
        };

        let minted = tokio::time::timeout(Duration::from_secs(5), settler.mint(&input))
            .await
            .expect("mint should give way to cancellation");
        canceller.await.unwrap();

        let expected = format!("{:#x}", MockChain::tx_hash(3));
        match minted {
            Err(SettlementError::Unrecorded { tx_hash }) => assert_eq!(tx_hash, expected),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(chain.submissions().len(), 1);
        assert_eq!(store.record(input.record_id).unwrap().tx_hash, None);
    }
}
