//! In-memory collaborators for pipeline tests.

use crate::chain::{ChainClient, ChainError, TxOptions};
use crate::entities::{RewardRecord, RewardUpsert, reward::address_to_string, reward::parse_address};
use crate::events::{SourceMessage, SourcePosition, SourceSink};
use crate::source::{EventSource, SourceError};
use crate::store::{RewardStore, StoreError};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use relayer_sdk::objects::RewardGranted;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

pub const TOKEN: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const RECEIVER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const SIGNER: &str = "0xdddddddddddddddddddddddddddddddddddddddd";

pub fn token_address() -> Address {
    parse_address(TOKEN).unwrap()
}

pub fn signer_address() -> Address {
    parse_address(SIGNER).unwrap()
}

pub fn reward_event(amount: &str, latitude: f64, longitude: f64, data: &str) -> RewardGranted {
    RewardGranted {
        token: Some(TOKEN.to_string()),
        amount: amount.to_string(),
        receiver: RECEIVER.to_string(),
        latitude,
        longitude,
        data: data.to_string(),
    }
}

pub fn reward_json(amount: &str, latitude: f64, longitude: f64, data: &str) -> Vec<u8> {
    reward_event(amount, latitude, longitude, data)
        .encode()
        .unwrap()
}

pub fn message(offset: i64, payload: &[u8]) -> SourceMessage {
    SourceMessage {
        key: Some(format!("key-{offset}").into_bytes()),
        payload: payload.to_vec(),
        position: SourcePosition {
            topic: "rewards".to_string(),
            partition: 0,
            offset,
        },
    }
}

fn now() -> time::PrimitiveDateTime {
    let now = time::OffsetDateTime::now_utc();
    time::PrimitiveDateTime::new(now.date(), now.time())
}

// -----------------------------------------------------------------------------
// Source
// -----------------------------------------------------------------------------

pub struct MemorySource {
    messages: Vec<SourceMessage>,
    failure: Option<String>,
    acknowledged: Mutex<Vec<SourcePosition>>,
    fail_acks: AtomicBool,
    stall_acks: AtomicBool,
    active: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemorySource {
    /// Delivers `messages` once, then idles until cancelled.
    pub fn new(messages: Vec<SourceMessage>) -> Self {
        Self {
            messages,
            failure: None,
            acknowledged: Mutex::new(Vec::new()),
            fail_acks: AtomicBool::new(false),
            stall_acks: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        }
    }

    /// Fails as soon as consumption starts.
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn fail_acknowledgements(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Acknowledgments never complete while set.
    pub fn stall_acknowledgements(&self, stall: bool) {
        self.stall_acks.store(stall, Ordering::SeqCst);
    }

    pub fn acknowledged(&self) -> Vec<SourcePosition> {
        self.acknowledged.lock().unwrap().clone()
    }

    pub fn active_consumers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn consume(
        &self,
        sink: SourceSink,
        cancel: CancellationToken,
    ) -> Result<(), SourceError> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if let Some(reason) = &self.failure {
            return Err(SourceError::Unavailable(reason.clone()));
        }
        for message in self.messages.iter().cloned() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = sink.send(message) => if sent.is_err() {
                    return Ok(());
                }
            }
        }
        cancel.cancelled().await;
        Ok(())
    }

    async fn acknowledge(&self, position: &SourcePosition) -> Result<(), SourceError> {
        if self.stall_acks.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(SourceError::Acknowledge {
                position: position.clone(),
                reason: "commit rejected".to_string(),
            });
        }
        self.acknowledged.lock().unwrap().push(position.clone());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Store
// -----------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    records: Vec<RewardRecord>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    fail_writes: AtomicBool,
    stall_settlement_refs: AtomicBool,
    closes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// `set_settlement_ref` never completes while set.
    pub fn stall_settlement_refs(&self, stall: bool) {
        self.stall_settlement_refs.store(stall, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<RewardRecord> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn record(&self, id: i64) -> Option<RewardRecord> {
        self.records().into_iter().find(|r| r.id == id)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn upsert_by_location(&self, reward: RewardUpsert) -> Result<RewardRecord, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut state = self.state.lock().unwrap();
        let amount = reward.amount.to_string();
        let receiver = address_to_string(&reward.receiver_address);

        if let Some(existing) = state
            .records
            .iter_mut()
            .find(|r| r.latitude == reward.latitude && r.longitude == reward.longitude)
        {
            existing.amount = amount;
            existing.receiver_address = receiver;
            existing.raw_data = reward.raw_data;
            existing.updated_at = now();
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let record = RewardRecord {
            id: state.next_id,
            token_address: address_to_string(&reward.token_address),
            amount,
            receiver_address: receiver,
            latitude: reward.latitude,
            longitude: reward.longitude,
            tx_hash: None,
            raw_data: reward.raw_data,
            created_at: now(),
            updated_at: now(),
        };
        state.records.push(record.clone());
        Ok(record)
    }

    async fn set_settlement_ref(&self, id: i64, tx_hash: &str) -> Result<(), StoreError> {
        if self.stall_settlement_refs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        record.tx_hash = Some(tx_hash.to_string());
        record.updated_at = now();
        Ok(())
    }

    async fn pending_settlements(&self, limit: i64) -> Result<Vec<RewardRecord>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .records()
            .into_iter()
            .filter(|r| !r.is_settled())
            .take(limit)
            .collect())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Chain
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub from: Address,
    pub nonce: Option<U256>,
    pub receiver: Address,
    pub amount: U256,
}

/// Chain whose pending nonce advances with every accepted submission.
pub struct MockChain {
    next_nonce: Mutex<u64>,
    submissions: Mutex<Vec<Submission>>,
    rejected: Mutex<Option<Address>>,
}

impl MockChain {
    pub fn new(first_nonce: u64) -> Self {
        Self {
            next_nonce: Mutex::new(first_nonce),
            submissions: Mutex::new(Vec::new()),
            rejected: Mutex::new(None),
        }
    }

    pub fn tx_hash(nonce: u64) -> H256 {
        H256::from_low_u64_be(nonce + 1)
    }

    pub fn reject_receiver(&self, receiver: Address) {
        *self.rejected.lock().unwrap() = Some(receiver);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn pending_nonce(&self, _address: Address) -> Result<u64, ChainError> {
        Ok(*self.next_nonce.lock().unwrap())
    }

    async fn submit_mint(
        &self,
        options: TxOptions,
        receiver: Address,
        amount: U256,
    ) -> Result<H256, ChainError> {
        if *self.rejected.lock().unwrap() == Some(receiver) {
            return Err(ChainError::Contract("execution reverted".to_string()));
        }
        let nonce = options
            .nonce
            .ok_or_else(|| ChainError::Rpc("missing nonce".to_string()))?
            .as_u64();
        let mut next = self.next_nonce.lock().unwrap();
        if nonce != *next {
            return Err(ChainError::Rpc(format!("nonce {nonce} out of order, expected {next}")));
        }
        *next += 1;
        self.submissions.lock().unwrap().push(Submission {
            from: options.from,
            nonce: options.nonce,
            receiver,
            amount,
        });
        Ok(Self::tx_hash(nonce))
    }
}
