//! Relayer, the pipeline orchestrator.
//!
//! Wires the stages together:
//!
//! ```text
//! EventSource -> Ingestor -> job queue -> WorkerPool(RewardProcessor)
//!                                           |-> results -> Acknowledger
//!                                           '-> settlement queue -> Settler
//! ```
//!
//! and owns their lifecycle. `serve` starts everything and waits until the
//! pipeline is asked to stop or the source fails. `stop` tears it down in
//! dependency order: ingestion first, then the pool, then settlement, and the
//! store last.

use crate::chain::{ChainClient, TxOptions};
use crate::events::{
    DEFAULT_JOB_BUFFER, DEFAULT_SETTLEMENT_BUFFER, JobReceiver, JobSender, SettlementControl,
    SettlementControlSender, SettlementReceiver, StopSender, job_channel, request_stop,
    settlement_channel, settlement_control_channel, stop_channel, stop_requested,
};
use crate::processors::{Acknowledger, Ingestor, RewardProcessor, Settler};
use crate::source::{EventSource, SourceError};
use crate::store::{RewardStore, StoreError};
use crate::workerpool::{PoolError, WorkerPool};
use ethers::types::Address;
use relayer_sdk::objects::PipelineStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How many unsettled rewards to report at startup.
const PENDING_REPORT_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("relayer already started (state: {0})")]
    AlreadyStarted(PipelineStatus),
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("event source failed: {0}")]
    Source(#[from] SourceError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("task {name} failed: {reason}")]
    Task { name: &'static str, reason: String },
}

/// Collaborators of the pipeline.
#[derive(Clone)]
pub struct RelayerParts {
    pub source: Arc<dyn EventSource>,
    pub store: Arc<dyn RewardStore>,
    pub chain: Arc<dyn ChainClient>,
}

#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub worker_count: usize,
    pub job_buffer: usize,
    pub settlement_buffer: usize,
    /// Token every reward is recorded against and minted on.
    pub reward_token: Address,
    /// Template for mint transactions. The nonce is filled per submission.
    pub tx_options: TxOptions,
}

impl RelayerConfig {
    pub fn new(reward_token: Address, tx_options: TxOptions) -> Self {
        Self {
            worker_count: 5,
            job_buffer: DEFAULT_JOB_BUFFER,
            settlement_buffer: DEFAULT_SETTLEMENT_BUFFER,
            reward_token,
            tx_options,
        }
    }
}

/// Channel ends created up front and handed to the stages on `serve`.
struct PendingStages {
    jobs_tx: JobSender,
    jobs_rx: JobReceiver,
    settlement_rx: SettlementReceiver,
}

struct Inner {
    parts: RelayerParts,
    tx_options: TxOptions,
    cancel: CancellationToken,
    status: Mutex<PipelineStatus>,
    stop_tx: Arc<StopSender>,
    settlement_control: SettlementControlSender,
    pool: WorkerPool<RewardProcessor>,
    pending: Mutex<Option<PendingStages>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

/// Handle to the pipeline. Clones share the same pipeline.
#[derive(Clone)]
pub struct Relayer {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Relayer {
    /// Build the pipeline without starting anything.
    ///
    /// Cancelling `cancel` aborts every stage immediately. It is the hard
    /// deadline behind a graceful [`Relayer::stop`].
    pub fn new(parts: RelayerParts, config: RelayerConfig, cancel: CancellationToken) -> Self {
        let (jobs_tx, jobs_rx) = job_channel(config.job_buffer);
        let (settlement_tx, settlement_rx) = settlement_channel(config.settlement_buffer);
        let (stop_tx, _) = stop_channel();
        let (settlement_control, _) = settlement_control_channel();

        let processor = RewardProcessor::new(
            Arc::clone(&parts.store),
            settlement_tx,
            config.reward_token,
        );
        let pool = WorkerPool::new(Arc::new(processor), config.worker_count);

        Self {
            inner: Arc::new(Inner {
                parts,
                tx_options: config.tx_options,
                cancel,
                status: Mutex::new(PipelineStatus::NotStarted),
                stop_tx: Arc::new(stop_tx),
                settlement_control,
                pool,
                pending: Mutex::new(Some(PendingStages {
                    jobs_tx,
                    jobs_rx,
                    settlement_rx,
                })),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        *lock(&self.inner.status)
    }

    /// The worker pool is running.
    pub fn alive(&self) -> bool {
        self.inner.pool.is_running()
    }

    /// The pipeline is running and still ingesting.
    pub fn ready(&self) -> bool {
        if self.status() != PipelineStatus::Running || !self.inner.pool.is_running() {
            return false;
        }
        lock(&self.inner.tasks)
            .iter()
            .any(|(name, handle)| *name == "ingestor" && !handle.is_finished())
    }

    /// Start every stage and wait until the pipeline is stopped, cancelled,
    /// or its source fails.
    ///
    /// Returns the source error in the last case. Shutting the pipeline down
    /// is left to [`Relayer::stop`] in all cases.
    pub async fn serve(&self) -> Result<(), RelayerError> {
        let (fatal_tx, mut fatal_rx) = oneshot::channel();
        self.start(fatal_tx)?;
        self.report_pending_settlements().await;

        let mut stop_rx = self.inner.stop_tx.subscribe();
        let fatal = tokio::select! {
            _ = stop_requested(&mut stop_rx) => fatal_rx.try_recv().ok(),
            _ = self.inner.cancel.cancelled() => fatal_rx.try_recv().ok(),
            fatal = &mut fatal_rx => fatal.ok(),
        };

        match fatal {
            Some(e) => Err(RelayerError::Source(e)),
            None => Ok(()),
        }
    }

    fn start(&self, fatal_tx: oneshot::Sender<SourceError>) -> Result<(), RelayerError> {
        let mut status = lock(&self.inner.status);
        if *status != PipelineStatus::NotStarted {
            return Err(RelayerError::AlreadyStarted(*status));
        }
        let Some(stages) = lock(&self.inner.pending).take() else {
            return Err(RelayerError::AlreadyStarted(*status));
        };

        let inner = &self.inner;
        let results = inner.pool.start(stages.jobs_rx, inner.cancel.clone())?;

        let settler = Settler::new(
            Arc::clone(&inner.parts.chain),
            Arc::clone(&inner.parts.store),
            inner.tx_options.clone(),
            stages.settlement_rx,
            inner.settlement_control.subscribe(),
            inner.cancel.clone(),
        );
        let acknowledger = Acknowledger::new(
            Arc::clone(&inner.parts.source),
            results,
            inner.cancel.clone(),
        );
        let ingestor = Ingestor::new(
            Arc::clone(&inner.parts.source),
            stages.jobs_tx,
            Arc::clone(&inner.stop_tx),
            inner.cancel.clone(),
            fatal_tx,
        );

        let mut tasks = lock(&inner.tasks);
        tasks.push((
            "settler",
            tokio::spawn(async move {
                settler.run().await;
            }),
        ));
        tasks.push((
            "acknowledger",
            tokio::spawn(async move {
                acknowledger.run().await;
            }),
        ));
        tasks.push(("ingestor", tokio::spawn(ingestor.run())));

        *status = PipelineStatus::Running;
        info!(workers = inner.pool.worker_count(), "Relayer started");
        Ok(())
    }

    async fn report_pending_settlements(&self) {
        match self
            .inner
            .parts
            .store
            .pending_settlements(PENDING_REPORT_LIMIT)
            .await
        {
            Ok(pending) if pending.is_empty() => {}
            Ok(pending) => {
                let ids: Vec<i64> = pending.iter().map(|r| r.id).collect();
                warn!(count = pending.len(), ids = ?ids, "Rewards stored without a mint transaction");
            }
            Err(e) => warn!(error = %e, "Failed to list unsettled rewards"),
        }
    }

    /// Tear the pipeline down.
    ///
    /// Graceful mode lets the worker pool finish the jobs already queued and
    /// the settler drain its queue. Forced mode stops the pool right away and
    /// discards queued settlements. Either way the store is closed exactly
    /// once. Only the first call does anything; later calls return no errors.
    pub async fn stop(&self, force: bool) -> Vec<RelayerError> {
        let tasks = {
            let mut status = lock(&self.inner.status);
            match *status {
                PipelineStatus::Running => {
                    *status = PipelineStatus::Draining;
                    std::mem::take(&mut *lock(&self.inner.tasks))
                }
                PipelineStatus::NotStarted => {
                    *status = PipelineStatus::Draining;
                    let _ = lock(&self.inner.pending).take();
                    Vec::new()
                }
                PipelineStatus::Draining | PipelineStatus::Stopped => {
                    info!("Relayer stop already requested");
                    return Vec::new();
                }
            }
        };
        info!(force, "Stopping relayer");
        let mut errors = Vec::new();

        // Ingestion exits and drops the job sender, closing the job queue.
        request_stop(&self.inner.stop_tx);

        if force {
            // The pool may already be idle if the job queue drained on its own.
            if let Err(e) = self.inner.pool.stop().await {
                debug!(error = %e, "Worker pool not stopped");
            }
        } else {
            self.inner.pool.wait_idle().await;
        }

        let mode = if force {
            SettlementControl::Discard
        } else {
            SettlementControl::Drain
        };
        self.inner.settlement_control.send_replace(mode);

        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Pipeline task failed");
                errors.push(RelayerError::Task {
                    name,
                    reason: e.to_string(),
                });
            }
        }

        if let Err(e) = self.inner.parts.store.close().await {
            error!(error = %e, "Failed to close store");
            errors.push(e.into());
        }

        *lock(&self.inner.status) = PipelineStatus::Stopped;
        info!(errors = errors.len(), "Relayer stopped");
        errors
    }
}
