//! Fixed-size pool of async workers draining a shared job queue.
//!
//! The pool owns no business logic. A [`JobHandler`] turns each job into an
//! output, and the pool guarantees that:
//!
//! - every job taken from the queue yields exactly one output, even when the
//!   handler panics (the handler's [`JobHandler::recover`] builds the output),
//! - a worker blocked on sending its output still observes stop and
//!   cancellation,
//! - the result channel closes once all workers have exited.

mod state;

pub use state::PoolState;

use crate::events::{StopReceiver, StopSender, stop_channel, stop_requested};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker pool is already running")]
    AlreadyRunning,
    #[error("worker pool is not running")]
    NotRunning,
}

/// A panic caught while a worker was running a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanic {
    pub worker_id: usize,
    pub message: String,
}

impl std::fmt::Display for TaskPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker {} panicked: {}", self.worker_id, self.message)
    }
}

/// Work performed by the pool for each job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Job: Send + 'static;
    type Output: Send + 'static;

    /// Process one job. Long waits inside must honor `cancel`.
    async fn handle(&self, job: Self::Job, cancel: &CancellationToken) -> Self::Output;

    /// Build the output for a job whose handler panicked.
    fn recover(&self, panic: TaskPanic) -> Self::Output;
}

struct PoolControl {
    state: PoolState,
    /// Bumped on every start so a late supervisor of a previous run cannot
    /// clobber the state of the current one.
    generation: u64,
    stop_tx: Option<StopSender>,
    done_rx: Option<watch::Receiver<bool>>,
}

pub struct WorkerPool<H: JobHandler> {
    handler: Arc<H>,
    worker_count: usize,
    control: Arc<Mutex<PoolControl>>,
}

fn lock(control: &Mutex<PoolControl>) -> MutexGuard<'_, PoolControl> {
    control.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<H: JobHandler> WorkerPool<H> {
    /// Create an idle pool. A worker count of zero is raised to one.
    pub fn new(handler: Arc<H>, worker_count: usize) -> Self {
        Self {
            handler,
            worker_count: worker_count.max(1),
            control: Arc::new(Mutex::new(PoolControl {
                state: PoolState::Idle,
                generation: 0,
                stop_tx: None,
                done_rx: None,
            })),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn state(&self) -> PoolState {
        lock(&self.control).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Spawn the workers and return the result channel.
    ///
    /// Workers exit when the job channel closes, when [`WorkerPool::stop`] is
    /// called, or when `cancel` fires. The returned channel has a capacity of
    /// one slot per worker.
    pub fn start(
        &self,
        jobs: mpsc::Receiver<H::Job>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<H::Output>, PoolError> {
        let mut control = lock(&self.control);
        if control.state != PoolState::Idle {
            return Err(PoolError::AlreadyRunning);
        }

        let (result_tx, result_rx) = mpsc::channel(self.worker_count);
        let (stop_tx, stop_rx) = stop_channel();
        let (done_tx, done_rx) = watch::channel(false);
        control.generation += 1;
        let generation = control.generation;
        control.state = PoolState::Running;
        control.stop_tx = Some(stop_tx);
        control.done_rx = Some(done_rx);
        drop(control);

        let jobs = Arc::new(tokio::sync::Mutex::new(jobs));
        let mut workers = JoinSet::new();
        for id in 0..self.worker_count {
            let worker = Worker {
                id,
                handler: Arc::clone(&self.handler),
                jobs: Arc::clone(&jobs),
                results: result_tx.clone(),
                stop_rx: stop_rx.clone(),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(result_tx);

        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task terminated abnormally");
                }
            }
            {
                let mut control = lock(&control);
                if control.generation == generation {
                    control.state = PoolState::Idle;
                    control.stop_tx = None;
                    control.done_rx = None;
                }
            }
            let _ = done_tx.send(true);
            info!("All workers exited");
        });

        info!(workers = self.worker_count, "Worker pool started");
        Ok(result_rx)
    }

    /// Signal every worker to exit and wait until they have.
    ///
    /// Jobs still queued are left in the job channel.
    pub async fn stop(&self) -> Result<(), PoolError> {
        let (generation, done_rx) = {
            let mut control = lock(&self.control);
            if control.state != PoolState::Running {
                return Err(PoolError::NotRunning);
            }
            control.state = PoolState::Stopping;
            if let Some(stop_tx) = &control.stop_tx {
                let _ = stop_tx.send(true);
            }
            (control.generation, control.done_rx.clone())
        };
        info!("Stopping worker pool");

        if let Some(mut done_rx) = done_rx {
            let _ = done_rx.wait_for(|done| *done).await;
        }

        let mut control = lock(&self.control);
        if control.generation == generation && control.state == PoolState::Stopping {
            control.state = PoolState::Idle;
        }
        Ok(())
    }

    /// Wait until the current run, if any, has fully exited.
    ///
    /// Returns immediately on an idle pool.
    pub async fn wait_idle(&self) {
        let done_rx = lock(&self.control).done_rx.clone();
        if let Some(mut done_rx) = done_rx {
            let _ = done_rx.wait_for(|done| *done).await;
        }
    }
}

struct Worker<H: JobHandler> {
    id: usize,
    handler: Arc<H>,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<H::Job>>>,
    results: mpsc::Sender<H::Output>,
    stop_rx: StopReceiver,
    cancel: CancellationToken,
}

impl<H: JobHandler> Worker<H> {
    async fn run(mut self) {
        debug!(worker_id = self.id, "Worker started");

        loop {
            let job = tokio::select! {
                _ = stop_requested(&mut self.stop_rx) => {
                    debug!(worker_id = self.id, "Worker received stop signal");
                    break;
                }
                _ = self.cancel.cancelled() => {
                    debug!(worker_id = self.id, "Worker observed cancellation");
                    break;
                }
                job = recv_shared(&self.jobs) => match job {
                    Some(job) => job,
                    None => {
                        debug!(worker_id = self.id, "Job channel closed");
                        break;
                    }
                },
            };

            let output = self.process(job).await;

            tokio::select! {
                _ = stop_requested(&mut self.stop_rx) => {
                    warn!(worker_id = self.id, "Worker stopped while delivering a result");
                    break;
                }
                _ = self.cancel.cancelled() => {
                    warn!(worker_id = self.id, "Worker cancelled while delivering a result");
                    break;
                }
                sent = self.results.send(output) => {
                    if sent.is_err() {
                        warn!(worker_id = self.id, "Result channel closed");
                        break;
                    }
                }
            }
        }

        debug!(worker_id = self.id, "Worker exited");
    }

    async fn process(&self, job: H::Job) -> H::Output {
        let handled = AssertUnwindSafe(self.handler.handle(job, &self.cancel))
            .catch_unwind()
            .await;
        match handled {
            Ok(output) => output,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(worker_id = self.id, panic = %message, "Job handler panicked");
                self.handler.recover(TaskPanic {
                    worker_id: self.id,
                    message,
                })
            }
        }
    }
}

async fn recv_shared<J>(jobs: &tokio::sync::Mutex<mpsc::Receiver<J>>) -> Option<J> {
    jobs.lock().await.recv().await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
