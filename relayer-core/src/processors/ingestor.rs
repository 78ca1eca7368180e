//! Ingestor processor.
//!
//! Runs the event source in its own task and forwards every message into the
//! job queue. Back-pressure is natural: while the job queue is full the
//! ingestor waits, the source sink fills up, and the source stops pulling.
//!
//! On exit the ingestor drops its job sender, which closes the job queue and
//! lets the worker pool drain. A fatal source error is reported once and
//! raises the pipeline's stop signal.

use crate::events::{
    JobSender, SourceMessage, StopReceiver, StopSender, request_stop, source_sink_channel,
    stop_requested,
};
use crate::source::{EventSource, SourceError};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Ingestor {
    source: Arc<dyn EventSource>,
    jobs_tx: JobSender,
    stop_tx: Arc<StopSender>,
    stop_rx: StopReceiver,
    cancel: CancellationToken,
    fatal_tx: Option<oneshot::Sender<SourceError>>,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn EventSource>,
        jobs_tx: JobSender,
        stop_tx: Arc<StopSender>,
        cancel: CancellationToken,
        fatal_tx: oneshot::Sender<SourceError>,
    ) -> Self {
        let stop_rx = stop_tx.subscribe();
        Self {
            source,
            jobs_tx,
            stop_tx,
            stop_rx,
            cancel,
            fatal_tx: Some(fatal_tx),
        }
    }

    pub async fn run(mut self) {
        info!("Ingestor started");

        let (sink, mut stream) = source_sink_channel();
        let source_cancel = self.cancel.child_token();
        let mut consume = tokio::spawn({
            let source = Arc::clone(&self.source);
            let cancel = source_cancel.clone();
            async move { source.consume(sink, cancel).await }
        });
        let mut source_done = false;
        let mut stream_done = false;

        loop {
            tokio::select! {
                _ = stop_requested(&mut self.stop_rx) => {
                    info!("Ingestor received stop signal");
                    break;
                }
                _ = self.cancel.cancelled() => {
                    info!("Ingestor cancelled");
                    break;
                }
                joined = &mut consume, if !source_done => {
                    source_done = true;
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => Err(SourceError::Aborted(e.to_string())),
                    };
                    match outcome {
                        Ok(()) => info!("Event source finished"),
                        Err(e) => {
                            self.fail(e);
                            break;
                        }
                    }
                }
                message = stream.recv(), if !stream_done => match message {
                    Some(message) => {
                        if !self.forward(message).await {
                            break;
                        }
                    }
                    None => {
                        debug!("Event source sink closed");
                        stream_done = true;
                    }
                }
            }
        }

        source_cancel.cancel();
        if !source_done {
            match consume.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Event source failed while stopping"),
                Err(e) => error!(error = %e, "Event source task aborted"),
            }
        }
        info!("Ingestor stopped");
    }

    /// Returns `false` when ingestion should stop.
    async fn forward(&mut self, message: SourceMessage) -> bool {
        let position = message.position.clone();
        tokio::select! {
            _ = stop_requested(&mut self.stop_rx) => false,
            _ = self.cancel.cancelled() => false,
            sent = self.jobs_tx.send(message) => match sent {
                Ok(()) => {
                    debug!(position = %position, "Job queued");
                    true
                }
                Err(_) => {
                    warn!(position = %position, "Job queue closed");
                    false
                }
            }
        }
    }

    fn fail(&mut self, error: SourceError) {
        error!(error = %error, "Event source failed, stopping the pipeline");
        // Report before raising stop so whoever observes the stop can read the cause.
        if let Some(fatal_tx) = self.fatal_tx.take() {
            let _ = fatal_tx.send(error);
        }
        request_stop(&self.stop_tx);
    }
}
