// Async ingestion pipeline with bounded channels for backpressure handling

use crate::analysis::{AnalysisContext, AnalysisProvider};
use crate::error::Result;
use crate::learning::LearningCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

/// Batch size that triggers an immediate flush
const FLUSH_BATCH_SIZE: usize = 32;

/// One failed workflow run to be analyzed
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub run_id: String,
    pub repository: String,
    pub workflow: String,
    pub conclusion: String,
    pub raw_log: String,
}

impl FailureEvent {
    fn context(&self) -> AnalysisContext {
        AnalysisContext {
            repository: Some(self.repository.clone()),
            workflow: Some(self.workflow.clone()),
            conclusion: Some(self.conclusion.clone()),
            prior_remediations: Vec::new(),
        }
    }
}

/// Processing pipeline that receives failure events and runs them through
/// the learning coordinator
pub struct Pipeline {
    /// Channel for submitting failure events
    event_tx: mpsc::Sender<FailureEvent>,
    /// Handle to the worker task
    worker_handle: Option<tokio::task::JoinHandle<()>>,
    /// Flush interval for time-based flushing
    flush_interval: Duration,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(
        coordinator: Arc<LearningCoordinator>,
        analyzer: Arc<dyn AnalysisProvider>,
        buffer_size: usize,
        flush_interval_secs: u64,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(buffer_size);
        let flush_interval = Duration::from_secs(flush_interval_secs);

        let worker_handle = Some(tokio::spawn(async move {
            analysis_worker(event_rx, coordinator, analyzer, flush_interval).await;
        }));

        Self {
            event_tx,
            worker_handle,
            flush_interval,
        }
    }

    /// Submit a failure event
    /// Returns an error if the channel is closed
    pub async fn send(&self, event: FailureEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| crate::error::CisageError::Pipeline("Pipeline channel closed".to_string()))?;
        Ok(())
    }

    /// Shutdown the pipeline gracefully, draining pending events
    pub async fn shutdown(mut self) {
        // Close the sender so the worker knows to finish
        drop(self.event_tx);

        if let Some(handle) = self.worker_handle.take() {
            tracing::info!("Waiting for pipeline to drain...");
            let _ = handle.await;
            tracing::info!("Pipeline drained successfully");
        }
    }

    /// Get the flush interval
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}

/// Worker that receives failure events and processes them
async fn analysis_worker(
    mut event_rx: mpsc::Receiver<FailureEvent>,
    coordinator: Arc<LearningCoordinator>,
    analyzer: Arc<dyn AnalysisProvider>,
    flush_interval: Duration,
) {
    let mut flush_timer = time::interval(flush_interval);
    let mut pending: Vec<FailureEvent> = Vec::new();
    let mut stats = WorkerStats::default();

    loop {
        tokio::select! {
            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        pending.push(event);

                        if pending.len() >= FLUSH_BATCH_SIZE {
                            flush_batch(&mut pending, &coordinator, analyzer.as_ref(), &mut stats);
                        }
                    }
                    // Channel closed: drain and finish
                    None => {
                        if !pending.is_empty() {
                            tracing::info!("Draining {} pending events", pending.len());
                            flush_batch(&mut pending, &coordinator, analyzer.as_ref(), &mut stats);
                        }
                        tracing::info!(
                            "Analysis worker finished: {} events processed, {} errors",
                            stats.processed,
                            stats.errors
                        );
                        break;
                    }
                }
            }

            _ = flush_timer.tick() => {
                if !pending.is_empty() {
                    flush_batch(&mut pending, &coordinator, analyzer.as_ref(), &mut stats);
                }
            }
        }
    }
}

/// Flush a batch of events through the coordinator
///
/// A failure on one event is logged and counted; it never takes the
/// worker down or affects other events.
fn flush_batch(
    events: &mut Vec<FailureEvent>,
    coordinator: &LearningCoordinator,
    analyzer: &dyn AnalysisProvider,
    stats: &mut WorkerStats,
) {
    if events.is_empty() {
        return;
    }

    tracing::debug!("Flushing {} events through the coordinator", events.len());

    for event in events.drain(..) {
        let ctx = event.context();
        match coordinator.process(&event.raw_log, &ctx, analyzer) {
            Ok(outcome) => {
                tracing::debug!(
                    run_id = %event.run_id,
                    fingerprint = %outcome.signature.fingerprint,
                    novel = outcome.is_novel(),
                    "Processed failure event"
                );
                stats.processed += 1;
            }
            Err(e) => {
                tracing::error!(run_id = %event.run_id, "Failed to process event: {}", e);
                stats.errors += 1;
            }
        }
    }
}

/// Statistics for the analysis worker
#[derive(Default)]
struct WorkerStats {
    processed: u64,
    errors: u64,
}
