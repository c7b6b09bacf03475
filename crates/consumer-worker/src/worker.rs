use crate::handler::PayloadHandler;
use crate::metrics::ConsumerMetrics;
use crate::retry::{AckOutcome, AckRetrier, BackoffPolicy};
use consumer_core::{CancellationToken, Message, MessageSource, SourceError};

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a worker loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The stop token fired (cooperative shutdown)
    Stopped,
    /// The source reported it is closed and will never yield again
    SourceClosed,
    /// The task was aborted through its join handle
    Aborted,
    /// The handler or source panicked inside the task
    Panicked,
}

/// One receive -> handle -> acknowledge loop.
///
/// Holds at most one message at a time: handling and acknowledgment finish
/// before the next receive.
pub struct Worker<H: ?Sized> {
    index: usize,
    source: Arc<dyn MessageSource>,
    handler: Arc<H>,
    retrier: AckRetrier,
    backoff: BackoffPolicy,
    metrics: Arc<ConsumerMetrics>,
    /// Session token handed to the handler
    cancel: CancellationToken,
    /// Present only when shutdown is cooperative
    stop: Option<CancellationToken>,
}

impl<H> Worker<H>
where
    H: PayloadHandler + ?Sized,
{
    pub fn new(
        index: usize,
        source: Arc<dyn MessageSource>,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Self {
        let metrics = Arc::new(ConsumerMetrics::default());
        Worker {
            index,
            source,
            handler,
            retrier: AckRetrier::default().with_metrics(metrics.clone()),
            backoff: BackoffPolicy::default(),
            metrics,
            cancel,
            stop: None,
        }
    }

    /// Ack outcomes are recorded on this worker's metrics
    pub fn with_retrier(mut self, retrier: AckRetrier) -> Self {
        self.retrier = retrier.with_metrics(self.metrics.clone());
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ConsumerMetrics>) -> Self {
        self.retrier = self.retrier.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    /// Stop before the next receive once `stop` fires
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Run until the stop token fires or the source closes.
    ///
    /// Without a stop token the loop has no exit condition of its own.
    pub async fn run(self) -> WorkerExit {
        debug!(worker = self.index, "Worker started");
        let mut consecutive_failures: u32 = 0;

        loop {
            if self.should_stop() {
                return self.exit(WorkerExit::Stopped);
            }

            let received = match &self.stop {
                Some(stop) => tokio::select! {
                    biased;
                    _ = stop.cancelled() => return self.exit(WorkerExit::Stopped),
                    result = self.source.receive() => result,
                },
                None => self.source.receive().await,
            };

            match received {
                Ok(message) => {
                    consecutive_failures = 0;
                    self.process(message).await;
                }
                Err(SourceError::Closed) => {
                    return self.exit(WorkerExit::SourceClosed);
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    self.metrics.receive_errors.inc();
                    error!(
                        worker = self.index,
                        error = %e,
                        consecutive_failures,
                        "consumer receive failed"
                    );

                    if !self.pause_after_failure(consecutive_failures).await {
                        return self.exit(WorkerExit::Stopped);
                    }
                }
            }
        }
    }

    /// Handle and acknowledge one message
    pub async fn process(&self, message: Message) -> AckOutcome {
        self.metrics.received.inc();
        self.metrics.in_flight.inc();

        let start = Instant::now();
        let message_id = message.id().to_string();
        info!(
            worker = self.index,
            message_id = %message_id,
            topic = message.topic(),
            redelivery_count = message.redelivery_count(),
            "consume receive"
        );

        if let Err(e) = self
            .handler
            .handle_payload(&self.cancel, &message, message.payload())
            .await
        {
            self.metrics.handler_failures.inc();
            warn!(
                worker = self.index,
                message_id = %message_id,
                error = %format!("{:#}", e),
                "consumer handle payload failed"
            );
        }

        let cost = start.elapsed();
        self.metrics.handle_duration.observe(cost.as_secs_f64());
        info!(worker = self.index, message_id = %message_id, ?cost, "consume handle finish");

        let ack_start = Instant::now();
        let outcome = self.retrier.acknowledge(self.source.as_ref(), &message).await;
        let cost = ack_start.elapsed();
        self.metrics.ack_duration.observe(cost.as_secs_f64());
        info!(
            worker = self.index,
            message_id = %message_id,
            ?cost,
            attempts = outcome.attempts(),
            acknowledged = outcome.is_acknowledged(),
            "consume ack finish"
        );

        self.metrics.in_flight.dec();
        outcome
    }

    fn should_stop(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| stop.is_cancelled())
    }

    /// Wait out the receive backoff. Returns false if the stop token fired meanwhile.
    async fn pause_after_failure(&self, consecutive_failures: u32) -> bool {
        let delay = self.backoff.delay_for(consecutive_failures);
        if delay.is_zero() {
            // Busy retry still has to let other tasks on this thread run
            tokio::task::yield_now().await;
            return true;
        }

        match &self.stop {
            Some(stop) => tokio::select! {
                _ = stop.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    fn exit(&self, reason: WorkerExit) -> WorkerExit {
        info!(worker = self.index, ?reason, "Worker exiting");
        reason
    }
}
