use crate::config::{SessionConfig, ShutdownMode};
use crate::handler::PayloadHandler;
use crate::metrics::ConsumerMetrics;
use crate::retry::{AckRetrier, BackoffPolicy};
use crate::worker::{Worker, WorkerExit};
use consumer_core::{CancellationToken, ConsumerError, MessageSource, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, Instrument};

/// A subscription bound to a worker pool configuration.
///
/// The source handle is shared by every worker spawned from this consumer and
/// is only released by [`Consumer::close`].
pub struct Consumer {
    source: Arc<dyn MessageSource>,
    topic: String,
    subscription: String,
    config: SessionConfig,
    metrics: Arc<ConsumerMetrics>,
    closed: AtomicBool,
}

impl Consumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        topic: impl Into<String>,
        subscription: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = ConsumerMetrics::new().map_err(|e| ConsumerError::Config(e.to_string()))?;

        Ok(Consumer {
            source,
            topic: topic.into(),
            subscription: subscription.into(),
            config,
            metrics: Arc::new(metrics),
            closed: AtomicBool::new(false),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Spawn the worker pool and return immediately.
    ///
    /// Each worker hands `cancel` to the handler. In cooperative mode the
    /// workers also stop once it fires; in detach mode they ignore it.
    pub fn spawn_workers<H>(&self, cancel: &CancellationToken, handler: Arc<H>) -> WorkerSet
    where
        H: PayloadHandler + ?Sized + 'static,
    {
        let retrier = AckRetrier::from_config(&self.config);
        let backoff = BackoffPolicy::from_config(&self.config);

        let handles = (0..self.config.workers)
            .map(|index| {
                let mut worker =
                    Worker::new(index, self.source.clone(), handler.clone(), cancel.clone())
                        .with_retrier(retrier.clone())
                        .with_backoff(backoff)
                        .with_metrics(self.metrics.clone());

                if self.config.shutdown == ShutdownMode::Cooperative {
                    worker = worker.with_stop(cancel.child_token());
                }

                let span = tracing::info_span!("worker", subscription = %self.subscription, index);
                tokio::spawn(worker.run().instrument(span))
            })
            .collect();

        WorkerSet { handles }
    }

    /// Run the worker pool until `cancel` fires.
    ///
    /// Returns as soon as the token fires without waiting for workers. Whether
    /// the returned workers keep running depends on [`ShutdownMode`]; use the
    /// [`WorkerSet`] to drain or abort them.
    pub async fn receive_and_handle<H>(
        &self,
        cancel: CancellationToken,
        handler: Arc<H>,
    ) -> WorkerSet
    where
        H: PayloadHandler + ?Sized + 'static,
    {
        let workers = self.spawn_workers(&cancel, handler);
        info!(
            topic = %self.topic,
            subscription = %self.subscription,
            workers = workers.len(),
            shutdown = ?self.config.shutdown,
            "Consumer session started"
        );

        cancel.cancelled().await;

        info!(
            subscription = %self.subscription,
            still_running = workers.running(),
            "Consumer session cancelled"
        );
        workers
    }

    /// Release the source. Calling it again is a no-op.
    ///
    /// Does not wait for workers; a worker blocked in receive sees the source
    /// close and exits.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(subscription = %self.subscription, "Consumer already closed");
            return Ok(());
        }

        self.source.close().await.map_err(ConsumerError::Close)?;
        info!(topic = %self.topic, subscription = %self.subscription, "Consumer closed");
        Ok(())
    }
}

/// Join handles of the workers spawned by one session.
///
/// Dropping the set detaches the workers.
pub struct WorkerSet {
    handles: Vec<JoinHandle<WorkerExit>>,
}

impl WorkerSet {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of workers that have not exited yet
    pub fn running(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every worker to exit
    pub async fn join(self) -> Vec<WorkerExit> {
        futures::future::join_all(self.handles)
            .await
            .into_iter()
            .map(exit_reason)
            .collect()
    }

    /// Wait up to `grace` for the workers to exit, then abort the rest
    pub async fn shutdown(self, grace: Duration) -> Vec<WorkerExit> {
        let deadline = tokio::time::Instant::now() + grace;
        let mut exits = Vec::with_capacity(self.handles.len());

        for mut handle in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(result) => exits.push(exit_reason(result)),
                Err(_) => {
                    handle.abort();
                    exits.push(WorkerExit::Aborted);
                }
            }
        }
        exits
    }

    /// Abort every worker without waiting
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn exit_reason(result: std::result::Result<WorkerExit, JoinError>) -> WorkerExit {
    match result {
        Ok(exit) => exit,
        Err(e) if e.is_panic() => WorkerExit::Panicked,
        Err(_) => WorkerExit::Aborted,
    }
}
