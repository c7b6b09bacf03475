//! Acknowledgment retry and receive backoff.

use crate::config::SessionConfig;
use crate::metrics::ConsumerMetrics;
use consumer_core::{Message, MessageSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Result of driving one acknowledgment to completion or exhaustion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged { attempts: u32 },
    /// Every attempt failed; the message is left for the source to redeliver
    Exhausted { attempts: u32 },
}

impl AckOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, AckOutcome::Acknowledged { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            AckOutcome::Acknowledged { attempts } | AckOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

/// Bounded retry around a single acknowledgment call.
///
/// Fixed delay between attempts; no delay after the last one.
#[derive(Clone)]
pub struct AckRetrier {
    max_attempts: u32,
    delay: Duration,
    metrics: Option<Arc<ConsumerMetrics>>,
}

impl Default for AckRetrier {
    fn default() -> Self {
        AckRetrier::new(3, Duration::from_secs(1))
    }
}

impl AckRetrier {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        AckRetrier {
            max_attempts: max_attempts.max(1),
            delay,
            metrics: None,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        AckRetrier::new(
            config.ack_max_attempts,
            Duration::from_millis(config.ack_retry_delay_ms),
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<ConsumerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn acknowledge(&self, source: &dyn MessageSource, message: &Message) -> AckOutcome {
        for attempt in 1..=self.max_attempts {
            match source.acknowledge(message).await {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.acked.inc();
                    }
                    return AckOutcome::Acknowledged { attempts: attempt };
                }
                Err(e) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.ack_failures.inc();
                    }
                    warn!(
                        message_id = %message.id(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        msg = %message.payload_lossy(),
                        "ack failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.ack_exhausted.inc();
        }
        error!(
            message_id = %message.id(),
            attempts = self.max_attempts,
            "ack retries exhausted, leaving message for redelivery"
        );
        AckOutcome::Exhausted {
            attempts: self.max_attempts,
        }
    }
}

/// Capped exponential delay between consecutive failed receives.
///
/// A zero base delay disables waiting entirely (busy retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        BackoffPolicy {
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        BackoffPolicy::new(
            Duration::from_millis(config.receive_backoff_base_ms),
            Duration::from_millis(config.receive_backoff_max_ms),
        )
    }

    /// Delay before the next receive after `consecutive_failures` failures in a row.
    ///
    /// base_delay * 2^(failures - 1), capped at max_delay. Zero failures means no delay.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = (consecutive_failures - 1).min(20); // Prevent overflow
        let delay = self.base_delay.saturating_mul(2u32.pow(exponent));
        delay.min(self.max_delay)
    }
}
