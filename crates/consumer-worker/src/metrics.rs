use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Prometheus metrics for a consumer session.
///
/// Every instance owns its registry, so several sessions (or tests) in one
/// process never collide on metric names.
pub struct ConsumerMetrics {
    pub registry: Registry,

    // Receive side
    pub received: IntCounter,
    pub receive_errors: IntCounter,

    // Handler
    pub handler_failures: IntCounter,
    pub handle_duration: Histogram,

    // Acknowledgment
    pub acked: IntCounter,
    pub ack_failures: IntCounter,
    pub ack_exhausted: IntCounter,
    pub ack_duration: Histogram,

    // Workers currently holding a message
    pub in_flight: IntGauge,
}

impl ConsumerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let received = IntCounter::new("consumer_messages_received_total", "Messages received")?;
        registry.register(Box::new(received.clone()))?;

        let receive_errors =
            IntCounter::new("consumer_receive_errors_total", "Failed receive calls")?;
        registry.register(Box::new(receive_errors.clone()))?;

        let handler_failures = IntCounter::new(
            "consumer_handler_failures_total",
            "Messages whose handler reported an error",
        )?;
        registry.register(Box::new(handler_failures.clone()))?;

        let handle_duration = Histogram::with_opts(HistogramOpts::new(
            "consumer_handle_duration_seconds",
            "Time spent in the payload handler",
        ))?;
        registry.register(Box::new(handle_duration.clone()))?;

        let acked = IntCounter::new("consumer_messages_acked_total", "Messages acknowledged")?;
        registry.register(Box::new(acked.clone()))?;

        let ack_failures =
            IntCounter::new("consumer_ack_failures_total", "Failed acknowledgment attempts")?;
        registry.register(Box::new(ack_failures.clone()))?;

        let ack_exhausted = IntCounter::new(
            "consumer_ack_exhausted_total",
            "Messages left unacknowledged after all retries",
        )?;
        registry.register(Box::new(ack_exhausted.clone()))?;

        let ack_duration = Histogram::with_opts(HistogramOpts::new(
            "consumer_ack_duration_seconds",
            "Time spent acknowledging, including retries",
        ))?;
        registry.register(Box::new(ack_duration.clone()))?;

        let in_flight = IntGauge::new(
            "consumer_messages_in_flight",
            "Messages received but not yet acknowledged or abandoned",
        )?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(ConsumerMetrics {
            registry,
            received,
            receive_errors,
            handler_failures,
            handle_duration,
            acked,
            ack_failures,
            ack_exhausted,
            ack_duration,
            in_flight,
        })
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
