use base64::Engine;
use clap::{Parser, ValueEnum};
use consumer_core::memory::MemoryBroker;
use consumer_core::{CancellationToken, Properties};
use consumer_worker::handler::{JsonEnvelopeHandler, LoggingHandler};
use consumer_worker::{
    AppConfig, Client, ClientConfig, ConsumerConfig, PayloadHandler, ShutdownMode,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShutdownArg {
    Cooperative,
    Detach,
}

impl From<ShutdownArg> for ShutdownMode {
    fn from(arg: ShutdownArg) -> Self {
        match arg {
            ShutdownArg::Cooperative => ShutdownMode::Cooperative,
            ShutdownArg::Detach => ShutdownMode::Detach,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "consumer-demo")]
#[command(about = "Run a consumer session against an in-memory broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Topic to consume (overrides the config file)
    #[arg(short, long)]
    topic: Option<String>,

    /// Number of workers (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Number of synthetic messages to publish
    #[arg(short, long, default_value = "100")]
    messages: usize,

    /// Worker behaviour once the session is cancelled
    #[arg(long, value_enum)]
    shutdown: Option<ShutdownArg>,

    /// Decode payloads as JSON envelopes instead of logging a preview
    #[arg(long)]
    json_envelope: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig {
            client: ClientConfig::new("memory://local"),
            consumer: ConsumerConfig::new("persistent://demo/out/event"),
            log_level: "info".to_string(),
        }
    };

    // Override with CLI args
    if let Some(topic) = args.topic {
        config.consumer.topic = topic;
    }
    if let Some(workers) = args.workers {
        config.consumer.session.workers = workers;
    }
    if let Some(shutdown) = args.shutdown {
        config.consumer.session.shutdown = shutdown.into();
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let broker = Arc::new(MemoryBroker::new());
    let client = Client::new(config.client.clone(), broker.clone());

    let topic = config.consumer.topic.clone();
    let consumer = client.new_consumer(config.consumer).await?;

    let subscription = broker.subscription(&topic, consumer.subscription());
    for i in 0..args.messages {
        let body = serde_json::json!({
            "data": base64::engine::general_purpose::STANDARD.encode(format!("event {}", i)),
            "t": i,
        });
        let mut properties = Properties::new();
        properties.insert("em".to_string(), "none".to_string());
        subscription.publish(serde_json::to_vec(&body)?, properties);
    }
    tracing::info!(count = args.messages, topic = %topic, "Published demo messages");

    let handler: Arc<dyn PayloadHandler> = if args.json_envelope {
        Arc::new(JsonEnvelopeHandler)
    } else {
        Arc::new(LoggingHandler::default())
    };

    let cancel = CancellationToken::new();

    // Handle shutdown signals
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        signal_cancel.cancel();
    });

    // Stop once every published message has been acknowledged
    let metrics = consumer.metrics().clone();
    let expected = args.messages as u64;
    let done_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = done_cancel.cancelled() => break,
                _ = interval.tick() => {
                    if metrics.acked.get() >= expected {
                        tracing::info!(acked = expected, "All messages acknowledged");
                        done_cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    let workers = consumer.receive_and_handle(cancel, handler).await;
    let exits = workers.shutdown(Duration::from_secs(5)).await;
    tracing::info!(?exits, "Workers finished");

    consumer.close().await?;

    let metrics = consumer.metrics();
    tracing::info!(
        received = metrics.received.get(),
        acked = metrics.acked.get(),
        handler_failures = metrics.handler_failures.get(),
        ack_exhausted = metrics.ack_exhausted.get(),
        "Session summary"
    );
    tracing::debug!("{}", metrics.render()?);

    Ok(())
}
