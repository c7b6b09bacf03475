use consumer_core::ConsumerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of workers per session
pub const DEFAULT_WORKERS: usize = 10;

/// Connection settings shared by every consumer created from one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub service_url: String,
    pub allow_insecure_tls: bool,
    pub operation_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            service_url: "pulsar://127.0.0.1:6650".to_string(),
            allow_insecure_tls: true,
            operation_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn new(service_url: impl Into<String>) -> Self {
        ClientConfig {
            service_url: service_url.into(),
            ..Default::default()
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Per-consumer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub topic: String,
    /// Explicit subscription name; derived from the topic's tenant when absent
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub session: SessionConfig,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        ConsumerConfig {
            topic: topic.into(),
            subscription: None,
            session: SessionConfig::default(),
        }
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// What happens to running workers when the session's cancellation token fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Workers finish the message in hand, then stop; a pending receive is abandoned
    #[default]
    Cooperative,
    /// Workers are not signalled and keep consuming after the session returns
    Detach,
}

/// Worker pool settings for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub workers: usize,
    pub shutdown: ShutdownMode,
    pub ack_max_attempts: u32,
    pub ack_retry_delay_ms: u64,
    pub receive_backoff_base_ms: u64,
    pub receive_backoff_max_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            workers: DEFAULT_WORKERS,
            shutdown: ShutdownMode::Cooperative,
            ack_max_attempts: 3,
            ack_retry_delay_ms: 1000,
            receive_backoff_base_ms: 50,
            receive_backoff_max_ms: 5000,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.workers == 0 {
            return Err(ConsumerError::Config("workers must be at least 1".into()));
        }
        if self.ack_max_attempts == 0 {
            return Err(ConsumerError::Config(
                "ack_max_attempts must be at least 1".into(),
            ));
        }
        if self.receive_backoff_base_ms > self.receive_backoff_max_ms {
            return Err(ConsumerError::Config(format!(
                "receive_backoff_base_ms ({}) exceeds receive_backoff_max_ms ({})",
                self.receive_backoff_base_ms, self.receive_backoff_max_ms
            )));
        }
        Ok(())
    }
}

/// Top-level file layout for the demo binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    pub consumer: ConsumerConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.consumer.session.validate()?;
        Ok(config)
    }
}
