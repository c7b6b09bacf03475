//! Consumer worker pool
//!
//! Pulls messages from a shared subscription with a fixed pool of workers,
//! runs each through a [`PayloadHandler`], and acknowledges it with bounded
//! retry. Delivery is at-least-once.
//!
//! # Features
//! - Configurable pool size (10 workers by default)
//! - Handler failures are logged and never block acknowledgment
//! - Acknowledgment retried 3 times, 1 second apart, then left for redelivery
//! - Capped exponential backoff on receive errors
//! - Cooperative or detached shutdown when the session is cancelled
//! - Per-message handle/ack timing in logs and Prometheus histograms

pub mod client;
pub mod config;
pub mod consumer;
pub mod handler;
pub mod metrics;
pub mod retry;
pub mod worker;

pub use client::Client;
pub use config::{AppConfig, ClientConfig, ConsumerConfig, SessionConfig, ShutdownMode};
pub use consumer::{Consumer, WorkerSet};
pub use handler::{FnHandler, HandlerResult, PayloadHandler};
pub use metrics::ConsumerMetrics;
pub use retry::{AckOutcome, AckRetrier, BackoffPolicy};
pub use worker::{Worker, WorkerExit};
