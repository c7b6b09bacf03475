use crate::{Message, SourceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A subscription that hands out messages and takes acknowledgments.
///
/// One handle is shared by every worker of a session, so implementations must
/// tolerate concurrent `receive` and `acknowledge` calls. A message must be
/// handed to at most one receiver until it is redelivered.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message. There is no per-call timeout.
    async fn receive(&self) -> Result<Message, SourceError>;

    /// Confirm that a message was processed so it is not redelivered
    async fn acknowledge(&self, message: &Message) -> Result<(), SourceError>;

    /// Release the subscription
    async fn close(&self) -> Result<(), SourceError>;
}

/// Subscription mode requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Exclusive,
    Shared,
    /// One active consumer at a time, with handover on failure
    Failover,
    KeyShared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub service_url: String,
    pub topic: String,
    pub subscription: String,
    pub subscription_type: SubscriptionType,
    pub allow_insecure_tls: bool,
}

/// Opens subscriptions against a broker.
///
/// Wire protocol and authentication live behind this trait.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Result<Arc<dyn MessageSource>, SourceError>;
}
