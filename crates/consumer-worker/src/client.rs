use crate::config::{ClientConfig, ConsumerConfig};
use crate::consumer::Consumer;
use consumer_core::{
    subscription_name, tenant, Connector, ConsumerError, Result, SourceError, SubscribeOptions,
    SubscriptionType,
};

use std::sync::Arc;
use tracing::{error, info};

struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
}

/// Cheaply clonable handle for creating consumers.
///
/// Built once from a [`ClientConfig`] and a [`Connector`]; clones share both.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Client {
            inner: Arc::new(ClientInner { config, connector }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Subscribe to `config.topic` with a failover subscription.
    ///
    /// Connection and subscribe failures are returned as-is; nothing is retried here.
    pub async fn new_consumer(&self, config: ConsumerConfig) -> Result<Consumer> {
        config.session.validate()?;

        let subscription = match &config.subscription {
            Some(name) => {
                tenant(&config.topic)?;
                name.clone()
            }
            None => subscription_name(&config.topic)?,
        };

        let options = SubscribeOptions {
            service_url: self.inner.config.service_url.clone(),
            topic: config.topic.clone(),
            subscription: subscription.clone(),
            subscription_type: SubscriptionType::Failover,
            allow_insecure_tls: self.inner.config.allow_insecure_tls,
        };

        let timeout = self.inner.config.operation_timeout();
        let subscribe = self.inner.connector.subscribe(options);
        let subscribed = match tokio::time::timeout(timeout, subscribe).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Subscribe(format!(
                "timed out after {:?}",
                timeout
            ))),
        };

        let source = match subscribed {
            Ok(source) => source,
            Err(e) => {
                error!(
                    error = %e,
                    service_url = %self.inner.config.service_url,
                    topic = %config.topic,
                    subscription = %subscription,
                    "create consumer failed"
                );
                return Err(ConsumerError::Connect(e));
            }
        };

        info!(
            service_url = %self.inner.config.service_url,
            topic = %config.topic,
            subscription = %subscription,
            "create consumer success"
        );
        Consumer::new(source, config.topic, subscription, config.session)
    }
}
