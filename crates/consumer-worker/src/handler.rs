use async_trait::async_trait;
use base64::Engine;
use consumer_core::{CancellationToken, Message};
use std::future::Future;
use tracing::info;

/// Result type for payload handlers
pub type HandlerResult = anyhow::Result<()>;

/// Trait for payload handlers.
///
/// Invoked concurrently by every worker of a session, so implementations must
/// not assume exclusivity. An `Err` is logged and the message is acknowledged
/// anyway; redelivery is never triggered by a handler failure.
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    async fn handle_payload(
        &self,
        cancel: &CancellationToken,
        message: &Message,
        payload: &[u8],
    ) -> HandlerResult;
}

/// Handler backed by an async closure that receives a clone of the message
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        FnHandler { f }
    }
}

#[async_trait]
impl<F, Fut> PayloadHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle_payload(
        &self,
        _cancel: &CancellationToken,
        message: &Message,
        _payload: &[u8],
    ) -> HandlerResult {
        (self.f)(message.clone()).await
    }
}

/// Example handler that logs a preview of each payload
pub struct LoggingHandler {
    preview_len: usize,
}

impl LoggingHandler {
    pub fn new(preview_len: usize) -> Self {
        LoggingHandler { preview_len }
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        LoggingHandler::new(256)
    }
}

#[async_trait]
impl PayloadHandler for LoggingHandler {
    async fn handle_payload(
        &self,
        _cancel: &CancellationToken,
        message: &Message,
        payload: &[u8],
    ) -> HandlerResult {
        let end = payload.len().min(self.preview_len);
        info!(
            message_id = %message.id(),
            len = payload.len(),
            payload = %String::from_utf8_lossy(&payload[..end]),
            "payload preview"
        );
        Ok(())
    }
}

/// Example handler for JSON envelopes of the form `{"data": "<base64>", ...}`.
///
/// Decodes the `data` field and logs its size along with the `em` property
/// naming the producer's encryption model. Decryption itself is left to the
/// application.
pub struct JsonEnvelopeHandler;

#[async_trait]
impl PayloadHandler for JsonEnvelopeHandler {
    async fn handle_payload(
        &self,
        _cancel: &CancellationToken,
        message: &Message,
        payload: &[u8],
    ) -> HandlerResult {
        let envelope: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| anyhow::anyhow!("json unmarshal failed: {}", e))?;

        let data = envelope
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("envelope has no string `data` field"))?;

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| anyhow::anyhow!("base64 decode failed: {}", e))?;

        info!(
            message_id = %message.id(),
            encryption_model = message.property("em").unwrap_or("none"),
            decoded_len = decoded.len(),
            "envelope decoded"
        );
        Ok(())
    }
}
