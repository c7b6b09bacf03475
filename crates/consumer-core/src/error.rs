use crate::MessageId;
use thiserror::Error;

/// Errors reported by a message source or the connector that opens it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Message source is closed")]
    Closed,

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Failed to connect consumer: {0}")]
    Connect(#[source] SourceError),

    #[error("Failed to close consumer: {0}")]
    Close(#[source] SourceError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
