use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Message properties (string key/value pairs attached by the producer)
pub type Properties = HashMap<String, String>;

/// Broker-assigned message identifier.
///
/// Formats as `ledger:entry:partition:batch`. The value is only used for
/// logging and correlation; nothing in the engine orders or deduplicates by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub ledger_id: i64,
    pub entry_id: i64,
    pub partition: i32,
    pub batch_index: i32,
}

impl MessageId {
    pub const DELIMITER: char = ':';

    pub fn new(ledger_id: i64, entry_id: i64, partition: i32, batch_index: i32) -> Self {
        MessageId {
            ledger_id,
            entry_id,
            partition,
            batch_index,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.ledger_id, self.entry_id, self.partition, self.batch_index
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed message id: {0}")]
pub struct ParseMessageIdError(pub String);

impl FromStr for MessageId {
    type Err = ParseMessageIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = || ParseMessageIdError(s.to_string());
        let mut parts = s.split(Self::DELIMITER);

        let ledger_id = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let entry_id = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let partition = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let batch_index = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;

        if parts.next().is_some() {
            return Err(err());
        }

        Ok(MessageId::new(ledger_id, entry_id, partition, batch_index))
    }
}

/// A message received from a subscription.
///
/// Immutable once built; the payload is reference counted so cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: MessageId,
    topic: String,
    key: Option<String>,
    payload: Bytes,
    properties: Properties,
    publish_time: DateTime<Utc>,
    redelivery_count: u32,
}

impl Message {
    pub fn new(id: MessageId, topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Message {
            id,
            topic: topic.into(),
            key: None,
            payload: payload.into(),
            properties: Properties::new(),
            publish_time: Utc::now(),
            redelivery_count: 0,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_publish_time(mut self, publish_time: DateTime<Utc>) -> Self {
        self.publish_time = publish_time;
        self
    }

    pub fn with_redelivery_count(mut self, redelivery_count: u32) -> Self {
        self.redelivery_count = redelivery_count;
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Shared handle to the payload bytes
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn publish_time(&self) -> DateTime<Utc> {
        self.publish_time
    }

    /// Number of times the source has handed this message out before
    pub fn redelivery_count(&self) -> u32 {
        self.redelivery_count
    }

    /// Payload rendered for log output, invalid UTF-8 replaced
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_message_id_display() {
        let id = MessageId::new(7, 42, 0, -1);
        assert_eq!(id.to_string(), "7:42:0:-1");
    }

    #[test]
    fn test_message_id_parse() {
        let id: MessageId = "7:42:0:-1".parse().unwrap();
        assert_eq!(id, MessageId::new(7, 42, 0, -1));
    }

    #[test]
    fn test_message_id_parse_rejects_malformed() {
        assert!("7:42:0".parse::<MessageId>().is_err());
        assert!("7:42:0:-1:9".parse::<MessageId>().is_err());
        assert!("a:42:0:-1".parse::<MessageId>().is_err());
        assert!("".parse::<MessageId>().is_err());
    }

    #[test]
    fn test_message_accessors() {
        let mut props = Properties::new();
        props.insert("em".to_string(), "aes_gcm".to_string());

        let msg = Message::new(MessageId::new(1, 2, 3, 4), "persistent://t/ns/topic", &b"hello"[..])
            .with_key("device-1")
            .with_properties(props)
            .with_redelivery_count(2);

        assert_eq!(msg.id().to_string(), "1:2:3:4");
        assert_eq!(msg.topic(), "persistent://t/ns/topic");
        assert_eq!(msg.key(), Some("device-1"));
        assert_eq!(msg.payload(), b"hello");
        assert_eq!(msg.property("em"), Some("aes_gcm"));
        assert_eq!(msg.property("missing"), None);
        assert_eq!(msg.redelivery_count(), 2);
    }

    #[test]
    fn test_payload_lossy() {
        let msg = Message::new(MessageId::new(0, 0, 0, -1), "t", vec![b'o', b'k', 0xff]);
        assert_eq!(msg.payload_lossy(), "ok\u{fffd}");
    }

    proptest! {
        #[test]
        fn message_id_display_parses_back(
            ledger in any::<i64>(),
            entry in any::<i64>(),
            partition in any::<i32>(),
            batch in any::<i32>(),
        ) {
            let id = MessageId::new(ledger, entry, partition, batch);
            let parsed: MessageId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
