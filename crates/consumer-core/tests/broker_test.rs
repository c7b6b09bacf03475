use consumer_core::memory::MemoryBroker;
use consumer_core::{
    subscription_name, Connector, MessageId, MessageSource, Properties, SourceError,
    SubscribeOptions, SubscriptionType,
};

fn options(topic: &str) -> SubscribeOptions {
    SubscribeOptions {
        service_url: "memory://local".to_string(),
        topic: topic.to_string(),
        subscription: subscription_name(topic).unwrap(),
        subscription_type: SubscriptionType::Failover,
        allow_insecure_tls: true,
    }
}

#[tokio::test]
async fn test_subscribe_with_derived_name() {
    let broker = MemoryBroker::new();
    let topic = "persistent://tenant1/out/event";

    let source = broker.subscribe(options(topic)).await.unwrap();
    let handle = broker.subscription(topic, "tenant1-sub");
    assert_eq!(broker.subscription_count(), 1);

    let mut properties = Properties::new();
    properties.insert("em".to_string(), "none".to_string());
    let id = handle.publish(b"hello".to_vec(), properties);

    let message = source.receive().await.unwrap();
    assert_eq!(message.id(), id);
    assert_eq!(message.topic(), topic);
    assert_eq!(message.payload(), b"hello");
    assert_eq!(message.property("em"), Some("none"));

    source.acknowledge(&message).await.unwrap();
    assert_eq!(handle.unacknowledged(), 0);
}

#[tokio::test]
async fn test_close_then_resubscribe_redelivers_outstanding() {
    let broker = MemoryBroker::new();
    let topic = "persistent://acme/in/orders";

    let first = broker.subscribe(options(topic)).await.unwrap();
    let handle = broker.subscription(topic, "acme-sub");
    handle.publish(b"a".to_vec(), Properties::new());

    let message = first.receive().await.unwrap();
    first.close().await.unwrap();
    assert!(matches!(first.receive().await, Err(SourceError::Closed)));

    let second = broker.subscribe(options(topic)).await.unwrap();
    let again = second.receive().await.unwrap();
    assert_eq!(again.id(), message.id());
    assert_eq!(again.redelivery_count(), 1);
}

#[tokio::test]
async fn test_ack_of_foreign_id_is_rejected() {
    let broker = MemoryBroker::new();
    let source = broker.subscribe(options("persistent://acme/in/orders")).await.unwrap();

    let stray = consumer_core::Message::new(
        MessageId::new(9, 9, 0, -1),
        "persistent://acme/in/orders",
        b"x".to_vec(),
    );
    assert!(matches!(
        source.acknowledge(&stray).await,
        Err(SourceError::UnknownMessage(id)) if id == MessageId::new(9, 9, 0, -1)
    ));
}
