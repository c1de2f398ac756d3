//! Delivery semantics of the in-memory topic and queues.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use product_audit_core::context::{RequestContext, TraceId};
use product_audit_core::envelope::{ATTR_EVENT_TYPE, Attributes, Envelope};
use product_audit_core::event::{EventType, ProductEvent, ProductFailureEvent};
use product_audit_core::redrive::RedrivePolicy;
use product_audit_core::transport::{MessageId, MessageQueue, ReceiptHandle, Topic, TransportError};
use product_audit_testing::{InMemoryBus, InMemoryQueue};
use std::time::Duration;

const SHORT_WAIT: Duration = Duration::from_millis(50);

fn ctx() -> RequestContext {
    RequestContext::new(Some("req-1".to_string()), TraceId::new("1-00000001-abc"))
}

fn product_envelope(event_type: EventType) -> Envelope {
    let event = ProductEvent {
        id: "p-1".to_string(),
        code: "ABC".to_string(),
        price: 10.0,
    };
    Envelope::encode(event_type, &event, &ctx()).unwrap()
}

fn failure_envelope() -> Envelope {
    let event = ProductFailureEvent {
        id: None,
        status: 412,
        error: "duplicate code".to_string(),
    };
    Envelope::encode(EventType::ProductFailure, &event, &ctx()).unwrap()
}

fn raw_envelope(event_type: &str) -> Envelope {
    let mut attributes = Attributes::new();
    attributes.insert(ATTR_EVENT_TYPE.to_string(), event_type.to_string());
    Envelope::new(attributes, "{}".to_string())
}

#[tokio::test]
async fn topic_routes_by_event_type() {
    let bus = InMemoryBus::new();

    for event_type in [
        EventType::ProductCreated,
        EventType::ProductUpdated,
        EventType::ProductDeleted,
    ] {
        bus.topic.publish(&product_envelope(event_type)).await.unwrap();
    }
    bus.topic.publish(&failure_envelope()).await.unwrap();

    assert_eq!(bus.product_events.len(), 3);
    assert_eq!(bus.failure_events.len(), 1);
    assert!(bus.dead_letters.is_empty());
    assert_eq!(bus.topic.published().len(), 4);
}

#[tokio::test]
async fn unknown_event_type_reaches_no_queue() {
    let bus = InMemoryBus::new();

    bus.topic.publish(&raw_envelope("PRODUCT_ARCHIVED")).await.unwrap();

    assert!(bus.product_events.is_empty());
    assert!(bus.failure_events.is_empty());
    assert_eq!(bus.topic.published().len(), 1);
}

#[tokio::test]
async fn published_ids_are_sequential_and_preserved_on_delivery() {
    let bus = InMemoryBus::new();

    let first = bus.topic.publish(&product_envelope(EventType::ProductCreated)).await.unwrap();
    let second = bus.topic.publish(&failure_envelope()).await.unwrap();
    assert_eq!(first.as_str(), "msg-000001");
    assert_eq!(second.as_str(), "msg-000002");

    let batch = bus.failure_events.receive(10, SHORT_WAIT).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].message_id, second);
    assert_eq!(batch[0].receive_count, 1);
    assert_eq!(batch[0].envelope, failure_envelope());
}

#[tokio::test]
async fn unavailable_topic_fails_publish_without_delivering() {
    let bus = InMemoryBus::new();
    bus.topic.set_unavailable(true);

    let error = bus
        .topic
        .publish(&product_envelope(EventType::ProductCreated))
        .await
        .unwrap_err();

    assert!(matches!(error, TransportError::PublishFailed { .. }));
    assert!(bus.product_events.is_empty());
    assert!(bus.topic.published().is_empty());
}

#[tokio::test]
async fn receive_respects_max_messages() {
    let queue = InMemoryQueue::new("work");
    for n in 0..5 {
        queue.send(MessageId::new(format!("m-{n}")), raw_envelope("PRODUCT_CREATED"));
    }

    let batch = queue.receive(2, SHORT_WAIT).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(queue.in_flight(), 2);

    let rest = queue.receive(10, SHORT_WAIT).await.unwrap();
    assert_eq!(rest.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn empty_receive_returns_after_wait() {
    let queue = InMemoryQueue::new("work");

    let start = tokio::time::Instant::now();
    let batch = queue.receive(10, Duration::from_secs(10)).await.unwrap();

    assert!(batch.is_empty());
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn long_poll_wakes_on_arrival() {
    let queue = InMemoryQueue::new("work");
    let producer = queue.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        producer.send(MessageId::new("late"), raw_envelope("PRODUCT_CREATED"));
    });

    let start = tokio::time::Instant::now();
    let batch = queue.receive(10, Duration::from_secs(10)).await.unwrap();

    assert_eq!(batch.len(), 1);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn ack_removes_message() {
    let queue = InMemoryQueue::new("work");
    queue.send(MessageId::new("m-1"), raw_envelope("PRODUCT_CREATED"));

    let batch = queue.receive(10, SHORT_WAIT).await.unwrap();
    queue.ack(&batch[0].receipt).await.unwrap();

    assert!(queue.is_empty());
    assert_eq!(queue.acked(), vec![MessageId::new("m-1")]);
    assert!(queue.receive(10, SHORT_WAIT).await.unwrap().is_empty());
}

#[tokio::test]
async fn nack_makes_message_visible_again() {
    let queue = InMemoryQueue::new("work");
    queue.send(MessageId::new("m-1"), raw_envelope("PRODUCT_CREATED"));

    let first = queue.receive(10, SHORT_WAIT).await.unwrap();
    queue.nack(&first[0].receipt).await.unwrap();

    let second = queue.receive(10, SHORT_WAIT).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, first[0].message_id);
    assert_eq!(second[0].receive_count, 2);
    assert_ne!(second[0].receipt, first[0].receipt);
}

#[tokio::test]
async fn unknown_receipt_is_rejected() {
    let queue = InMemoryQueue::new("work");

    let error = queue.ack(&ReceiptHandle::new("nope")).await.unwrap_err();
    assert_eq!(error, TransportError::UnknownReceipt("nope".to_string()));
}

#[tokio::test(start_paused = true)]
async fn unsettled_message_reappears_after_visibility_timeout() {
    let queue = InMemoryQueue::new("work").with_visibility_timeout(Duration::from_secs(5));
    queue.send(MessageId::new("m-1"), raw_envelope("PRODUCT_CREATED"));

    let first = queue.receive(10, SHORT_WAIT).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(queue.receive(10, Duration::from_secs(1)).await.unwrap().is_empty());

    let second = queue.receive(10, Duration::from_secs(10)).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].receive_count, 2);

    // The first receipt expired with its visibility window.
    assert!(queue.ack(&first[0].receipt).await.is_err());
    queue.ack(&second[0].receipt).await.unwrap();
}

#[tokio::test]
async fn exhausted_message_is_dead_lettered_after_bound() {
    let dlq = InMemoryQueue::new("dlq");
    let queue = InMemoryQueue::new("work").with_redrive(RedrivePolicy::new(3, "dlq"), dlq.clone());
    queue.send(MessageId::new("m-1"), raw_envelope("PRODUCT_CREATED"));

    for expected_count in 1..=3 {
        let batch = queue.receive(10, SHORT_WAIT).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].receive_count, expected_count);
        queue.nack(&batch[0].receipt).await.unwrap();
    }

    assert!(queue.receive(10, SHORT_WAIT).await.unwrap().is_empty());
    assert!(queue.is_empty());
    assert_eq!(queue.deliveries(), 3);
    assert_eq!(dlq.message_ids(), vec![MessageId::new("m-1")]);
    assert_eq!(dlq.envelopes(), vec![raw_envelope("PRODUCT_CREATED")]);
}

#[tokio::test]
async fn both_queues_share_one_dead_letter_queue() {
    let bus = InMemoryBus::with_policy(RedrivePolicy::new(1, "shared-dlq"));
    bus.topic.publish(&product_envelope(EventType::ProductCreated)).await.unwrap();
    bus.topic.publish(&failure_envelope()).await.unwrap();

    for queue in [&bus.product_events, &bus.failure_events] {
        let batch = queue.receive(10, SHORT_WAIT).await.unwrap();
        queue.nack(&batch[0].receipt).await.unwrap();
        assert!(queue.receive(10, SHORT_WAIT).await.unwrap().is_empty());
    }

    assert_eq!(bus.dead_letters.name(), "shared-dlq");
    assert_eq!(bus.dead_letters.len(), 2);
    assert_eq!(
        bus.product_events.dead_letter_queue().map(InMemoryQueue::name),
        Some("shared-dlq")
    );
}
