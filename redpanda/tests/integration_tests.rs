//! Integration tests for [`RedpandaTopic`] and [`RedpandaQueue`] against a real broker.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Filtered fan-out of one topic into the product and failure queues
//! - Message ids that survive redelivery
//! - Bounded redelivery followed by dead-lettering
//! - Offset commits on ack
//!
//! # Running These Tests
//!
//! Ignored by default because they need Docker and take 15-60 seconds each:
//!
//! ```bash
//! cargo test -p product-audit-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used)]

use product_audit_core::context::{RequestContext, TraceId};
use product_audit_core::envelope::{ATTR_CORRELATION_ID, Attributes, Envelope};
use product_audit_core::event::{EventType, ProductEvent, ProductFailureEvent};
use product_audit_core::redrive::RedrivePolicy;
use product_audit_core::routing::FilterPolicy;
use product_audit_core::transport::{Delivery, MessageQueue, Topic};
use product_audit_redpanda::{RedpandaQueue, RedpandaTopic};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn topic(brokers: &str, name: &str) -> RedpandaTopic {
    RedpandaTopic::builder()
        .brokers(brokers)
        .topic(name)
        .build()
        .expect("Failed to create topic publisher")
}

/// Publish an attribute-less record so the topic exists before consumers join.
///
/// Queues filter such records out.
async fn ensure_topics(brokers: &str, names: &[&str]) {
    let warmup = Envelope::new(Attributes::new(), "{}".to_string());
    for name in names {
        let publisher = topic(brokers, name);
        let mut attempts = 0;
        while publisher.publish(&warmup).await.is_err() {
            attempts += 1;
            assert!(attempts < 60, "Topic {name} never became available");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
}

fn queue(brokers: &str, name: &str, filter: FilterPolicy, redrive: RedrivePolicy) -> RedpandaQueue {
    queue_on(brokers, "it-product-events", name, filter, redrive)
}

fn queue_on(
    brokers: &str,
    topic: &str,
    name: &str,
    filter: FilterPolicy,
    redrive: RedrivePolicy,
) -> RedpandaQueue {
    RedpandaQueue::builder()
        .brokers(brokers)
        .topic(topic)
        .queue(name)
        .filter(filter)
        .redrive(redrive)
        .build()
        .expect("Failed to create queue")
}

/// Receive until `count` deliveries arrived or 30 seconds passed.
async fn receive_n(queue: &RedpandaQueue, count: usize) -> Vec<Delivery> {
    let mut deliveries = Vec::new();
    let collect = async {
        while deliveries.len() < count {
            if let Ok(batch) = queue.receive(count - deliveries.len(), Duration::from_secs(1)).await {
                deliveries.extend(batch);
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), collect)
        .await
        .expect("Timed out waiting for deliveries");
    deliveries
}

fn ctx(request_id: &str) -> RequestContext {
    RequestContext::new(Some(request_id.to_string()), TraceId::generate(chrono::Utc::now()))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_topic_fans_out_by_event_type() {
    let (_kafka, brokers) = start_kafka().await;
    ensure_topics(&brokers, &["it-product-events"]).await;

    let products = queue(&brokers, "it-products", FilterPolicy::product_events(), RedrivePolicy::default());
    let failures = queue(&brokers, "it-failures", FilterPolicy::failure_events(), RedrivePolicy::default());

    let publisher = topic(&brokers, "it-product-events");
    let created = Envelope::encode(
        EventType::ProductCreated,
        &ProductEvent {
            id: "p1".to_string(),
            code: "ABC12".to_string(),
            price: 99.9,
        },
        &ctx("req-1"),
    )
    .unwrap();
    let failed = Envelope::encode(
        EventType::ProductFailure,
        &ProductFailureEvent {
            id: None,
            status: 412,
            error: "duplicate code".to_string(),
        },
        &ctx("req-2"),
    )
    .unwrap();
    let created_id = publisher.publish(&created).await.expect("publish created");
    let failed_id = publisher.publish(&failed).await.expect("publish failure");

    let product_deliveries = receive_n(&products, 1).await;
    let failure_deliveries = receive_n(&failures, 1).await;

    assert_eq!(product_deliveries[0].message_id, created_id);
    assert_eq!(product_deliveries[0].envelope, created);
    assert_eq!(product_deliveries[0].receive_count, 1);
    assert_eq!(failure_deliveries[0].message_id, failed_id);
    assert_eq!(failure_deliveries[0].envelope.attribute(ATTR_CORRELATION_ID), Some("req-2"));

    products.ack(&product_deliveries[0].receipt).await.expect("ack");
    failures.ack(&failure_deliveries[0].receipt).await.expect("ack");
    assert_eq!(products.in_flight(), 0);

    // Nothing else matches either queue.
    let extra = products.receive(10, Duration::from_secs(2)).await.unwrap();
    assert!(extra.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_nacked_message_is_redelivered_then_dead_lettered() {
    let (_kafka, brokers) = start_kafka().await;
    ensure_topics(
        &brokers,
        &["it-product-events", "it-retrying-redelivery", "it-dlq"],
    )
    .await;

    let retrying = queue(
        &brokers,
        "it-retrying",
        FilterPolicy::product_events(),
        RedrivePolicy::new(3, "it-dlq"),
    );
    let dead_letters = queue_on(
        &brokers,
        "it-dlq",
        "it-dlq-reader",
        FilterPolicy::product_events(),
        RedrivePolicy::default(),
    );

    let envelope = Envelope::encode(
        EventType::ProductUpdated,
        &ProductEvent {
            id: "p1".to_string(),
            code: "ABC12".to_string(),
            price: 10.0,
        },
        &ctx("req-3"),
    )
    .unwrap();
    let message_id = topic(&brokers, "it-product-events")
        .publish(&envelope)
        .await
        .expect("publish");

    for expected_count in 1..=3 {
        let delivery = receive_n(&retrying, 1).await.remove(0);
        assert_eq!(delivery.message_id, message_id);
        assert_eq!(delivery.receive_count, expected_count);
        retrying.nack(&delivery.receipt).await.expect("nack");
    }

    let extra = retrying.receive(10, Duration::from_secs(3)).await.unwrap();
    assert!(extra.is_empty(), "message delivered more than 3 times");

    let dead = receive_n(&dead_letters, 1).await.remove(0);
    assert_eq!(dead.message_id, message_id);
    assert_eq!(dead.envelope, envelope);
}
