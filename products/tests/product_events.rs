//! Events published by `ProductService` for successful and failed operations.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use product_audit_core::context::{RequestContext, TraceId};
use product_audit_core::envelope::{ATTR_CORRELATION_ID, ATTR_TRACE_ID, Envelope};
use product_audit_core::event::{EventType, ProductEvent, ProductFailureEvent};
use product_audit_products::{
    InMemoryProductRepository, ProductDraft, ProductError, ProductService, PublishPolicy,
};
use product_audit_runtime::EventPublisher;
use product_audit_testing::InMemoryBus;

fn ctx(request_id: &str) -> RequestContext {
    RequestContext::new(Some(request_id.to_string()), TraceId::new("1-67748580-abcdef"))
}

fn draft(code: &str) -> ProductDraft {
    ProductDraft {
        name: "Widget".to_string(),
        code: code.to_string(),
        price: 99.9,
        model: "W1".to_string(),
        url: "https://example.com/widget".to_string(),
    }
}

fn service(bus: &InMemoryBus) -> ProductService<InMemoryProductRepository> {
    ProductService::new(
        InMemoryProductRepository::new(),
        EventPublisher::new(bus.topic.clone()),
    )
}

fn published(bus: &InMemoryBus) -> Vec<Envelope> {
    bus.topic.published().into_iter().map(|(_, envelope)| envelope).collect()
}

fn failure(envelope: &Envelope) -> ProductFailureEvent {
    envelope.decode().unwrap().payload().unwrap()
}

#[tokio::test]
async fn each_mutation_publishes_its_event() {
    let bus = InMemoryBus::new();
    let service = service(&bus);

    let created = service.create(draft("ABC12"), &ctx("req-1")).await.unwrap();
    let updated = service
        .update(&created.id, ProductDraft { price: 89.9, ..draft("ABC12") }, &ctx("req-2"))
        .await
        .unwrap();
    let deleted = service.delete(&created.id, &ctx("req-3")).await.unwrap();
    assert_eq!(deleted, updated);

    let events: Vec<(EventType, ProductEvent, String)> = published(&bus)
        .iter()
        .map(|envelope| {
            let decoded = envelope.decode().unwrap();
            (decoded.event_type, decoded.payload().unwrap(), decoded.correlation_id)
        })
        .collect();

    assert_eq!(
        events,
        vec![
            (EventType::ProductCreated, created.event(), "req-1".to_string()),
            (EventType::ProductUpdated, updated.event(), "req-2".to_string()),
            (EventType::ProductDeleted, updated.event(), "req-3".to_string()),
        ]
    );
    assert_eq!(bus.product_events.len(), 3);
    assert!(bus.failure_events.is_empty());
}

#[tokio::test]
async fn duplicate_code_publishes_a_412_failure() {
    let bus = InMemoryBus::new();
    let service = service(&bus);
    service.create(draft("ABC12"), &ctx("req-1")).await.unwrap();

    let error = service.create(draft("ABC12"), &ctx("req-2")).await.unwrap_err();
    assert!(matches!(error, ProductError::DuplicateCode { .. }));

    let envelopes = bus.failure_events.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].attribute(ATTR_CORRELATION_ID), Some("req-2"));
    assert_eq!(envelopes[0].attribute(ATTR_TRACE_ID), Some("1-67748580-abcdef"));

    let event = failure(&envelopes[0]);
    assert_eq!(event.status, 412);
    assert_eq!(event.id, None);
    // No id in the JSON body when the product never got one.
    assert!(!envelopes[0].body.contains("\"id\""));
}

#[tokio::test]
async fn missing_product_publishes_a_404_failure_with_its_id() {
    let bus = InMemoryBus::new();
    let service = service(&bus);

    let error = service.delete("p-missing", &ctx("req-9")).await.unwrap_err();
    assert_eq!(error.status(), 404);

    let event = failure(&bus.failure_events.envelopes()[0]);
    assert_eq!(event.id.as_deref(), Some("p-missing"));
    assert_eq!(event.status, 404);
    assert!(bus.product_events.is_empty());
}

#[tokio::test]
async fn invalid_draft_is_rejected_before_storage() {
    let bus = InMemoryBus::new();
    let service = service(&bus);

    let error = service
        .create(ProductDraft { price: -5.0, ..draft("ABC12") }, &ctx("req-1"))
        .await
        .unwrap_err();

    assert_eq!(error.status(), 400);
    assert!(service.repository().is_empty());
    assert_eq!(failure(&bus.failure_events.envelopes()[0]).status, 400);
}

#[tokio::test]
async fn repository_outage_publishes_a_500_failure() {
    let bus = InMemoryBus::new();
    let service = service(&bus);
    service.repository().set_unavailable(true);

    let error = service.create(draft("ABC12"), &ctx("req-1")).await.unwrap_err();

    assert_eq!(error.status(), 500);
    assert_eq!(failure(&bus.failure_events.envelopes()[0]).status, 500);
}

#[tokio::test]
async fn required_publish_fails_the_operation_but_keeps_the_mutation() {
    let bus = InMemoryBus::new();
    let service = service(&bus);
    bus.topic.set_unavailable(true);

    let error = service.create(draft("ABC12"), &ctx("req-1")).await.unwrap_err();

    assert_eq!(error.status(), 502);
    assert!(error.product_id().is_some());
    assert_eq!(service.repository().len(), 1);
    assert!(bus.topic.published().is_empty());
}

#[tokio::test]
async fn best_effort_publish_returns_the_mutation() {
    let bus = InMemoryBus::new();
    let service = service(&bus).with_publish_policy(PublishPolicy::BestEffort);
    bus.topic.set_unavailable(true);

    let product = service.create(draft("ABC12"), &ctx("req-1")).await.unwrap();

    assert_eq!(service.repository().len(), 1);
    assert_eq!(product.code, "ABC12");
    assert!(bus.topic.published().is_empty());
}

#[tokio::test]
async fn lookup_publishes_only_on_failure() {
    let bus = InMemoryBus::new();
    let service = service(&bus);
    let created = service.create(draft("ABC12"), &ctx("req-1")).await.unwrap();

    assert_eq!(service.find(&created.id, &ctx("req-2")).await.unwrap(), created);
    assert_eq!(published(&bus).len(), 1);

    assert!(service.find("nope", &ctx("req-3")).await.is_err());
    assert_eq!(bus.failure_events.len(), 1);
}
