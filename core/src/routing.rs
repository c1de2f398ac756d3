//! Attribute-based subscription filters.
//!
//! One topic fans out to several queues. Each subscription carries a
//! [`FilterPolicy`], an allow-list over the `eventType` attribute, so that
//! product events and failure events land in separate queues:
//!
//! ```text
//!                      ┌─ eventType ∈ {CREATED, UPDATED, DELETED} ─▶ product-events
//! product topic ───────┤
//!                      └─ eventType ∈ {FAILURE} ──────────────────▶ product-failure-events
//! ```
//!
//! Matching is a pure function of the attributes. Transports that support
//! broker-side filtering translate the policy into their own DSL; the others
//! (and the in-memory fakes) evaluate [`FilterPolicy::matches`] directly.

use crate::envelope::{ATTR_EVENT_TYPE, Attributes, Envelope};
use crate::event::EventType;
use std::collections::BTreeSet;

/// Allow-list filter over the `eventType` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterPolicy {
    allowed: BTreeSet<EventType>,
}

impl FilterPolicy {
    /// Accept exactly the given event types.
    #[must_use]
    pub fn allow(event_types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            allowed: event_types.into_iter().collect(),
        }
    }

    /// Created, updated and deleted events.
    #[must_use]
    pub fn product_events() -> Self {
        Self::allow([
            EventType::ProductCreated,
            EventType::ProductUpdated,
            EventType::ProductDeleted,
        ])
    }

    /// Failure events only.
    #[must_use]
    pub fn failure_events() -> Self {
        Self::allow([EventType::ProductFailure])
    }

    /// Whether a message with these attributes passes the filter.
    ///
    /// A missing or unrecognised `eventType` never matches.
    #[must_use]
    pub fn matches(&self, attributes: &Attributes) -> bool {
        attributes
            .get(ATTR_EVENT_TYPE)
            .and_then(|value| value.parse::<EventType>().ok())
            .is_some_and(|event_type| self.accepts(event_type))
    }

    /// Whether the policy admits this event type.
    #[must_use]
    pub fn accepts(&self, event_type: EventType) -> bool {
        self.allowed.contains(&event_type)
    }

    /// Event types admitted by the policy, in order.
    pub fn allowed(&self) -> impl Iterator<Item = EventType> + '_ {
        self.allowed.iter().copied()
    }
}

/// A queue subscribed to the topic through a filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    /// Destination queue name
    pub queue: String,
    /// Filter applied before delivery
    pub policy: FilterPolicy,
}

impl Subscription {
    /// Subscribe `queue` with `policy`.
    #[must_use]
    pub fn new(queue: impl Into<String>, policy: FilterPolicy) -> Self {
        Self {
            queue: queue.into(),
            policy,
        }
    }

    /// Queues that receive `envelope`, in subscription order.
    #[must_use]
    pub fn route<'a>(subscriptions: &'a [Self], envelope: &Envelope) -> Vec<&'a str> {
        subscriptions
            .iter()
            .filter(|subscription| subscription.policy.matches(&envelope.attributes))
            .map(|subscription| subscription.queue.as_str())
            .collect()
    }
}
