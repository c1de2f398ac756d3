//! In-memory topic and queues with SQS-like delivery semantics.
//!
//! - [`InMemoryQueue`]: visibility timeout, receive counting and redrive to a
//!   dead-letter queue once the [`RedrivePolicy`] bound is reached
//! - [`InMemoryTopic`]: fans published envelopes out to subscribed queues
//!   through their [`FilterPolicy`]
//! - [`InMemoryBus`]: the product topic wired to its two queues and the
//!   shared dead-letter queue
//!
//! Time is read from `tokio::time`, so tests can run with a paused clock.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use product_audit_core::envelope::Envelope;
use product_audit_core::redrive::RedrivePolicy;
use product_audit_core::routing::{FilterPolicy, Subscription};
use product_audit_core::transport::{
    Delivery, MessageId, MessageQueue, ReceiptHandle, Topic, TransportError, TransportFuture,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Visibility timeout used when none is configured.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct StoredMessage {
    message_id: MessageId,
    envelope: Envelope,
    receive_count: u32,
    receipt: Option<ReceiptHandle>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    acked: Vec<MessageId>,
    deliveries: u64,
    next_receipt: u64,
}

struct QueueInner {
    name: String,
    visibility_timeout: Duration,
    redrive: Option<(RedrivePolicy, InMemoryQueue)>,
    state: Mutex<QueueState>,
    arrivals: Notify,
}

/// In-memory queue with visibility timeout and dead-letter redrive.
///
/// # Example
///
/// ```
/// use product_audit_core::envelope::Envelope;
/// use product_audit_core::redrive::RedrivePolicy;
/// use product_audit_core::transport::{MessageId, MessageQueue};
/// use product_audit_testing::InMemoryQueue;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = InMemoryQueue::new("dlq");
/// let queue = InMemoryQueue::new("work").with_redrive(RedrivePolicy::new(3, "dlq"), dlq.clone());
///
/// queue.send(MessageId::new("m-1"), Envelope::new(Default::default(), "{}".to_string()));
///
/// let batch = queue.receive(10, Duration::from_millis(10)).await?;
/// queue.nack(&batch[0].receipt).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryQueue {
    /// Create an empty queue without a dead-letter queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), DEFAULT_VISIBILITY_TIMEOUT, None)
    }

    fn build(
        name: String,
        visibility_timeout: Duration,
        redrive: Option<(RedrivePolicy, Self)>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                visibility_timeout,
                redrive,
                state: Mutex::new(QueueState::default()),
                arrivals: Notify::new(),
            }),
        }
    }

    /// Attach a redrive policy; exhausted messages move to `dead_letter_queue`.
    ///
    /// Call before sharing the queue: the returned queue is a new instance.
    #[must_use]
    pub fn with_redrive(self, policy: RedrivePolicy, dead_letter_queue: Self) -> Self {
        Self::build(
            self.inner.name.clone(),
            self.inner.visibility_timeout,
            Some((policy, dead_letter_queue)),
        )
    }

    /// Override the visibility timeout.
    ///
    /// Call before sharing the queue: the returned queue is a new instance.
    #[must_use]
    pub fn with_visibility_timeout(self, timeout: Duration) -> Self {
        let redrive = self.inner.redrive.clone();
        Self::build(self.inner.name.clone(), timeout, redrive)
    }

    /// Enqueue a message.
    pub fn send(&self, message_id: MessageId, envelope: Envelope) {
        self.inner.state.lock().unwrap().messages.push_back(StoredMessage {
            message_id,
            envelope,
            receive_count: 0,
            receipt: None,
            invisible_until: None,
        });
        self.inner.arrivals.notify_waiters();
    }

    /// Messages currently stored (visible or in flight).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().messages.len()
    }

    /// Check if the queue holds no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently received but not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.inner
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|message| !message.is_visible(now))
            .count()
    }

    /// Envelopes of all stored messages, oldest first.
    #[must_use]
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.inner
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .map(|message| message.envelope.clone())
            .collect()
    }

    /// Ids of all stored messages, oldest first.
    #[must_use]
    pub fn message_ids(&self) -> Vec<MessageId> {
        self.inner
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .map(|message| message.message_id.clone())
            .collect()
    }

    /// Ids of acknowledged messages, in ack order.
    #[must_use]
    pub fn acked(&self) -> Vec<MessageId> {
        self.inner.state.lock().unwrap().acked.clone()
    }

    /// Total deliveries handed out by `receive`, across all messages.
    #[must_use]
    pub fn deliveries(&self) -> u64 {
        self.inner.state.lock().unwrap().deliveries
    }

    /// Receive count of a stored message.
    #[must_use]
    pub fn receive_count(&self, message_id: &MessageId) -> Option<u32> {
        self.inner
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|message| &message.message_id == message_id)
            .map(|message| message.receive_count)
    }

    /// The dead-letter queue, if a redrive policy is attached.
    #[must_use]
    pub fn dead_letter_queue(&self) -> Option<&Self> {
        self.inner.redrive.as_ref().map(|(_, dlq)| dlq)
    }

    /// Hand out up to `max` visible messages, redriving exhausted ones.
    fn take_visible(&self, max: usize) -> Vec<Delivery> {
        let now = Instant::now();
        let mut batch = Vec::new();
        let mut exhausted = Vec::new();

        {
            let mut state = self.inner.state.lock().unwrap();
            let state = &mut *state;
            let mut index = 0;
            while index < state.messages.len() && batch.len() < max {
                let message = &mut state.messages[index];
                if !message.is_visible(now) {
                    index += 1;
                    continue;
                }

                let redrive = self
                    .inner
                    .redrive
                    .as_ref()
                    .filter(|(policy, _)| policy.is_exhausted(message.receive_count));
                if redrive.is_some() {
                    if let Some(message) = state.messages.remove(index) {
                        exhausted.push(message);
                    }
                    continue;
                }

                state.next_receipt += 1;
                state.deliveries += 1;
                let receipt = ReceiptHandle::new(format!("{}-{}", self.inner.name, state.next_receipt));
                message.receive_count += 1;
                message.receipt = Some(receipt.clone());
                message.invisible_until = Some(now + self.inner.visibility_timeout);

                batch.push(Delivery {
                    message_id: message.message_id.clone(),
                    receipt,
                    receive_count: message.receive_count,
                    envelope: message.envelope.clone(),
                });
                index += 1;
            }
        }

        if let Some((policy, dlq)) = &self.inner.redrive {
            for message in exhausted {
                tracing::debug!(
                    queue = %self.inner.name,
                    dead_letter_queue = %policy.dead_letter_queue,
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    "Message exceeded max receive count, moved to dead-letter queue"
                );
                dlq.send(message.message_id, message.envelope);
            }
        }

        batch
    }

    /// Earliest moment an in-flight message becomes visible again.
    fn next_visibility(&self) -> Option<Instant> {
        self.inner
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter_map(|message| message.invisible_until)
            .min()
    }

    fn settle(
        &self,
        receipt: &ReceiptHandle,
        settle: impl FnOnce(&mut QueueState, usize),
    ) -> Result<(), TransportError> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().unwrap();
        let index = state
            .messages
            .iter()
            .position(|message| {
                message.receipt.as_ref() == Some(receipt) && !message.is_visible(now)
            })
            .ok_or_else(|| TransportError::UnknownReceipt(receipt.as_str().to_string()))?;
        settle(&mut *state, index);
        Ok(())
    }
}

impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn receive(&self, max_messages: usize, wait: Duration) -> TransportFuture<'_, Vec<Delivery>> {
        Box::pin(async move {
            let deadline = Instant::now() + wait;
            loop {
                let arrived = self.inner.arrivals.notified();

                let batch = self.take_visible(max_messages.max(1));
                if !batch.is_empty() {
                    return Ok(batch);
                }

                let now = Instant::now();
                if now >= deadline {
                    return Ok(Vec::new());
                }

                let wake_at = self
                    .next_visibility()
                    .filter(|at| *at > now)
                    .map_or(deadline, |at| at.min(deadline));

                tokio::select! {
                    () = arrived => {},
                    () = tokio::time::sleep_until(wake_at) => {},
                }
            }
        })
    }

    fn ack<'a>(&'a self, receipt: &'a ReceiptHandle) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.settle(receipt, |state, index| {
                if let Some(message) = state.messages.remove(index) {
                    state.acked.push(message.message_id);
                }
            })
        })
    }

    fn nack<'a>(&'a self, receipt: &'a ReceiptHandle) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.settle(receipt, |state, index| {
                let message = &mut state.messages[index];
                message.receipt = None;
                message.invisible_until = None;
            })?;
            self.inner.arrivals.notify_waiters();
            Ok(())
        })
    }
}

/// In-memory topic routing envelopes to subscribed queues.
///
/// Message ids are assigned sequentially (`msg-000001`, ...), standing in for
/// the broker-assigned ids of a real transport.
pub struct InMemoryTopic {
    name: String,
    subscriptions: RwLock<Vec<(Subscription, InMemoryQueue)>>,
    published: Mutex<Vec<(MessageId, Envelope)>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryTopic {
    /// Create a topic with no subscriptions.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscriptions: RwLock::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Deliver envelopes matching `policy` to `queue`.
    pub fn subscribe(&self, policy: FilterPolicy, queue: InMemoryQueue) {
        let subscription = Subscription::new(queue.name().to_string(), policy);
        self.subscriptions.write().unwrap().push((subscription, queue));
    }

    /// Make every subsequent publish fail (simulates a broker outage).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Everything published so far, with assigned ids.
    #[must_use]
    pub fn published(&self) -> Vec<(MessageId, Envelope)> {
        self.published.lock().unwrap().clone()
    }
}

impl Topic for InMemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish<'a>(&'a self, envelope: &'a Envelope) -> TransportFuture<'a, MessageId> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(TransportError::PublishFailed {
                    topic: self.name.clone(),
                    reason: "broker unavailable".to_string(),
                });
            }

            let sequence = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let message_id = MessageId::new(format!("msg-{sequence:06}"));

            self.published
                .lock()
                .unwrap()
                .push((message_id.clone(), envelope.clone()));

            for (subscription, queue) in self.subscriptions.read().unwrap().iter() {
                if subscription.policy.matches(&envelope.attributes) {
                    queue.send(message_id.clone(), envelope.clone());
                }
            }

            Ok(message_id)
        })
    }
}

/// The product topic wired the way the audit pipeline expects.
///
/// ```text
/// product-events topic ─┬─ CREATED|UPDATED|DELETED ─▶ product-events ─────────┐
///                       └─ FAILURE ─────────────────▶ product-failure-events ─┴─▶ product-events-dlq
/// ```
pub struct InMemoryBus {
    /// The shared topic
    pub topic: Arc<InMemoryTopic>,
    /// Queue for created/updated/deleted events
    pub product_events: InMemoryQueue,
    /// Queue for failure events
    pub failure_events: InMemoryQueue,
    /// Dead-letter queue shared by both queues
    pub dead_letters: InMemoryQueue,
}

impl InMemoryBus {
    /// Standard wiring with the default redrive policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(RedrivePolicy::default())
    }

    /// Standard wiring with a custom redrive policy.
    #[must_use]
    pub fn with_policy(policy: RedrivePolicy) -> Self {
        let dead_letters = InMemoryQueue::new(policy.dead_letter_queue.clone());
        let product_events =
            InMemoryQueue::new("product-events").with_redrive(policy.clone(), dead_letters.clone());
        let failure_events = InMemoryQueue::new("product-failure-events")
            .with_redrive(policy, dead_letters.clone());

        let topic = Arc::new(InMemoryTopic::new("product-events"));
        topic.subscribe(FilterPolicy::product_events(), product_events.clone());
        topic.subscribe(FilterPolicy::failure_events(), failure_events.clone());

        Self {
            topic,
            product_events,
            failure_events,
            dead_letters,
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}
