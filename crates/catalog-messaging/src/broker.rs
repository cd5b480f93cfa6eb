//! Broker transport port and an in-memory broker.
//!
//! [`BrokerChannel`] is the slice of an AMQP channel the catalog needs:
//! publish to an exchange, consume from a queue, ack and nack deliveries.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::MessagingError;

/// Header carrying how many times a message was already retried.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
/// Header telling the delayed-message exchange how long to hold a message.
pub const DELAY_HEADER: &str = "x-delay";

/// AMQP-style message headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageHeaders(BTreeMap<String, Value>);

impl MessageHeaders {
    /// Creates an empty header table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw header value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Sets a header.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_owned(), value.into());
    }

    /// Iterates over the headers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Value of `x-retry-count`; absent or malformed counts as zero.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.get(RETRY_COUNT_HEADER)
            .and_then(Value::as_u64)
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(0)
    }

    /// Value of `x-delay` in milliseconds.
    #[must_use]
    pub fn delay_ms(&self) -> Option<u64> {
        self.get(DELAY_HEADER).and_then(Value::as_u64)
    }
}

/// A message on its way to an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    /// Target exchange.
    pub exchange: String,
    /// Routing key used by the exchange.
    pub routing_key: String,
    /// Raw body.
    pub body: Vec<u8>,
    /// Message headers.
    pub headers: MessageHeaders,
}

/// A message delivered to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Channel-scoped tag used to ack or nack this delivery.
    pub delivery_tag: u64,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key it was published with.
    pub routing_key: String,
    /// Raw body.
    pub body: Vec<u8>,
    /// Message headers.
    pub headers: MessageHeaders,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
}

/// Transport port for the message broker.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publishes `message` to its exchange.
    async fn publish(&self, message: OutgoingMessage) -> Result<(), MessagingError>;

    /// Waits for the next delivery on `queue`.
    async fn next_delivery(&self, queue: &str) -> Result<Delivery, MessagingError>;

    /// Acknowledges a delivery as handled.
    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError>;

    /// Rejects a delivery. Without `requeue` the broker dead-letters it.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError>;
}

/// Queue layout a consumer needs on the broker.
///
/// The queue receives `routing_key` from both `exchange` and the delayed
/// `delay_exchange`; rejected deliveries go to `dead_letter_queue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerTopology {
    /// Queue the consumer reads.
    pub queue: &'static str,
    /// Exchange producers publish to.
    pub exchange: &'static str,
    /// Routing key bound on both exchanges.
    pub routing_key: &'static str,
    /// Delayed-message exchange used for retries.
    pub delay_exchange: &'static str,
    /// Queue holding rejected deliveries.
    pub dead_letter_queue: &'static str,
}

#[derive(Debug, Default)]
struct BrokerState {
    bindings: Vec<(String, String, String)>,
    dead_letter_queues: HashMap<String, String>,
    queues: HashMap<String, VecDeque<Delivery>>,
    in_flight: HashMap<u64, String>,
    in_flight_deliveries: HashMap<u64, Delivery>,
    published: Vec<OutgoingMessage>,
    acked: Vec<u64>,
    nacked: Vec<(u64, bool)>,
    next_tag: u64,
    unavailable: bool,
}

/// Broker that routes messages between in-process queues.
///
/// Exchanges are direct: a message goes to every queue bound with exactly
/// its routing key, and a message no queue is bound for is refused.
/// `x-delay` is recorded but not waited on.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl InMemoryBroker {
    /// Creates a broker with no bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Binds `queue` to `exchange` for `routing_key`.
    pub fn bind(&self, exchange: &str, routing_key: &str, queue: &str) {
        let mut state = self.state();
        state
            .bindings
            .push((exchange.to_owned(), routing_key.to_owned(), queue.to_owned()));
        state.queues.entry(queue.to_owned()).or_default();
    }

    /// Creates the bindings and dead-letter queue of `topology`.
    pub fn declare(&self, topology: &ConsumerTopology) {
        self.bind(topology.exchange, topology.routing_key, topology.queue);
        self.bind(topology.delay_exchange, topology.routing_key, topology.queue);
        self.set_dead_letter_queue(topology.queue, topology.dead_letter_queue);
    }

    /// Routes deliveries rejected without requeue on `queue` to
    /// `dead_letter_queue`.
    pub fn set_dead_letter_queue(&self, queue: &str, dead_letter_queue: &str) {
        let mut state = self.state();
        state
            .dead_letter_queues
            .insert(queue.to_owned(), dead_letter_queue.to_owned());
        state.queues.entry(dead_letter_queue.to_owned()).or_default();
    }

    /// Simulates losing (or regaining) the broker connection.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Every message published so far.
    #[must_use]
    pub fn published(&self) -> Vec<OutgoingMessage> {
        self.state().published.clone()
    }

    /// Tags of acknowledged deliveries.
    #[must_use]
    pub fn acked(&self) -> Vec<u64> {
        self.state().acked.clone()
    }

    /// Tags and requeue flags of rejected deliveries.
    #[must_use]
    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.state().nacked.clone()
    }

    /// Number of messages waiting in `queue`.
    #[must_use]
    pub fn queue_len(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Takes the next message waiting in `queue` without a consumer.
    #[must_use]
    pub fn take(&self, queue: &str) -> Option<Delivery> {
        self.state().queues.get_mut(queue)?.pop_front()
    }

    fn enqueue(state: &mut BrokerState, queue: &str, mut delivery: Delivery) {
        state.next_tag += 1;
        delivery.delivery_tag = state.next_tag;
        state
            .queues
            .entry(queue.to_owned())
            .or_default()
            .push_back(delivery);
    }
}

#[async_trait]
impl BrokerChannel for InMemoryBroker {
    async fn publish(&self, message: OutgoingMessage) -> Result<(), MessagingError> {
        {
            let mut state = self.state();
            if state.unavailable {
                return Err(MessagingError::BrokerUnavailable(
                    "connection closed".into(),
                ));
            }
            let targets: Vec<String> = state
                .bindings
                .iter()
                .filter(|(exchange, key, _)| {
                    *exchange == message.exchange && *key == message.routing_key
                })
                .map(|(_, _, queue)| queue.clone())
                .collect();
            if targets.is_empty() {
                return Err(MessagingError::Unroutable {
                    exchange: message.exchange,
                    routing_key: message.routing_key,
                });
            }
            for queue in targets {
                let delivery = Delivery {
                    delivery_tag: 0,
                    exchange: message.exchange.clone(),
                    routing_key: message.routing_key.clone(),
                    body: message.body.clone(),
                    headers: message.headers.clone(),
                    redelivered: false,
                };
                Self::enqueue(&mut state, &queue, delivery);
            }
            state.published.push(message);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> Result<Delivery, MessagingError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state();
                if let Some(delivery) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) {
                    state.in_flight.insert(delivery.delivery_tag, queue.to_owned());
                    state
                        .in_flight_deliveries
                        .insert(delivery.delivery_tag, delivery.clone());
                    return Ok(delivery);
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        let mut state = self.state();
        state.in_flight.remove(&delivery_tag);
        state.in_flight_deliveries.remove(&delivery_tag);
        state.acked.push(delivery_tag);
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError> {
        {
            let mut state = self.state();
            state.nacked.push((delivery_tag, requeue));
            let queue = state.in_flight.remove(&delivery_tag);
            let delivery = state.in_flight_deliveries.remove(&delivery_tag);
            match (queue, delivery) {
                (Some(queue), Some(mut delivery)) if requeue => {
                    delivery.redelivered = true;
                    Self::enqueue(&mut state, &queue, delivery);
                }
                (Some(queue), Some(delivery)) => {
                    if let Some(dead_letter_queue) = state.dead_letter_queues.get(&queue).cloned() {
                        Self::enqueue(&mut state, &dead_letter_queue, delivery);
                    } else {
                        warn!(%queue, delivery_tag, "rejected message dropped, no dead-letter queue");
                    }
                }
                _ => {
                    debug!(delivery_tag, "nack for unknown delivery");
                }
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
