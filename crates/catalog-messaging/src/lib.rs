//! Catalog Messaging — the path from "an event happened" to "the broker has
//! it", and back.
//!
//! Integration events are queued durably, published by a worker through the
//! [`message_bus::MessageBus`] using a fixed exchange/routing-key topology,
//! and failed broker deliveries are classified by the
//! [`retry::RetryFilter`] into delayed retries or dead letters. The broker
//! itself is RabbitMQ ([`amqp::AmqpBroker`]) or, in tests, the in-process
//! [`broker::InMemoryBroker`].

pub mod amqp;
pub mod broker;
pub mod error;
pub mod integration_event;
pub mod message_bus;
pub mod pg_queue;
pub mod queue;
pub mod retry;
pub mod worker;

pub use error::MessagingError;
