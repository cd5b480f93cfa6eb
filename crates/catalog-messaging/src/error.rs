//! Messaging error types.

use catalog_core::error::DomainError;
use thiserror::Error;

use crate::integration_event::IntegrationEventName;

/// Errors raised while queueing or publishing integration events.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// No exchange/routing key is registered for the event.
    #[error("no broker topology registered for integration event {0:?}")]
    UnknownEventTopology(IntegrationEventName),

    /// The broker connection is unavailable.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// No queue is bound for the message, so the broker returned it.
    #[error("message to {exchange}/{routing_key} is unroutable")]
    Unroutable {
        /// Target exchange.
        exchange: String,
        /// Routing key the message carried.
        routing_key: String,
    },

    /// An event or message could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue's backing store failed.
    #[error("queue error: {0}")]
    Queue(String),

    /// Postgres error from the durable queue.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MessagingError {
    /// Returns `true` for configuration mistakes that retrying cannot fix.
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::UnknownEventTopology(_))
    }
}

impl From<MessagingError> for DomainError {
    fn from(err: MessagingError) -> Self {
        DomainError::Infrastructure(err.to_string())
    }
}
