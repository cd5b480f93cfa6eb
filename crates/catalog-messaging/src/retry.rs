//! Retry and error-classification filter for broker deliveries.
//!
//! A delivery whose handler failed is either republished through the
//! delayed exchange with an incremented `x-retry-count`, or rejected without
//! requeue so the broker dead-letters it. Validation and not-found causes
//! are dead-lettered on the first attempt; programmer errors are not handled
//! here at all.

use std::sync::Arc;
use std::time::Duration;

use catalog_core::error::DomainError;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::broker::{
    BrokerChannel, DELAY_HEADER, Delivery, OutgoingMessage, RETRY_COUNT_HEADER,
};
use crate::error::MessagingError;

/// Marker wrapping any failure raised while handling a broker message.
#[derive(Debug, Error)]
#[error("message handling failed: {cause}")]
pub struct RetriableError {
    /// What actually went wrong.
    #[source]
    pub cause: DomainError,
}

impl From<DomainError> for RetriableError {
    fn from(cause: DomainError) -> Self {
        Self { cause }
    }
}

/// How the failing handler was invoked.
#[derive(Debug, Clone, Copy)]
pub enum InvocationContext<'a> {
    /// A message delivered by the broker.
    Broker(&'a Delivery),
    /// Anything else (direct calls, tests, HTTP).
    Other,
}

/// Why a delivery was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The cause can never succeed on retry.
    NonRetriable,
    /// The retry budget is spent.
    RetriesExhausted,
}

/// Where a single delivery ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Handled and acknowledged.
    Delivered,
    /// Republished through the delayed exchange with this retry count.
    RetryScheduled {
        /// Value of `x-retry-count` on the republished message.
        retry_count: u32,
    },
    /// Rejected without requeue.
    DeadLettered {
        /// Why it was not retried.
        reason: DeadLetterReason,
    },
}

/// Errors the filter itself can end with.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The failure is not the filter's to handle.
    #[error(transparent)]
    Unhandled(RetriableError),

    /// Acting on the delivery failed at the broker.
    #[error("failed to settle delivery: {0}")]
    Broker(#[from] MessagingError),
}

/// Bounded fixed-delay retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed before a message is dead-lettered.
    pub max_retries: u32,
    /// Value of `x-delay` on republished messages.
    pub delay: Duration,
    /// Delayed-message exchange retries are republished to.
    pub delay_exchange: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(5000),
            delay_exchange: "direct.delayed".to_owned(),
        }
    }
}

impl RetryPolicy {
    /// Classifies a failure seen after `retry_count` earlier retries.
    ///
    /// Returns `None` for programmer errors, which must not be handled.
    #[must_use]
    pub fn decide(&self, cause: &DomainError, retry_count: u32) -> Option<DeliveryState> {
        if cause.is_programmer_error() {
            return None;
        }
        let non_retriable = matches!(
            cause,
            DomainError::Validation(_) | DomainError::NotFound { .. }
        );
        let state = if non_retriable {
            DeliveryState::DeadLettered {
                reason: DeadLetterReason::NonRetriable,
            }
        } else if retry_count >= self.max_retries {
            DeliveryState::DeadLettered {
                reason: DeadLetterReason::RetriesExhausted,
            }
        } else {
            DeliveryState::RetryScheduled {
                retry_count: retry_count + 1,
            }
        };
        Some(state)
    }
}

/// Settles failed broker deliveries according to a [`RetryPolicy`].
pub struct RetryFilter {
    channel: Arc<dyn BrokerChannel>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryFilter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryFilter {
    /// Creates a filter acting on `channel`.
    #[must_use]
    pub fn new(channel: Arc<dyn BrokerChannel>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    /// Handles `error` raised while processing a message.
    ///
    /// # Errors
    ///
    /// Returns `FilterError::Unhandled` with the original error for
    /// non-broker contexts and programmer errors, and `FilterError::Broker`
    /// if the delivery could not be settled. When republishing fails the
    /// original delivery is requeued.
    #[instrument(skip_all, fields(cause = %error.cause))]
    pub async fn catch(
        &self,
        error: RetriableError,
        context: InvocationContext<'_>,
    ) -> Result<DeliveryState, FilterError> {
        let InvocationContext::Broker(delivery) = context else {
            return Err(FilterError::Unhandled(error));
        };
        let retry_count = delivery.headers.retry_count();
        let Some(state) = self.policy.decide(&error.cause, retry_count) else {
            error!(delivery_tag = delivery.delivery_tag, "programmer error while handling message");
            return Err(FilterError::Unhandled(error));
        };

        match state {
            DeliveryState::RetryScheduled { retry_count } => {
                self.schedule_retry(delivery, retry_count).await?;
                info!(
                    delivery_tag = delivery.delivery_tag,
                    retry_count, "message scheduled for retry"
                );
            }
            DeliveryState::DeadLettered { reason } => {
                self.channel.nack(delivery.delivery_tag, false).await?;
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    retry_count,
                    ?reason,
                    "message dead-lettered"
                );
            }
            DeliveryState::Delivered => {}
        }
        Ok(state)
    }

    async fn schedule_retry(
        &self,
        delivery: &Delivery,
        retry_count: u32,
    ) -> Result<(), MessagingError> {
        let mut headers = delivery.headers.clone();
        headers.insert(RETRY_COUNT_HEADER, retry_count);
        headers.insert(
            DELAY_HEADER,
            u64::try_from(self.policy.delay.as_millis()).unwrap_or(u64::MAX),
        );
        let message = OutgoingMessage {
            exchange: self.policy.delay_exchange.clone(),
            routing_key: delivery.routing_key.clone(),
            body: delivery.body.clone(),
            headers,
        };

        if let Err(err) = self.channel.publish(message).await {
            // Let the broker redeliver so the attempt is not lost.
            if let Err(nack_err) = self.channel.nack(delivery.delivery_tag, true).await {
                error!(error = %nack_err, "failed to requeue message after republish failure");
            }
            return Err(err);
        }
        self.channel.ack(delivery.delivery_tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, MessageHeaders};

    const ROUTING_KEY: &str = "videos.convert.result";

    fn delivery(retry_count: Option<u32>) -> Delivery {
        let mut headers = MessageHeaders::new();
        if let Some(count) = retry_count {
            headers.insert(RETRY_COUNT_HEADER, count);
        }
        Delivery {
            delivery_tag: 7,
            exchange: "amq.direct".into(),
            routing_key: ROUTING_KEY.into(),
            body: br#"{"video":{}}"#.to_vec(),
            headers,
            redelivered: false,
        }
    }

    fn transient() -> RetriableError {
        DomainError::Infrastructure("database unavailable".into()).into()
    }

    fn broker() -> Arc<InMemoryBroker> {
        let broker = Arc::new(InMemoryBroker::new());
        broker.bind("direct.delayed", ROUTING_KEY, "admin");
        broker
    }

    fn filter(broker: &Arc<InMemoryBroker>) -> RetryFilter {
        RetryFilter::new(broker.clone(), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_transient_error_below_limit_is_republished_with_incremented_count() {
        // Arrange
        let broker = broker();
        let delivery = delivery(Some(2));

        // Act
        let state = filter(&broker)
            .catch(transient(), InvocationContext::Broker(&delivery))
            .await
            .unwrap();

        // Assert
        assert_eq!(state, DeliveryState::RetryScheduled { retry_count: 3 });
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "direct.delayed");
        assert_eq!(published[0].routing_key, ROUTING_KEY);
        assert_eq!(published[0].body, delivery.body);
        assert_eq!(published[0].headers.retry_count(), 3);
        assert_eq!(published[0].headers.delay_ms(), Some(5000));
        assert_eq!(broker.acked(), vec![7]);
        assert!(broker.nacked().is_empty());
    }

    #[tokio::test]
    async fn test_missing_retry_header_counts_as_zero() {
        let broker = broker();
        let delivery = delivery(None);

        let state = filter(&broker)
            .catch(transient(), InvocationContext::Broker(&delivery))
            .await
            .unwrap();

        assert_eq!(state, DeliveryState::RetryScheduled { retry_count: 1 });
        assert_eq!(broker.published()[0].headers.retry_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_dead_lettered() {
        // Arrange
        let broker = broker();
        let delivery = delivery(Some(3));

        // Act
        let state = filter(&broker)
            .catch(transient(), InvocationContext::Broker(&delivery))
            .await
            .unwrap();

        // Assert
        assert_eq!(
            state,
            DeliveryState::DeadLettered {
                reason: DeadLetterReason::RetriesExhausted
            }
        );
        assert!(broker.published().is_empty());
        assert_eq!(broker.nacked(), vec![(7, false)]);
    }

    #[tokio::test]
    async fn test_validation_cause_is_dead_lettered_on_first_attempt() {
        let broker = broker();
        let delivery = delivery(Some(0));
        let error: RetriableError = DomainError::validation("status", "invalid").into();

        let state = filter(&broker)
            .catch(error, InvocationContext::Broker(&delivery))
            .await
            .unwrap();

        assert_eq!(
            state,
            DeliveryState::DeadLettered {
                reason: DeadLetterReason::NonRetriable
            }
        );
        assert!(broker.published().is_empty());
        assert_eq!(broker.nacked(), vec![(7, false)]);
    }

    #[tokio::test]
    async fn test_not_found_cause_is_dead_lettered() {
        let broker = broker();
        let delivery = delivery(None);
        let error: RetriableError = DomainError::not_found("Video", "abc").into();

        let state = filter(&broker)
            .catch(error, InvocationContext::Broker(&delivery))
            .await
            .unwrap();

        assert!(matches!(state, DeliveryState::DeadLettered { .. }));
    }

    #[tokio::test]
    async fn test_non_broker_context_bypasses_filter() {
        let broker = broker();

        let result = filter(&broker)
            .catch(transient(), InvocationContext::Other)
            .await;

        match result {
            Err(FilterError::Unhandled(err)) => {
                assert!(matches!(err.cause, DomainError::Infrastructure(_)));
            }
            other => panic!("expected unhandled error, got {other:?}"),
        }
        assert!(broker.published().is_empty());
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn test_programmer_error_is_not_handled() {
        let broker = broker();
        let delivery = delivery(None);
        let error: RetriableError = DomainError::NoActiveTransaction.into();

        let result = filter(&broker)
            .catch(error, InvocationContext::Broker(&delivery))
            .await;

        assert!(matches!(result, Err(FilterError::Unhandled(_))));
        assert!(broker.nacked().is_empty());
    }

    #[tokio::test]
    async fn test_republish_failure_requeues_original() {
        let broker = broker();
        broker.set_unavailable(true);
        let delivery = delivery(Some(1));

        let result = filter(&broker)
            .catch(transient(), InvocationContext::Broker(&delivery))
            .await;

        assert!(matches!(result, Err(FilterError::Broker(_))));
        assert_eq!(broker.nacked(), vec![(7, true)]);
        assert!(broker.acked().is_empty());
    }

    #[test]
    fn test_concurrency_conflict_is_retried() {
        let policy = RetryPolicy::default();
        let cause = DomainError::ConcurrencyConflict {
            aggregate_id: uuid::Uuid::nil(),
            expected: 1,
            actual: 2,
        };

        assert_eq!(
            policy.decide(&cause, 0),
            Some(DeliveryState::RetryScheduled { retry_count: 1 })
        );
    }
}
