//! RabbitMQ implementation of [`BrokerChannel`].
//!
//! Publishes are `mandatory` on a confirm-mode channel, so a message no
//! queue is bound for comes back as [`MessagingError::Unroutable`] instead
//! of being dropped by the broker.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::broker::{BrokerChannel, ConsumerTopology, Delivery, MessageHeaders, OutgoingMessage};
use crate::error::MessagingError;

const PERSISTENT: u8 = 2;
const CONSUMER_TAG: &str = "catalog-worker";

fn unavailable(err: &lapin::Error) -> MessagingError {
    MessagingError::BrokerUnavailable(err.to_string())
}

/// Broker channel over one AMQP connection.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    consumers: Mutex<HashMap<String, Consumer>>,
}

impl std::fmt::Debug for AmqpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpBroker").finish_non_exhaustive()
    }
}

impl AmqpBroker {
    /// Connects to `url` and opens a channel with publisher confirms.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::BrokerUnavailable` if the connection or
    /// channel cannot be opened.
    pub async fn connect(url: &str) -> Result<Self, MessagingError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| unavailable(&e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| unavailable(&e))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| unavailable(&e))?;
        info!("connected to AMQP broker");
        Ok(Self {
            connection,
            channel,
            consumers: Mutex::new(HashMap::new()),
        })
    }

    /// Declares the queues, delayed exchange and bindings of `topology`.
    ///
    /// The delayed exchange needs the `rabbitmq_delayed_message_exchange`
    /// plugin.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::BrokerUnavailable` if any declaration is
    /// refused.
    pub async fn declare(&self, topology: &ConsumerTopology) -> Result<(), MessagingError> {
        let durable = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(topology.dead_letter_queue, durable, FieldTable::default())
            .await
            .map_err(|e| unavailable(&e))?;

        let mut queue_arguments = FieldTable::default();
        queue_arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(LongString::from("")),
        );
        queue_arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(LongString::from(topology.dead_letter_queue)),
        );
        self.channel
            .queue_declare(topology.queue, durable, queue_arguments)
            .await
            .map_err(|e| unavailable(&e))?;

        let mut exchange_arguments = FieldTable::default();
        exchange_arguments.insert(
            "x-delayed-type".into(),
            AMQPValue::LongString(LongString::from("direct")),
        );
        self.channel
            .exchange_declare(
                topology.delay_exchange,
                ExchangeKind::Custom("x-delayed-message".to_owned()),
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                exchange_arguments,
            )
            .await
            .map_err(|e| unavailable(&e))?;

        for exchange in [topology.exchange, topology.delay_exchange] {
            self.channel
                .queue_bind(
                    topology.queue,
                    exchange,
                    topology.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| unavailable(&e))?;
        }
        info!(queue = topology.queue, "consumer topology declared");
        Ok(())
    }

    /// Closes the connection, returning unacked deliveries to their queues.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::BrokerUnavailable` if the close handshake
    /// fails.
    pub async fn close(&self) -> Result<(), MessagingError> {
        self.connection
            .close(200, "worker shutting down")
            .await
            .map_err(|e| unavailable(&e))
    }

    async fn consumer(&self, queue: &str) -> Result<Consumer, MessagingError> {
        let mut consumers = self.consumers.lock().await;
        if let Some(consumer) = consumers.get(queue) {
            return Ok(consumer.clone());
        }
        let consumer = self
            .channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| unavailable(&e))?;
        consumers.insert(queue.to_owned(), consumer.clone());
        Ok(consumer)
    }
}

#[async_trait]
impl BrokerChannel for AmqpBroker {
    async fn publish(&self, message: OutgoingMessage) -> Result<(), MessagingError> {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(PERSISTENT)
            .with_headers(headers_to_table(&message.headers));
        let confirmation = self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..BasicPublishOptions::default()
                },
                &message.body,
                properties,
            )
            .await
            .map_err(|e| unavailable(&e))?
            .await
            .map_err(|e| unavailable(&e))?;

        match confirmation {
            Confirmation::Ack(None) | Confirmation::NotRequested => {
                debug!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    "message confirmed"
                );
                Ok(())
            }
            Confirmation::Ack(Some(_)) => Err(MessagingError::Unroutable {
                exchange: message.exchange,
                routing_key: message.routing_key,
            }),
            Confirmation::Nack(_) => Err(MessagingError::BrokerUnavailable(format!(
                "broker refused message to {}/{}",
                message.exchange, message.routing_key
            ))),
        }
    }

    async fn next_delivery(&self, queue: &str) -> Result<Delivery, MessagingError> {
        let mut consumer = self.consumer(queue).await?;
        let delivery = consumer
            .next()
            .await
            .ok_or_else(|| MessagingError::BrokerUnavailable(format!("consumer on {queue} was cancelled")))?
            .map_err(|e| unavailable(&e))?;

        Ok(Delivery {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_owned(),
            routing_key: delivery.routing_key.as_str().to_owned(),
            headers: delivery
                .properties
                .headers()
                .as_ref()
                .map(table_to_headers)
                .unwrap_or_default(),
            redelivered: delivery.redelivered,
            body: delivery.data,
        })
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| unavailable(&e))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                },
            )
            .await
            .map_err(|e| unavailable(&e))
    }
}

fn headers_to_table(headers: &MessageHeaders) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in headers.iter() {
        let value = match value {
            Value::Bool(flag) => AMQPValue::Boolean(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => AMQPValue::LongLongInt(int),
                None => AMQPValue::LongString(LongString::from(number.to_string())),
            },
            Value::String(text) => AMQPValue::LongString(LongString::from(text.as_str())),
            other => AMQPValue::LongString(LongString::from(other.to_string())),
        };
        table.insert(ShortString::from(name.as_str()), value);
    }
    table
}

fn table_to_headers(table: &FieldTable) -> MessageHeaders {
    let mut headers = MessageHeaders::new();
    for (name, value) in table.inner() {
        let value = match value {
            AMQPValue::Boolean(flag) => Value::from(*flag),
            AMQPValue::ShortShortInt(int) => Value::from(*int),
            AMQPValue::ShortShortUInt(int) => Value::from(*int),
            AMQPValue::ShortInt(int) => Value::from(*int),
            AMQPValue::ShortUInt(int) => Value::from(*int),
            AMQPValue::LongInt(int) => Value::from(*int),
            AMQPValue::LongUInt(int) => Value::from(*int),
            AMQPValue::LongLongInt(int) => Value::from(*int),
            AMQPValue::ShortString(text) => Value::from(text.as_str()),
            AMQPValue::LongString(text) => {
                Value::from(String::from_utf8_lossy(text.as_bytes()).into_owned())
            }
            _ => continue,
        };
        headers.insert(name.as_str(), value);
    }
    headers
}
