//! Message bus adapter: publishes integration events to their exchange.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::broker::{BrokerChannel, MessageHeaders, OutgoingMessage};
use crate::error::MessagingError;
use crate::integration_event::{IntegrationEvent, IntegrationEventName};

/// Where an integration event is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopology {
    /// Exchange name.
    pub exchange: &'static str,
    /// Routing key.
    pub routing_key: &'static str,
}

/// Static event-name → exchange/routing-key map.
#[derive(Debug, Clone)]
pub struct TopologyMap {
    routes: HashMap<IntegrationEventName, EventTopology>,
}

impl Default for TopologyMap {
    /// The topology this service publishes with.
    fn default() -> Self {
        Self::empty().with(
            IntegrationEventName::VideoAudioUploaded,
            EventTopology {
                exchange: "amq.direct",
                routing_key: "videos.convert",
            },
        )
    }
}

impl TopologyMap {
    /// A map without any route.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Adds (or replaces) the route of `name`.
    #[must_use]
    pub fn with(mut self, name: IntegrationEventName, topology: EventTopology) -> Self {
        self.routes.insert(name, topology);
        self
    }

    /// Looks up the route of `name`.
    #[must_use]
    pub fn get(&self, name: IntegrationEventName) -> Option<&EventTopology> {
        self.routes.get(&name)
    }
}

/// Publishes integration events through a broker channel.
#[derive(Clone)]
pub struct MessageBus {
    channel: Arc<dyn BrokerChannel>,
    topology: TopologyMap,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl MessageBus {
    /// Creates a bus over `channel` using `topology`.
    #[must_use]
    pub fn new(channel: Arc<dyn BrokerChannel>, topology: TopologyMap) -> Self {
        Self { channel, topology }
    }

    /// Publishes `event` to the exchange and routing key registered for its
    /// name.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::UnknownEventTopology` if no route is
    /// registered, or the channel's error if publishing fails.
    #[instrument(skip_all, fields(event_name = %event.event_name))]
    pub async fn publish(&self, event: &IntegrationEvent) -> Result<(), MessagingError> {
        let topology = self
            .topology
            .get(event.event_name)
            .ok_or(MessagingError::UnknownEventTopology(event.event_name))?;

        let message = OutgoingMessage {
            exchange: topology.exchange.to_owned(),
            routing_key: topology.routing_key.to_owned(),
            body: event.to_bytes()?,
            headers: MessageHeaders::new(),
        };
        self.channel.publish(message).await?;

        debug!(
            exchange = topology.exchange,
            routing_key = topology.routing_key,
            "integration event published"
        );
        Ok(())
    }
}
