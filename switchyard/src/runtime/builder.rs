use std::fmt;
use std::sync::Arc;

use crate::channel::Channel;
use crate::config::BusConfig;
use crate::endpoint::Endpoint;
use crate::error::BusError;
use crate::message::Payload;

use super::bus::{MessageBus, Subscription};

/// Builder wiring channels, endpoints and subscriptions into a [`MessageBus`].
///
/// Registration happens in `build` in a fixed order: channels, then
/// endpoints, then explicit subscriptions. The built bus is `Initialized`
/// but not started.
///
/// # Example
///
/// ```ignore
/// use switchyard::*;
///
/// let bus = MessageBusBuilder::<String>::new()
///     .auto_create_channels(true)
///     .with_endpoint("audit", Arc::new(AuditEndpoint::default()))
///     .with_subscription(Subscription::new("orders", "audit", ConsumerPolicy::default()))
///     .build()?;
/// bus.start()?;
/// ```
pub struct MessageBusBuilder<P> {
    config: BusConfig,
    channels: Vec<(String, Arc<dyn Channel<P>>)>,
    endpoints: Vec<(String, Arc<dyn Endpoint<P>>)>,
    subscriptions: Vec<Subscription>,
}

impl<P> fmt::Debug for MessageBusBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels: Vec<&str> = self.channels.iter().map(|(name, _)| name.as_str()).collect();
        let endpoints: Vec<&str> = self.endpoints.iter().map(|(name, _)| name.as_str()).collect();

        f.debug_struct("MessageBusBuilder")
            .field("config", &self.config)
            .field("channels", &channels)
            .field("endpoints", &endpoints)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

impl<P: Payload> Default for MessageBusBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> MessageBusBuilder<P> {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            channels: Vec::new(),
            endpoints: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Replace the whole bus configuration.
    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn auto_create_channels(mut self, enabled: bool) -> Self {
        self.config.auto_create_channels = enabled;
        self
    }

    pub fn default_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.default_channel_capacity = capacity;
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, channel: Arc<dyn Channel<P>>) -> Self {
        self.channels.push((name.into(), channel));
        self
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: Arc<dyn Endpoint<P>>) -> Self {
        self.endpoints.push((name.into(), endpoint));
        self
    }

    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or a subscription naming an unknown
    /// channel or endpoint.
    pub fn build(self) -> Result<MessageBus<P>, BusError> {
        self.config.validate()?;

        let bus = MessageBus::new(self.config);
        for (name, channel) in self.channels {
            bus.register_channel(name, channel);
        }
        for (name, endpoint) in self.endpoints {
            bus.register_endpoint(name, endpoint)?;
        }
        for subscription in self.subscriptions {
            bus.activate_subscription(subscription)?;
        }

        bus.initialize();
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PointToPointChannel;
    use crate::message::Message;
    use crate::policy::ConsumerPolicy;
    use crate::runtime::BusState;
    use async_trait::async_trait;

    struct Sink;

    #[async_trait]
    impl Endpoint<u8> for Sink {
        async fn invoke(&self, _message: Message<u8>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_build_registers_everything() {
        let bus = MessageBusBuilder::<u8>::new()
            .with_channel("in", Arc::new(PointToPointChannel::<u8>::new(4)))
            .with_endpoint("sink", Arc::new(Sink))
            .with_subscription(Subscription::new("in", "sink", ConsumerPolicy::default()))
            .build()
            .unwrap();

        assert_eq!(bus.state(), BusState::Initialized);
        assert!(bus.get_channel("in").is_some());
        assert_eq!(bus.subscription_count(), 1);
    }

    #[test]
    fn test_build_rejects_unknown_channel() {
        let result = MessageBusBuilder::<u8>::new()
            .with_endpoint("sink", Arc::new(Sink))
            .with_subscription(Subscription::new("in", "sink", ConsumerPolicy::default()))
            .build();

        assert!(matches!(result, Err(BusError::UnknownChannel(_))));
    }

    #[test]
    fn test_build_validates_config() {
        let result = MessageBusBuilder::<u8>::new()
            .default_channel_capacity(0)
            .build();

        assert!(matches!(result, Err(BusError::Config(_))));
    }
}
