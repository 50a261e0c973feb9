use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::info;

use crate::channel::{Channel, PointToPointChannel};
use crate::config::BusConfig;
use crate::endpoint::Endpoint;
use crate::error::BusError;
use crate::executor::EndpointExecutor;
use crate::message::Payload;
use crate::policy::ConsumerPolicy;

use super::dispatcher::DispatcherTask;
use super::scheduler::DispatchScheduler;

/// Binding of an endpoint to an input channel under a consumer policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    channel_name: String,
    endpoint_name: String,
    #[serde(default)]
    policy: ConsumerPolicy,
}

impl Subscription {
    pub fn new(
        channel_name: impl Into<String>,
        endpoint_name: impl Into<String>,
        policy: ConsumerPolicy,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            endpoint_name: endpoint_name.into(),
            policy,
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    pub fn policy(&self) -> &ConsumerPolicy {
        &self.policy
    }
}

/// Lifecycle of a [`MessageBus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BusState {
    Stopped,
    Initialized,
    Running,
}

struct Lifecycle {
    state: BusState,
    scheduler: Option<Arc<DispatchScheduler>>,
}

/// Registry of channels, endpoints and subscriptions, and owner of the
/// scheduler that drives their dispatchers.
///
/// Registration is allowed in any state; subscriptions only start polling
/// while the bus is running. Stopping is best effort: dispatcher loops are
/// cancelled, but endpoint invocations already running are left to finish on
/// their own. Callers needing a graceful drain must drain before calling
/// [`MessageBus::stop`].
pub struct MessageBus<P> {
    config: BusConfig,
    channels: DashMap<String, Arc<dyn Channel<P>>>,
    endpoints: DashMap<String, Arc<dyn Endpoint<P>>>,
    executors: DashMap<String, Arc<EndpointExecutor>>,
    subscriptions: Mutex<Vec<Subscription>>,
    dispatchers: Mutex<Vec<Arc<DispatcherTask<P>>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<P> fmt::Debug for MessageBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.config)
            .field("channels", &self.channels.len())
            .field("endpoints", &self.endpoints.len())
            .field("subscriptions", &self.subscriptions.lock().len())
            .field("state", &self.lifecycle.lock().state)
            .finish()
    }
}

impl<P: Payload> Default for MessageBus<P> {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl<P: Payload> MessageBus<P> {
    /// Time [`MessageBus::shutdown`] waits for each dispatcher loop.
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            channels: DashMap::new(),
            endpoints: DashMap::new(),
            executors: DashMap::new(),
            subscriptions: Mutex::new(Vec::new()),
            dispatchers: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle {
                state: BusState::Stopped,
                scheduler: None,
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register or replace a channel.
    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn Channel<P>>) {
        self.channels.insert(name.into(), channel);
    }

    /// Register or replace an endpoint.
    ///
    /// An endpoint declaring both an input channel and a consumer policy is
    /// subscribed to that channel straight away.
    pub fn register_endpoint(
        &self,
        name: impl Into<String>,
        endpoint: Arc<dyn Endpoint<P>>,
    ) -> Result<(), BusError> {
        let name = name.into();
        let subscription = match (endpoint.input_channel_name(), endpoint.consumer_policy()) {
            (Some(channel), Some(policy)) => Some(Subscription::new(channel, name.clone(), policy)),
            _ => None,
        };
        self.endpoints.insert(name, endpoint);

        match subscription {
            Some(subscription) => self.activate_subscription(subscription),
            None => Ok(()),
        }
    }

    pub fn get_channel(&self, name: &str) -> Option<Arc<dyn Channel<P>>> {
        self.channels.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Wire a subscription into a dispatcher and schedule it if running.
    ///
    /// An unknown channel is created as a [`PointToPointChannel`] when
    /// `auto_create_channels` is enabled. Endpoints get one executor, sized
    /// by the first subscription that names them and shared by later ones.
    pub fn activate_subscription(&self, subscription: Subscription) -> Result<(), BusError> {
        let channel = self.resolve_channel(subscription.channel_name())?;
        let endpoint = self
            .endpoints
            .get(subscription.endpoint_name())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BusError::UnknownEndpoint(subscription.endpoint_name().to_string()))?;

        let executor = match self.executors.entry(subscription.endpoint_name().to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let executor = Arc::new(EndpointExecutor::from_policy(
                    subscription.endpoint_name(),
                    subscription.policy(),
                )?);
                entry.insert(Arc::clone(&executor));
                executor
            }
        };

        let task = Arc::new(DispatcherTask::new(
            subscription.channel_name(),
            channel,
            subscription.endpoint_name(),
            endpoint,
            executor,
            subscription.policy().clone(),
        ));

        let lifecycle = self.lifecycle.lock();
        self.dispatchers.lock().push(Arc::clone(&task));
        if let Some(scheduler) = &lifecycle.scheduler {
            scheduler.schedule(task);
        }
        info!(
            channel = %subscription.channel_name(),
            endpoint = %subscription.endpoint_name(),
            running = lifecycle.state == BusState::Running,
            "subscription activated"
        );
        self.subscriptions.lock().push(subscription);

        Ok(())
    }

    fn resolve_channel(&self, name: &str) -> Result<Arc<dyn Channel<P>>, BusError> {
        if let Some(channel) = self.get_channel(name) {
            return Ok(channel);
        }
        if !self.config.auto_create_channels {
            return Err(BusError::UnknownChannel(name.to_string()));
        }

        let channel = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(channel = %name, "auto-creating point-to-point channel");
                let channel: Arc<dyn Channel<P>> =
                    Arc::new(PointToPointChannel::new(self.config.default_channel_capacity));
                channel
            })
            .value()
            .clone();
        Ok(channel)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// In-flight invocations for `endpoint`; `0` if it has no executor.
    pub fn get_active_count_for_endpoint(&self, endpoint: &str) -> usize {
        self.executors
            .get(endpoint)
            .map(|executor| executor.active_count())
            .unwrap_or(0)
    }

    pub fn executor(&self, endpoint: &str) -> Option<Arc<EndpointExecutor>> {
        self.executors.get(endpoint).map(|entry| Arc::clone(entry.value()))
    }

    pub fn state(&self) -> BusState {
        self.lifecycle.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == BusState::Running
    }

    /// Move a stopped bus to `Initialized`. No effect in any other state.
    pub fn initialize(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == BusState::Stopped {
            lifecycle.state = BusState::Initialized;
        }
    }

    /// Start dispatching every activated subscription. No effect if running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), BusError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == BusState::Running {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;

        let dispatchers = self.dispatchers.lock().clone();
        let scheduler = Arc::new(DispatchScheduler::new(runtime, dispatchers.len()));
        for task in dispatchers {
            scheduler.schedule(task);
        }

        info!(
            subscriptions = scheduler.scheduled_count(),
            pool_size = scheduler.pool_size(),
            "message bus started"
        );
        lifecycle.scheduler = Some(scheduler);
        lifecycle.state = BusState::Running;
        Ok(())
    }

    /// Cancel all scheduled dispatch work. No effect unless running.
    pub fn stop(&self) {
        if let Some(scheduler) = self.take_scheduler() {
            scheduler.stop();
            info!("message bus stopped");
        }
    }

    /// Stop, then wait for every dispatcher loop to exit.
    pub async fn shutdown(&self) {
        if let Some(scheduler) = self.take_scheduler() {
            scheduler.shutdown(Self::SHUTDOWN_TIMEOUT).await;
            info!("message bus shut down");
        }
    }

    fn take_scheduler(&self) -> Option<Arc<DispatchScheduler>> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != BusState::Running {
            return None;
        }
        lifecycle.state = BusState::Stopped;
        lifecycle.scheduler.take()
    }
}
