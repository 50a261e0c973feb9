use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard::*;

/// Endpoint double that records every invocation.
///
/// Optionally sleeps per invocation, fails every invocation, and declares an
/// input channel and policy so registration subscribes it.
#[derive(Clone)]
pub struct MockEndpoint<P> {
    invocations: Arc<Mutex<Vec<Message<P>>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Option<Duration>,
    failure: Option<String>,
    input_channel: Option<String>,
    policy: Option<ConsumerPolicy>,
}

impl<P> MockEndpoint<P> {
    pub fn new() -> Self {
        Self {
            invocations: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            delay: None,
            failure: None,
            input_channel: None,
            policy: None,
        }
    }

    /// Sleep for `delay` inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every invocation with `error`.
    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.failure = Some(error.into());
        self
    }

    /// Declare an input channel and policy.
    pub fn subscribed_to(mut self, channel: impl Into<String>, policy: ConsumerPolicy) -> Self {
        self.input_channel = Some(channel.into());
        self.policy = Some(policy);
        self
    }

    pub fn invocations(&self) -> Vec<Message<P>> {
        self.invocations.lock().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Highest number of invocations observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn assert_invocation_count_eq(&self, expected: usize) {
        let actual = self.invocation_count();
        assert_eq!(
            actual, expected,
            "Expected {} invocations, got {}",
            expected, actual
        );
    }

    /// Poll until at least `count` invocations were recorded or `timeout`
    /// elapses. Returns whether the count was reached.
    pub async fn wait_for_invocations(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.invocation_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    pub fn clear(&self) {
        self.invocations.lock().clear();
    }
}

impl<P> Default for MockEndpoint<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: Payload> Endpoint<P> for MockEndpoint<P> {
    async fn invoke(&self, message: Message<P>) -> anyhow::Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.invocations.lock().push(message);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.failure {
            Some(error) => Err(anyhow::anyhow!("{error}")),
            None => Ok(()),
        }
    }

    fn input_channel_name(&self) -> Option<&str> {
        self.input_channel.as_deref()
    }

    fn consumer_policy(&self) -> Option<ConsumerPolicy> {
        self.policy.clone()
    }
}

/// Expiry callback double recording the keys of the groups it saw.
#[derive(Clone)]
pub struct RecordingCallback<K> {
    seen: Arc<Mutex<Vec<K>>>,
    failure: Option<String>,
}

impl<K: Clone> RecordingCallback<K> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            failure: None,
        }
    }

    /// Record the group, then fail with `error`.
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            failure: Some(error.into()),
        }
    }

    pub fn seen(&self) -> Vec<K> {
        self.seen.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl<K: Clone> Default for RecordingCallback<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> MessageGroupCallback<K, P> for RecordingCallback<K>
where
    K: Clone + Send + Sync,
{
    fn execute(
        &self,
        _store: &dyn MessageGroupStore<K, P>,
        group: &MessageGroup<K, P>,
    ) -> anyhow::Result<()> {
        self.seen.lock().push(group.correlation_key().clone());
        match &self.failure {
            Some(error) => Err(anyhow::anyhow!("{error}")),
            None => Ok(()),
        }
    }
}
