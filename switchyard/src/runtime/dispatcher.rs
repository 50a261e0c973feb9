use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::channel::Channel;
use crate::endpoint::{Endpoint, EndpointTask};
use crate::error::{DispatchError, Rejected};
use crate::executor::EndpointExecutor;
use crate::message::{Message, Payload};
use crate::policy::ConsumerPolicy;

use super::scheduler::ShutdownToken;

/// One subscription's unit of scheduled work: poll a channel and hand each
/// message to the endpoint's executor.
///
/// The task holds its channel, endpoint and executor directly; it never
/// looks anything up in the bus while running.
pub struct DispatcherTask<P> {
    channel_name: Arc<str>,
    channel: Arc<dyn Channel<P>>,
    endpoint_name: Arc<str>,
    endpoint: Arc<dyn Endpoint<P>>,
    executor: Arc<EndpointExecutor>,
    policy: ConsumerPolicy,
}

impl<P> fmt::Debug for DispatcherTask<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherTask")
            .field("channel", &self.channel_name)
            .field("endpoint", &self.endpoint_name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<P: Payload> DispatcherTask<P> {
    pub fn new(
        channel_name: impl Into<Arc<str>>,
        channel: Arc<dyn Channel<P>>,
        endpoint_name: impl Into<Arc<str>>,
        endpoint: Arc<dyn Endpoint<P>>,
        executor: Arc<EndpointExecutor>,
        policy: ConsumerPolicy,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            channel,
            endpoint_name: endpoint_name.into(),
            endpoint,
            executor,
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

    pub fn executor(&self) -> &Arc<EndpointExecutor> {
        &self.executor
    }

    /// Run one polling cycle and return how many messages were handed off.
    ///
    /// The cycle receives up to `max_messages_per_task` messages and ends
    /// early the first time the channel has nothing within the receive
    /// timeout. Rejected submissions are retried, backing off for
    /// `rejection_limit_wait` after every `rejection_limit` rejections. If the
    /// token is cancelled while backing off, the message goes back to its
    /// channel; if the channel refuses it, it is returned in
    /// [`DispatchError::Undelivered`].
    pub async fn run(&self, token: &ShutdownToken) -> Result<usize, DispatchError<P>> {
        if self.executor.is_shutdown() {
            warn!(
                endpoint = %self.endpoint_name,
                "endpoint executor is shut down, skipping dispatch cycle"
            );
            return Ok(0);
        }

        let limit = self.policy.messages_per_task_limit();
        let receive_timeout = self.policy.receive_timeout();
        let mut received: u64 = 0;
        let mut dispatched = 0;

        while limit.map_or(true, |limit| received < limit) {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                message = self.channel.receive(receive_timeout) => message,
            };
            let Some(message) = message else {
                break;
            };
            received += 1;

            let task = EndpointTask::new(
                Arc::clone(&self.endpoint_name),
                Arc::clone(&self.endpoint),
                message,
            );
            if self.submit(task, token).await? {
                dispatched += 1;
            } else {
                break;
            }
        }

        Ok(dispatched)
    }

    /// Submit until accepted. `Ok(false)` means the message was requeued.
    async fn submit(
        &self,
        mut task: EndpointTask<P>,
        token: &ShutdownToken,
    ) -> Result<bool, DispatchError<P>> {
        let rejection_limit = self.policy.rejection_limit();
        let mut rejections = 0;

        loop {
            match self.executor.execute(task) {
                Ok(_) => return Ok(true),
                Err(Rejected {
                    task: rejected,
                    shutdown: true,
                }) => {
                    self.requeue(rejected.into_message()).await?;
                    return Ok(false);
                }
                Err(Rejected { task: rejected, .. }) => task = rejected,
            }

            rejections += 1;
            if rejections < rejection_limit {
                tokio::task::yield_now().await;
                continue;
            }

            debug!(
                endpoint = %self.endpoint_name,
                rejections,
                wait_ms = self.policy.rejection_limit_wait().as_millis() as u64,
                "rejection limit reached, backing off"
            );
            rejections = 0;
            if !token.sleep(self.policy.rejection_limit_wait()).await {
                self.requeue(task.into_message()).await?;
                return Ok(false);
            }
        }
    }

    async fn requeue(&self, message: Message<P>) -> Result<(), DispatchError<P>> {
        let id = message.id();
        if self.channel.send(message.clone(), std::time::Duration::ZERO).await {
            debug!(
                channel = %self.channel_name,
                message_id = %id,
                "dispatch interrupted, message returned to channel"
            );
            Ok(())
        } else {
            Err(DispatchError::Undelivered { message })
        }
    }
}
