use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::error;

use crate::message::{Message, Payload};
use crate::policy::ConsumerPolicy;
use crate::telemetry;

/// Message-processing logic the bus invokes by name.
///
/// An endpoint that reports both an input channel and a consumer policy is
/// subscribed automatically when it is registered with the bus.
#[async_trait]
pub trait Endpoint<P>: Send + Sync {
    /// Handle one message. Errors are recorded on the invocation's
    /// [`EndpointTaskHandle`]; the bus never retries them.
    async fn invoke(&self, message: Message<P>) -> anyhow::Result<()>;

    fn input_channel_name(&self) -> Option<&str> {
        None
    }

    fn consumer_policy(&self) -> Option<ConsumerPolicy> {
        None
    }
}

#[derive(Default)]
struct TaskState {
    error: Mutex<Option<anyhow::Error>>,
    finished: AtomicBool,
    done: Notify,
}

/// One pending endpoint invocation: an endpoint paired with the message it
/// should receive.
///
/// Tasks are submitted to an [`EndpointExecutor`](crate::executor::EndpointExecutor);
/// a rejected task comes back intact inside [`Rejected`](crate::error::Rejected)
/// so it can be resubmitted.
pub struct EndpointTask<P> {
    endpoint_name: Arc<str>,
    endpoint: Arc<dyn Endpoint<P>>,
    message: Message<P>,
    state: Arc<TaskState>,
}

impl<P> fmt::Debug for EndpointTask<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointTask")
            .field("endpoint", &self.endpoint_name)
            .field("message_id", &self.message.id())
            .finish_non_exhaustive()
    }
}

impl<P: Payload> EndpointTask<P> {
    pub fn new(
        endpoint_name: impl Into<Arc<str>>,
        endpoint: Arc<dyn Endpoint<P>>,
        message: Message<P>,
    ) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            endpoint,
            message,
            state: Arc::new(TaskState::default()),
        }
    }

    /// Invoke the endpoint, capturing its outcome in the task's error slot.
    pub(crate) async fn run(self) {
        let Self {
            endpoint_name,
            endpoint,
            message,
            state,
        } = self;
        let message_id = message.id().to_string();
        let mut completion = Completion {
            state,
            completed: false,
        };

        let timer = telemetry::record_invocation_start(&*endpoint_name);
        let result =
            telemetry::instrument_invoke(&*endpoint_name, &message_id, endpoint.invoke(message))
                .await;

        match result {
            Ok(()) => timer.finish("success"),
            Err(e) => {
                error!(
                    endpoint = %endpoint_name,
                    message_id = %message_id,
                    error = %e,
                    "endpoint invocation failed"
                );
                timer.finish("failure");
                *completion.state.error.lock() = Some(e);
            }
        }
        completion.completed = true;
    }
}

impl<P> EndpointTask<P> {
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    pub fn message(&self) -> &Message<P> {
        &self.message
    }

    /// Handle observing this task's completion and error slot.
    pub fn handle(&self) -> EndpointTaskHandle {
        EndpointTaskHandle {
            endpoint_name: Arc::clone(&self.endpoint_name),
            state: Arc::clone(&self.state),
        }
    }

    /// Give up the task and recover its message.
    pub fn into_message(self) -> Message<P> {
        self.message
    }
}

/// Marks the task finished when dropped, including when the endpoint panics.
struct Completion {
    state: Arc<TaskState>,
    completed: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.completed {
            let mut slot = self.state.error.lock();
            if slot.is_none() {
                *slot = Some(anyhow::anyhow!("endpoint invocation did not complete"));
            }
        }
        self.state.finished.store(true, Ordering::Release);
        self.state.done.notify_waiters();
    }
}

/// Observer for a submitted [`EndpointTask`].
///
/// The dispatcher never waits on it; callers that care about the outcome of a
/// particular invocation keep the handle returned by the executor.
#[derive(Clone)]
pub struct EndpointTaskHandle {
    endpoint_name: Arc<str>,
    state: Arc<TaskState>,
}

impl fmt::Debug for EndpointTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointTaskHandle")
            .field("endpoint", &self.endpoint_name)
            .field("finished", &self.is_finished())
            .field("failed", &self.has_failed())
            .finish()
    }
}

impl EndpointTaskHandle {
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    pub fn has_failed(&self) -> bool {
        self.state.error.lock().is_some()
    }

    /// Take the recorded endpoint error, leaving the slot empty.
    pub fn take_error(&self) -> Option<anyhow::Error> {
        self.state.error.lock().take()
    }

    /// Wait until the invocation has finished, successfully or not.
    pub async fn wait(&self) {
        loop {
            let notified = self.state.done.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Endpoint<String> for Echo {
        async fn invoke(&self, message: Message<String>) -> anyhow::Result<()> {
            if message.payload() == "boom" {
                anyhow::bail!("cannot echo {}", message.payload());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_successful_run_leaves_error_slot_empty() {
        let task = EndpointTask::new("echo", Arc::new(Echo), Message::new("hi".to_string()));
        let handle = task.handle();
        assert!(!handle.is_finished());

        task.run().await;
        handle.wait().await;

        assert!(handle.is_finished());
        assert!(!handle.has_failed());
        assert!(handle.take_error().is_none());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_not_propagated() {
        let task = EndpointTask::new("echo", Arc::new(Echo), Message::new("boom".to_string()));
        let handle = task.handle();

        tokio::spawn(task.run()).await.unwrap();

        assert!(handle.has_failed());
        let err = handle.take_error().unwrap();
        assert!(err.to_string().contains("cannot echo boom"));
        assert!(!handle.has_failed());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_completion() {
        let task = EndpointTask::new("echo", Arc::new(Echo), Message::new("later".to_string()));
        let handle = task.handle();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };

        tokio::task::yield_now().await;
        task.run().await;

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_into_message_returns_original() {
        let message = Message::new("keep".to_string());
        let task = EndpointTask::new("echo", Arc::new(Echo), message.clone());

        assert_eq!(task.endpoint_name(), "echo");
        assert_eq!(task.into_message(), message);
    }
}
