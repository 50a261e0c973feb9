use std::time::Duration;

use crate::endpoint::EndpointTask;
use crate::message::Message;

/// Raised synchronously when a configuration value is out of range.
///
/// Configuration errors are never retried; the caller has to fix the value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: '{field}' {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by [`MessageBus`](crate::runtime::MessageBus) registration
/// and lifecycle operations.
#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error(
        "cannot activate subscription, unknown channel '{0}'; consider enabling 'auto_create_channels'"
    )]
    UnknownChannel(String),
    #[error("cannot activate subscription, unknown endpoint '{0}'")]
    UnknownEndpoint(String),
    #[error("message bus must be started from within a tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Returned by [`EndpointExecutor::execute`](crate::executor::EndpointExecutor::execute)
/// when every concurrency slot is taken or the executor is shut down.
///
/// The rejected task is handed back so it can be resubmitted as-is.
pub struct Rejected<P> {
    pub task: EndpointTask<P>,
    pub shutdown: bool,
}

impl<P> std::fmt::Debug for Rejected<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected")
            .field("endpoint", &self.task.endpoint_name())
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl<P> std::fmt::Display for Rejected<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.shutdown {
            write!(f, "endpoint '{}' executor is shut down", self.task.endpoint_name())
        } else {
            write!(
                f,
                "endpoint '{}' executor is at its concurrency limit",
                self.task.endpoint_name()
            )
        }
    }
}

impl<P> std::error::Error for Rejected<P> {}

/// Failure of a single dispatcher cycle.
#[derive(thiserror::Error)]
pub enum DispatchError<P> {
    /// The dispatcher was cancelled while backing off and the message could
    /// not be put back on its channel.
    #[error("dispatch interrupted; message {} could not be requeued", .message.id())]
    Undelivered { message: Message<P> },
}

impl<P> std::fmt::Debug for DispatchError<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undelivered { message } => f
                .debug_struct("Undelivered")
                .field("message_id", &message.id())
                .finish_non_exhaustive(),
        }
    }
}

/// Errors raised by the lock registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("failed to acquire lock within {waited:?}")]
    Timeout { waited: Duration },
    #[error("unsupported lock operation: {0}")]
    UnsupportedOperation(&'static str),
    #[error("condition used without holding its lock")]
    NotHeld,
}

/// Errors raised by the in-memory message store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("message store capacity of {capacity} messages exceeded")]
    CapacityExceeded { capacity: usize },
    #[error("message group expiry callback failed: {0}")]
    ExpiryCallback(#[source] anyhow::Error),
}
