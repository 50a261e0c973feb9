use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, TryAcquireError};

use crate::endpoint::{EndpointTask, EndpointTaskHandle};
use crate::error::{ConfigError, Rejected};
use crate::message::Payload;
use crate::policy::ConsumerPolicy;
use crate::telemetry;

/// Bounded-concurrency runner for one endpoint's invocations.
///
/// At most `max_concurrency` invocations are in flight at once. Submissions
/// beyond that are rejected immediately rather than queued, which is what lets
/// the dispatcher apply its rejection backoff. Each accepted task runs as its
/// own tokio task, so an invocation outlives any dispatcher cycle that
/// submitted it.
pub struct EndpointExecutor {
    name: Arc<str>,
    core_concurrency: usize,
    max_concurrency: usize,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    shutdown: AtomicBool,
}

impl fmt::Debug for EndpointExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointExecutor")
            .field("name", &self.name)
            .field("core_concurrency", &self.core_concurrency)
            .field("max_concurrency", &self.max_concurrency)
            .field("active", &self.active_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl EndpointExecutor {
    /// Create an executor allowing up to `max_concurrency` concurrent invocations.
    ///
    /// `concurrency` is the steady-state parallelism the endpoint expects; it
    /// must be between 1 and `max_concurrency`.
    pub fn new(
        name: impl Into<Arc<str>>,
        concurrency: usize,
        max_concurrency: usize,
    ) -> Result<Self, ConfigError> {
        if concurrency < 1 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if max_concurrency < concurrency {
            return Err(ConfigError::invalid(
                "max_concurrency",
                format!("must be at least concurrency ({concurrency}), got {max_concurrency}"),
            ));
        }
        if max_concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::invalid(
                "max_concurrency",
                format!("must not exceed {}", Semaphore::MAX_PERMITS),
            ));
        }

        Ok(Self {
            name: name.into(),
            core_concurrency: concurrency,
            max_concurrency,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Create an executor sized by a subscription's policy.
    ///
    /// A policy whose ceiling is below its core size is clamped up to the core
    /// size rather than rejected.
    pub fn from_policy(
        name: impl Into<Arc<str>>,
        policy: &ConsumerPolicy,
    ) -> Result<Self, ConfigError> {
        let concurrency = policy.concurrency();
        Self::new(name, concurrency, policy.max_concurrency().max(concurrency))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn core_concurrency(&self) -> usize {
        self.core_concurrency
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Submit a task.
    ///
    /// Fails with [`Rejected`] when every concurrency slot is taken or the
    /// executor has been shut down. The task is handed back untouched.
    pub fn execute<P: Payload>(
        &self,
        task: EndpointTask<P>,
    ) -> Result<EndpointTaskHandle, Rejected<P>> {
        if self.is_shutdown() {
            return Err(Rejected {
                task,
                shutdown: true,
            });
        }

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => {
                return Err(Rejected {
                    task,
                    shutdown: true,
                })
            }
            Err(TryAcquireError::NoPermits) => {
                telemetry::record_submission_rejected(&*self.name);
                return Err(Rejected {
                    task,
                    shutdown: false,
                });
            }
        };

        // Outside a runtime there is nowhere to run the task.
        let Ok(runtime) = Handle::try_current() else {
            return Err(Rejected {
                task,
                shutdown: true,
            });
        };

        let handle = task.handle();
        let active = ActiveSlot::enter(Arc::clone(&self.name), Arc::clone(&self.active));
        telemetry::record_message_dispatched(&*self.name);

        runtime.spawn(async move {
            let _permit = permit;
            let _active = active;
            task.run().await;
        });

        Ok(handle)
    }

    /// Number of invocations currently running.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting tasks. Invocations already running are left to finish.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.permits.close();
            tracing::debug!(endpoint = %self.name, "endpoint executor shut down");
        }
    }
}

/// In-flight marker; released before the concurrency permit.
struct ActiveSlot {
    name: Arc<str>,
    active: Arc<AtomicUsize>,
}

impl ActiveSlot {
    fn enter(name: Arc<str>, active: Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::AcqRel) + 1;
        telemetry::set_endpoint_active(&*name, now);
        Self { name, active }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::AcqRel) - 1;
        telemetry::set_endpoint_active(&*self.name, now);
    }
}
