use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, warn, Instrument};

use crate::message::Payload;
use crate::policy::ScheduleMode;
use crate::telemetry;

use super::dispatcher::DispatcherTask;

/// Cancellation signal shared by every task a scheduler drives.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Sleep for `duration`; returns `false` if cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives dispatcher cycles for every active subscription.
///
/// Each scheduled task gets its own loop, but at most `pool_size` cycles run
/// at any moment: a cycle holds one pool permit from start to finish. One
/// scheduler lives for one running period of the bus; stopping it cancels its
/// token and closes the pool.
pub struct DispatchScheduler {
    runtime: Handle,
    pool: Arc<Semaphore>,
    pool_size: AtomicUsize,
    scheduled: AtomicUsize,
    token: ShutdownToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for DispatchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchScheduler")
            .field("pool_size", &self.pool_size())
            .field("scheduled", &self.scheduled_count())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl DispatchScheduler {
    /// Create a scheduler running at most `pool_size` cycles at once (minimum 1).
    pub fn new(runtime: Handle, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            runtime,
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size: AtomicUsize::new(pool_size),
            scheduled: AtomicUsize::new(0),
            token: ShutdownToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.load(Ordering::Acquire)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.load(Ordering::Acquire)
    }

    pub fn token(&self) -> &ShutdownToken {
        &self.token
    }

    /// Start driving `task` according to its policy's schedule mode.
    ///
    /// The pool grows so that it is never smaller than the number of
    /// scheduled tasks.
    pub fn schedule<P: Payload>(&self, task: Arc<DispatcherTask<P>>) {
        if self.token.is_cancelled() {
            return;
        }

        let scheduled = self.scheduled.fetch_add(1, Ordering::AcqRel) + 1;
        let pool_size = self.pool_size.fetch_max(scheduled, Ordering::AcqRel);
        if scheduled > pool_size {
            self.pool.add_permits(scheduled - pool_size);
        }

        let mode = task.policy().schedule_mode();
        let initial_delay = task.policy().initial_delay();
        if mode == ScheduleMode::Continuous && task.policy().receive_timeout().is_zero() {
            warn!(
                channel = %task.channel_name(),
                endpoint = %task.endpoint_name(),
                "continuous dispatch with no receive timeout will poll without pausing"
            );
        }

        let pool = Arc::clone(&self.pool);
        let token = self.token.clone();
        let handle = self.runtime.spawn(async move {
            drive(task, mode, initial_delay, pool, token).await;
        });
        self.handles.lock().push(handle);
    }

    /// Cancel every scheduled loop and close the pool.
    ///
    /// A cycle blocked in rejection backoff puts its message back on the
    /// channel. Endpoint invocations already running are not interrupted.
    pub fn stop(&self) {
        self.token.cancel();
        self.pool.close();
    }

    /// Stop, then wait up to `timeout` for every loop to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        self.stop();
        let handles = std::mem::take(&mut *self.handles.lock());

        for handle in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("dispatcher loop failed: {e:?}"),
                Err(_) => warn!("dispatcher loop did not stop within {timeout:?}"),
            }
        }
    }
}

impl Drop for DispatchScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drive<P: Payload>(
    task: Arc<DispatcherTask<P>>,
    mode: ScheduleMode,
    initial_delay: Duration,
    pool: Arc<Semaphore>,
    token: ShutdownToken,
) {
    match mode {
        ScheduleMode::FixedRate(period) => match Instant::now().checked_add(initial_delay) {
            Some(start) => {
                let mut ticker = interval_at(start, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    if !run_cycle(&task, &pool, &token).await {
                        break;
                    }
                }
            }
            // The first tick is beyond any representable instant.
            None => token.cancelled().await,
        },
        ScheduleMode::FixedDelay(period) => {
            if !token.sleep(initial_delay).await {
                return;
            }
            while run_cycle(&task, &pool, &token).await {
                if !token.sleep(period).await {
                    break;
                }
            }
        }
        ScheduleMode::Continuous => {
            if !token.sleep(initial_delay).await {
                return;
            }
            while run_cycle(&task, &pool, &token).await {
                tokio::task::yield_now().await;
            }
        }
    }

    tracing::debug!(
        channel = %task.channel_name(),
        endpoint = %task.endpoint_name(),
        "dispatcher loop stopped"
    );
}

/// Run one cycle under a pool permit. Returns `false` once the scheduler is
/// stopped.
async fn run_cycle<P: Payload>(
    task: &DispatcherTask<P>,
    pool: &Arc<Semaphore>,
    token: &ShutdownToken,
) -> bool {
    let permit: OwnedSemaphorePermit = tokio::select! {
        _ = token.cancelled() => return false,
        permit = Arc::clone(pool).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return false,
        },
    };

    let span = telemetry::dispatch_cycle_span(task.channel_name(), task.endpoint_name());
    if let Err(e) = task.run(token).instrument(span).await {
        error!(
            channel = %task.channel_name(),
            endpoint = %task.endpoint_name(),
            error = %e,
            "dispatch cycle failed"
        );
    }
    drop(permit);

    !token.is_cancelled()
}
