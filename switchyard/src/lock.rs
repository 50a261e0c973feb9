//! Partitioned lock registry for serializing per-key state changes.
//!
//! [`DefaultLockRegistry`] owns a fixed table of `mask + 1` reentrant locks and
//! maps a key onto `hash(key) & mask`. Distinct keys can share a lock; the
//! table size bounds memory regardless of how many keys are in play.
//!
//! Locks are blocking primitives. Never hold a [`LockGuard`] across an
//! `.await`; guards are `!Send` so the compiler rejects that inside spawned
//! tasks.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{ConfigError, LockError};

/// A mutual-exclusion lock handed out by a [`LockRegistry`].
pub trait Lock: Send + Sync {
    /// Block until the lock is held by the current thread.
    fn lock(&self) -> LockGuard<'_>;

    /// Like [`Lock::lock`], giving up after `timeout`.
    ///
    /// On timeout the lock is not held.
    fn try_lock_for(&self, timeout: Duration) -> Result<LockGuard<'_>, LockError>;

    /// Create a condition bound to this lock.
    fn new_condition(&self) -> Result<Condition, LockError>;

    /// Release one hold. Only [`LockGuard`] can produce the token, so this
    /// crate's guards are the sole callers.
    #[doc(hidden)]
    fn unlock(&self, token: sealed::Release);
}

mod sealed {
    /// Proof that a release comes from a [`super::LockGuard`].
    #[derive(Debug)]
    pub struct Release(pub(super) ());
}

/// Holds a [`Lock`] until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a dyn Lock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    fn new(lock: &'a dyn Lock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock(sealed::Release(()));
    }
}

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    holds: usize,
}

#[derive(Debug, Default)]
struct LockState {
    owner: Mutex<Owner>,
    available: Condvar,
}

/// Reentrant lock: the owning thread may acquire it again without blocking
/// and must release it once per acquisition.
#[derive(Debug, Default)]
pub struct ReentrantLock {
    state: Arc<LockState>,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the current thread holds this lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.owner.lock().thread == Some(thread::current().id())
    }

    /// Number of holds the owning thread has on this lock; `0` when free.
    pub fn hold_count(&self) -> usize {
        self.state.owner.lock().holds
    }

    fn acquire(&self, deadline: Option<Instant>) -> bool {
        let me = thread::current().id();
        let mut owner = self.state.owner.lock();
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.holds = 1;
                    return true;
                }
                Some(holder) if holder == me => {
                    owner.holds += 1;
                    return true;
                }
                Some(_) => match deadline {
                    None => self.state.available.wait(&mut owner),
                    Some(deadline) => {
                        let timed_out = self
                            .state
                            .available
                            .wait_until(&mut owner, deadline)
                            .timed_out();
                        if timed_out && owner.thread.is_some() {
                            return false;
                        }
                    }
                },
            }
        }
    }
}

impl Lock for ReentrantLock {
    fn lock(&self) -> LockGuard<'_> {
        self.acquire(None);
        LockGuard::new(self)
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<LockGuard<'_>, LockError> {
        let deadline = Instant::now().checked_add(timeout);
        if self.acquire(deadline) {
            Ok(LockGuard::new(self))
        } else {
            Err(LockError::Timeout { waited: timeout })
        }
    }

    fn new_condition(&self) -> Result<Condition, LockError> {
        Ok(Condition {
            state: Arc::clone(&self.state),
            signal: Arc::new(Condvar::new()),
        })
    }

    fn unlock(&self, _token: sealed::Release) {
        let mut owner = self.state.owner.lock();
        if owner.thread != Some(thread::current().id()) {
            tracing::warn!("ignoring release from a thread that does not hold the lock");
            return;
        }
        owner.holds = owner.holds.saturating_sub(1);
        if owner.holds == 0 {
            owner.thread = None;
            drop(owner);
            self.state.available.notify_one();
        }
    }
}

/// Wait/notify condition tied to a [`ReentrantLock`].
///
/// Waiting releases every hold the current thread has on the lock and
/// restores them before returning. Wakeups may be spurious; callers re-check
/// their predicate in a loop.
#[derive(Clone)]
pub struct Condition {
    state: Arc<LockState>,
    signal: Arc<Condvar>,
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition").finish_non_exhaustive()
    }
}

impl Condition {
    /// Wait until signalled. The current thread must hold the lock.
    pub fn wait(&self) -> Result<(), LockError> {
        self.wait_inner(None).map(|_| ())
    }

    /// Wait until signalled or `timeout` elapses.
    ///
    /// Returns `false` if the wait timed out.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool, LockError> {
        self.wait_inner(Instant::now().checked_add(timeout))
    }

    pub fn signal(&self) {
        self.signal.notify_one();
    }

    pub fn signal_all(&self) {
        self.signal.notify_all();
    }

    fn wait_inner(&self, deadline: Option<Instant>) -> Result<bool, LockError> {
        let me = thread::current().id();
        let mut owner = self.state.owner.lock();
        if owner.thread != Some(me) {
            return Err(LockError::NotHeld);
        }

        let holds = owner.holds;
        owner.thread = None;
        owner.holds = 0;
        self.state.available.notify_one();

        let signalled = match deadline {
            None => {
                self.signal.wait(&mut owner);
                true
            }
            Some(deadline) => !self.signal.wait_until(&mut owner, deadline).timed_out(),
        };

        while owner.thread.is_some() {
            self.state.available.wait(&mut owner);
        }
        owner.thread = Some(me);
        owner.holds = holds;
        Ok(signalled)
    }
}

/// Maps keys onto locks.
///
/// `obtain` is deterministic: a key always yields the same lock for the
/// registry's lifetime.
pub trait LockRegistry: Send + Sync {
    fn obtain<K: Hash + ?Sized>(&self, key: &K) -> &dyn Lock;

    /// Run `f` while holding the lock for `key`.
    ///
    /// The lock is released on every exit path, including panics.
    fn execute_locked<K, T, F>(&self, key: &K, f: F) -> T
    where
        K: Hash + ?Sized,
        F: FnOnce() -> T,
    {
        let _guard = self.obtain(key).lock();
        f()
    }

    /// Run `f` while holding the lock for `key`, waiting at most `wait` for it.
    ///
    /// Fails with [`LockError::Timeout`] without running `f` if the lock
    /// could not be acquired in time.
    fn execute_locked_timed<K, T, F>(&self, key: &K, wait: Duration, f: F) -> Result<T, LockError>
    where
        K: Hash + ?Sized,
        F: FnOnce() -> T,
    {
        let _guard = self.obtain(key).try_lock_for(wait)?;
        Ok(f())
    }
}

/// Fixed table of [`ReentrantLock`]s indexed by a masked key hash.
pub struct DefaultLockRegistry {
    mask: usize,
    locks: Box<[ReentrantLock]>,
}

impl fmt::Debug for DefaultLockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLockRegistry")
            .field("mask", &format_args!("{:#x}", self.mask))
            .finish_non_exhaustive()
    }
}

impl Default for DefaultLockRegistry {
    fn default() -> Self {
        Self::with_lock_table(Self::DEFAULT_MASK)
    }
}

impl DefaultLockRegistry {
    /// 256 locks.
    pub const DEFAULT_MASK: usize = 0xFF;

    /// Create a registry with `mask + 1` locks. `mask` must be `2^n - 1`.
    pub fn new(mask: usize) -> Result<Self, ConfigError> {
        match mask.checked_add(1) {
            Some(size) if size.is_power_of_two() => Ok(Self::with_lock_table(mask)),
            _ => Err(ConfigError::invalid(
                "mask",
                format!("must be a power of two minus one, got {mask:#x}"),
            )),
        }
    }

    fn with_lock_table(mask: usize) -> Self {
        let locks = (0..=mask).map(|_| ReentrantLock::new()).collect();
        Self { mask, locks }
    }

    pub fn mask(&self) -> usize {
        self.mask
    }

    /// Number of distinct locks in the table.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    fn index_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }
}

impl LockRegistry for DefaultLockRegistry {
    fn obtain<K: Hash + ?Sized>(&self, key: &K) -> &dyn Lock {
        &self.locks[self.index_of(key)]
    }
}

/// Lock whose operations always succeed without excluding anyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThruLock;

impl Lock for PassThruLock {
    fn lock(&self) -> LockGuard<'_> {
        LockGuard::new(self)
    }

    fn try_lock_for(&self, _timeout: Duration) -> Result<LockGuard<'_>, LockError> {
        Ok(LockGuard::new(self))
    }

    fn new_condition(&self) -> Result<Condition, LockError> {
        Err(LockError::UnsupportedOperation(
            "conditions are not available on pass-through locks",
        ))
    }

    fn unlock(&self, _token: sealed::Release) {}
}

/// Registry for call sites where locking is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThruLockRegistry {
    lock: PassThruLock,
}

impl PassThruLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockRegistry for PassThruLockRegistry {
    fn obtain<K: Hash + ?Sized>(&self, _key: &K) -> &dyn Lock {
        &self.lock
    }
}
