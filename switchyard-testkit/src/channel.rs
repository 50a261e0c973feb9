use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard::*;
use tokio::sync::Notify;

/// Unbounded in-memory channel that counts traffic and can be told to refuse
/// sends.
#[derive(Clone)]
pub struct InMemoryChannel<P> {
    queue: Arc<Mutex<VecDeque<Message<P>>>>,
    arrived: Arc<Notify>,
    sends: Arc<AtomicUsize>,
    receives: Arc<AtomicUsize>,
    refuse_sends: Arc<AtomicBool>,
}

impl<P> InMemoryChannel<P> {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            arrived: Arc::new(Notify::new()),
            sends: Arc::new(AtomicUsize::new(0)),
            receives: Arc::new(AtomicUsize::new(0)),
            refuse_sends: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accepted sends so far.
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Messages handed out by `receive` so far.
    pub fn receive_count(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }

    pub fn set_refuse_sends(&self, refuse: bool) {
        self.refuse_sends.store(refuse, Ordering::SeqCst);
    }

    pub fn drain(&self) -> Vec<Message<P>> {
        self.queue.lock().drain(..).collect()
    }

    fn pop(&self) -> Option<Message<P>> {
        let message = self.queue.lock().pop_front()?;
        self.receives.fetch_add(1, Ordering::SeqCst);
        Some(message)
    }
}

impl<P> Default for InMemoryChannel<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: Payload> Channel<P> for InMemoryChannel<P> {
    async fn send(&self, message: Message<P>, _timeout: Duration) -> bool {
        if self.refuse_sends.load(Ordering::SeqCst) {
            return false;
        }
        self.queue.lock().push_back(message);
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.arrived.notify_one();
        true
    }

    async fn receive(&self, timeout: Duration) -> Option<Message<P>> {
        if let Some(message) = self.pop() {
            return Some(message);
        }
        if timeout.is_zero() {
            return None;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let arrived = self.arrived.notified();
            if let Some(message) = self.pop() {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return self.pop();
            }
        }
    }
}
