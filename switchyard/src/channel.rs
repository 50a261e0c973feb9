use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::message::{Message, Payload};

/// A named conduit between producers and endpoints.
///
/// The bus never implements channels itself beyond [`PointToPointChannel`]; it
/// resolves them by name and polls them from dispatcher cycles.
#[async_trait]
pub trait Channel<P: Payload>: Send + Sync {
    /// Offer a message, waiting up to `timeout` for room.
    ///
    /// Returns `false` if the message was not accepted.
    async fn send(&self, message: Message<P>, timeout: Duration) -> bool;

    /// Take the next message, waiting up to `timeout` for one to arrive.
    ///
    /// Channels that cannot be polled keep the default, which never yields.
    async fn receive(&self, _timeout: Duration) -> Option<Message<P>> {
        None
    }
}

/// Bounded FIFO channel where each message is received by exactly one consumer.
///
/// This is the channel the bus creates when `auto_create_channels` is enabled.
pub struct PointToPointChannel<P> {
    sender: mpsc::Sender<Message<P>>,
    receiver: Mutex<mpsc::Receiver<Message<P>>>,
    capacity: usize,
}

impl<P> fmt::Debug for PointToPointChannel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointToPointChannel")
            .field("capacity", &self.capacity)
            .field("queued", &self.len())
            .finish()
    }
}

impl<P: Payload> Default for PointToPointChannel<P> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl<P> PointToPointChannel<P> {
    pub const DEFAULT_CAPACITY: usize = 1_024;

    /// Create a channel buffering at most `capacity` messages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<P: Payload> Channel<P> for PointToPointChannel<P> {
    async fn send(&self, message: Message<P>, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.sender.try_send(message).is_ok();
        }
        self.sender.send_timeout(message, timeout).await.is_ok()
    }

    async fn receive(&self, timeout: Duration) -> Option<Message<P>> {
        if timeout.is_zero() {
            let mut receiver = self.receiver.try_lock().ok()?;
            return receiver.try_recv().ok();
        }
        tokio::time::timeout(timeout, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await
        .ok()
        .flatten()
    }
}
