//! Correlated message groups and individually addressable messages.
//!
//! [`SimpleMessageStore`] implements both [`MessageStore`] and
//! [`MessageGroupStore`] in memory. The store makes single operations atomic
//! but does not serialize multi-step read-modify-write sequences on a group;
//! callers that need that use a [`LockRegistry`](crate::lock::LockRegistry)
//! keyed by correlation key.

mod group;
mod memory;

use std::fmt;
use std::hash::Hash;

use crate::error::StoreError;
use crate::message::{Message, MessageId};

pub use group::{GroupAddOutcome, MessageGroup};
pub use memory::SimpleMessageStore;

/// Bounds required of a correlation key.
pub trait CorrelationKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static> CorrelationKey for T {}

/// Store of individually addressable messages.
pub trait MessageStore<P>: Send + Sync {
    fn get_message(&self, id: MessageId) -> Option<Message<P>>;

    /// Store a message, consuming one unit of capacity.
    ///
    /// Fails with [`StoreError::CapacityExceeded`] instead of waiting when the
    /// store is full.
    fn add_message(&self, message: Message<P>) -> Result<Message<P>, StoreError>;

    /// Remove a message, releasing its unit of capacity if it was present.
    fn remove_message(&self, id: MessageId) -> Option<Message<P>>;

    /// Stored messages whose correlation header equals `correlation_id`.
    fn list(&self, correlation_id: &str) -> Vec<Message<P>>;

    fn message_count(&self) -> usize;
}

/// Store of correlated [`MessageGroup`]s.
pub trait MessageGroupStore<K, P>: Send + Sync {
    /// Snapshot of the group for `key`, or an empty group if there is none.
    fn get_message_group(&self, key: &K) -> MessageGroup<K, P>;

    /// Add a message to the group for `key`, creating the group on first use.
    ///
    /// Duplicates are dropped. Returns the outcome of the add; use
    /// [`MessageGroupStore::get_message_group`] for a copy of the group.
    fn add_message_to_group(&self, key: &K, message: Message<P>) -> GroupAddOutcome;

    /// Mark every message in the stored group and in the caller's snapshot.
    fn mark_message_group(&self, group: &mut MessageGroup<K, P>);

    fn remove_message_group(&self, key: &K);

    /// Register a callback run on each group removed by expiry. Registering
    /// the same callback instance twice has no effect.
    fn register_expiry_callback(&self, callback: std::sync::Arc<dyn MessageGroupCallback<K, P>>);

    /// Remove every group older than `timeout`, running each expiry callback
    /// on it first.
    ///
    /// All callbacks run for every expired group and every expired group is
    /// removed even if callbacks fail. The first callback failure is returned
    /// once the scan is complete. A negative timeout expires every group.
    fn expire_message_groups(&self, timeout: chrono::Duration) -> Result<usize, StoreError>;

    fn message_group_count(&self) -> usize;
}

/// Callback invoked on message groups, such as when they expire.
pub trait MessageGroupCallback<K, P>: Send + Sync {
    fn execute(
        &self,
        store: &dyn MessageGroupStore<K, P>,
        group: &MessageGroup<K, P>,
    ) -> anyhow::Result<()>;
}

impl<K, P, F> MessageGroupCallback<K, P> for F
where
    F: Fn(&dyn MessageGroupStore<K, P>, &MessageGroup<K, P>) -> anyhow::Result<()> + Send + Sync,
{
    fn execute(
        &self,
        store: &dyn MessageGroupStore<K, P>,
        group: &MessageGroup<K, P>,
    ) -> anyhow::Result<()> {
        self(store, group)
    }
}
