use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{CorrelationKey, GroupAddOutcome, MessageGroup, MessageGroupCallback, MessageGroupStore, MessageStore};
use crate::config::StoreConfig;
use crate::error::{ConfigError, StoreError};
use crate::message::{Message, MessageId, Payload};
use crate::telemetry;

struct Capacity {
    limit: usize,
    available: Semaphore,
}

/// In-memory [`MessageStore`] and [`MessageGroupStore`].
///
/// Messages added through [`MessageStore::add_message`] count against the
/// optional capacity; group membership does not.
pub struct SimpleMessageStore<K, P> {
    id_to_message: DashMap<MessageId, Message<P>>,
    correlation_to_group: DashMap<K, MessageGroup<K, P>>,
    capacity: Option<Capacity>,
    expiry_callbacks: RwLock<Vec<Arc<dyn MessageGroupCallback<K, P>>>>,
    timeout_on_idle: bool,
}

impl<K: CorrelationKey, P> fmt::Debug for SimpleMessageStore<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleMessageStore")
            .field("messages", &self.id_to_message.len())
            .field("groups", &self.correlation_to_group.len())
            .field("capacity", &self.capacity.as_ref().map(|c| c.limit))
            .field("timeout_on_idle", &self.timeout_on_idle)
            .finish_non_exhaustive()
    }
}

impl<K: CorrelationKey, P: Payload> Default for SimpleMessageStore<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CorrelationKey, P: Payload> SimpleMessageStore<K, P> {
    /// Unbounded store expiring groups by creation time.
    pub fn new() -> Self {
        Self {
            id_to_message: DashMap::new(),
            correlation_to_group: DashMap::new(),
            capacity: None,
            expiry_callbacks: RwLock::new(Vec::new()),
            timeout_on_idle: false,
        }
    }

    /// Store holding at most `capacity` individual messages.
    pub fn with_capacity(capacity: usize) -> Result<Self, ConfigError> {
        Self::from_config(&StoreConfig {
            capacity: Some(capacity),
            ..StoreConfig::default()
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut store = Self::new();
        store.capacity = config.capacity.map(|limit| Capacity {
            limit,
            available: Semaphore::new(limit),
        });
        store.timeout_on_idle = config.timeout_on_idle;
        Ok(store)
    }

    /// Expire groups by time since their last change rather than creation.
    pub fn with_timeout_on_idle(mut self, timeout_on_idle: bool) -> Self {
        self.timeout_on_idle = timeout_on_idle;
        self
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity.as_ref().map(|c| c.limit)
    }

    /// Unused capacity; `None` for an unbounded store.
    pub fn remaining_capacity(&self) -> Option<usize> {
        self.capacity.as_ref().map(|c| c.available.available_permits())
    }

    fn release_capacity(&self) {
        if let Some(capacity) = &self.capacity {
            capacity.available.add_permits(1);
        }
    }
}

impl<K: CorrelationKey, P: Payload> MessageStore<P> for SimpleMessageStore<K, P> {
    fn get_message(&self, id: MessageId) -> Option<Message<P>> {
        self.id_to_message.get(&id).map(|entry| entry.value().clone())
    }

    fn add_message(&self, message: Message<P>) -> Result<Message<P>, StoreError> {
        if let Some(capacity) = &self.capacity {
            let permit = capacity
                .available
                .try_acquire()
                .map_err(|_| StoreError::CapacityExceeded {
                    capacity: capacity.limit,
                })?;
            permit.forget();
        }

        // Re-adding an id replaces the message without using more capacity.
        if self
            .id_to_message
            .insert(message.id(), message.clone())
            .is_some()
        {
            self.release_capacity();
        }
        Ok(message)
    }

    fn remove_message(&self, id: MessageId) -> Option<Message<P>> {
        let (_, message) = self.id_to_message.remove(&id)?;
        self.release_capacity();
        Some(message)
    }

    fn list(&self, correlation_id: &str) -> Vec<Message<P>> {
        self.id_to_message
            .iter()
            .filter(|entry| entry.value().correlation_id() == Some(correlation_id))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn message_count(&self) -> usize {
        self.id_to_message.len()
    }
}

impl<K: CorrelationKey, P: Payload> MessageGroupStore<K, P> for SimpleMessageStore<K, P> {
    fn get_message_group(&self, key: &K) -> MessageGroup<K, P> {
        self.correlation_to_group
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| MessageGroup::new(key.clone()))
    }

    fn add_message_to_group(&self, key: &K, message: Message<P>) -> GroupAddOutcome {
        let mut group = self
            .correlation_to_group
            .entry(key.clone())
            .or_insert_with(|| MessageGroup::new(key.clone()));
        let accepted = group.add(message);
        GroupAddOutcome {
            accepted,
            size: group.size(),
            complete: group.is_complete(),
        }
    }

    fn mark_message_group(&self, group: &mut MessageGroup<K, P>) {
        if let Some(mut stored) = self.correlation_to_group.get_mut(group.correlation_key()) {
            stored.mark();
        }
        group.mark();
    }

    fn remove_message_group(&self, key: &K) {
        self.correlation_to_group.remove(key);
    }

    fn register_expiry_callback(&self, callback: Arc<dyn MessageGroupCallback<K, P>>) {
        let mut callbacks = self.expiry_callbacks.write();
        let registered = callbacks
            .iter()
            .any(|existing| std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&callback)));
        if !registered {
            callbacks.push(callback);
        }
    }

    fn expire_message_groups(&self, timeout: chrono::Duration) -> Result<usize, StoreError> {
        let span = telemetry::group_expiry_span(timeout.num_milliseconds());
        let _enter = span.enter();

        // Out-of-range timeouts clamp: huge positive expires nothing, huge
        // negative expires everything.
        let threshold = match Utc::now().checked_sub_signed(timeout) {
            Some(threshold) => threshold,
            None if timeout < chrono::Duration::zero() => DateTime::<Utc>::MAX_UTC,
            None => DateTime::<Utc>::MIN_UTC,
        };
        let timeout_on_idle = self.timeout_on_idle;

        // Collect first: callbacks may call back into the store.
        let expired: Vec<MessageGroup<K, P>> = self
            .correlation_to_group
            .iter()
            .filter(|entry| {
                let group = entry.value();
                let reference = if timeout_on_idle {
                    group.last_modified()
                } else {
                    group.timestamp()
                };
                reference < threshold
            })
            .map(|entry| entry.value().clone())
            .collect();
        let callbacks = self.expiry_callbacks.read().clone();

        let mut first_error: Option<anyhow::Error> = None;
        let mut removed_count = 0;
        for group in &expired {
            for callback in &callbacks {
                if let Err(e) = callback.execute(self, group) {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        warn!(
                            correlation_key = ?group.correlation_key(),
                            error = %e,
                            "message group expiry callback failed"
                        );
                    }
                }
            }
            // Only remove the group the callbacks saw; a group changed since
            // the scan stays for the next pass.
            let key = group.correlation_key();
            let removed = self
                .correlation_to_group
                .remove_if(key, |_, stored| {
                    stored.timestamp() == group.timestamp()
                        && stored.last_modified() == group.last_modified()
                        && stored.size() == group.size()
                })
                .is_some();
            if removed || !self.correlation_to_group.contains_key(key) {
                removed_count += 1;
            } else {
                debug!(
                    correlation_key = ?group.correlation_key(),
                    "message group changed during expiry, keeping it"
                );
            }
        }

        telemetry::record_groups_expired(removed_count);
        match first_error {
            Some(e) => Err(StoreError::ExpiryCallback(e)),
            None => Ok(removed_count),
        }
    }

    fn message_group_count(&self) -> usize {
        self.correlation_to_group.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parking_lot::Mutex;

    type Store = SimpleMessageStore<String, u32>;

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<String>>,
    }

    impl MessageGroupCallback<String, u32> for Collecting {
        fn execute(
            &self,
            _store: &dyn MessageGroupStore<String, u32>,
            group: &MessageGroup<String, u32>,
        ) -> anyhow::Result<()> {
            self.seen.lock().push(group.correlation_key().clone());
            Ok(())
        }
    }

    #[test]
    fn test_capacity_bound() {
        let store = Store::with_capacity(2).unwrap();
        let first = store.add_message(Message::new(1)).unwrap();
        store.add_message(Message::new(2)).unwrap();
        assert_eq!(store.remaining_capacity(), Some(0));

        let err = store.add_message(Message::new(3)).unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { capacity: 2 }));

        assert_eq!(store.remove_message(first.id()), Some(first.clone()));
        assert!(store.remove_message(first.id()).is_none());
        assert_eq!(store.remaining_capacity(), Some(1));
        assert!(store.add_message(Message::new(4)).is_ok());
    }

    #[test]
    fn test_re_adding_same_message_keeps_capacity() {
        let store = Store::with_capacity(2).unwrap();
        let message = Message::new(1);

        store.add_message(message.clone()).unwrap();
        store.add_message(message.clone()).unwrap();
        assert_eq!(store.message_count(), 1);
        assert_eq!(store.remaining_capacity(), Some(1));
        assert_eq!(store.get_message(message.id()), Some(message));
    }

    #[test]
    fn test_group_membership_is_not_capacity_bound() {
        let store = Store::with_capacity(1).unwrap();
        for i in 0..10 {
            store.add_message_to_group(&"k".to_string(), Message::new(i));
        }
        assert_eq!(store.get_message_group(&"k".to_string()).size(), 10);
        assert_eq!(store.remaining_capacity(), Some(1));
    }

    #[test]
    fn test_list_by_correlation_id() {
        let store = Store::new();
        for i in 0..3 {
            store
                .add_message(Message::builder(i).with_correlation_id("a").build())
                .unwrap();
        }
        store
            .add_message(Message::builder(9).with_correlation_id("b").build())
            .unwrap();
        store.add_message(Message::new(10)).unwrap();

        assert_eq!(store.list("a").len(), 3);
        assert_eq!(store.list("b").len(), 1);
        assert!(store.list("c").is_empty());
        assert_eq!(store.message_count(), 5);
    }

    #[test]
    fn test_group_snapshots_are_detached() {
        let store = Store::new();
        let key = "k".to_string();
        assert!(store.get_message_group(&key).is_empty());
        assert_eq!(store.message_group_count(), 0);

        store.add_message_to_group(&key, Message::new(1));
        let mut snapshot = store.get_message_group(&key);
        snapshot.add(Message::new(2));

        assert_eq!(snapshot.size(), 2);
        assert_eq!(store.get_message_group(&key).size(), 1);
    }

    #[test]
    fn test_mark_updates_store_and_snapshot() {
        let store = Store::new();
        let key = "k".to_string();
        store.add_message_to_group(&key, Message::new(1));
        store.add_message_to_group(&key, Message::new(2));

        let mut snapshot = store.get_message_group(&key);
        store.mark_message_group(&mut snapshot);

        assert_eq!(snapshot.marked().len(), 2);
        assert!(snapshot.unmarked().is_empty());
        let stored = store.get_message_group(&key);
        assert_eq!(stored.marked().len(), 2);
        assert!(stored.unmarked().is_empty());
    }

    #[test]
    fn test_remove_group_is_unconditional() {
        let store = Store::new();
        let key = "k".to_string();
        store.remove_message_group(&key);

        store.add_message_to_group(&key, Message::new(1));
        store.remove_message_group(&key);
        assert_eq!(store.message_group_count(), 0);
    }

    #[test]
    fn test_duplicate_callback_registration_is_coalesced() {
        let store = Store::new();
        let callback = Arc::new(Collecting::default());
        store.register_expiry_callback(callback.clone());
        store.register_expiry_callback(callback.clone());

        store.add_message_to_group(&"k".to_string(), Message::new(1));
        assert_eq!(store.expire_message_groups(Duration::milliseconds(-10_000)).unwrap(), 1);
        assert_eq!(*callback.seen.lock(), vec!["k".to_string()]);
    }

    #[test]
    fn test_expiry_respects_timeout() {
        let store = Store::new();
        store.add_message_to_group(&"fresh".to_string(), Message::new(1));

        assert_eq!(store.expire_message_groups(Duration::hours(1)).unwrap(), 0);
        assert_eq!(store.message_group_count(), 1);
        assert_eq!(store.expire_message_groups(Duration::milliseconds(-1)).unwrap(), 1);
        assert_eq!(store.message_group_count(), 0);
    }

    #[test]
    fn test_timeout_on_idle_uses_last_modified() {
        let store = Store::new().with_timeout_on_idle(true);
        let key = "k".to_string();
        store.add_message_to_group(&key, Message::new(1));
        std::thread::sleep(std::time::Duration::from_millis(30));
        store.add_message_to_group(&key, Message::new(2));

        // Older than 20ms by creation, but touched just now.
        assert_eq!(store.expire_message_groups(Duration::milliseconds(20)).unwrap(), 0);

        let by_creation = Store::new();
        by_creation.add_message_to_group(&key, Message::new(1));
        std::thread::sleep(std::time::Duration::from_millis(30));
        by_creation.add_message_to_group(&key, Message::new(2));
        assert_eq!(
            by_creation
                .expire_message_groups(Duration::milliseconds(20))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_out_of_range_timeout_clamps() {
        let store = Store::new();
        store.add_message_to_group(&"k".to_string(), Message::new(1));

        assert_eq!(store.expire_message_groups(Duration::milliseconds(i64::MAX)).unwrap(), 0);
        assert_eq!(store.message_group_count(), 1);
        assert_eq!(store.expire_message_groups(Duration::milliseconds(-i64::MAX)).unwrap(), 1);
        assert_eq!(store.message_group_count(), 0);
    }

    #[test]
    fn test_add_outcome_reports_duplicates_and_completion() {
        let store = Store::new();
        let key = "order".to_string();
        let part = |number| {
            Message::builder(number)
                .with_correlation_id("order")
                .with_sequence(number, 2)
                .build()
        };

        let first = store.add_message_to_group(&key, part(1));
        assert_eq!(
            first,
            GroupAddOutcome {
                accepted: true,
                size: 1,
                complete: false
            }
        );
        assert!(!store.add_message_to_group(&key, part(1)).accepted);

        let last = store.add_message_to_group(&key, part(2));
        assert!(last.accepted && last.complete);
        assert_eq!(last.size, 2);
    }

    #[test]
    fn test_message_added_by_callback_survives_expiry() {
        let store = Store::new();
        let key = "k".to_string();
        store.add_message_to_group(&key, Message::new(1));

        let callback = |store: &dyn MessageGroupStore<String, u32>,
                        group: &MessageGroup<String, u32>|
         -> anyhow::Result<()> {
            store.add_message_to_group(group.correlation_key(), Message::new(2));
            Ok(())
        };
        store.register_expiry_callback(Arc::new(callback));

        assert_eq!(store.expire_message_groups(Duration::milliseconds(-10)).unwrap(), 0);
        assert_eq!(store.get_message_group(&key).size(), 2);
    }

    #[test]
    fn test_callback_may_reenter_store() {
        let store = Store::new();
        let key = "k".to_string();
        store.add_message_to_group(&key, Message::new(1));

        let callback = |store: &dyn MessageGroupStore<String, u32>,
                        group: &MessageGroup<String, u32>|
         -> anyhow::Result<()> {
            assert_eq!(store.get_message_group(group.correlation_key()).size(), 1);
            store.remove_message_group(group.correlation_key());
            Ok(())
        };
        store.register_expiry_callback(Arc::new(callback));

        assert_eq!(store.expire_message_groups(Duration::milliseconds(-10)).unwrap(), 1);
        assert_eq!(store.message_group_count(), 0);
    }
}
