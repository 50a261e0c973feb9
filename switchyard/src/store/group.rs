use std::fmt;

use chrono::{DateTime, Utc};

use crate::message::Message;

/// Result of adding a message to a stored group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupAddOutcome {
    /// `false` if the message was dropped as a duplicate.
    pub accepted: bool,
    /// Group size after the add.
    pub size: usize,
    /// Completeness after the add, as [`MessageGroup::is_complete`].
    pub complete: bool,
}

/// Messages sharing a correlation key, split into `unmarked` (not yet
/// released) and `marked` (already released) partitions.
///
/// Groups handed out by a store are snapshots; changing one does not change
/// the store's copy.
pub struct MessageGroup<K, P> {
    correlation_key: K,
    marked: Vec<Message<P>>,
    unmarked: Vec<Message<P>>,
    timestamp: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl<K: Clone, P> Clone for MessageGroup<K, P> {
    fn clone(&self) -> Self {
        Self {
            correlation_key: self.correlation_key.clone(),
            marked: self.marked.clone(),
            unmarked: self.unmarked.clone(),
            timestamp: self.timestamp,
            last_modified: self.last_modified,
        }
    }
}

impl<K: fmt::Debug, P> fmt::Debug for MessageGroup<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageGroup")
            .field("correlation_key", &self.correlation_key)
            .field("marked", &self.marked.len())
            .field("unmarked", &self.unmarked.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl<K, P> MessageGroup<K, P> {
    /// Create an empty group stamped with the current time.
    pub fn new(correlation_key: K) -> Self {
        let now = Utc::now();
        Self {
            correlation_key,
            marked: Vec::new(),
            unmarked: Vec::new(),
            timestamp: now,
            last_modified: now,
        }
    }

    pub fn correlation_key(&self) -> &K {
        &self.correlation_key
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Time of the last accepted add or mark.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn marked(&self) -> &[Message<P>] {
        &self.marked
    }

    pub fn unmarked(&self) -> &[Message<P>] {
        &self.unmarked
    }

    pub fn size(&self) -> usize {
        self.marked.len() + self.unmarked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Any member, preferring unmarked ones.
    pub fn one(&self) -> Option<&Message<P>> {
        self.unmarked.first().or_else(|| self.marked.first())
    }

    /// Sequence size declared by the group's members; `0` if none is declared
    /// or the group is empty.
    pub fn sequence_size(&self) -> u32 {
        self.one()
            .map(|message| message.headers().sequence_size_or_zero())
            .unwrap_or(0)
    }

    /// Empty, or holding exactly as many messages as the declared sequence size.
    pub fn is_complete(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        let sequence_size = self.sequence_size();
        sequence_size > 0 && sequence_size as usize == self.size()
    }

    /// Whether `message` would be treated as already belonging to the group.
    ///
    /// Only sequenced messages (sequence number above zero) can collide: one
    /// whose sequence size disagrees with the group's, or whose slot is
    /// already taken, counts as a member.
    pub fn is_member(&self, message: &Message<P>) -> bool {
        if self.is_empty() {
            return false;
        }
        match message.sequence_number() {
            Some(number) if number > 0 => {
                message.headers().sequence_size_or_zero() != self.sequence_size()
                    || self.holds_sequence_number(number)
            }
            _ => false,
        }
    }

    /// Add a message to the unmarked partition.
    ///
    /// Returns `false`, leaving the group unchanged, for duplicates as
    /// defined by [`MessageGroup::is_member`].
    pub fn add(&mut self, message: Message<P>) -> bool {
        if self.is_member(&message) {
            return false;
        }
        self.unmarked.push(message);
        self.last_modified = Utc::now();
        true
    }

    /// Move every unmarked message into the marked partition.
    pub fn mark(&mut self) {
        if self.unmarked.is_empty() {
            return;
        }
        self.marked.append(&mut self.unmarked);
        self.last_modified = Utc::now();
    }

    fn holds_sequence_number(&self, number: u32) -> bool {
        self.marked
            .iter()
            .chain(self.unmarked.iter())
            .any(|member| member.sequence_number() == Some(number))
    }
}
