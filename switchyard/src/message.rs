use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker for types that can travel through the bus as message payloads.
pub trait Payload: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Payload for T {}

/// Unique identifier of a [`Message`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Headers carried by every message.
///
/// Only the correlation and sequence headers have meaning to the core;
/// everything else travels in `attributes` untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    pub correlation_id: Option<String>,
    pub sequence_number: Option<u32>,
    pub sequence_size: Option<u32>,
    pub attributes: HashMap<String, String>,
}

impl MessageHeaders {
    /// Sequence size, with `0` standing in for "no sequence declared".
    pub fn sequence_size_or_zero(&self) -> u32 {
        self.sequence_size.unwrap_or(0)
    }
}

struct MessageInner<P> {
    id: MessageId,
    timestamp: DateTime<Utc>,
    headers: MessageHeaders,
    payload: P,
}

/// Immutable message envelope.
///
/// Cloning is cheap: the payload and headers are shared behind an `Arc`, so a
/// message can be held by a channel, a store and an endpoint task at once.
pub struct Message<P> {
    inner: Arc<MessageInner<P>>,
}

impl<P> Clone for Message<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Message<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.inner.id)
            .field("headers", &self.inner.headers)
            .field("payload", &self.inner.payload)
            .finish()
    }
}

impl<P> PartialEq for Message<P> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<P> Eq for Message<P> {}

impl<P> Message<P> {
    /// Create a message with default headers.
    pub fn new(payload: P) -> Self {
        MessageBuilder::new(payload).build()
    }

    pub fn builder(payload: P) -> MessageBuilder<P> {
        MessageBuilder::new(payload)
    }

    pub fn id(&self) -> MessageId {
        self.inner.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.timestamp
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.inner.headers
    }

    pub fn payload(&self) -> &P {
        &self.inner.payload
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.inner.headers.correlation_id.as_deref()
    }

    pub fn sequence_number(&self) -> Option<u32> {
        self.inner.headers.sequence_number
    }

    pub fn sequence_size(&self) -> Option<u32> {
        self.inner.headers.sequence_size
    }
}

/// Builder for [`Message`] values.
#[derive(Debug)]
pub struct MessageBuilder<P> {
    id: Option<MessageId>,
    headers: MessageHeaders,
    payload: P,
}

impl<P> MessageBuilder<P> {
    pub fn new(payload: P) -> Self {
        Self {
            id: None,
            headers: MessageHeaders::default(),
            payload,
        }
    }

    /// Use a fixed id instead of generating one.
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_headers(mut self, headers: MessageHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.headers.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_sequence(mut self, sequence_number: u32, sequence_size: u32) -> Self {
        self.headers.sequence_number = Some(sequence_number);
        self.headers.sequence_size = Some(sequence_size);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Message<P> {
        Message {
            inner: Arc::new(MessageInner {
                id: self.id.unwrap_or_default(),
                timestamp: Utc::now(),
                headers: self.headers,
                payload: self.payload,
            }),
        }
    }
}
