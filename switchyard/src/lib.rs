//! Switchyard - concurrent dispatch and message correlation for a messaging bus.
//!
//! Moves messages from named channels to named endpoints under per-subscription
//! concurrency limits, paces consumption against executor backpressure, and
//! keeps correlated message groups for aggregation and resequencing.
//!
//! # Core Concepts
//!
//! - **Channel**: a named conduit implementing [`Channel`]. The bus polls
//!   channels; [`PointToPointChannel`] is the bounded default.
//!
//! - **Endpoint**: message-processing logic implementing [`Endpoint`], invoked
//!   by name through a bounded [`EndpointExecutor`].
//!
//! - **Subscription**: binds an endpoint to a channel under a
//!   [`ConsumerPolicy`]. Each one gets a [`DispatcherTask`] that the bus
//!   schedules while running.
//!
//! - **Message groups**: [`SimpleMessageStore`] holds correlated
//!   [`MessageGroup`]s with duplicate detection, completeness checks and
//!   time-based expiry, plus a capacity-bounded message store.
//!
//! - **Locks**: [`DefaultLockRegistry`] partitions a fixed lock table by key
//!   hash to serialize work on one correlation key.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchyard::*;
//!
//! let bus = MessageBus::<String>::new(BusConfig {
//!     auto_create_channels: true,
//!     ..BusConfig::default()
//! });
//! bus.register_endpoint("audit", Arc::new(AuditEndpoint::default()))?;
//! bus.activate_subscription(Subscription::new("orders", "audit", ConsumerPolicy::default()))?;
//! bus.start()?;
//! ```

/// Channel abstraction and the point-to-point channel.
pub mod channel;

/// Configuration structures for the bus and the message store.
pub mod config;

/// Endpoint trait and the endpoint invocation task with its error slot.
pub mod endpoint;

/// Error types for configuration, bus, dispatch, lock and store failures.
pub mod error;

/// Bounded-concurrency executor for endpoint invocations.
pub mod executor;

/// Lock registry for per-key mutual exclusion:
/// - [`LockRegistry`] - key to lock mapping with locked execution helpers
/// - [`DefaultLockRegistry`] - masked-hash table of reentrant locks
/// - [`PassThruLockRegistry`] - no-op locks for disabled locking
pub mod lock;

/// Message envelope, headers and builder.
pub mod message;

#[cfg(feature = "metrics")]
/// Prometheus metrics collectors.
pub mod metrics;

/// Consumer policy and schedule modes.
pub mod policy;

/// Message bus runtime:
/// - [`MessageBus`] - registry and lifecycle
/// - [`MessageBusBuilder`] - bus assembly
/// - [`DispatcherTask`] - one subscription's polling cycle
/// - [`DispatchScheduler`] and [`ShutdownToken`] - cycle scheduling and cancellation
pub mod runtime;

/// Message groups and the in-memory message store.
pub mod store;

/// Tracing spans and telemetry helpers.
pub mod telemetry;

pub use channel::*;
pub use config::*;
pub use endpoint::*;
pub use error::*;
pub use executor::*;
pub use lock::*;
pub use message::*;
pub use policy::*;
pub use runtime::*;
pub use store::*;
