/// Builder for assembling a message bus.
pub mod builder;
/// Message bus registry and lifecycle.
pub mod bus;
/// Per-subscription polling cycles.
pub mod dispatcher;
/// Scheduling of dispatcher cycles and shutdown signalling.
pub mod scheduler;

pub use builder::MessageBusBuilder;
pub use bus::{BusState, MessageBus, Subscription};
pub use dispatcher::DispatcherTask;
pub use scheduler::{DispatchScheduler, ShutdownToken};
