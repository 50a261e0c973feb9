//! Test doubles for switchyard channels, endpoints and store callbacks.

mod channel;
mod fixtures;
mod mock;

pub use channel::InMemoryChannel;
pub use fixtures::{correlated_message, quick_policy, sequenced_messages, text_message};
pub use mock::{MockEndpoint, RecordingCallback};
