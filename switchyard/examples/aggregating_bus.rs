//! Aggregating bus example.
//!
//! This example demonstrates:
//! - A message bus with auto-created channels
//! - An aggregator endpoint that groups sequenced messages in a
//!   `SimpleMessageStore` under a per-key lock
//! - A printer endpoint receiving released aggregates
//! - Expiry of groups that never completed

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchyard::*;

/// Collects sequenced messages per correlation id and forwards each complete
/// group to its output channel as one joined message.
struct Aggregator {
    store: Arc<SimpleMessageStore<String, String>>,
    locks: DefaultLockRegistry,
    output: Arc<dyn Channel<String>>,
}

#[async_trait]
impl Endpoint<String> for Aggregator {
    async fn invoke(&self, message: Message<String>) -> anyhow::Result<()> {
        let key = message
            .correlation_id()
            .ok_or_else(|| anyhow::anyhow!("message {} has no correlation id", message.id()))?
            .to_string();
        println!("[AGGREGATOR] Received {} for '{}'", message.payload(), key);

        let released = self.locks.execute_locked(&key, || {
            if !self.store.add_message_to_group(&key, message).complete {
                return None;
            }
            let mut group = self.store.get_message_group(&key);
            if group.unmarked().is_empty() {
                return None;
            }
            self.store.mark_message_group(&mut group);
            self.store.remove_message_group(&key);
            let mut parts: Vec<&Message<String>> = group.marked().iter().collect();
            parts.sort_by_key(|part| part.sequence_number());
            let joined = parts
                .iter()
                .map(|part| part.payload().as_str())
                .collect::<Vec<_>>()
                .join(" ");
            Some(joined)
        });

        if let Some(joined) = released {
            let aggregate = Message::builder(joined)
                .with_correlation_id(key.clone())
                .build();
            if !self.output.send(aggregate, Duration::from_millis(100)).await {
                anyhow::bail!("output channel refused aggregate for '{key}'");
            }
        }
        Ok(())
    }

    fn input_channel_name(&self) -> Option<&str> {
        Some("fragments")
    }

    fn consumer_policy(&self) -> Option<ConsumerPolicy> {
        ConsumerPolicy::new()
            .with_concurrency(2)
            .and_then(|policy| policy.with_max_concurrency(4))
            .and_then(|policy| policy.with_max_messages_per_task(-1))
            .map(|policy| policy.with_receive_timeout_millis(100))
            .ok()
    }
}

/// Prints every aggregate it receives.
struct Printer;

#[async_trait]
impl Endpoint<String> for Printer {
    async fn invoke(&self, message: Message<String>) -> anyhow::Result<()> {
        println!(
            "[PRINTER] '{}': {}",
            message.correlation_id().unwrap_or("-"),
            message.payload()
        );
        Ok(())
    }
}

fn report_expired(
    _store: &dyn MessageGroupStore<String, String>,
    group: &MessageGroup<String, String>,
) -> anyhow::Result<()> {
    println!(
        "[EXPIRY] Dropping incomplete group '{}' with {} of {} parts",
        group.correlation_key(),
        group.size(),
        group.sequence_size()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Switchyard Aggregating Bus Example ===\n");

    let bus = MessageBusBuilder::<String>::new()
        .auto_create_channels(true)
        .default_channel_capacity(64)
        .build()?;

    // Subscribing the printer creates the aggregator's output channel.
    bus.register_endpoint("printer", Arc::new(Printer))?;
    bus.activate_subscription(Subscription::new("aggregates", "printer", ConsumerPolicy::new()))?;

    let store = Arc::new(SimpleMessageStore::<String, String>::new());
    store.register_expiry_callback(Arc::new(report_expired));

    let output = bus
        .get_channel("aggregates")
        .ok_or_else(|| anyhow::anyhow!("aggregates channel was not created"))?;
    bus.register_endpoint(
        "aggregator",
        Arc::new(Aggregator {
            store: Arc::clone(&store),
            locks: DefaultLockRegistry::default(),
            output,
        }),
    )?;

    bus.start()?;
    println!("Bus started with {} subscriptions\n", bus.subscription_count());

    let fragments = bus
        .get_channel("fragments")
        .ok_or_else(|| anyhow::anyhow!("fragments channel was not created"))?;
    let sentences = [
        ("greeting", vec!["hello", "from", "switchyard"]),
        ("farewell", vec!["see", "you", "soon"]),
    ];
    for (key, words) in &sentences {
        let size = words.len() as u32;
        for (index, word) in words.iter().enumerate().rev() {
            let message = Message::builder(word.to_string())
                .with_correlation_id(*key)
                .with_sequence(index as u32 + 1, size)
                .build();
            fragments.send(message, Duration::from_millis(100)).await;
        }
    }

    // Two of three parts only: this group never completes.
    for number in 1..=2 {
        let message = Message::builder(format!("part-{number}"))
            .with_correlation_id("partial")
            .with_sequence(number, 3)
            .build();
        fragments.send(message, Duration::from_millis(100)).await;
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let expired = store.expire_message_groups(chrono::Duration::zero())?;
    println!("\nExpired {expired} incomplete group(s)");

    bus.shutdown().await;
    println!("Bus shut down");
    Ok(())
}
