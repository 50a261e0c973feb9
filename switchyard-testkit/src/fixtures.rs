use switchyard::*;

/// Plain text message with no correlation headers.
pub fn text_message(text: &str) -> Message<String> {
    Message::new(text.to_string())
}

/// Message carrying a correlation id and no sequence.
pub fn correlated_message(correlation_id: &str, text: &str) -> Message<String> {
    Message::builder(text.to_string())
        .with_correlation_id(correlation_id)
        .build()
}

/// `size` messages numbered `1..=size`, all declaring sequence size `size`.
pub fn sequenced_messages(correlation_id: &str, size: u32) -> Vec<Message<String>> {
    (1..=size)
        .map(|number| {
            Message::builder(format!("{correlation_id}-{number}"))
                .with_correlation_id(correlation_id)
                .with_sequence(number, size)
                .build()
        })
        .collect()
}

/// Policy for tests: one message per cycle, short receive timeout and a
/// short rejection backoff.
pub fn quick_policy(concurrency: usize, max_concurrency: usize) -> ConsumerPolicy {
    let build = || -> Result<ConsumerPolicy, ConfigError> {
        ConsumerPolicy::new()
            .with_concurrency(concurrency)?
            .with_max_concurrency(max_concurrency)?
            .with_max_messages_per_task(1)
            .map(|policy| {
                policy
                    .with_receive_timeout_millis(50)
                    .with_rejection_limit_wait_millis(25)
            })
    };
    match build() {
        Ok(policy) => policy,
        Err(e) => panic!("invalid test policy: {e}"),
    }
}
