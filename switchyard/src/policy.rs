use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Unit in which [`ConsumerPolicy`] expresses its initial delay and period.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    #[default]
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert an amount expressed in this unit to a [`Duration`].
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

/// How a subscription's dispatcher is driven by the scheduler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleMode {
    /// `period <= 0`: run the next cycle as soon as the previous one returns.
    Continuous,
    /// Cycles start every `period`, regardless of how long each one takes.
    FixedRate(Duration),
    /// Each cycle starts `period` after the previous one finished.
    FixedDelay(Duration),
}

/// Concurrency, polling cadence and rejection handling for one subscription.
///
/// Setters for bounded values validate their input and fail fast with
/// [`ConfigError::Invalid`]; an out-of-range policy cannot be built, including
/// through deserialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConsumerPolicySpec")]
pub struct ConsumerPolicy {
    concurrency: usize,
    max_concurrency: usize,
    max_messages_per_task: i64,
    rejection_limit: u32,
    rejection_limit_wait_millis: u64,
    initial_delay: u64,
    period: i64,
    time_unit: TimeUnit,
    fixed_rate: bool,
    receive_timeout_millis: u64,
}

impl Default for ConsumerPolicy {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_concurrency: 10,
            max_messages_per_task: 1,
            rejection_limit: 5,
            rejection_limit_wait_millis: 1_000,
            initial_delay: 0,
            period: 5,
            time_unit: TimeUnit::Milliseconds,
            fixed_rate: false,
            receive_timeout_millis: 1_000,
        }
    }
}

impl ConsumerPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn max_messages_per_task(&self) -> i64 {
        self.max_messages_per_task
    }

    pub fn rejection_limit(&self) -> u32 {
        self.rejection_limit
    }

    pub fn rejection_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rejection_limit_wait_millis)
    }

    pub fn initial_delay(&self) -> Duration {
        self.time_unit.to_duration(self.initial_delay)
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn is_fixed_rate(&self) -> bool {
        self.fixed_rate
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_millis)
    }

    /// Scheduling mode derived from `period` and `fixed_rate`.
    pub fn schedule_mode(&self) -> ScheduleMode {
        if self.period <= 0 {
            return ScheduleMode::Continuous;
        }
        let period = self.time_unit.to_duration(self.period as u64);
        if self.fixed_rate {
            ScheduleMode::FixedRate(period)
        } else {
            ScheduleMode::FixedDelay(period)
        }
    }

    /// Number of receive attempts a single cycle may make; `None` is unbounded.
    pub fn messages_per_task_limit(&self) -> Option<u64> {
        u64::try_from(self.max_messages_per_task).ok()
    }

    pub fn set_concurrency(&mut self, concurrency: usize) -> Result<(), ConfigError> {
        if concurrency < 1 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        self.concurrency = concurrency;
        Ok(())
    }

    pub fn set_max_concurrency(&mut self, max_concurrency: usize) -> Result<(), ConfigError> {
        if max_concurrency < 1 {
            return Err(ConfigError::invalid("max_concurrency", "must be at least 1"));
        }
        self.max_concurrency = max_concurrency;
        Ok(())
    }

    /// A negative value removes the per-cycle bound.
    pub fn set_max_messages_per_task(&mut self, max: i64) -> Result<(), ConfigError> {
        if max == 0 {
            return Err(ConfigError::invalid(
                "max_messages_per_task",
                "must not be zero (use a negative value for unbounded)",
            ));
        }
        self.max_messages_per_task = max;
        Ok(())
    }

    pub fn set_rejection_limit(&mut self, limit: u32) -> Result<(), ConfigError> {
        if limit < 1 {
            return Err(ConfigError::invalid("rejection_limit", "must be at least 1"));
        }
        self.rejection_limit = limit;
        Ok(())
    }

    pub fn set_rejection_limit_wait_millis(&mut self, millis: u64) {
        self.rejection_limit_wait_millis = millis;
    }

    pub fn set_initial_delay(&mut self, initial_delay: u64) {
        self.initial_delay = initial_delay;
    }

    /// Zero or a negative period selects continuous polling.
    pub fn set_period(&mut self, period: i64) {
        self.period = period;
    }

    pub fn set_time_unit(&mut self, time_unit: TimeUnit) {
        self.time_unit = time_unit;
    }

    pub fn set_fixed_rate(&mut self, fixed_rate: bool) {
        self.fixed_rate = fixed_rate;
    }

    pub fn set_receive_timeout_millis(&mut self, millis: u64) {
        self.receive_timeout_millis = millis;
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, ConfigError> {
        self.set_concurrency(concurrency)?;
        Ok(self)
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Result<Self, ConfigError> {
        self.set_max_concurrency(max_concurrency)?;
        Ok(self)
    }

    pub fn with_max_messages_per_task(mut self, max: i64) -> Result<Self, ConfigError> {
        self.set_max_messages_per_task(max)?;
        Ok(self)
    }

    pub fn with_rejection_limit(mut self, limit: u32) -> Result<Self, ConfigError> {
        self.set_rejection_limit(limit)?;
        Ok(self)
    }

    pub fn with_rejection_limit_wait_millis(mut self, millis: u64) -> Self {
        self.set_rejection_limit_wait_millis(millis);
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: u64) -> Self {
        self.set_initial_delay(initial_delay);
        self
    }

    pub fn with_period(mut self, period: i64) -> Self {
        self.set_period(period);
        self
    }

    pub fn with_time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.set_time_unit(time_unit);
        self
    }

    pub fn with_fixed_rate(mut self, fixed_rate: bool) -> Self {
        self.set_fixed_rate(fixed_rate);
        self
    }

    pub fn with_receive_timeout_millis(mut self, millis: u64) -> Self {
        self.set_receive_timeout_millis(millis);
        self
    }
}

/// Unvalidated policy as it appears in configuration files.
///
/// Converted into a [`ConsumerPolicy`] through the same checks as the setters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConsumerPolicySpec {
    concurrency: usize,
    max_concurrency: usize,
    max_messages_per_task: i64,
    rejection_limit: u32,
    rejection_limit_wait_millis: u64,
    initial_delay: u64,
    period: i64,
    time_unit: TimeUnit,
    fixed_rate: bool,
    receive_timeout_millis: u64,
}

impl Default for ConsumerPolicySpec {
    fn default() -> Self {
        let policy = ConsumerPolicy::default();
        Self {
            concurrency: policy.concurrency,
            max_concurrency: policy.max_concurrency,
            max_messages_per_task: policy.max_messages_per_task,
            rejection_limit: policy.rejection_limit,
            rejection_limit_wait_millis: policy.rejection_limit_wait_millis,
            initial_delay: policy.initial_delay,
            period: policy.period,
            time_unit: policy.time_unit,
            fixed_rate: policy.fixed_rate,
            receive_timeout_millis: policy.receive_timeout_millis,
        }
    }
}

impl TryFrom<ConsumerPolicySpec> for ConsumerPolicy {
    type Error = ConfigError;

    fn try_from(spec: ConsumerPolicySpec) -> Result<Self, Self::Error> {
        let policy = ConsumerPolicy::new()
            .with_concurrency(spec.concurrency)?
            .with_max_concurrency(spec.max_concurrency)?
            .with_max_messages_per_task(spec.max_messages_per_task)?
            .with_rejection_limit(spec.rejection_limit)?
            .with_rejection_limit_wait_millis(spec.rejection_limit_wait_millis)
            .with_initial_delay(spec.initial_delay)
            .with_period(spec.period)
            .with_time_unit(spec.time_unit)
            .with_fixed_rate(spec.fixed_rate)
            .with_receive_timeout_millis(spec.receive_timeout_millis);
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_reject_out_of_range_values() {
        let mut policy = ConsumerPolicy::default();

        assert!(policy.set_concurrency(0).is_err());
        assert!(policy.set_max_concurrency(0).is_err());
        assert!(policy.set_max_messages_per_task(0).is_err());
        assert!(policy.set_rejection_limit(0).is_err());

        // Rejected values leave the previous value in place.
        assert_eq!(policy, ConsumerPolicy::default());
    }

    #[test]
    fn test_negative_max_messages_is_unbounded() {
        let policy = ConsumerPolicy::default()
            .with_max_messages_per_task(-1)
            .unwrap();
        assert_eq!(policy.messages_per_task_limit(), None);

        let policy = policy.with_max_messages_per_task(3).unwrap();
        assert_eq!(policy.messages_per_task_limit(), Some(3));
    }

    #[test]
    fn test_schedule_mode_from_period() {
        let continuous = ConsumerPolicy::default().with_period(0);
        assert_eq!(continuous.schedule_mode(), ScheduleMode::Continuous);

        let negative = ConsumerPolicy::default().with_period(-5);
        assert_eq!(negative.schedule_mode(), ScheduleMode::Continuous);

        let fixed_delay = ConsumerPolicy::default()
            .with_period(2)
            .with_time_unit(TimeUnit::Seconds);
        assert_eq!(
            fixed_delay.schedule_mode(),
            ScheduleMode::FixedDelay(Duration::from_secs(2))
        );

        let fixed_rate = fixed_delay.with_fixed_rate(true);
        assert_eq!(
            fixed_rate.schedule_mode(),
            ScheduleMode::FixedRate(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let policy: ConsumerPolicy = serde_json::from_str(
            r#"{"concurrency": 2, "max_concurrency": 4, "period": 0, "receive_timeout_millis": 50}"#,
        )
        .unwrap();
        assert_eq!(policy.concurrency(), 2);
        assert_eq!(policy.max_concurrency(), 4);
        assert_eq!(policy.receive_timeout(), Duration::from_millis(50));
        assert_eq!(policy.rejection_limit(), 5);

        let invalid = serde_json::from_str::<ConsumerPolicy>(r#"{"concurrency": 0}"#);
        assert!(invalid.is_err());
    }

    #[test]
    fn test_time_unit_conversion() {
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
        assert_eq!(TimeUnit::Microseconds.to_duration(5), Duration::from_micros(5));
        let policy = ConsumerPolicy::default()
            .with_initial_delay(3)
            .with_time_unit(TimeUnit::Seconds);
        assert_eq!(policy.initial_delay(), Duration::from_secs(3));
    }
}
