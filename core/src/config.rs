use std::time::Duration;

pub const DEFAULT_CHANNEL_PREFIX: &str = "nexus_countdownlatch_";

/// Settings shared by every latch created from one `LatchClient`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatchConfig {
  channel_prefix: String,
  cleanup_delay: Duration,
  subscription_timeout: Duration,
  recheck_interval: Duration,
}

impl Default for LatchConfig {
  fn default() -> Self {
    Self::new()
  }
}

impl LatchConfig {
  pub fn new() -> Self {
    Self {
      channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
      cleanup_delay: Duration::from_secs(15),
      subscription_timeout: Duration::from_secs(30),
      recheck_interval: Duration::from_secs(5),
    }
  }

  pub fn from_options(options: impl IntoIterator<Item = LatchConfigOption>) -> Self {
    let mut config = Self::new();
    for option in options {
      option.apply(&mut config);
    }
    config
  }

  pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.channel_prefix = prefix.into();
    self
  }

  /// How long an unused subscription is kept before it is torn down.
  pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
    self.cleanup_delay = delay;
    self
  }

  /// Deadline for confirming the channel subscription in operations without their own timeout.
  pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
    self.subscription_timeout = timeout;
    self
  }

  /// Upper bound on a single gate wait before a waiter re-reads the counter.
  pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
    self.recheck_interval = interval;
    self
  }

  pub fn channel_prefix(&self) -> &str {
    &self.channel_prefix
  }

  pub fn cleanup_delay(&self) -> Duration {
    self.cleanup_delay
  }

  pub fn subscription_timeout(&self) -> Duration {
    self.subscription_timeout
  }

  pub fn recheck_interval(&self) -> Duration {
    self.recheck_interval
  }

  pub fn channel_name(&self, latch_name: &str) -> String {
    format!("{}{}", self.channel_prefix, latch_name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatchConfigOption {
  SetChannelPrefix(String),
  SetCleanupDelay(Duration),
  SetSubscriptionTimeout(Duration),
  SetRecheckInterval(Duration),
}

impl LatchConfigOption {
  pub fn apply(&self, config: &mut LatchConfig) {
    match self {
      LatchConfigOption::SetChannelPrefix(prefix) => {
        config.channel_prefix = prefix.clone();
      }
      LatchConfigOption::SetCleanupDelay(delay) => {
        config.cleanup_delay = *delay;
      }
      LatchConfigOption::SetSubscriptionTimeout(timeout) => {
        config.subscription_timeout = *timeout;
      }
      LatchConfigOption::SetRecheckInterval(interval) => {
        config.recheck_interval = *interval;
      }
    }
  }

  pub fn with_channel_prefix(prefix: &str) -> LatchConfigOption {
    LatchConfigOption::SetChannelPrefix(prefix.to_string())
  }

  pub fn with_cleanup_delay(delay: Duration) -> LatchConfigOption {
    LatchConfigOption::SetCleanupDelay(delay)
  }

  pub fn with_subscription_timeout(timeout: Duration) -> LatchConfigOption {
    LatchConfigOption::SetSubscriptionTimeout(timeout)
  }

  pub fn with_recheck_interval(interval: Duration) -> LatchConfigOption {
    LatchConfigOption::SetRecheckInterval(interval)
  }
}
