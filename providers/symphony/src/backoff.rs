use std::time::Duration;

const DEFAULT_INITIAL_DELAY_MS: u64 = 10;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Roughly ten minutes of reconnect attempts with the default delays.
pub const DEFAULT_FAIL_CONNECT_AFTER: u32 = 23;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffSettings {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_attempts: DEFAULT_FAIL_CONNECT_AFTER,
        }
    }
}

impl BackoffSettings {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay applied after the `attempt`th consecutive failure (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let initial = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let calculated = initial.saturating_mul(1u64 << shift);
        Duration::from_millis(calculated.min(max))
    }
}

/// Outcome of recording a failed connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffStep {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Reconnect bookkeeping owned by a single feed client.
#[derive(Clone, Debug)]
pub struct Backoff {
    settings: BackoffSettings,
    attempts: u32,
}

impl Backoff {
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn settings(&self) -> &BackoffSettings {
        &self.settings
    }

    pub fn on_failure(&mut self) -> BackoffStep {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.settings.max_attempts {
            return BackoffStep::Exhausted {
                attempts: self.attempts,
            };
        }
        BackoffStep::Retry {
            attempt: self.attempts,
            delay: self.settings.delay_for_attempt(self.attempts),
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
