use std::time::Duration;

/// Backoff and timeout parameters for waiting on a job.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    /// Total wait budget before the caller gets `PollTimeout`.
    pub timeout: Duration,
    /// Delay after the first status check.
    pub min_interval: Duration,
    /// Upper bound on the delay between checks.
    pub max_interval: Duration,
    /// Factor by which the delay grows after each check.
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction (`0.1` = ±10%).
    pub jitter: f64,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            min_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
            jitter: 0.1,
        }
    }
}

impl PollOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_intervals(mut self, min_interval: Duration, max_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self.max_interval = max_interval;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Reject option sets that would busy-loop or never back off.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_interval.is_zero() {
            return Err("min_interval must be greater than zero".to_string());
        }
        if self.max_interval < self.min_interval {
            return Err("max_interval must not be smaller than min_interval".to_string());
        }
        if !(self.multiplier >= 1.0) {
            return Err("multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be within 0.0..=1.0".to_string());
        }
        Ok(())
    }
}

/// Tracker configuration loaded from environment variables.
///
/// All fields have defaults suitable for interactive pipelines.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Default wait and backoff parameters.
    pub poll: PollOptions,
    /// Failed status checks in a row before a job is marked `Failed`.
    pub max_consecutive_failures: u32,
    /// Maximum status checks in flight across all callers.
    pub batch_concurrency: usize,
    /// Tick period of the background sweep.
    pub sweep_interval: Duration,
    /// How long terminal records are kept, and how long a removed id stays
    /// blocked from reuse afterwards.  `None` keeps records until removed
    /// and remembers removed ids for the tracker's lifetime, so memory
    /// grows with every id ever tracked.
    pub retention: Option<Duration>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            max_consecutive_failures: 3,
            batch_concurrency: 8,
            sweep_interval: Duration::from_secs(2),
            retention: None,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `GENQ_POLL_MIN_INTERVAL_MS`     | `2000`  |
    /// | `GENQ_POLL_MAX_INTERVAL_MS`     | `30000` |
    /// | `GENQ_POLL_MULTIPLIER`          | `1.5`   |
    /// | `GENQ_POLL_JITTER`              | `0.1`   |
    /// | `GENQ_POLL_TIMEOUT_SECS`        | `600`   |
    /// | `GENQ_MAX_CONSECUTIVE_FAILURES` | `3`     |
    /// | `GENQ_BATCH_CONCURRENCY`        | `8`     |
    /// | `GENQ_SWEEP_INTERVAL_MS`        | `2000`  |
    /// | `GENQ_RETENTION_SECS`           | unset   |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll = PollOptions {
            timeout: env_secs("GENQ_POLL_TIMEOUT_SECS").unwrap_or(defaults.poll.timeout),
            min_interval: env_millis("GENQ_POLL_MIN_INTERVAL_MS")
                .unwrap_or(defaults.poll.min_interval),
            max_interval: env_millis("GENQ_POLL_MAX_INTERVAL_MS")
                .unwrap_or(defaults.poll.max_interval),
            multiplier: env_parse("GENQ_POLL_MULTIPLIER").unwrap_or(defaults.poll.multiplier),
            jitter: env_parse("GENQ_POLL_JITTER").unwrap_or(defaults.poll.jitter),
        };

        let poll = match poll.validate() {
            Ok(()) => poll,
            Err(reason) => {
                tracing::warn!(%reason, "Invalid polling configuration, using defaults");
                defaults.poll.clone()
            }
        };

        Self {
            poll,
            max_consecutive_failures: env_parse("GENQ_MAX_CONSECUTIVE_FAILURES")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_consecutive_failures),
            batch_concurrency: env_parse("GENQ_BATCH_CONCURRENCY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.batch_concurrency),
            sweep_interval: env_millis("GENQ_SWEEP_INTERVAL_MS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.sweep_interval),
            retention: env_secs("GENQ_RETENTION_SECS"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
