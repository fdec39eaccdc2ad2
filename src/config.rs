use std::collections::HashMap;
use std::time::Duration;

/// Feature toggle controlling whether the reaper touches `canceling` jobs.
pub const REAP_CANCELING: &str = "reap_canceling";

/// Configuration for one lease arbiter instance.
///
/// The candidate and wall-clock bounds cap how much work a single runner
/// poll may cost under a large backlog. They are operational tuning values,
/// not correctness invariants.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of candidates examined per registration cycle
    pub max_candidates: usize,
    /// Wall-clock budget for the match-and-claim scan
    pub time_budget_ms: u64,
    /// Registration cycles slower than this emit one structured warning
    pub slow_log_threshold_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_candidates: 100,
            time_budget_ms: 5_000,
            slow_log_threshold_ms: 5_000,
        }
    }
}

impl DispatchConfig {
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    pub fn with_time_budget_ms(mut self, time_budget_ms: u64) -> Self {
        self.time_budget_ms = time_budget_ms;
        self
    }

    pub fn with_slow_log_threshold_ms(mut self, slow_log_threshold_ms: u64) -> Self {
        self.slow_log_threshold_ms = slow_log_threshold_ms;
        self
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    pub fn slow_log_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_log_threshold_ms)
    }
}

/// Configuration for the timeout reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Skew tolerance added on top of a job's timeout before it is reaped.
    /// A late reap is preferable to cutting off a live job at the boundary.
    pub buffer_seconds: u32,
    /// Interval between sweep cycles when driven by [`TimeoutReaper::run`]
    ///
    /// [`TimeoutReaper::run`]: crate::reaper::TimeoutReaper::run
    pub interval_ms: u64,
    /// Instance-wide job timeout applied when a job carries no override
    pub default_timeout_seconds: u32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 900,
            interval_ms: 60_000,
            default_timeout_seconds: 3_600,
        }
    }
}

impl ReaperConfig {
    pub fn with_buffer_seconds(mut self, buffer_seconds: u32) -> Self {
        self.buffer_seconds = buffer_seconds;
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_default_timeout_seconds(mut self, default_timeout_seconds: u32) -> Self {
        self.default_timeout_seconds = default_timeout_seconds;
        self
    }
}

/// Named feature toggles, passed to components at construction.
///
/// Components never consult ambient configuration; everything dynamic is
/// resolved through the instance handed to them.
#[derive(Debug, Clone)]
pub struct FeatureToggles {
    flags: HashMap<String, bool>,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        let mut flags = HashMap::new();
        flags.insert(REAP_CANCELING.to_string(), true);
        Self { flags }
    }
}

impl FeatureToggles {
    pub fn with_flag(mut self, name: &str, enabled: bool) -> Self {
        self.flags.insert(name.to_string(), enabled);
        self
    }

    /// Unknown flags are disabled.
    pub fn enabled(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }
}
