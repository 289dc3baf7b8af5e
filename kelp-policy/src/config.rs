//! Policy engine configuration.

use std::time::Duration;

use kelp_core::{env_bool, env_parse, env_secs, ConfigError};

/// Configuration for the retention policy engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEngineConfig {
    /// Records acted on per store call (default: 1000)
    pub batch_size: usize,
    /// Pause between batches (default: 100ms)
    pub batch_pause: Duration,
    /// A run matching more records than this is refused (default: 1000)
    pub safety_cap: u64,
    /// Optional cap as a fraction of the collection; the stricter cap wins
    pub safety_fraction: Option<f64>,
    /// Upper bound on any single store call (default: 30s)
    pub store_timeout: Duration,
    /// How often the scheduler looks for due policies (default: 1 hour)
    pub scheduler_tick: Duration,
    /// Wait before retrying after a store failure (default: 5 minutes)
    pub error_backoff: Duration,
    /// Execution records kept in memory (default: 500)
    pub history_limit: usize,
    /// Scheduler passes only report matches
    pub dry_run: bool,
    /// zstd level for the compress action (default: 3)
    pub compression_level: i32,
    /// Register the default policy set at construction (default: true)
    pub load_defaults: bool,
}

impl Default for PolicyEngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_pause: Duration::from_millis(100),
            safety_cap: 1000,
            safety_fraction: None,
            store_timeout: Duration::from_secs(30),
            scheduler_tick: Duration::from_secs(3600),
            error_backoff: Duration::from_secs(300),
            history_limit: 500,
            dry_run: false,
            compression_level: 3,
            load_defaults: true,
        }
    }
}

impl PolicyEngineConfig {
    /// Create PolicyEngineConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KELP_POLICY_BATCH_SIZE`: records per batch (default: 1000)
    /// - `KELP_POLICY_BATCH_PAUSE_MS`: pause between batches (default: 100)
    /// - `KELP_POLICY_SAFETY_CAP`: maximum records per run (default: 1000)
    /// - `KELP_POLICY_SAFETY_FRACTION`: maximum fraction of a collection per run (default: unset)
    /// - `KELP_POLICY_STORE_TIMEOUT_SECS`: store call timeout (default: 30)
    /// - `KELP_POLICY_TICK_SECS`: scheduler interval (default: 3600)
    /// - `KELP_POLICY_ERROR_BACKOFF_SECS`: retry delay after a store failure (default: 300)
    /// - `KELP_POLICY_HISTORY_LIMIT`: execution records kept (default: 500)
    /// - `KELP_POLICY_DRY_RUN`: scheduler only reports (default: false)
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            batch_size: env_parse("KELP_POLICY_BATCH_SIZE", d.batch_size),
            batch_pause: Duration::from_millis(env_parse(
                "KELP_POLICY_BATCH_PAUSE_MS",
                d.batch_pause.as_millis() as u64,
            )),
            safety_cap: env_parse("KELP_POLICY_SAFETY_CAP", d.safety_cap),
            safety_fraction: std::env::var("KELP_POLICY_SAFETY_FRACTION")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
            store_timeout: env_secs("KELP_POLICY_STORE_TIMEOUT_SECS", d.store_timeout),
            scheduler_tick: env_secs("KELP_POLICY_TICK_SECS", d.scheduler_tick),
            error_backoff: env_secs("KELP_POLICY_ERROR_BACKOFF_SECS", d.error_backoff),
            history_limit: env_parse("KELP_POLICY_HISTORY_LIMIT", d.history_limit),
            dry_run: env_bool("KELP_POLICY_DRY_RUN", d.dry_run),
            compression_level: d.compression_level,
            load_defaults: d.load_defaults,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn with_safety_cap(mut self, cap: u64) -> Self {
        self.safety_cap = cap;
        self
    }

    pub fn with_safety_fraction(mut self, fraction: f64) -> Self {
        self.safety_fraction = Some(fraction);
        self
    }

    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn without_defaults(mut self) -> Self {
        self.load_defaults = false;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, value: String, reason: &str| ConfigError::InvalidValue {
            field: format!("policy.{field}"),
            value,
            reason: reason.to_string(),
        };
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "0".into(), "must be at least 1"));
        }
        if let Some(f) = self.safety_fraction {
            if !(f > 0.0 && f <= 1.0) {
                return Err(invalid("safety_fraction", f.to_string(), "must be in (0, 1]"));
            }
        }
        if self.store_timeout.is_zero() {
            return Err(invalid("store_timeout", "0".into(), "must be positive"));
        }
        if self.scheduler_tick.is_zero() {
            return Err(invalid("scheduler_tick", "0".into(), "must be positive"));
        }
        if self.history_limit == 0 {
            return Err(invalid("history_limit", "0".into(), "must be at least 1"));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(invalid(
                "compression_level",
                self.compression_level.to_string(),
                "zstd levels run from 1 to 22",
            ));
        }
        Ok(())
    }
}
