//! Process configuration: defaults, then a TOML file, then `KELP_*`
//! environment variables, then validation.
//!
//! ```toml
//! [telemetry]
//! log_format = "json"
//!
//! [storage]
//! lmdb_path = "/var/lib/kelp"
//!
//! [cache]
//! memory_capacity_per_type = 2000
//!
//! [cache.ttl_secs]
//! inference = 3600
//!
//! [policy]
//! safety_cap = 5000
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use kelp_core::{env_bool, env_secs, ConfigError, RetentionTiers, TtlConfig};
use kelp_integration::IntegrationConfig;
use kelp_monitor::MonitorConfig;
use kelp_pipeline::PipelineConfig;
use kelp_policy::PolicyEngineConfig;
use kelp_storage::CacheConfig;
use serde::{Deserialize, Serialize};

const DAY_SECS: u64 = 86_400;

// ============================================================================
// TELEMETRY & STORAGE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                field: "telemetry.log_format".to_string(),
                value: other.to_string(),
                reason: "expected \"text\" or \"json\"".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    /// `RUST_LOG`-style directives used when `RUST_LOG` is unset (default: "info")
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// LMDB directory; the in-memory store is used when unset
    pub lmdb_path: Option<PathBuf>,
    /// LMDB map size (default: 1024 MB)
    pub lmdb_max_size_mb: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lmdb_path: None,
            lmdb_max_size_mb: 1024,
        }
    }
}

// ============================================================================
// KELP CONFIG
// ============================================================================

/// Configuration of every component in one process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KelpConfig {
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub policy: PolicyEngineConfig,
    pub monitor: MonitorConfig,
    pub integration: IntegrationConfig,
}

impl KelpConfig {
    /// Load from `--config <path>` or `KELP_CONFIG` when given, apply
    /// environment overrides and validate. Without a path the defaults are
    /// used as the base.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Parse TOML over the defaults. Not validated.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        let mut config = Self::default();
        file.apply(&mut config);
        Ok(config)
    }

    /// Override fields from any `KELP_*` variable that is set and parses.
    pub fn apply_env(&mut self) {
        set_from_env("KELP_LOG_FORMAT", &mut self.telemetry.log_format);
        if let Some(path) = env_value::<PathBuf>("KELP_LMDB_PATH") {
            self.storage.lmdb_path = Some(path);
        }
        set_from_env("KELP_LMDB_MAX_SIZE_MB", &mut self.storage.lmdb_max_size_mb);

        let cache = &mut self.cache;
        set_from_env("KELP_CACHE_MEMORY_CAPACITY", &mut cache.memory_capacity_per_type);
        if let Some(ms) = env_value::<u64>("KELP_CACHE_STORE_TIMEOUT_MS") {
            cache.store_timeout = Duration::from_millis(ms);
        }
        set_from_env("KELP_CACHE_FAILURE_THRESHOLD", &mut cache.failure_threshold);
        set_secs_from_env("KELP_CACHE_RETRY_AFTER_SECS", &mut cache.retry_after);
        cache.read_only = env_bool("KELP_CACHE_READ_ONLY", cache.read_only);
        set_secs_from_env("KELP_TTL_FEATURE_SECS", &mut cache.ttl.feature);
        set_secs_from_env("KELP_TTL_TRAINING_SECS", &mut cache.ttl.training);
        set_secs_from_env("KELP_TTL_INFERENCE_SECS", &mut cache.ttl.inference);
        set_secs_from_env("KELP_TTL_AGGREGATED_SECS", &mut cache.ttl.aggregated_series);

        let pipeline = &mut self.pipeline;
        set_from_env("KELP_PIPELINE_QUEUE_CAPACITY", &mut pipeline.queue_capacity);
        set_secs_from_env("KELP_PIPELINE_IDLE_WAIT_SECS", &mut pipeline.idle_wait);
        pipeline.background = env_bool("KELP_PIPELINE_BACKGROUND", pipeline.background);

        let policy = &mut self.policy;
        set_from_env("KELP_POLICY_BATCH_SIZE", &mut policy.batch_size);
        if let Some(ms) = env_value::<u64>("KELP_POLICY_BATCH_PAUSE_MS") {
            policy.batch_pause = Duration::from_millis(ms);
        }
        set_from_env("KELP_POLICY_SAFETY_CAP", &mut policy.safety_cap);
        if let Some(f) = env_value::<f64>("KELP_POLICY_SAFETY_FRACTION") {
            policy.safety_fraction = Some(f);
        }
        set_secs_from_env("KELP_POLICY_TICK_SECS", &mut policy.scheduler_tick);
        set_secs_from_env("KELP_POLICY_ERROR_BACKOFF_SECS", &mut policy.error_backoff);
        policy.dry_run = env_bool("KELP_POLICY_DRY_RUN", policy.dry_run);

        let monitor = &mut self.monitor;
        set_secs_from_env("KELP_MONITOR_SAMPLE_SECS", &mut monitor.sample_interval);
        set_secs_from_env("KELP_MONITOR_COOLDOWN_SECS", &mut monitor.alert_cooldown);
        if let Some(days) = env_value::<u64>("KELP_MONITOR_RETENTION_DAYS") {
            monitor.metric_retention = Duration::from_secs(days * DAY_SECS);
        }
        set_from_env("KELP_MONITOR_SUSTAINED_BREACHES", &mut monitor.sustained_breaches);

        set_secs_from_env(
            "KELP_INTEGRATION_PREDICTION_TTL_SECS",
            &mut self.integration.prediction_ttl,
        );
        self.integration.edge_mode = env_bool("KELP_INTEGRATION_EDGE_MODE", self.integration.edge_mode);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telemetry.filter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "telemetry.filter".to_string(),
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.storage.lmdb_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.lmdb_max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self
            .storage
            .lmdb_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "storage.lmdb_path".to_string(),
                value: String::new(),
                reason: "must not be empty when set".to_string(),
            });
        }
        self.cache.validate()?;
        self.pipeline.validate()?;
        self.policy.validate()?;
        self.monitor.validate()?;
        self.integration.validate()
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn set_from_env<T: FromStr>(key: &str, slot: &mut T) {
    if let Some(v) = env_value(key) {
        *slot = v;
    }
}

fn set_secs_from_env(key: &str, slot: &mut Duration) {
    *slot = env_secs(key, *slot);
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("KELP_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

// ============================================================================
// FILE SHAPE
// ============================================================================

// Durations are plain integers in the file; every field is optional.

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    telemetry: TelemetrySection,
    storage: StorageSection,
    cache: CacheSection,
    retention_tiers: Option<RetentionTiers>,
    pipeline: PipelineSection,
    policy: PolicySection,
    monitor: MonitorSection,
    integration: IntegrationSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TelemetrySection {
    log_format: Option<LogFormat>,
    filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StorageSection {
    lmdb_path: Option<PathBuf>,
    lmdb_max_size_mb: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheSection {
    memory_capacity_per_type: Option<usize>,
    store_timeout_ms: Option<u64>,
    failure_threshold: Option<u32>,
    retry_after_secs: Option<u64>,
    read_only: Option<bool>,
    ttl_secs: TtlSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TtlSection {
    feature: Option<u64>,
    training: Option<u64>,
    inference: Option<u64>,
    aggregated_series: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PipelineSection {
    queue_capacity: Option<usize>,
    idle_wait_secs: Option<u64>,
    background: Option<bool>,
    state_table_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PolicySection {
    batch_size: Option<usize>,
    batch_pause_ms: Option<u64>,
    safety_cap: Option<u64>,
    safety_fraction: Option<f64>,
    store_timeout_secs: Option<u64>,
    scheduler_tick_secs: Option<u64>,
    error_backoff_secs: Option<u64>,
    history_limit: Option<usize>,
    dry_run: Option<bool>,
    compression_level: Option<i32>,
    load_defaults: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MonitorSection {
    sample_interval_secs: Option<u64>,
    alert_cooldown_secs: Option<u64>,
    metric_retention_days: Option<u64>,
    sustained_breaches: Option<u32>,
    alert_history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct IntegrationSection {
    prediction_ttl_secs: Option<u64>,
    edge_mode: Option<bool>,
    poor_hit_ratio: Option<f64>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn set_secs(slot: &mut Duration, secs: Option<u64>) {
    set(slot, secs.map(Duration::from_secs));
}

impl FileConfig {
    fn apply(self, config: &mut KelpConfig) {
        let FileConfig {
            telemetry,
            storage,
            cache,
            retention_tiers,
            pipeline,
            policy,
            monitor,
            integration,
        } = self;

        set(&mut config.telemetry.log_format, telemetry.log_format);
        set(&mut config.telemetry.filter, telemetry.filter);

        if storage.lmdb_path.is_some() {
            config.storage.lmdb_path = storage.lmdb_path;
        }
        set(&mut config.storage.lmdb_max_size_mb, storage.lmdb_max_size_mb);

        let c = &mut config.cache;
        set(&mut c.memory_capacity_per_type, cache.memory_capacity_per_type);
        set(&mut c.store_timeout, cache.store_timeout_ms.map(Duration::from_millis));
        set(&mut c.failure_threshold, cache.failure_threshold);
        set_secs(&mut c.retry_after, cache.retry_after_secs);
        set(&mut c.read_only, cache.read_only);
        let ttl: &mut TtlConfig = &mut c.ttl;
        set_secs(&mut ttl.feature, cache.ttl_secs.feature);
        set_secs(&mut ttl.training, cache.ttl_secs.training);
        set_secs(&mut ttl.inference, cache.ttl_secs.inference);
        set_secs(&mut ttl.aggregated_series, cache.ttl_secs.aggregated_series);
        set(&mut c.retention_tiers, retention_tiers);

        let p = &mut config.pipeline;
        set(&mut p.queue_capacity, pipeline.queue_capacity);
        set_secs(&mut p.idle_wait, pipeline.idle_wait_secs);
        set(&mut p.background, pipeline.background);
        set(&mut p.state_table_limit, pipeline.state_table_limit);

        let e = &mut config.policy;
        set(&mut e.batch_size, policy.batch_size);
        set(&mut e.batch_pause, policy.batch_pause_ms.map(Duration::from_millis));
        set(&mut e.safety_cap, policy.safety_cap);
        if policy.safety_fraction.is_some() {
            e.safety_fraction = policy.safety_fraction;
        }
        set_secs(&mut e.store_timeout, policy.store_timeout_secs);
        set_secs(&mut e.scheduler_tick, policy.scheduler_tick_secs);
        set_secs(&mut e.error_backoff, policy.error_backoff_secs);
        set(&mut e.history_limit, policy.history_limit);
        set(&mut e.dry_run, policy.dry_run);
        set(&mut e.compression_level, policy.compression_level);
        set(&mut e.load_defaults, policy.load_defaults);

        let m = &mut config.monitor;
        set_secs(&mut m.sample_interval, monitor.sample_interval_secs);
        set_secs(&mut m.alert_cooldown, monitor.alert_cooldown_secs);
        set_secs(
            &mut m.metric_retention,
            monitor.metric_retention_days.map(|d| d * DAY_SECS),
        );
        set(&mut m.sustained_breaches, monitor.sustained_breaches);
        set(&mut m.alert_history, monitor.alert_history);

        let i = &mut config.integration;
        set_secs(&mut i.prediction_ttl, integration.prediction_ttl_secs);
        set(&mut i.edge_mode, integration.edge_mode);
        set(&mut i.poor_hit_ratio, integration.poor_hit_ratio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = KelpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.lmdb_path, None);
        assert_eq!(config.telemetry.filter, "info");
    }

    #[test]
    fn test_file_values_override_defaults() {
        let config = KelpConfig::from_toml_str(
            r#"
            [telemetry]
            log_format = "json"

            [storage]
            lmdb_path = "/var/lib/kelp"

            [cache]
            memory_capacity_per_type = 50

            [cache.ttl_secs]
            inference = 60

            [retention_tiers]
            critical_days = 1000
            high_days = 400
            normal_days = 200
            low_days = 30

            [policy]
            safety_cap = 25
            load_defaults = false

            [monitor]
            metric_retention_days = 7

            [integration]
            edge_mode = true
            "#,
        )
        .unwrap();

        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert_eq!(config.storage.lmdb_path, Some(PathBuf::from("/var/lib/kelp")));
        assert_eq!(config.cache.memory_capacity_per_type, 50);
        assert_eq!(config.cache.ttl.inference, Duration::from_secs(60));
        assert_eq!(config.cache.ttl.feature, TtlConfig::default().feature);
        assert_eq!(config.cache.retention_tiers.critical_days, 1000);
        assert_eq!(config.policy.safety_cap, 25);
        assert!(!config.policy.load_defaults);
        assert_eq!(config.monitor.metric_retention, Duration::from_secs(7 * DAY_SECS));
        assert!(config.integration.edge_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = KelpConfig::from_toml_str("[cache]\nmemory_capacty = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let config = KelpConfig::from_toml_str("[policy]\nbatch_size = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "policy.batch_size"
        ));

        let config = KelpConfig::from_toml_str(
            "[retention_tiers]\ncritical_days = 10\nhigh_days = 20\nnormal_days = 30\nlow_days = 40\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = KelpConfig::from_path(Path::new("/nonexistent/kelp.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
