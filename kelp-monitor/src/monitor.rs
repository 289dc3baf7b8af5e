//! Threshold alerting over sampled metrics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use kelp_core::{
    AlertLevel, EventId, HealthCheck, HealthStatus, KelpResult, MetricType, PerformanceAlert,
    PerformanceMetric, StorageError, Timestamp, Trend, ValidationError,
};
use serde_json::json;

use crate::config::MonitorConfig;
use crate::gauges::MonitorGauges;
use crate::report::{self, Dashboard, MonitorMetricsSnapshot, PerformanceReport};
use crate::source::MetricSource;

#[derive(Debug, Default)]
struct Counters {
    samples_recorded: AtomicU64,
    sample_failures: AtomicU64,
    alerts_raised: AtomicU64,
    alerts_suppressed: AtomicU64,
    alerts_resolved: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MonitorMetricsSnapshot {
        MonitorMetricsSnapshot {
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
            sample_failures: self.sample_failures.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            alerts_resolved: self.alerts_resolved.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    samples: VecDeque<PerformanceMetric>,
    alerts: VecDeque<PerformanceAlert>,
    latest: BTreeMap<MetricType, PerformanceMetric>,
    /// Consecutive breaching samples per metric.
    streaks: HashMap<MetricType, u32>,
    /// Sample time of the last alert per (metric, level).
    last_alert: HashMap<(MetricType, AlertLevel), Timestamp>,
}

/// Samples registered sources, raises and resolves alerts, and summarises
/// the retained history.
///
/// Cooldowns are measured on sample timestamps, not wall-clock time, so
/// replayed or synthetic samples alert the same way live ones do.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    sources: RwLock<Vec<Arc<dyn MetricSource>>>,
    state: Mutex<State>,
    counters: Counters,
    gauges: Option<MonitorGauges>,
    sampler_running: AtomicBool,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let gauges = match MonitorGauges::new() {
            Ok(gauges) => Some(gauges),
            Err(e) => {
                tracing::warn!(error = %e, "Prometheus gauges unavailable, continuing without export");
                None
            }
        };
        Self {
            config,
            sources: RwLock::new(Vec::new()),
            state: Mutex::new(State::default()),
            counters: Counters::default(),
            gauges,
            sampler_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn register_source(&self, source: Arc<dyn MetricSource>) -> KelpResult<()> {
        let mut sources = self.sources.write().map_err(|_| StorageError::LockPoisoned)?;
        if sources.iter().any(|s| s.name() == source.name()) {
            return Err(ValidationError::DuplicateId {
                id: source.name().to_string(),
            }
            .into());
        }
        tracing::info!(source = source.name(), "Metric source registered");
        sources.push(source);
        Ok(())
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .read()
            .map(|s| s.iter().map(|s| s.name().to_string()).collect())
            .unwrap_or_default()
    }

    fn state(&self) -> KelpResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    // ------------------------------------------------------------------------
    // Sampling and alerting
    // ------------------------------------------------------------------------

    /// Collect from every source and evaluate the result.
    ///
    /// A failing source is logged and skipped; the others still count.
    pub async fn sample_once(&self) -> KelpResult<Vec<PerformanceAlert>> {
        let now = Utc::now();
        let sources: Vec<_> = self
            .sources
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .clone();

        let mut samples = Vec::new();
        for source in sources {
            match source.collect(now).await {
                Ok(batch) => samples.extend(batch),
                Err(e) => {
                    self.counters.sample_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(source = source.name(), error = %e, "Metric source failed");
                }
            }
        }
        self.record(samples)
    }

    /// Evaluate externally supplied samples in timestamp order.
    ///
    /// Returns the alerts raised by these samples.
    pub fn record(&self, mut samples: Vec<PerformanceMetric>) -> KelpResult<Vec<PerformanceAlert>> {
        samples.sort_by_key(|m| m.timestamp);
        let mut raised = Vec::new();
        let mut state = self.state()?;

        for sample in samples {
            self.counters.samples_recorded.fetch_add(1, Ordering::Relaxed);
            if let Some(g) = &self.gauges {
                g.record_sample(sample.metric_type, sample.value);
            }
            if let Some(alert) = self.evaluate(&mut state, &sample) {
                raised.push(alert);
            }
            state.latest.insert(sample.metric_type, sample.clone());
            state.samples.push_back(sample);
        }

        if let Some(newest) = state.samples.back().map(|m| m.timestamp) {
            self.prune(&mut state, newest);
        }
        if let Some(g) = &self.gauges {
            g.set_unresolved(state.alerts.iter().filter(|a| !a.resolved).count());
        }
        Ok(raised)
    }

    fn evaluate(&self, state: &mut State, sample: &PerformanceMetric) -> Option<PerformanceAlert> {
        let metric = sample.metric_type;
        let Some((level, bound)) = self.config.thresholds.evaluate(metric, sample.value) else {
            state.streaks.remove(&metric);
            self.auto_resolve(state, metric, sample.timestamp);
            return None;
        };

        let streak = state.streaks.entry(metric).or_insert(0);
        *streak = streak.saturating_add(1);
        if *streak < self.config.sustained_breaches {
            return None;
        }

        let cooldown = chrono::Duration::from_std(self.config.alert_cooldown)
            .unwrap_or(chrono::Duration::MAX);
        if let Some(last) = state.last_alert.get(&(metric, level)) {
            if sample.timestamp - *last < cooldown {
                self.counters.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let message = format!(
            "{metric} at {:.3}{} crossed the {level} bound {bound}",
            sample.value, sample.unit
        );
        let alert = PerformanceAlert::raise(level, metric, sample.value, bound, message, sample.timestamp);
        state.last_alert.insert((metric, level), sample.timestamp);
        state.alerts.push_back(alert.clone());
        while state.alerts.len() > self.config.alert_history {
            state.alerts.pop_front();
        }
        self.counters.alerts_raised.fetch_add(1, Ordering::Relaxed);
        if let Some(g) = &self.gauges {
            g.record_alert(metric, level);
        }
        tracing::warn!(
            alert_id = %alert.alert_id,
            metric_type = %metric,
            level = %level,
            value = sample.value,
            threshold = bound,
            "Performance alert raised"
        );
        Some(alert)
    }

    fn auto_resolve(&self, state: &mut State, metric: MetricType, at: Timestamp) {
        for alert in state
            .alerts
            .iter_mut()
            .filter(|a| a.metric_type == metric && !a.resolved)
        {
            alert.resolve(at);
            self.counters.alerts_resolved.fetch_add(1, Ordering::Relaxed);
            tracing::info!(alert_id = %alert.alert_id, metric_type = %metric, "Alert auto-resolved");
        }
    }

    fn prune(&self, state: &mut State, newest: Timestamp) {
        let retention = chrono::Duration::from_std(self.config.metric_retention)
            .unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = newest.checked_sub_signed(retention) else {
            return;
        };
        while state.samples.front().is_some_and(|m| m.timestamp < cutoff) {
            state.samples.pop_front();
        }
        while state.alerts.front().is_some_and(|a| a.timestamp < cutoff) {
            state.alerts.pop_front();
        }
    }

    /// Mark one alert resolved. Resolving twice is a no-op.
    pub fn resolve_alert(&self, alert_id: EventId) -> KelpResult<()> {
        let mut state = self.state()?;
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id)
            .ok_or_else(|| ValidationError::NotFound {
                kind: "alert",
                id: alert_id.to_string(),
            })?;
        if !alert.resolved {
            alert.resolve(Utc::now());
            self.counters.alerts_resolved.fetch_add(1, Ordering::Relaxed);
            tracing::info!(alert_id = %alert_id, "Alert resolved by operator");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Most recent `limit` alerts, oldest first.
    pub fn alerts(&self, limit: usize) -> Vec<PerformanceAlert> {
        self.state()
            .map(|s| {
                let skip = s.alerts.len().saturating_sub(limit);
                s.alerts.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn unresolved_alerts(&self) -> Vec<PerformanceAlert> {
        self.state()
            .map(|s| s.alerts.iter().filter(|a| !a.resolved).cloned().collect())
            .unwrap_or_default()
    }

    /// Retained samples of one metric taken at or after `since`.
    pub fn samples(&self, metric: MetricType, since: Timestamp) -> Vec<PerformanceMetric> {
        self.state()
            .map(|s| {
                s.samples
                    .iter()
                    .filter(|m| m.metric_type == metric && m.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn trend(&self, metric: MetricType, since: Timestamp) -> Trend {
        let values: Vec<f64> = self.samples(metric, since).iter().map(|m| m.value).collect();
        report::classify_trend(metric, &values)
    }

    /// Aggregate the window `[end - period, end]`.
    pub fn report(&self, period: chrono::Duration, end: Timestamp) -> PerformanceReport {
        let start = end - period;
        let (by_type, alerts_raised) = self
            .state()
            .map(|s| {
                let mut by_type: BTreeMap<MetricType, Vec<f64>> = BTreeMap::new();
                for m in s.samples.iter().filter(|m| m.timestamp >= start && m.timestamp <= end) {
                    by_type.entry(m.metric_type).or_default().push(m.value);
                }
                let alerts = s
                    .alerts
                    .iter()
                    .filter(|a| a.timestamp >= start && a.timestamp <= end)
                    .count();
                (by_type, alerts)
            })
            .unwrap_or_default();

        let values = |metric: MetricType| by_type.get(&metric).map(Vec::as_slice).unwrap_or(&[]);
        let hit_ratio = report::mean(values(MetricType::HitRatio));
        let response = report::mean(values(MetricType::ResponseTime)).unwrap_or(0.0);
        let peak_space = values(MetricType::SpaceUsage)
            .iter()
            .copied()
            .fold(0.0_f64, f64::max);
        let ratio = hit_ratio.unwrap_or(0.0);

        PerformanceReport {
            report_id: kelp_core::new_event_id(),
            period_start: start,
            period_end: end,
            samples: by_type.values().map(Vec::len).sum(),
            cache_hit_ratio: ratio,
            avg_response_time_ms: response,
            peak_space_mb: peak_space,
            avg_data_quality: report::mean(values(MetricType::DataQuality)),
            performance_improvement: report::improvement_percent(hit_ratio),
            alerts_raised,
            key_insights: report::insights(ratio, response, peak_space),
            recommendations: report::recommendations(ratio, response, peak_space),
        }
    }

    pub fn dashboard(&self) -> Dashboard {
        let now = Utc::now();
        let hour_ago = now - chrono::Duration::hours(1);
        let trends = MetricType::ALL
            .iter()
            .map(|&m| (m, self.trend(m, hour_ago)))
            .collect();
        let (latest, active, recent, retained) = self
            .state()
            .map(|s| {
                let skip = s.alerts.len().saturating_sub(5);
                (
                    s.latest.clone(),
                    s.alerts.iter().filter(|a| !a.resolved).count(),
                    s.alerts.iter().skip(skip).cloned().collect::<Vec<_>>(),
                    s.samples.len(),
                )
            })
            .unwrap_or_default();
        Dashboard {
            generated_at: now,
            last_sample_at: latest.values().map(|m: &PerformanceMetric| m.timestamp).max(),
            latest,
            trends,
            active_alerts: active,
            recent_alerts: recent,
            sampler_running: self.is_sampler_running(),
            samples_retained: retained,
        }
    }

    /// Unresolved critical alerts from the last hour make the monitor
    /// unhealthy, error alerts or a stopped sampler degraded.
    pub fn health(&self) -> HealthCheck {
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let recent: Vec<_> = self
            .unresolved_alerts()
            .into_iter()
            .filter(|a| a.timestamp > hour_ago)
            .collect();
        let count = |level| recent.iter().filter(|a| a.level == level).count();
        let critical = count(AlertLevel::Critical);
        let errors = count(AlertLevel::Error);

        let mut check = HealthCheck::healthy("monitor")
            .with_metadata("unresolved_recent_alerts", json!(recent.len()))
            .with_metadata("sampler_running", json!(self.is_sampler_running()));
        if critical > 0 {
            check = check.with_issue(
                HealthStatus::Unhealthy,
                format!("{critical} critical alerts in the last hour"),
            );
        }
        if errors > 0 {
            check = check.with_issue(
                HealthStatus::Degraded,
                format!("{errors} error alerts in the last hour"),
            );
        }
        if !self.is_sampler_running() {
            check = check.with_issue(HealthStatus::Degraded, "sampler stopped");
        }
        check
    }

    pub fn metrics(&self) -> MonitorMetricsSnapshot {
        self.counters.snapshot()
    }

    /// Prometheus text exposition, empty when export is unavailable.
    pub fn render_prometheus(&self) -> String {
        let Some(gauges) = &self.gauges else {
            return String::new();
        };
        gauges.render().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Prometheus render failed");
            String::new()
        })
    }

    pub fn is_sampler_running(&self) -> bool {
        self.sampler_running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_sampler_running(&self, running: bool) {
        self.sampler_running.store(running, Ordering::SeqCst);
    }
}
