//! Prometheus export of the latest samples and alert counts.

use kelp_core::{AlertLevel, MetricType};
use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Gauges registered in a registry owned by one monitor, so several monitors
/// can coexist in one process.
#[derive(Clone)]
pub struct MonitorGauges {
    registry: Registry,
    /// Latest sample - labels: metric_type
    metric_value: GaugeVec,
    unresolved_alerts: IntGauge,
    samples_total: IntCounter,
    /// Alerts raised - labels: metric_type, level
    alerts_total: IntCounterVec,
}

impl MonitorGauges {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let metric_value = GaugeVec::new(
            Opts::new("kelp_cache_metric_value", "Latest sampled value per metric type"),
            &["metric_type"],
        )?;
        let unresolved_alerts = IntGauge::new(
            "kelp_cache_unresolved_alerts",
            "Performance alerts not yet resolved",
        )?;
        let samples_total = IntCounter::new(
            "kelp_cache_samples_total",
            "Metric samples recorded by the monitor",
        )?;
        let alerts_total = IntCounterVec::new(
            Opts::new("kelp_cache_alerts_total", "Performance alerts raised"),
            &["metric_type", "level"],
        )?;

        registry.register(Box::new(metric_value.clone()))?;
        registry.register(Box::new(unresolved_alerts.clone()))?;
        registry.register(Box::new(samples_total.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;

        Ok(Self {
            registry,
            metric_value,
            unresolved_alerts,
            samples_total,
            alerts_total,
        })
    }

    pub fn record_sample(&self, metric: MetricType, value: f64) {
        self.metric_value
            .with_label_values(&[metric.as_str()])
            .set(value);
        self.samples_total.inc();
    }

    pub fn record_alert(&self, metric: MetricType, level: AlertLevel) {
        self.alerts_total
            .with_label_values(&[metric.as_str(), level.as_str()])
            .inc();
    }

    pub fn set_unresolved(&self, count: usize) {
        self.unresolved_alerts.set(count as i64);
    }

    /// Prometheus text exposition of every gauge.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_samples_and_alerts() {
        let gauges = MonitorGauges::new().unwrap();
        gauges.record_sample(MetricType::HitRatio, 0.42);
        gauges.record_alert(MetricType::HitRatio, AlertLevel::Warning);
        gauges.set_unresolved(1);

        let text = gauges.render().unwrap();
        assert!(text.contains("kelp_cache_metric_value{metric_type=\"hit_ratio\"} 0.42"));
        let alert_line = text
            .lines()
            .find(|l| l.starts_with("kelp_cache_alerts_total{"))
            .unwrap();
        assert!(alert_line.contains("level=\"warning\""));
        assert!(alert_line.contains("metric_type=\"hit_ratio\""));
        assert!(alert_line.ends_with(" 1"));
        assert!(text.contains("kelp_cache_unresolved_alerts 1"));
    }

    #[test]
    fn test_two_monitors_do_not_collide() {
        assert!(MonitorGauges::new().is_ok());
        assert!(MonitorGauges::new().is_ok());
    }
}
