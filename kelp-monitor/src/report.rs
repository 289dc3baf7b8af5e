//! Report, dashboard and counter shapes, plus the insight rule tables.

use std::collections::BTreeMap;

use kelp_core::{EventId, MetricType, PerformanceAlert, PerformanceMetric, Timestamp, Trend};
use serde::{Deserialize, Serialize};

const MB_PER_GB: f64 = 1024.0;

/// Share of lookups a cache-less deployment would have served; the improvement
/// figure is measured against it.
const BASELINE_HIT_RATIO: f64 = 0.0;
const MAX_IMPROVEMENT_PERCENT: f64 = 95.0;

/// Lifetime counters of the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorMetricsSnapshot {
    pub samples_recorded: u64,
    pub sample_failures: u64,
    pub alerts_raised: u64,
    pub alerts_suppressed: u64,
    pub alerts_resolved: u64,
}

/// Aggregates over one report window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub report_id: EventId,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
    pub samples: usize,
    pub cache_hit_ratio: f64,
    pub avg_response_time_ms: f64,
    pub peak_space_mb: f64,
    pub avg_data_quality: Option<f64>,
    /// Percent of lookups saved compared with running without a cache.
    pub performance_improvement: f64,
    pub alerts_raised: usize,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Snapshot for an operator dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub generated_at: Timestamp,
    pub latest: BTreeMap<MetricType, PerformanceMetric>,
    /// Trend of each metric over the last hour.
    pub trends: BTreeMap<MetricType, Trend>,
    pub active_alerts: usize,
    pub recent_alerts: Vec<PerformanceAlert>,
    pub sampler_running: bool,
    pub last_sample_at: Option<Timestamp>,
    pub samples_retained: usize,
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Compare the means of the two halves of `values`.
///
/// A move of more than 5% in the metric's good direction is improving, in the
/// bad direction degrading. Fewer than two values is stable.
pub(crate) fn classify_trend(metric: MetricType, values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::Stable;
    }
    let mid = values.len() / 2;
    let (Some(first), Some(second)) = (mean(&values[..mid]), mean(&values[mid..])) else {
        return Trend::Stable;
    };
    let band = first.abs() * 0.05;
    let rose = second > first + band;
    let fell = second < first - band;
    match (rose, fell, metric.higher_is_better()) {
        (true, _, true) | (_, true, false) => Trend::Improving,
        (true, _, false) | (_, true, true) => Trend::Degrading,
        _ => Trend::Stable,
    }
}

pub(crate) fn improvement_percent(avg_hit_ratio: Option<f64>) -> f64 {
    avg_hit_ratio.map_or(0.0, |ratio| {
        ((ratio - BASELINE_HIT_RATIO) * 100.0).clamp(0.0, MAX_IMPROVEMENT_PERCENT)
    })
}

struct Band {
    /// Applies when the value is under this bound.
    under: f64,
    text: &'static str,
}

const HIT_RATIO_INSIGHTS: &[Band] = &[
    Band { under: 0.6, text: "Low cache hit ratio, caching needs tuning" },
    Band { under: 0.8, text: "Good cache hit ratio with room for improvement" },
    Band { under: f64::INFINITY, text: "Excellent cache hit ratio, system well tuned" },
];

const RESPONSE_INSIGHTS: &[Band] = &[
    Band { under: 100.0, text: "Excellent response times (<100ms)" },
    Band { under: 500.0, text: "Acceptable response times (<500ms)" },
    Band { under: f64::INFINITY, text: "High response times, investigate bottlenecks" },
];

const SPACE_INSIGHTS_GB: &[Band] = &[
    Band { under: 1.0, text: "Efficient space usage (<1GB)" },
    Band { under: 5.0, text: "Moderate space usage (<5GB)" },
    Band { under: f64::INFINITY, text: "High space usage, consider cleanup" },
];

fn band_text(table: &[Band], value: f64) -> &'static str {
    table
        .iter()
        .find(|b| value < b.under)
        .or(table.last())
        .map_or("", |b| b.text)
}

pub(crate) fn insights(hit_ratio: f64, response_ms: f64, space_mb: f64) -> Vec<String> {
    vec![
        format!("{} ({:.1}%)", band_text(HIT_RATIO_INSIGHTS, hit_ratio), hit_ratio * 100.0),
        band_text(RESPONSE_INSIGHTS, response_ms).to_string(),
        band_text(SPACE_INSIGHTS_GB, space_mb / MB_PER_GB).to_string(),
    ]
}

struct Rule {
    applies: fn(f64, f64, f64) -> bool,
    advice: [&'static str; 2],
}

fn low_hit_ratio(hit_ratio: f64, _: f64, _: f64) -> bool {
    hit_ratio < 0.6
}

fn slow_responses(_: f64, response_ms: f64, _: f64) -> bool {
    response_ms > 300.0
}

fn large_footprint(_: f64, _: f64, space_mb: f64) -> bool {
    space_mb / MB_PER_GB > 5.0
}

const RECOMMENDATIONS: &[Rule] = &[
    Rule {
        applies: low_hit_ratio,
        advice: [
            "Increase the inference cache TTL",
            "Review feature retention policies",
        ],
    },
    Rule {
        applies: slow_responses,
        advice: [
            "Increase the in-memory tier capacity",
            "Consider a shared cache tier",
        ],
    },
    Rule {
        applies: large_footprint,
        advice: [
            "Run cleanup of old records",
            "Tighten retention policies",
        ],
    },
];

pub(crate) fn recommendations(hit_ratio: f64, response_ms: f64, space_mb: f64) -> Vec<String> {
    let mut advice: Vec<String> = RECOMMENDATIONS
        .iter()
        .filter(|r| (r.applies)(hit_ratio, response_ms, space_mb))
        .flat_map(|r| r.advice.iter().map(|s| s.to_string()))
        .collect();
    if advice.is_empty() {
        advice.push("System performing well".to_string());
        advice.push("Continue regular monitoring".to_string());
    }
    advice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_respects_metric_direction() {
        let rising = [0.5, 0.5, 0.7, 0.7];
        assert_eq!(classify_trend(MetricType::HitRatio, &rising), Trend::Improving);
        assert_eq!(classify_trend(MetricType::ResponseTime, &rising), Trend::Degrading);
        assert_eq!(
            classify_trend(MetricType::HitRatio, &[0.70, 0.71, 0.72]),
            Trend::Stable
        );
        assert_eq!(classify_trend(MetricType::HitRatio, &[0.9]), Trend::Stable);
    }

    #[test]
    fn test_improvement_is_capped() {
        assert_eq!(improvement_percent(Some(0.99)), 95.0);
        assert!((improvement_percent(Some(0.42)) - 42.0).abs() < 1e-9);
        assert_eq!(improvement_percent(None), 0.0);
    }

    #[test]
    fn test_rule_tables() {
        let healthy = recommendations(0.9, 50.0, 100.0);
        assert_eq!(healthy, vec!["System performing well", "Continue regular monitoring"]);

        let struggling = recommendations(0.3, 800.0, 8.0 * 1024.0);
        assert_eq!(struggling.len(), 6);

        let text = insights(0.85, 700.0, 2048.0);
        assert!(text[0].starts_with("Excellent cache hit ratio"));
        assert!(text[1].starts_with("High response times"));
        assert!(text[2].starts_with("Moderate space usage"));
    }
}
