//! Kelp Monitor - cache performance monitoring
//!
//! The [`PerformanceMonitor`] samples every registered [`MetricSource`] on a
//! fixed interval, compares each sample against warning and error bounds and
//! raises a [`PerformanceAlert`] once a breach has held for several samples.
//! Alerts for the same metric and level are spaced by a cooldown and resolve
//! themselves when the metric recovers.
//!
//! [`PerformanceAlert`]: kelp_core::PerformanceAlert

pub mod config;
pub mod gauges;
pub mod monitor;
pub mod report;
pub mod sampler;
pub mod source;
pub mod thresholds;

pub use config::MonitorConfig;
pub use gauges::MonitorGauges;
pub use monitor::PerformanceMonitor;
pub use report::{Dashboard, MonitorMetricsSnapshot, PerformanceReport};
pub use sampler::run_sampler;
pub use source::{ManagerSource, MetricSource};
pub use thresholds::{Direction, Threshold, Thresholds};
