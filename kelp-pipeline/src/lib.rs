//! Kelp Pipeline - feature extraction on record submission
//!
//! A "record submitted" event is parsed into a [`DomainRecord`] and handed to
//! every registered [`FeatureExtractor`]. Each extractor's output is cached on
//! its own key through the retention manager, so re-submitting a record is
//! cheap and one failing extractor never blocks the others.
//!
//! [`HookRegistry`] lets outside code observe saves, predictions and training
//! runs without being able to break them.

pub mod domain;
pub mod extractors;
pub mod hooks;
pub mod pipeline;

pub use domain::{DomainRecord, EnvironmentReading, SpeciesObservation};
pub use extractors::{
    default_extractors, EnvironmentalExtractor, FeatureExtractor, FeatureMap, SpatialExtractor,
    SpeciesExtractor, TemporalExtractor,
};
pub use hooks::{Hook, HookEvent, HookPoint, HookRegistry};
pub use pipeline::{
    FeatureExtractionPipeline, PipelineConfig, PipelineMetrics, PipelineMetricsSnapshot, TaskState,
};
