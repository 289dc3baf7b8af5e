//! Feature extractors.
//!
//! Each extractor is a pure function of one [`DomainRecord`]. The pipeline
//! caches every extractor's output separately, so a failure in one never
//! affects the others.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Datelike;
use kelp_core::{FeatureKind, PipelineError};
use serde_json::{json, Value};

use crate::domain::{DomainRecord, SpeciesObservation};

/// Named features produced by one extractor.
pub type FeatureMap = BTreeMap<String, Value>;

/// Mean longitude of the Angolan coastline.
const COAST_LONGITUDE: f64 = 12.0;
const KM_PER_DEGREE: f64 = 111.32;
const DEEP_WATER_M: f64 = 200.0;
const UPWELLING_BELOW_C: f64 = 20.0;
const RARE_ABOVE: f64 = 0.8;

pub trait FeatureExtractor: Send + Sync {
    /// Unique within a pipeline; part of the cache key.
    fn name(&self) -> &str;

    fn kind(&self) -> FeatureKind;

    /// `Ok(None)` when the record carries nothing this extractor reads.
    fn extract(&self, record: &DomainRecord) -> Result<Option<FeatureMap>, PipelineError>;
}

/// The four built-in extractors.
pub fn default_extractors() -> Vec<Arc<dyn FeatureExtractor>> {
    vec![
        Arc::new(TemporalExtractor),
        Arc::new(SpatialExtractor),
        Arc::new(EnvironmentalExtractor),
        Arc::new(SpeciesExtractor),
    ]
}

fn failed(extractor: &str, record: &DomainRecord, reason: impl Into<String>) -> PipelineError {
    PipelineError::ExtractionFailed {
        extractor: extractor.to_string(),
        target_id: record.record_id.clone(),
        reason: reason.into(),
    }
}

// ============================================================================
// TEMPORAL
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalExtractor;

/// Southern-hemisphere season for a calendar month.
pub fn season(month: u32) -> &'static str {
    match month {
        12 | 1 | 2 => "summer",
        3..=5 => "autumn",
        6..=8 => "winter",
        _ => "spring",
    }
}

/// Dry period of the Angolan coast runs May through October.
pub fn is_dry_season(month: u32) -> bool {
    (5..=10).contains(&month)
}

impl FeatureExtractor for TemporalExtractor {
    fn name(&self) -> &str {
        "temporal"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Temporal
    }

    fn extract(&self, record: &DomainRecord) -> Result<Option<FeatureMap>, PipelineError> {
        let start = record.observed_at;
        let duration_days = match record.ended_at {
            Some(end) if end < start => {
                return Err(failed(self.name(), record, "ended_at precedes observed_at"))
            }
            Some(end) => (end - start).num_days(),
            None => 1,
        };
        let month = start.month();

        let mut features = FeatureMap::new();
        features.insert("year".into(), json!(start.year()));
        features.insert("month".into(), json!(month));
        features.insert("day_of_year".into(), json!(start.ordinal()));
        features.insert("season".into(), json!(season(month)));
        features.insert("duration_days".into(), json!(duration_days));
        features.insert("is_dry_season".into(), json!(is_dry_season(month)));
        features.insert("is_wet_season".into(), json!(!is_dry_season(month)));
        Ok(Some(features))
    }
}

// ============================================================================
// SPATIAL
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct SpatialExtractor;

pub fn distance_from_coast_km(longitude: f64) -> f64 {
    (longitude - COAST_LONGITUDE).abs() * KM_PER_DEGREE
}

pub fn oceanographic_zone(latitude: f64) -> &'static str {
    if latitude < -15.0 {
        "Benguela Sul"
    } else if latitude < -12.0 {
        "Benguela Norte"
    } else if latitude < -8.0 {
        "Transição"
    } else {
        "Angola Norte"
    }
}

impl FeatureExtractor for SpatialExtractor {
    fn name(&self) -> &str {
        "spatial"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Spatial
    }

    fn extract(&self, record: &DomainRecord) -> Result<Option<FeatureMap>, PipelineError> {
        let (lat, lon) = (record.latitude, record.longitude);
        let depth_min = record.depth_min.unwrap_or(0.0);
        let depth_max = record.depth_max.unwrap_or(depth_min);
        if depth_min > depth_max {
            return Err(failed(
                self.name(),
                record,
                format!("depth_min {depth_min} exceeds depth_max {depth_max}"),
            ));
        }

        let mut features = FeatureMap::new();
        features.insert("latitude".into(), json!(lat));
        features.insert("longitude".into(), json!(lon));
        features.insert("depth_min".into(), json!(depth_min));
        features.insert("depth_max".into(), json!(depth_max));
        features.insert("depth_mean".into(), json!((depth_min + depth_max) / 2.0));
        features.insert(
            "area_coverage_km2".into(),
            json!(record.area_km2.unwrap_or(0.0)),
        );
        features.insert(
            "distance_from_coast_km".into(),
            json!(distance_from_coast_km(lon)),
        );
        features.insert("oceanographic_zone".into(), json!(oceanographic_zone(lat)));
        features.insert(
            "location_grid".into(),
            json!(format!("lat_{}_lon_{}", lat.trunc() as i64, lon.trunc() as i64)),
        );
        features.insert(
            "is_coastal".into(),
            json!((lon - COAST_LONGITUDE).abs() < 2.0),
        );
        features.insert("is_deep_water".into(), json!(depth_max > DEEP_WATER_M));
        Ok(Some(features))
    }
}

// ============================================================================
// ENVIRONMENTAL
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentalExtractor;

/// Productivity class from chlorophyll-a in mg/m³.
pub fn productivity_level(chlorophyll: f64) -> &'static str {
    if chlorophyll > 5.0 {
        "very_high"
    } else if chlorophyll > 2.0 {
        "high"
    } else if chlorophyll > 1.0 {
        "medium"
    } else {
        "low"
    }
}

impl FeatureExtractor for EnvironmentalExtractor {
    fn name(&self) -> &str {
        "environmental"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Environmental
    }

    fn extract(&self, record: &DomainRecord) -> Result<Option<FeatureMap>, PipelineError> {
        let env = match &record.environment {
            Some(env) if !env.is_empty() => env,
            _ => return Ok(None),
        };

        let mut features = FeatureMap::new();
        let mut put = |name: &str, value: Option<f64>| {
            if let Some(v) = value {
                features.insert(name.to_string(), json!(v));
            }
        };
        put("temperature_mean", env.temperature);
        put(
            "temperature_range",
            env.temperature_max
                .zip(env.temperature_min)
                .map(|(max, min)| max - min),
        );
        put("salinity_mean", env.salinity);
        put("chlorophyll_mean", env.chlorophyll);
        put("oxygen_level", env.oxygen);
        put("ph_level", env.ph);
        put("turbidity", env.turbidity);
        put("current_speed", env.current_speed);

        features.insert(
            "upwelling_indicator".into(),
            json!(env.temperature.unwrap_or(25.0) < UPWELLING_BELOW_C),
        );
        features.insert(
            "productivity_level".into(),
            json!(productivity_level(env.chlorophyll.unwrap_or(0.0))),
        );
        Ok(Some(features))
    }
}

// ============================================================================
// SPECIES
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct SpeciesExtractor;

/// Individuals per species name.
fn abundance(record: &DomainRecord) -> BTreeMap<&str, u64> {
    let mut counts = BTreeMap::new();
    for sp in &record.species {
        *counts.entry(sp.name.as_str()).or_insert(0) += sp.count;
    }
    counts
}

/// Shannon diversity `H = -Σ p ln p` over abundances. Zero for one individual or none.
pub fn shannon_index<'a>(counts: impl IntoIterator<Item = &'a u64> + Clone) -> f64 {
    let total: u64 = counts.clone().into_iter().sum();
    if total <= 1 {
        return 0.0;
    }
    counts
        .into_iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.ln()
        })
        .sum()
}

/// Most abundant species; ties go to the alphabetically first name.
fn dominant<'a>(counts: &BTreeMap<&'a str, u64>) -> Option<&'a str> {
    let mut best: Option<(&str, u64)> = None;
    for (&name, &count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((name, count));
        }
    }
    best.map(|(name, _)| name)
}

impl FeatureExtractor for SpeciesExtractor {
    fn name(&self) -> &str {
        "species"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Species
    }

    fn extract(&self, record: &DomainRecord) -> Result<Option<FeatureMap>, PipelineError> {
        if record.species.is_empty() {
            return Ok(None);
        }
        let counts = abundance(record);
        let distinct: BTreeSet<&str> = record.species.iter().map(|s| s.name.as_str()).collect();
        let count_where = |f: fn(&SpeciesObservation) -> bool| {
            record.species.iter().filter(|s| f(s)).count()
        };

        let mut features = FeatureMap::new();
        features.insert("species_count".into(), json!(record.species.len()));
        features.insert("species_richness".into(), json!(distinct.len()));
        features.insert(
            "total_individuals".into(),
            json!(counts.values().sum::<u64>()),
        );
        features.insert("endemic_species".into(), json!(count_where(|s| s.endemic)));
        features.insert(
            "threatened_species".into(),
            json!(count_where(|s| s.is_threatened())),
        );
        features.insert(
            "commercial_species".into(),
            json!(count_where(|s| s.commercial)),
        );
        features.insert(
            "dominant_species".into(),
            json!(dominant(&counts).unwrap_or_default()),
        );
        features.insert(
            "biodiversity_index".into(),
            json!(shannon_index(counts.values())),
        );
        features.insert(
            "has_rare_species".into(),
            json!(record
                .species
                .iter()
                .any(|s| s.rarity_score.unwrap_or(0.0) > RARE_ABOVE)),
        );
        Ok(Some(features))
    }
}
