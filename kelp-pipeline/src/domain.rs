//! "Record submitted" event model.

use kelp_core::{PipelineError, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A survey or station record as submitted by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub record_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub depth_min: Option<f64>,
    #[serde(default)]
    pub depth_max: Option<f64>,
    #[serde(default)]
    pub area_km2: Option<f64>,
    pub observed_at: Timestamp,
    #[serde(default)]
    pub ended_at: Option<Timestamp>,
    #[serde(default)]
    pub environment: Option<EnvironmentReading>,
    #[serde(default)]
    pub species: Vec<SpeciesObservation>,
}

/// Water-column measurements taken with the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentReading {
    pub temperature: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub salinity: Option<f64>,
    pub chlorophyll: Option<f64>,
    pub oxygen: Option<f64>,
    pub ph: Option<f64>,
    pub turbidity: Option<f64>,
    pub current_speed: Option<f64>,
}

impl EnvironmentReading {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn one() -> u64 {
    1
}

/// One species line of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesObservation {
    pub name: String,
    #[serde(default = "one")]
    pub count: u64,
    #[serde(default)]
    pub commercial: bool,
    #[serde(default)]
    pub endemic: bool,
    #[serde(default)]
    pub conservation_status: Option<String>,
    #[serde(default)]
    pub rarity_score: Option<f64>,
}

impl SpeciesObservation {
    /// IUCN vulnerable, endangered or critically endangered.
    pub fn is_threatened(&self) -> bool {
        matches!(
            self.conservation_status.as_deref(),
            Some("VU") | Some("EN") | Some("CR")
        )
    }
}

impl DomainRecord {
    /// Parse and validate a raw submission.
    ///
    /// `target_id` names the submission in errors when the payload itself
    /// carries no usable id.
    pub fn from_value(target_id: &str, raw: &Value) -> Result<Self, PipelineError> {
        let malformed = |reason: String| PipelineError::MalformedRecord {
            target_id: target_id.to_string(),
            reason,
        };

        let record: DomainRecord =
            serde_json::from_value(raw.clone()).map_err(|e| malformed(e.to_string()))?;

        if record.record_id.trim().is_empty() {
            return Err(malformed("record_id is empty".to_string()));
        }
        if !(-90.0..=90.0).contains(&record.latitude) {
            return Err(malformed(format!("latitude {} out of range", record.latitude)));
        }
        if !(-180.0..=180.0).contains(&record.longitude) {
            return Err(malformed(format!(
                "longitude {} out of range",
                record.longitude
            )));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kelp_test_utils::fixtures::domain_record_json;
    use serde_json::json;

    #[test]
    fn test_fixture_parses() {
        let record = DomainRecord::from_value("st-1", &domain_record_json("st-1")).unwrap();
        assert_eq!(record.record_id, "st-1");
        assert_eq!(record.species.len(), 3);
        assert!(record.species[2].is_threatened());
        assert_eq!(record.environment.unwrap().temperature, Some(17.2));
    }

    #[test]
    fn test_optional_sections_default() {
        let raw = json!({
            "record_id": "bare",
            "latitude": -9.1,
            "longitude": 13.0,
            "observed_at": "2024-01-02T00:00:00Z",
            "environment": null,
            "species": [{"name": "Sardinella aurita"}]
        });
        let record = DomainRecord::from_value("bare", &raw).unwrap();
        assert!(record.environment.is_none());
        assert_eq!(record.species[0].count, 1);
        assert!(record.depth_max.is_none());
    }

    #[test]
    fn test_missing_coordinates_is_malformed() {
        let raw = json!({"record_id": "x", "observed_at": "2024-01-02T00:00:00Z"});
        let err = DomainRecord::from_value("x", &raw).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { .. }));
    }

    #[test]
    fn test_out_of_range_latitude_is_malformed() {
        let mut raw = domain_record_json("y");
        raw["latitude"] = json!(123.0);
        let err = DomainRecord::from_value("y", &raw).unwrap_err();
        assert!(err.to_string().contains("latitude"));
    }
}
