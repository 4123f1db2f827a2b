//! Fish measurement trendline library: least-squares fits, dataset parsing and
//! the report behind the aquaculture dashboard's visualisation page.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod fish;
pub mod regression;
pub mod report;
pub mod summary;

pub use fish::{parse_records, sample_set, species_names, FishRecord, Measurement};
pub use regression::{fit, Point, RegressionError, RegressionResult};
pub use report::{
    build_visualization, dataset_sha256, species_trend, trendline, SpeciesTrend, Trendline,
    Visualization,
};
pub use summary::{
    average_weight_by_species, pearson, summarize, summarize_species, SpeciesSummary,
    SpeciesWeight,
};

#[derive(Error, Debug)]
pub enum TrendError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse CSV: {0}")]
    CsvParse(String),
    #[error("failed to parse JSON: {0}")]
    JsonParse(String),
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("invalid value {value:?} in column {column} (data row {row})")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("dataset contains no records")]
    EmptyDataset,
    #[error("no records for species '{0}'")]
    UnknownSpecies(String),
    #[error("unknown measurement: {0}")]
    UnknownMeasurement(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("params file unavailable: {0}")]
    ParamsUnavailable(String),
    #[error(transparent)]
    Regression(#[from] RegressionError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub x_measure: Measurement,
    pub y_measure: Measurement,
    /// Species whose scatter gets the regression overlay.
    pub species: Option<String>,
    pub min_species_samples: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            x_measure: Measurement::Length1,
            y_measure: Measurement::Width,
            species: None,
            min_species_samples: 2,
        }
    }
}

impl Params {
    pub fn from_json(input: &str) -> Result<Self, TrendError> {
        let params: Params =
            serde_json::from_str(input).map_err(|e| TrendError::JsonParse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), TrendError> {
        if self.min_species_samples < 2 {
            return Err(TrendError::InvalidParameter(format!(
                "min_species_samples must be at least 2, got {}",
                self.min_species_samples
            )));
        }
        if let Some(species) = self.species.as_deref() {
            if species.trim().is_empty() {
                return Err(TrendError::InvalidParameter(
                    "species filter is empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Load visualisation params from a JSON file.
pub fn load_params(path: &Path) -> Result<Params, TrendError> {
    #[cfg(feature = "wasm")]
    {
        Err(TrendError::ParamsUnavailable(path.display().to_string()))
    }
    #[cfg(not(feature = "wasm"))]
    {
        use std::fs;
        let data = fs::read_to_string(path)
            .map_err(|e| TrendError::ParamsUnavailable(format!("{}: {}", path.display(), e)))?;
        Params::from_json(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults_fill_missing_fields() {
        let params = Params::from_json(r#"{"species": "Perch"}"#).unwrap();
        assert_eq!(params.x_measure, Measurement::Length1);
        assert_eq!(params.y_measure, Measurement::Width);
        assert_eq!(params.species.as_deref(), Some("Perch"));
        assert_eq!(params.min_species_samples, 2);
    }

    #[test]
    fn test_params_accept_unit_suffixed_measures() {
        let params =
            Params::from_json(r#"{"x_measure": "Length1(cm)", "y_measure": "Weight(g)"}"#).unwrap();
        assert_eq!(params.x_measure, Measurement::Length1);
        assert_eq!(params.y_measure, Measurement::Weight);
    }

    #[test]
    fn test_params_reject_small_sample_floor() {
        let err = Params::from_json(r#"{"min_species_samples": 1}"#).unwrap_err();
        assert!(matches!(err, TrendError::InvalidParameter(_)));
    }

    #[test]
    fn test_params_reject_blank_species() {
        let err = Params::from_json(r#"{"species": "  "}"#).unwrap_err();
        assert!(matches!(err, TrendError::InvalidParameter(_)));
    }

    #[cfg(not(feature = "wasm"))]
    #[test]
    fn test_load_params_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{"x_measure": "Height", "species": "Bream", "min_species_samples": 3}"#,
        )
        .unwrap();
        let params = load_params(&path).unwrap();
        assert_eq!(params.x_measure, Measurement::Height);
        assert_eq!(params.y_measure, Measurement::Width);
        assert_eq!(params.species.as_deref(), Some("Bream"));
        assert_eq!(params.min_species_samples, 3);
    }

    #[test]
    fn test_load_params_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_params(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, TrendError::ParamsUnavailable(_)));
    }

    #[test]
    fn test_error_display_lists_columns() {
        let err = TrendError::MissingColumns(vec!["Height".into(), "Width".into()]);
        assert_eq!(err.to_string(), "missing required columns: Height, Width");
    }
}
