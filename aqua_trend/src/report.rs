//! Everything the fish visualisation page draws, assembled into one
//! serialisable report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fish::{sample_set, FishRecord, Measurement};
use crate::regression::{fit, Point, RegressionResult};
use crate::summary::{
    average_weight_by_species, summarize, summarize_species, SpeciesSummary, SpeciesWeight,
};
use crate::{Params, TrendError};

/// Regression overlay for a scatter, or the reason it is left off.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Trendline {
    Fitted(RegressionResult),
    Omitted { reason: String },
}

impl Trendline {
    pub fn fitted(&self) -> Option<&RegressionResult> {
        match self {
            Trendline::Fitted(result) => Some(result),
            Trendline::Omitted { .. } => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeciesTrend {
    pub species: String,
    pub points: Vec<Point>,
    pub summary: SpeciesSummary,
    pub trendline: Trendline,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Visualization {
    pub x_measure: Measurement,
    pub y_measure: Measurement,
    /// Every record with both measurements, regardless of species.
    pub scatter: Vec<Point>,
    pub average_weight: Vec<SpeciesWeight>,
    pub species: Vec<SpeciesSummary>,
    pub focus: Option<SpeciesTrend>,
    pub dataset_sha256: String,
    pub generated_at: DateTime<Utc>,
}

/// Fit a trendline, turning regression failures into an omitted overlay.
pub fn trendline(points: &[Point]) -> Trendline {
    match fit(points) {
        Ok(result) => Trendline::Fitted(result),
        Err(err) => Trendline::Omitted {
            reason: err.to_string(),
        },
    }
}

/// Scatter, summary and trendline for a single species.
pub fn species_trend(
    records: &[FishRecord],
    x: Measurement,
    y: Measurement,
    species: &str,
    min_samples: usize,
) -> Result<SpeciesTrend, TrendError> {
    let species = species.trim();
    let points = sample_set(records, x, y, Some(species));
    let summary = summarize(species, &points)
        .ok_or_else(|| TrendError::UnknownSpecies(species.to_string()))?;
    let trendline = if points.len() < min_samples {
        Trendline::Omitted {
            reason: format!(
                "need at least {} samples for a trendline, got {}",
                min_samples,
                points.len()
            ),
        }
    } else {
        trendline(&points)
    };
    Ok(SpeciesTrend {
        species: species.to_string(),
        points,
        summary,
        trendline,
    })
}

/// Hex SHA-256 over the canonical JSON form of the records.
pub fn dataset_sha256(records: &[FishRecord]) -> Result<String, TrendError> {
    let bytes = serde_json::to_vec(records).map_err(|e| TrendError::JsonParse(e.to_string()))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

pub fn build_visualization(
    records: &[FishRecord],
    params: &Params,
) -> Result<Visualization, TrendError> {
    params.validate()?;
    if records.is_empty() {
        return Err(TrendError::EmptyDataset);
    }
    let (x, y) = (params.x_measure, params.y_measure);

    let focus = params
        .species
        .as_deref()
        .map(|name| species_trend(records, x, y, name, params.min_species_samples))
        .transpose()?;

    Ok(Visualization {
        x_measure: x,
        y_measure: y,
        scatter: sample_set(records, x, y, None),
        average_weight: average_weight_by_species(records),
        species: summarize_species(records, x, y),
        focus,
        dataset_sha256: dataset_sha256(records)?,
        generated_at: Utc::now(),
    })
}
