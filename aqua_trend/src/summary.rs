use std::collections::BTreeMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::fish::{sample_set, species_names, FishRecord, Measurement};
use crate::regression::Point;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeciesSummary {
    pub species: String,
    pub samples: usize,
    pub mean_x: f64,
    pub mean_y: f64,
    /// Pearson correlation; absent for fewer than two samples or a constant axis.
    pub correlation: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeciesWeight {
    pub species: String,
    pub mean_weight_g: f64,
    pub samples: usize,
}

/// Pearson correlation coefficient of the points' x and y.
pub fn pearson(points: &[Point]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let xs: Array1<f64> = points.iter().map(|p| p.x).collect();
    let ys: Array1<f64> = points.iter().map(|p| p.y).collect();
    let dx = &xs - xs.mean()?;
    let dy = &ys - ys.mean()?;
    let sxx = dx.dot(&dx);
    let syy = dy.dot(&dy);
    if !(sxx > 0.0 && syy > 0.0) {
        return None;
    }
    let r = dx.dot(&dy) / (sxx * syy).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

pub fn summarize(species: &str, points: &[Point]) -> Option<SpeciesSummary> {
    if points.is_empty() {
        return None;
    }
    let xs: Array1<f64> = points.iter().map(|p| p.x).collect();
    let ys: Array1<f64> = points.iter().map(|p| p.y).collect();
    Some(SpeciesSummary {
        species: species.to_string(),
        samples: points.len(),
        mean_x: xs.mean()?,
        mean_y: ys.mean()?,
        correlation: pearson(points),
    })
}

/// One summary per species with at least one complete `(x, y)` sample, sorted by name.
pub fn summarize_species(
    records: &[FishRecord],
    x: Measurement,
    y: Measurement,
) -> Vec<SpeciesSummary> {
    species_names(records)
        .into_iter()
        .filter_map(|name| {
            let points = sample_set(records, x, y, Some(&name));
            summarize(&name, &points)
        })
        .collect()
}

/// Mean recorded weight per species, sorted by name. Species without any
/// recorded weight are left out.
pub fn average_weight_by_species(records: &[FishRecord]) -> Vec<SpeciesWeight> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in records {
        if let Some(weight) = record.weight {
            groups.entry(record.species.as_str()).or_default().push(weight);
        }
    }
    groups
        .into_iter()
        .filter_map(|(species, weights)| {
            let samples = weights.len();
            let mean = Array1::from_vec(weights).mean()?;
            Some(SpeciesWeight {
                species: species.to_string(),
                mean_weight_g: mean,
                samples,
            })
        })
        .collect()
}
