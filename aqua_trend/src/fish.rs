//! Fish measurement records (the Fish.csv layout) and extraction of
//! regression samples from them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::regression::Point;
use crate::TrendError;

const SPECIES_COLUMN: &str = "Species";
const UNKNOWN_SPECIES: &str = "unknown";

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Measurement {
    Weight,
    Length1,
    Length2,
    Length3,
    Height,
    Width,
}

impl Measurement {
    pub const ALL: [Measurement; 6] = [
        Measurement::Weight,
        Measurement::Length1,
        Measurement::Length2,
        Measurement::Length3,
        Measurement::Height,
        Measurement::Width,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Measurement::Weight => "Weight",
            Measurement::Length1 => "Length1",
            Measurement::Length2 => "Length2",
            Measurement::Length3 => "Length3",
            Measurement::Height => "Height",
            Measurement::Width => "Width",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Measurement::Weight => "g",
            _ => "cm",
        }
    }

    /// Axis label, e.g. `Length1 (cm)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.column(), self.unit())
    }

    /// Accepts `length1`, `Length1`, `Length1(cm)` and similar spellings.
    pub fn parse(token: &str) -> Result<Self, TrendError> {
        let normalized = normalize_header(token);
        Measurement::ALL
            .into_iter()
            .find(|m| m.column().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| TrendError::UnknownMeasurement(token.to_string()))
    }
}

/// Same spellings as [`Measurement::parse`], so params files match the CLI.
impl<'de> Deserialize<'de> for Measurement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Measurement::parse(&token).map_err(de::Error::custom)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Measurement {
    type Err = TrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Measurement::parse(s)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FishRecord {
    #[serde(alias = "Species")]
    pub species: String,
    #[serde(default, alias = "Weight", alias = "Weight(g)")]
    pub weight: Option<f64>,
    #[serde(default, alias = "Length1", alias = "Length1(cm)")]
    pub length1: Option<f64>,
    #[serde(default, alias = "Length2", alias = "Length2(cm)")]
    pub length2: Option<f64>,
    #[serde(default, alias = "Length3", alias = "Length3(cm)")]
    pub length3: Option<f64>,
    #[serde(default, alias = "Height", alias = "Height(cm)")]
    pub height: Option<f64>,
    #[serde(default, alias = "Width", alias = "Width(cm)")]
    pub width: Option<f64>,
}

impl FishRecord {
    pub fn new(species: impl Into<String>) -> Self {
        let species = species.into();
        let trimmed = species.trim();
        Self {
            species: if trimmed.is_empty() {
                UNKNOWN_SPECIES.to_string()
            } else {
                trimmed.to_string()
            },
            weight: None,
            length1: None,
            length2: None,
            length3: None,
            height: None,
            width: None,
        }
    }

    pub fn get(&self, measurement: Measurement) -> Option<f64> {
        match measurement {
            Measurement::Weight => self.weight,
            Measurement::Length1 => self.length1,
            Measurement::Length2 => self.length2,
            Measurement::Length3 => self.length3,
            Measurement::Height => self.height,
            Measurement::Width => self.width,
        }
    }

    pub fn set(&mut self, measurement: Measurement, value: Option<f64>) {
        let slot = match measurement {
            Measurement::Weight => &mut self.weight,
            Measurement::Length1 => &mut self.length1,
            Measurement::Length2 => &mut self.length2,
            Measurement::Length3 => &mut self.length3,
            Measurement::Height => &mut self.height,
            Measurement::Width => &mut self.width,
        };
        *slot = value;
    }

    /// Both coordinates of the measurement pair, if recorded.
    pub fn point(&self, x: Measurement, y: Measurement) -> Option<Point> {
        Some(Point::new(self.get(x)?, self.get(y)?))
    }
}

/// Parse fish records from bytes using the provided format hint (extension or file name).
pub fn parse_records(input: &[u8], format: &str) -> Result<Vec<FishRecord>, TrendError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".csv") || format_lc == "csv" {
        parse_csv_records(input)
    } else if format_lc.ends_with(".json") || format_lc == "json" {
        parse_json_records(input)
    } else {
        Err(TrendError::UnsupportedFormat(format.to_string()))
    }
}

fn normalize_header(name: &str) -> String {
    name.trim_start_matches('\u{feff}')
        .replace("(cm)", "")
        .replace("(g)", "")
        .replace(' ', "")
}

fn parse_csv_records(input: &[u8]) -> Result<Vec<FishRecord>, TrendError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| TrendError::CsvParse(e.to_string()))?
        .iter()
        .map(normalize_header)
        .collect();
    let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let mut missing = Vec::new();
    let species_idx = find(SPECIES_COLUMN);
    if species_idx.is_none() {
        missing.push(SPECIES_COLUMN.to_string());
    }
    let mut columns = Vec::with_capacity(Measurement::ALL.len());
    for measurement in Measurement::ALL {
        match find(measurement.column()) {
            Some(idx) => columns.push((measurement, idx)),
            None => missing.push(measurement.column().to_string()),
        }
    }
    let Some(species_idx) = species_idx else {
        return Err(TrendError::MissingColumns(missing));
    };
    if !missing.is_empty() {
        return Err(TrendError::MissingColumns(missing));
    }

    let mut out = Vec::new();
    for (row_idx, row) in reader.records().enumerate() {
        let row = row.map_err(|e| TrendError::CsvParse(e.to_string()))?;
        let mut record = FishRecord::new(row.get(species_idx).unwrap_or(""));
        for &(measurement, idx) in &columns {
            let cell = row.get(idx).unwrap_or("");
            let value = parse_cell(cell).ok_or_else(|| TrendError::InvalidValue {
                row: row_idx + 1,
                column: measurement.column().to_string(),
                value: cell.to_string(),
            })?;
            record.set(measurement, value);
        }
        out.push(record);
    }
    Ok(out)
}

/// `Some(None)` for an empty cell, `None` for anything that is not a finite number.
fn parse_cell(cell: &str) -> Option<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Some(None);
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(Some(v)),
        _ => None,
    }
}

fn parse_json_records(input: &[u8]) -> Result<Vec<FishRecord>, TrendError> {
    let records: Vec<FishRecord> =
        serde_json::from_slice(input).map_err(|e| TrendError::JsonParse(e.to_string()))?;
    Ok(records
        .into_iter()
        .map(|r| FishRecord {
            species: FishRecord::new(r.species).species,
            ..r
        })
        .collect())
}

/// Points for the `(x, y)` measurement pair, optionally restricted to one species.
///
/// Records missing either measurement are skipped.
pub fn sample_set(
    records: &[FishRecord],
    x: Measurement,
    y: Measurement,
    species: Option<&str>,
) -> Vec<Point> {
    let species = species.map(str::trim);
    records
        .iter()
        .filter(|r| species.map_or(true, |s| r.species == s))
        .filter_map(|r| r.point(x, y))
        .collect()
}

/// Distinct species names in sorted order.
pub fn species_names(records: &[FishRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.species.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
