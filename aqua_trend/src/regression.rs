//! Ordinary least-squares trendlines over 2D samples.
//!
//! [`fit`] is the whole engine: a closed-form single-pass OLS estimate plus
//! a two-point segment spanning the horizontal extent of the data, ready for
//! a chart layer to draw as an overlay.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    #[error("insufficient data for regression: need at least 2 points, got {got}")]
    InsufficientData { got: usize },
    #[error("degenerate input: x-coordinates have zero variance")]
    DegenerateInput,
    #[error("non-finite coordinate in point {index}")]
    NonFiniteInput { index: usize },
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Fitted line `y = slope * x + intercept` together with the segment to draw.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegressionResult {
    pub slope: f64,
    pub intercept: f64,
    /// Endpoints on the fitted line at the minimum and maximum sample x.
    pub line_segment: (Point, Point),
}

impl RegressionResult {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    pub fn sum_squared_residuals(&self, points: &[Point]) -> f64 {
        points
            .iter()
            .map(|p| {
                let r = p.y - self.predict(p.x);
                r * r
            })
            .sum()
    }
}

#[derive(Default)]
struct Sums {
    x: f64,
    y: f64,
    xy: f64,
    x2: f64,
}

/// Fit an ordinary least-squares line through `points`.
///
/// Fails with [`RegressionError::InsufficientData`] for fewer than two points
/// and [`RegressionError::DegenerateInput`] when every x is identical, so a
/// caller never receives a NaN or infinite slope.
pub fn fit(points: &[Point]) -> Result<RegressionResult, RegressionError> {
    let n = points.len();
    if n < 2 {
        return Err(RegressionError::InsufficientData { got: n });
    }
    if let Some(index) = points
        .iter()
        .position(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return Err(RegressionError::NonFiniteInput { index });
    }

    // Sums run over x - x_ref; raw x² at large offsets cancels catastrophically.
    let x_ref = points[0].x;
    let sums = points.iter().fold(Sums::default(), |mut acc, p| {
        let dx = p.x - x_ref;
        acc.x += dx;
        acc.y += p.y;
        acc.xy += dx * p.y;
        acc.x2 += dx * dx;
        acc
    });

    let x_min = points.iter().map(|p| OrderedFloat(p.x)).min();
    let x_max = points.iter().map(|p| OrderedFloat(p.x)).max();
    let (Some(OrderedFloat(x_min)), Some(OrderedFloat(x_max))) = (x_min, x_max) else {
        return Err(RegressionError::InsufficientData { got: n });
    };
    if x_min == x_max {
        return Err(RegressionError::DegenerateInput);
    }

    let n_f = n as f64;
    let denominator = n_f * sums.x2 - sums.x * sums.x;
    // n*Σx² - (Σx)² is non-negative; cancellation can still drive it to zero.
    if !(denominator > 0.0) {
        return Err(RegressionError::DegenerateInput);
    }
    let slope = (n_f * sums.xy - sums.x * sums.y) / denominator;
    let shifted_intercept = (sums.y - slope * sums.x) / n_f;
    let intercept = shifted_intercept - slope * x_ref;
    if !slope.is_finite() || !intercept.is_finite() {
        return Err(RegressionError::DegenerateInput);
    }

    let at = |x: f64| Point::new(x, slope * (x - x_ref) + shifted_intercept);
    let line_segment = (at(x_min), at(x_max));
    Ok(RegressionResult {
        slope,
        intercept,
        line_segment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[(f64, f64)]) -> Vec<Point> {
        raw.iter().copied().map(Point::from).collect()
    }

    #[test]
    fn test_fit_identity_line() {
        let result = fit(&pts(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)])).unwrap();
        assert_eq!(result.slope, 1.0);
        assert_eq!(result.intercept, 0.0);
        assert_eq!(
            result.line_segment,
            (Point::new(1.0, 1.0), Point::new(3.0, 3.0))
        );
    }

    #[test]
    fn test_fit_noisy_scenario() {
        let points = pts(&[(1.0, 2.0), (2.0, 4.0), (3.0, 5.0), (4.0, 4.0), (5.0, 5.0)]);
        let result = fit(&points).unwrap();
        assert!((result.slope - 0.6).abs() < 1e-12);
        assert!((result.intercept - 2.2).abs() < 1e-12);
        assert_eq!(result.line_segment.0.x, 1.0);
        assert_eq!(result.line_segment.1.x, 5.0);
        assert!((result.line_segment.0.y - 2.8).abs() < 1e-12);
        assert!((result.line_segment.1.y - 5.2).abs() < 1e-12);
    }

    #[test]
    fn test_fit_recovers_exact_line() {
        let (a, b) = (2.5, -7.25);
        let points: Vec<Point> = (0..50)
            .map(|i| {
                let x = i as f64 * 0.5 - 3.0;
                Point::new(x, a * x + b)
            })
            .collect();
        let result = fit(&points).unwrap();
        assert!((result.slope - a).abs() <= 1e-9 * a.abs());
        assert!((result.intercept - b).abs() <= 1e-9 * b.abs());
    }

    #[test]
    fn test_fit_minimizes_squared_residuals() {
        let points = pts(&[
            (12.1, 4.0),
            (14.3, 4.6),
            (15.0, 5.3),
            (18.2, 5.9),
            (19.9, 7.1),
            (23.5, 7.4),
            (25.0, 8.8),
        ]);
        let best = fit(&points).unwrap();
        let best_ssr = best.sum_squared_residuals(&points);
        for ds in [-0.1, -0.01, -1e-4, 1e-4, 0.01, 0.1] {
            for di in [-1.0, -0.05, 0.0, 0.05, 1.0] {
                let candidate = RegressionResult {
                    slope: best.slope + ds,
                    intercept: best.intercept + di,
                    ..best
                };
                assert!(best_ssr <= candidate.sum_squared_residuals(&points) + 1e-12);
            }
        }
    }

    #[test]
    fn test_fit_is_repeatable() {
        let points = pts(&[(3.0, 1.0), (-1.0, 4.5), (7.5, 2.0), (0.25, 0.0)]);
        assert_eq!(fit(&points), fit(&points));
    }

    #[test]
    fn test_segment_spans_unsorted_extent() {
        let points = pts(&[(9.0, 2.0), (-4.0, 1.0), (2.0, 7.0), (5.0, 3.0)]);
        let result = fit(&points).unwrap();
        let (start, end) = result.line_segment;
        assert_eq!(start.x, -4.0);
        assert_eq!(end.x, 9.0);
        assert!((start.y - result.predict(-4.0)).abs() < 1e-12);
        assert!((end.y - result.predict(9.0)).abs() < 1e-12);
    }

    #[test]
    fn test_fit_handles_large_x_offsets() {
        for offset in [1e6, 1e8, 1.7e9] {
            let points: Vec<Point> = (0..5)
                .map(|i| Point::new(offset + i as f64, 2.0 * i as f64 + 1.0))
                .collect();
            let result = fit(&points).unwrap();
            assert!((result.slope - 2.0).abs() < 1e-9, "offset {}", offset);
            assert!((result.line_segment.0.y - 1.0).abs() < 1e-9, "offset {}", offset);
            assert!((result.line_segment.1.y - 9.0).abs() < 1e-9, "offset {}", offset);
            assert_eq!(result.line_segment.0.x, offset);
            assert_eq!(result.line_segment.1.x, offset + 4.0);
        }
    }

    #[test]
    fn test_fit_rejects_too_few_points() {
        assert_eq!(
            fit(&[]),
            Err(RegressionError::InsufficientData { got: 0 })
        );
        assert_eq!(
            fit(&pts(&[(1.0, 2.0)])),
            Err(RegressionError::InsufficientData { got: 1 })
        );
    }

    #[test]
    fn test_fit_rejects_vertical_data() {
        assert_eq!(
            fit(&pts(&[(2.0, 3.0), (2.0, 7.0)])),
            Err(RegressionError::DegenerateInput)
        );
        assert_eq!(
            fit(&pts(&[(0.1, 1.0), (0.1, 2.0), (0.1, 3.0)])),
            Err(RegressionError::DegenerateInput)
        );
    }

    #[test]
    fn test_fit_rejects_non_finite() {
        assert_eq!(
            fit(&pts(&[(1.0, 2.0), (f64::NAN, 3.0), (4.0, 1.0)])),
            Err(RegressionError::NonFiniteInput { index: 1 })
        );
        assert_eq!(
            fit(&pts(&[(1.0, 2.0), (2.0, f64::INFINITY)])),
            Err(RegressionError::NonFiniteInput { index: 1 })
        );
    }
}
