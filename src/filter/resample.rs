//! Resampling schemes for the particle filter.
//!
//! Each scheme maps a normalized weight vector to a multiset of particle
//! indices of the same size. Low-variance schemes (systematic, stratified)
//! are preferred in practice; multinomial is kept as the textbook baseline.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How ancestor indices are drawn from the weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingScheme {
    /// One uniform offset, comb of n equally spaced points
    Systematic,
    /// One independent uniform per stratum of width 1/n
    Stratified,
    /// n independent draws from the categorical weight distribution
    Multinomial,
}

impl Default for ResamplingScheme {
    fn default() -> Self {
        ResamplingScheme::Systematic
    }
}

impl ResamplingScheme {
    /// Draw `n` ancestor indices from `weights` (normalized, non-negative).
    ///
    /// Returned indices are ascending; zero-weight entries are never
    /// selected.
    pub fn resample<R: Rng>(&self, weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
        let points: Vec<f64> = match self {
            ResamplingScheme::Systematic => {
                let u0 = rng.gen::<f64>();
                (0..n).map(|i| (i as f64 + u0) / n as f64).collect()
            }
            ResamplingScheme::Stratified => (0..n)
                .map(|i| (i as f64 + rng.gen::<f64>()) / n as f64)
                .collect(),
            ResamplingScheme::Multinomial => {
                let mut us: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
                us.sort_by(|a, b| a.total_cmp(b));
                us
            }
        };
        indices_from_points(weights, &points)
    }
}

/// Invert the cumulative weight function at each point. Points must be
/// ascending in `[0, 1)`.
fn indices_from_points(weights: &[f64], points: &[f64]) -> Vec<usize> {
    let mut out = Vec::with_capacity(points.len());
    let mut cumulative = weights.first().copied().unwrap_or(0.0);
    let mut idx = 0usize;
    for &p in points {
        while p >= cumulative && idx + 1 < weights.len() {
            idx += 1;
            cumulative += weights[idx];
        }
        out.push(idx);
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
