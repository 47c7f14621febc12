//! Ensemble summaries: effective sample size, weight entropy, and weighted
//! per-state statistics reported after every assimilation step.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::tree::QuantityKey;

/// Weighted summary of one state quantity across the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct StateStat {
    pub mean: f64,
    pub std: f64,
    /// Central 90% credible interval (lower, upper)
    pub ci90: (f64, f64),
}

/// Filtered estimate of every state quantity at one epoch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateEstimate {
    pub epoch: u64,
    pub states: IndexMap<QuantityKey, StateStat>,
}

impl StateEstimate {
    pub fn stat(&self, key: &QuantityKey) -> Option<&StateStat> {
        self.states.get(key)
    }
}

/// Health indicators for one filter step.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct StepDiagnostics {
    pub epoch: u64,
    /// Effective sample size of the post-weighting ensemble
    pub ess: f64,
    /// Shannon entropy of the weight vector, ln(n) when uniform
    pub entropy: f64,
    pub resampled: bool,
    /// Particles dropped this step under the discard policy
    pub discarded: usize,
}

// ============================================================================
// Weighted statistics
// ============================================================================

/// Kish effective sample size, `1 / sum(w^2)` for normalized weights.
pub(crate) fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// Shannon entropy `-sum(w ln w)`, zero-weight entries contribute nothing.
pub(crate) fn weight_entropy(weights: &[f64]) -> f64 {
    weights
        .iter()
        .filter(|&&w| w > 0.0)
        .map(|&w| -w * w.ln())
        .sum()
}

/// Weighted mean and standard deviation. Weights must be normalized.
pub(crate) fn weighted_mean_std(values: &[f64], weights: &[f64]) -> (f64, f64) {
    let mean: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    let var: f64 = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - mean) * (v - mean))
        .sum();
    (mean, var.max(0.0).sqrt())
}

/// Central credible interval covering `mass` of the weighted ensemble.
///
/// Values are sorted and the cumulative weight function inverted at the two
/// tail quantiles.
pub(crate) fn credible_interval(values: &[f64], weights: &[f64], mass: f64) -> (f64, f64) {
    let lo_q = (1.0 - mass) / 2.0;
    let hi_q = 1.0 - lo_q;
    (
        weighted_quantile(values, weights, lo_q),
        weighted_quantile(values, weights, hi_q),
    )
}

/// Smallest value whose cumulative weight reaches `q`.
pub(crate) fn weighted_quantile(values: &[f64], weights: &[f64], q: f64) -> f64 {
    debug_assert_eq!(values.len(), weights.len());
    if values.is_empty() {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut cumulative = 0.0;
    for &i in &order {
        cumulative += weights[i];
        if cumulative >= q {
            return values[i];
        }
    }
    values[order[order.len() - 1]]
}

// ============================================================================
// Tests
// ============================================================================
