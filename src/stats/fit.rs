//! Parametric distribution descriptors and moment-matching fitters.
//!
//! Model configurations describe uncertainty in terms of moments (a mean or
//! mode plus a standard deviation, sometimes bounds). The fitters here turn
//! those moments into distribution parameters:
//!
//! ```text
//! Gamma from mean:   shape = mean²/std²         rate = mean/std²
//! Gamma from mode:   aux1  = 2·std²             aux2 = √(mode² + 2·aux1)
//!                    shape = (mode² + mode·aux2)/aux1 + 1
//!                    rate  = (mode + aux2)/aux1
//! Beta from mean:    nu = mean·(1−mean)/std² − 1
//!                    alpha = mean·nu            beta = (1−mean)·nu
//! Truncated normal:  a = (lower−mean)/std       b = (upper−mean)/std
//! ```
//!
//! Moment combinations outside a family's admissible region are rejected with
//! `InvalidMoments` instead of producing a degenerate distribution.

use serde::{Deserialize, Serialize};

use crate::errors::StatsError;
use crate::stats::special::{normal_cdf, normal_pdf, regularized_beta, regularized_gamma_p};

// ============================================================================
// Descriptor
// ============================================================================

/// Parametric description of a univariate distribution.
///
/// Descriptors are plain data: they deserialize from model configurations and
/// are handed to [`RvSampler`](crate::stats::RvSampler) for drawing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum DistributionDescriptor {
    Normal {
        mean: f64,
        std: f64,
    },
    Gamma {
        shape: f64,
        rate: f64,
    },
    Beta {
        alpha: f64,
        beta: f64,
    },
    TruncNormal {
        mean: f64,
        std: f64,
        lower: f64,
        upper: f64,
    },
    Uniform {
        lower: f64,
        upper: f64,
    },
    Categorical {
        values: Vec<f64>,
        probs: Vec<f64>,
    },
}

impl DistributionDescriptor {
    /// Family name used in error messages and logs.
    pub fn family(&self) -> &'static str {
        match self {
            DistributionDescriptor::Normal { .. } => "normal",
            DistributionDescriptor::Gamma { .. } => "gamma",
            DistributionDescriptor::Beta { .. } => "beta",
            DistributionDescriptor::TruncNormal { .. } => "truncnorm",
            DistributionDescriptor::Uniform { .. } => "uniform",
            DistributionDescriptor::Categorical { .. } => "categorical",
        }
    }

    /// Check parameter admissibility.
    pub fn validate(&self) -> Result<(), StatsError> {
        match self {
            DistributionDescriptor::Normal { std, .. } => {
                if *std <= 0.0 || !std.is_finite() {
                    return Err(StatsError::invalid_descriptor("normal", "std must be > 0"));
                }
            }
            DistributionDescriptor::Gamma { shape, rate } => {
                if *shape <= 0.0 || *rate <= 0.0 || !shape.is_finite() || !rate.is_finite() {
                    return Err(StatsError::invalid_descriptor(
                        "gamma",
                        "shape and rate must be > 0",
                    ));
                }
            }
            DistributionDescriptor::Beta { alpha, beta } => {
                if *alpha <= 0.0 || *beta <= 0.0 || !alpha.is_finite() || !beta.is_finite() {
                    return Err(StatsError::invalid_descriptor(
                        "beta",
                        "shape parameters must be > 0",
                    ));
                }
            }
            DistributionDescriptor::TruncNormal {
                std, lower, upper, ..
            } => {
                if *std <= 0.0 || !std.is_finite() {
                    return Err(StatsError::invalid_descriptor(
                        "truncnorm",
                        "std must be > 0",
                    ));
                }
                if lower >= upper {
                    return Err(StatsError::invalid_descriptor(
                        "truncnorm",
                        "lower must be < upper",
                    ));
                }
            }
            DistributionDescriptor::Uniform { lower, upper } => {
                if lower >= upper {
                    return Err(StatsError::invalid_descriptor(
                        "uniform",
                        "lower must be < upper",
                    ));
                }
            }
            DistributionDescriptor::Categorical { values, probs } => {
                if values.is_empty() || values.len() != probs.len() {
                    return Err(StatsError::invalid_descriptor(
                        "categorical",
                        "values and probs must be non-empty and equal length",
                    ));
                }
                if probs.iter().any(|p| *p < 0.0 || !p.is_finite()) {
                    return Err(StatsError::invalid_descriptor(
                        "categorical",
                        "probs must be non-negative",
                    ));
                }
                let total: f64 = probs.iter().sum();
                if (total - 1.0).abs() > 1e-6 {
                    return Err(StatsError::invalid_descriptor(
                        "categorical",
                        "probs must sum to 1",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Density (or probability mass) at `x`. Zero outside the support.
    pub fn pdf(&self, x: f64) -> f64 {
        match self {
            DistributionDescriptor::Normal { mean, std } => {
                normal_pdf((x - mean) / std) / std
            }
            DistributionDescriptor::Gamma { shape, rate } => {
                if x <= 0.0 {
                    return 0.0;
                }
                let log_pdf = shape * rate.ln() + (shape - 1.0) * x.ln()
                    - rate * x
                    - crate::stats::special::ln_gamma(*shape);
                log_pdf.exp()
            }
            DistributionDescriptor::Beta { alpha, beta } => {
                if x <= 0.0 || x >= 1.0 {
                    return 0.0;
                }
                let ln_b = crate::stats::special::ln_gamma(*alpha)
                    + crate::stats::special::ln_gamma(*beta)
                    - crate::stats::special::ln_gamma(alpha + beta);
                ((alpha - 1.0) * x.ln() + (beta - 1.0) * (1.0 - x).ln() - ln_b).exp()
            }
            DistributionDescriptor::TruncNormal {
                mean,
                std,
                lower,
                upper,
            } => {
                if x < *lower || x > *upper {
                    return 0.0;
                }
                let z = normal_cdf((upper - mean) / std) - normal_cdf((lower - mean) / std);
                normal_pdf((x - mean) / std) / (std * z)
            }
            DistributionDescriptor::Uniform { lower, upper } => {
                if x < *lower || x > *upper {
                    0.0
                } else {
                    1.0 / (upper - lower)
                }
            }
            DistributionDescriptor::Categorical { values, probs } => values
                .iter()
                .zip(probs.iter())
                .find(|(v, _)| (**v - x).abs() < 1e-9)
                .map(|(_, p)| *p)
                .unwrap_or(0.0),
        }
    }

    /// Cumulative distribution at `x`.
    pub fn cdf(&self, x: f64) -> f64 {
        match self {
            DistributionDescriptor::Normal { mean, std } => normal_cdf((x - mean) / std),
            DistributionDescriptor::Gamma { shape, rate } => {
                if x <= 0.0 {
                    0.0
                } else {
                    regularized_gamma_p(*shape, rate * x)
                }
            }
            DistributionDescriptor::Beta { alpha, beta } => regularized_beta(x, *alpha, *beta),
            DistributionDescriptor::TruncNormal {
                mean,
                std,
                lower,
                upper,
            } => {
                if x <= *lower {
                    return 0.0;
                }
                if x >= *upper {
                    return 1.0;
                }
                let lo = normal_cdf((lower - mean) / std);
                let z = normal_cdf((upper - mean) / std) - lo;
                ((normal_cdf((x - mean) / std) - lo) / z).clamp(0.0, 1.0)
            }
            DistributionDescriptor::Uniform { lower, upper } => {
                ((x - lower) / (upper - lower)).clamp(0.0, 1.0)
            }
            DistributionDescriptor::Categorical { values, probs } => values
                .iter()
                .zip(probs.iter())
                .filter(|(v, _)| **v <= x)
                .map(|(_, p)| *p)
                .sum(),
        }
    }
}

/// Standardized truncation bounds `(a, b)` of a truncated normal.
pub fn truncnorm_bounds(mean: f64, std: f64, lower: f64, upper: f64) -> (f64, f64) {
    ((lower - mean) / std, (upper - mean) / std)
}

// ============================================================================
// Moment-matching fitters
// ============================================================================

/// Fit a gamma distribution whose mean and std match the given moments.
pub fn fit_gamma_mean(mean: f64, std: f64) -> Result<DistributionDescriptor, StatsError> {
    if !(mean > 0.0) || !mean.is_finite() {
        return Err(StatsError::invalid_moments("gamma", "mean must be > 0"));
    }
    if !(std > 0.0) || !std.is_finite() {
        return Err(StatsError::invalid_moments("gamma", "std must be > 0"));
    }

    let var = std * std;
    let shape = mean * mean / var;
    let rate = mean / var;

    Ok(DistributionDescriptor::Gamma { shape, rate })
}

/// Fit a gamma distribution whose mode sits at the given value.
pub fn fit_gamma_mode(mode: f64, std: f64) -> Result<DistributionDescriptor, StatsError> {
    if mode < 0.0 || !mode.is_finite() {
        return Err(StatsError::invalid_moments("gamma", "mode must be >= 0"));
    }
    if !(std > 0.0) || !std.is_finite() {
        return Err(StatsError::invalid_moments("gamma", "std must be > 0"));
    }

    let aux1 = 2.0 * std * std;
    let aux2 = (mode * mode + 2.0 * aux1).sqrt();
    let shape = (mode * mode + mode * aux2) / aux1 + 1.0;
    let rate = (mode + aux2) / aux1;

    Ok(DistributionDescriptor::Gamma { shape, rate })
}

/// Fit a beta distribution from a mean in (0, 1) and a std.
///
/// Means close to 0 or 1 with a large std land outside the admissible region
/// and are rejected rather than returning negative shapes.
pub fn fit_beta(mean: f64, std: f64) -> Result<DistributionDescriptor, StatsError> {
    if !(mean > 0.0 && mean < 1.0) {
        return Err(StatsError::invalid_moments("beta", "mean must be in (0, 1)"));
    }
    if !(std > 0.0) || !std.is_finite() {
        return Err(StatsError::invalid_moments("beta", "std must be > 0"));
    }

    let nu = mean * (1.0 - mean) / (std * std) - 1.0;
    if nu <= 0.0 {
        return Err(StatsError::invalid_moments(
            "beta",
            "std too large for the given mean",
        ));
    }

    Ok(DistributionDescriptor::Beta {
        alpha: mean * nu,
        beta: (1.0 - mean) * nu,
    })
}

/// Fit a truncated normal from the moments of the parent normal plus bounds.
pub fn fit_truncnorm(
    mean: f64,
    std: f64,
    lower: f64,
    upper: f64,
) -> Result<DistributionDescriptor, StatsError> {
    if !(std > 0.0) || !std.is_finite() {
        return Err(StatsError::invalid_moments("truncnorm", "std must be > 0"));
    }
    if lower >= upper {
        return Err(StatsError::invalid_moments(
            "truncnorm",
            "lower must be < upper",
        ));
    }

    Ok(DistributionDescriptor::TruncNormal {
        mean,
        std,
        lower,
        upper,
    })
}

/// Discrete triangular distribution over integers around `center`.
///
/// The value at distance `d` from the center gets integer weight
/// `2·halfwidth − d`, so the center is twice as likely as the edges. Values
/// outside `[lower, upper]` are dropped and the remaining weights are
/// renormalized. `halfwidth = 0` yields the center with probability 1.
pub fn get_values_probs(
    center: i64,
    halfwidth: u32,
    lower: i64,
    upper: i64,
) -> Result<(Vec<i64>, Vec<f64>), StatsError> {
    if lower > upper {
        return Err(StatsError::invalid_moments(
            "categorical",
            "lower must be <= upper",
        ));
    }

    let hw = halfwidth as i64;
    let mut values = Vec::with_capacity(2 * halfwidth as usize + 1);
    let mut weights = Vec::with_capacity(2 * halfwidth as usize + 1);

    for v in (center - hw)..=(center + hw) {
        if v < lower || v > upper {
            continue;
        }
        let d = (v - center).abs();
        // halfwidth 0 would give weight 0; the single value still counts
        let w = if hw == 0 { 1 } else { 2 * hw - d };
        values.push(v);
        weights.push(w as f64);
    }

    let total: f64 = weights.iter().sum();
    if values.is_empty() || total <= 0.0 {
        return Err(StatsError::invalid_moments(
            "categorical",
            "no admissible values within bounds",
        ));
    }

    let probs = weights.iter().map(|w| w / total).collect();
    Ok((values, probs))
}

/// Categorical descriptor built from [`get_values_probs`].
pub fn fit_categorical(
    center: i64,
    halfwidth: u32,
    lower: i64,
    upper: i64,
) -> Result<DistributionDescriptor, StatsError> {
    let (values, probs) = get_values_probs(center, halfwidth, lower, upper)?;
    Ok(DistributionDescriptor::Categorical {
        values: values.into_iter().map(|v| v as f64).collect(),
        probs,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_gamma_mean_matches_moments() {
        let desc = fit_gamma_mean(4.0, 2.0).unwrap();
        match desc {
            DistributionDescriptor::Gamma { shape, rate } => {
                // mean = shape/rate, var = shape/rate²
                assert!((shape / rate - 4.0).abs() < 1e-12);
                assert!((shape / (rate * rate) - 4.0).abs() < 1e-12);
            }
            other => panic!("expected gamma, got {:?}", other),
        }
    }

    #[test]
    fn test_fit_gamma_mode_places_mode() {
        let desc = fit_gamma_mode(3.0, 0.8).unwrap();
        match desc {
            DistributionDescriptor::Gamma { shape, rate } => {
                // mode = (shape − 1)/rate for shape > 1
                assert!(shape > 1.0);
                assert!(((shape - 1.0) / rate - 3.0).abs() < 1e-9);
            }
            other => panic!("expected gamma, got {:?}", other),
        }
    }

    #[test]
    fn test_fit_gamma_rejects_bad_moments() {
        assert!(fit_gamma_mean(0.0, 1.0).is_err());
        assert!(fit_gamma_mean(1.0, 0.0).is_err());
        assert!(fit_gamma_mean(-1.0, 1.0).is_err());
        assert!(fit_gamma_mode(-0.1, 1.0).is_err());
    }

    #[test]
    fn test_fit_beta_matches_mean() {
        let desc = fit_beta(0.3, 0.1).unwrap();
        match desc {
            DistributionDescriptor::Beta { alpha, beta } => {
                assert!((alpha / (alpha + beta) - 0.3).abs() < 1e-12);
                assert!(alpha > 0.0 && beta > 0.0);
            }
            other => panic!("expected beta, got {:?}", other),
        }
    }

    #[test]
    fn test_fit_beta_rejects_inadmissible() {
        assert!(fit_beta(1.2, 0.1).is_err());
        assert!(fit_beta(0.5, 0.0).is_err());
        // std too large for a mean near the edge
        assert!(fit_beta(0.01, 0.4).is_err());
    }

    #[test]
    fn test_fit_truncnorm_bounds() {
        let desc = fit_truncnorm(10.0, 2.0, 6.0, 18.0).unwrap();
        match desc {
            DistributionDescriptor::TruncNormal {
                mean,
                std,
                lower,
                upper,
            } => {
                let (a, b) = truncnorm_bounds(mean, std, lower, upper);
                assert!((a + 2.0).abs() < 1e-12);
                assert!((b - 4.0).abs() < 1e-12);
            }
            other => panic!("expected truncnorm, got {:?}", other),
        }
        assert!(fit_truncnorm(10.0, 2.0, 18.0, 6.0).is_err());
    }

    #[test]
    fn test_values_probs_triangle() {
        let (values, probs) = get_values_probs(5, 2, 0, 10).unwrap();
        assert_eq!(values, vec![3, 4, 5, 6, 7]);
        // raw weights 2 3 4 3 2, total 14
        assert!((probs[2] - 4.0 / 14.0).abs() < 1e-12);
        assert!((probs[0] - 2.0 / 14.0).abs() < 1e-12);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_values_probs_clipped_at_bounds() {
        let (values, probs) = get_values_probs(1, 2, 0, 10).unwrap();
        assert_eq!(values, vec![0, 1, 2, 3]);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        // center keeps the largest probability after clipping
        assert!(probs[1] > probs[0] && probs[1] > probs[3]);
    }

    #[test]
    fn test_values_probs_degenerate() {
        let (values, probs) = get_values_probs(4, 0, 0, 10).unwrap();
        assert_eq!(values, vec![4]);
        assert_eq!(probs, vec![1.0]);

        assert!(get_values_probs(20, 1, 0, 10).is_err());
    }

    #[test]
    fn test_gamma_cdf_monotone() {
        let desc = fit_gamma_mean(4.0, 2.0).unwrap();
        let mut prev = 0.0;
        for i in 1..20 {
            let x = i as f64;
            let c = desc.cdf(x);
            assert!(c >= prev, "cdf not monotone at {}", x);
            prev = c;
        }
        assert!(prev > 0.999, "cdf should approach 1, got {}", prev);
    }

    #[test]
    fn test_truncnorm_pdf_zero_outside() {
        let desc = fit_truncnorm(10.0, 2.0, 8.0, 12.0).unwrap();
        assert_eq!(desc.pdf(7.9), 0.0);
        assert_eq!(desc.pdf(12.1), 0.0);
        assert!(desc.pdf(10.0) > 0.0);
        assert_eq!(desc.cdf(8.0), 0.0);
        assert_eq!(desc.cdf(12.0), 1.0);
    }

    #[test]
    fn test_descriptor_serde_round_trip() {
        let desc = fit_gamma_mean(4.0, 2.0).unwrap();
        let json = serde_json::to_string(&desc).unwrap();
        let back: DistributionDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(desc, back);

        let parsed: DistributionDescriptor =
            serde_json::from_str(r#"{"family":"normal","mean":1.5,"std":0.2}"#).unwrap();
        assert_eq!(
            parsed,
            DistributionDescriptor::Normal {
                mean: 1.5,
                std: 0.2
            }
        );
    }

    #[test]
    fn test_validate_catches_bad_descriptors() {
        let bad = DistributionDescriptor::Gamma {
            shape: -1.0,
            rate: 2.0,
        };
        assert!(bad.validate().is_err());

        let bad = DistributionDescriptor::Categorical {
            values: vec![1.0, 2.0],
            probs: vec![0.9, 0.2],
        };
        assert!(bad.validate().is_err());
    }
}
