//! Random variate sampling for distribution descriptors.
//!
//! Each sampler owns its RNG so that independently seeded samplers (one per
//! particle, one per worker) never share a random stream.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution, Gamma, Normal};

use crate::errors::StatsError;
use crate::stats::fit::DistributionDescriptor;

/// Rejection draw cap for truncated normals with pathological bounds.
const MAX_REJECTS: usize = 1000;

/// Draw one variate from `desc` using the supplied RNG.
pub fn draw<R: Rng>(desc: &DistributionDescriptor, rng: &mut R) -> Result<f64, StatsError> {
    desc.validate()?;

    match desc {
        DistributionDescriptor::Normal { mean, std } => {
            let dist = Normal::new(*mean, *std)
                .map_err(|e| StatsError::sampling_failed("normal", e.to_string()))?;
            Ok(dist.sample(rng))
        }
        DistributionDescriptor::Gamma { shape, rate } => {
            let dist = Gamma::new(*shape, 1.0 / rate)
                .map_err(|e| StatsError::sampling_failed("gamma", e.to_string()))?;
            Ok(dist.sample(rng))
        }
        DistributionDescriptor::Beta { alpha, beta } => {
            let dist = Beta::new(*alpha, *beta)
                .map_err(|e| StatsError::sampling_failed("beta", e.to_string()))?;
            Ok(dist.sample(rng))
        }
        DistributionDescriptor::TruncNormal {
            mean,
            std,
            lower,
            upper,
        } => {
            let dist = Normal::new(*mean, *std)
                .map_err(|e| StatsError::sampling_failed("truncnorm", e.to_string()))?;
            for _ in 0..MAX_REJECTS {
                let x = dist.sample(rng);
                if x >= *lower && x <= *upper {
                    return Ok(x);
                }
            }
            Err(StatsError::sampling_failed(
                "truncnorm",
                format!("no draw within [{lower}, {upper}] after {MAX_REJECTS} attempts"),
            ))
        }
        DistributionDescriptor::Uniform { lower, upper } => Ok(rng.gen_range(*lower..*upper)),
        DistributionDescriptor::Categorical { values, probs } => {
            let u: f64 = rng.gen();
            let mut cumsum = 0.0;
            for (v, p) in values.iter().zip(probs.iter()) {
                cumsum += p;
                if u < cumsum {
                    return Ok(*v);
                }
            }
            // u landed in the rounding slack past the last cumsum
            Ok(*values.last().ok_or_else(|| {
                StatsError::invalid_descriptor("categorical", "values must be non-empty")
            })?)
        }
    }
}

/// Sampler owning a seedable RNG.
#[derive(Debug, Clone)]
pub struct RvSampler {
    rng: SmallRng,
}

impl RvSampler {
    /// Create a sampler seeded from entropy.
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    /// Create a sampler with a fixed seed (reproducible runs and tests).
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Draw a single variate.
    pub fn sample(&mut self, desc: &DistributionDescriptor) -> Result<f64, StatsError> {
        draw(desc, &mut self.rng)
    }

    /// Draw `n` variates.
    pub fn sample_n(
        &mut self,
        desc: &DistributionDescriptor,
        n: usize,
    ) -> Result<Vec<f64>, StatsError> {
        desc.validate()?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(draw(desc, &mut self.rng)?);
        }
        Ok(out)
    }
}

impl Default for RvSampler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
