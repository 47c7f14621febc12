//! Bootstrap particle filter over cloned model trees.
//!
//! Each particle owns a full tree plus its own RNG stream. A step propagates
//! every particle through one epoch (transition plus process noise), weights
//! the ensemble against the epoch's observations in log space, and resamples
//! when the effective sample size collapses below the configured fraction.
//!
//! Weight mass is never recovered silently: when the ensemble degenerates the
//! step fails with [`FilterError::Degenerate`] and the caller decides whether
//! to rerun with a wider prior or more particles.

use indexmap::IndexMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{FilterError, TreeError};
use crate::stats::draw;
use crate::stats::special::sample_standard_normal;
use crate::tree::{Forcing, ModelTree, QuantityKey};

use super::diagnostics::{
    credible_interval, effective_sample_size, weight_entropy, weighted_mean_std, StateEstimate,
    StateStat, StepDiagnostics,
};
use super::resample::ResamplingScheme;
use super::{Estimator, InitialEnsemble, ObservationSet};

// ============================================================================
// Configuration
// ============================================================================

fn default_n_particles() -> usize {
    500
}

fn default_resample_threshold() -> f64 {
    0.5
}

fn default_relative_std() -> f64 {
    1e-3
}

/// Noise magnitude for one quantity.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseStd {
    /// Fixed standard deviation in the quantity's defined unit
    Absolute(f64),
    /// Standard deviation as a fraction of the current magnitude
    Relative(f64),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NoiseOverride {
    pub key: QuantityKey,
    pub std: NoiseStd,
}

/// Artificial process noise injected into every state after propagation.
///
/// Without it, particles sharing an ancestor after resampling stay identical
/// forever and the ensemble collapses onto a handful of trajectories.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessNoise {
    /// Fraction of a state's magnitude used when no override matches
    #[serde(default = "default_relative_std")]
    pub default_relative_std: f64,
    #[serde(default)]
    pub overrides: Vec<NoiseOverride>,
}

impl Default for ProcessNoise {
    fn default() -> Self {
        Self {
            default_relative_std: default_relative_std(),
            overrides: Vec::new(),
        }
    }
}

impl ProcessNoise {
    fn std_for(&self, key: &QuantityKey, value: f64) -> f64 {
        for over in &self.overrides {
            if &over.key == key {
                return match over.std {
                    NoiseStd::Absolute(std) => std,
                    NoiseStd::Relative(rel) => rel * value.abs(),
                };
            }
        }
        self.default_relative_std * value.abs()
    }
}

/// What a particle failure during propagation does to the whole step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleFailurePolicy {
    /// Fail the step with the first particle's error
    Abort,
    /// Zero the particle's weight and keep going
    Discard,
}

impl Default for ParticleFailurePolicy {
    fn default() -> Self {
        ParticleFailurePolicy::Abort
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BpfConfig {
    #[serde(default = "default_n_particles")]
    pub n_particles: usize,
    /// Resample when ESS drops below this fraction of the ensemble size
    #[serde(default = "default_resample_threshold")]
    pub resample_threshold: f64,
    #[serde(default)]
    pub scheme: ResamplingScheme,
    #[serde(default)]
    pub process_noise: ProcessNoise,
    #[serde(default)]
    pub failure_policy: ParticleFailurePolicy,
    /// Master seed for reproducible runs; entropy-seeded when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for BpfConfig {
    fn default() -> Self {
        Self {
            n_particles: default_n_particles(),
            resample_threshold: default_resample_threshold(),
            scheme: ResamplingScheme::default(),
            process_noise: ProcessNoise::default(),
            failure_policy: ParticleFailurePolicy::default(),
            seed: None,
        }
    }
}

impl BpfConfig {
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.n_particles == 0 {
            return Err(FilterError::InvalidConfig(
                "n_particles must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.resample_threshold) {
            return Err(FilterError::InvalidConfig(format!(
                "resample_threshold {} must lie in [0, 1]",
                self.resample_threshold
            )));
        }
        if self.process_noise.default_relative_std < 0.0 {
            return Err(FilterError::InvalidConfig(
                "process noise std must be non-negative".to_string(),
            ));
        }
        for over in &self.process_noise.overrides {
            let bad = match over.std {
                NoiseStd::Absolute(std) => std < 0.0,
                NoiseStd::Relative(rel) => rel < 0.0,
            };
            if bad {
                return Err(FilterError::InvalidConfig(format!(
                    "process noise std for {} must be non-negative",
                    over.key
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Filter
// ============================================================================

#[derive(Debug, Clone)]
struct Particle {
    tree: ModelTree,
    rng: SmallRng,
}

/// Sequential importance resampling with the transition prior as proposal.
#[derive(Debug)]
pub struct BootstrapFilter {
    config: BpfConfig,
    particles: Vec<Particle>,
    weights: Vec<f64>,
    rng: SmallRng,
    epoch: u64,
}

impl BootstrapFilter {
    pub fn new(config: BpfConfig) -> Result<Self, FilterError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self {
            config,
            particles: Vec::new(),
            weights: Vec::new(),
            rng,
            epoch: 0,
        })
    }

    pub fn config(&self) -> &BpfConfig {
        &self.config
    }

    /// Normalized ensemble weights, empty before initialization.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_initialized(&self) -> bool {
        !self.particles.is_empty()
    }

    fn ensure_initialized(&self) -> Result<(), FilterError> {
        if self.particles.is_empty() {
            return Err(FilterError::NotInitialized);
        }
        Ok(())
    }

    /// Clone the template into `n_particles` particles and draw each prior
    /// state from its descriptor. Weights start uniform.
    pub fn initialize(&mut self, ensemble: &InitialEnsemble) -> Result<(), FilterError> {
        let template = ensemble.template();
        if !template.is_validated() {
            return Err(FilterError::Tree(TreeError::NotValidated));
        }

        let n = self.config.n_particles;
        let mut particles = Vec::with_capacity(n);
        for index in 0..n {
            let mut tree = template.clone_tree();
            let mut rng = SmallRng::seed_from_u64(self.rng.gen());
            for (key, descriptor) in ensemble.priors() {
                let value = draw(descriptor, &mut rng)?;
                tree.write_state(key, value)
                    .map_err(|source| FilterError::ParticleFailed { index, source })?;
            }
            particles.push(Particle { tree, rng });
        }

        self.epoch = template.epoch();
        self.particles = particles;
        self.weights = vec![1.0 / n as f64; n];
        info!(particles = n, epoch = self.epoch, "ensemble initialized");
        Ok(())
    }

    /// Advance the ensemble one epoch and assimilate `observations` if any.
    ///
    /// Without observations the step is pure propagation: weights are left
    /// untouched apart from discard bookkeeping.
    pub fn step(
        &mut self,
        forcing: &Forcing,
        observations: Option<&ObservationSet>,
    ) -> Result<StepDiagnostics, FilterError> {
        self.ensure_initialized()?;
        let epoch = self.epoch + 1;

        let discarded = self.propagate(forcing, epoch)?;

        match observations {
            Some(obs) if !obs.is_empty() => self.reweight(obs, epoch)?,
            _ => {
                if discarded > 0 {
                    self.renormalize(epoch)?;
                }
            }
        }

        let ess = effective_sample_size(&self.weights);
        let entropy = weight_entropy(&self.weights);
        let mut resampled = false;
        if ess < self.config.resample_threshold * self.particles.len() as f64 {
            self.resample();
            resampled = true;
        }

        self.epoch = epoch;
        debug!(epoch, ess, resampled, discarded, "filter step");
        Ok(StepDiagnostics {
            epoch,
            ess,
            entropy,
            resampled,
            discarded,
        })
    }

    /// Weighted summary of every state quantity at the current epoch.
    pub fn state_estimate(&self) -> Result<StateEstimate, FilterError> {
        self.ensure_initialized()?;

        let keys: Vec<QuantityKey> = self.particles[0]
            .tree
            .state_vector()?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let mut states = IndexMap::new();
        for key in keys {
            let mut values = Vec::with_capacity(self.particles.len());
            for particle in &self.particles {
                values.push(particle.tree.read(&key)?);
            }
            let (mean, std) = weighted_mean_std(&values, &self.weights);
            let ci90 = credible_interval(&values, &self.weights, 0.90);
            states.insert(key, StateStat { mean, std, ci90 });
        }

        Ok(StateEstimate {
            epoch: self.epoch,
            states,
        })
    }

    fn propagate(&mut self, forcing: &Forcing, epoch: u64) -> Result<usize, FilterError> {
        let noise = &self.config.process_noise;
        let results: Vec<Result<(), TreeError>> = self
            .particles
            .par_iter_mut()
            .map(|particle| step_particle(particle, forcing, noise))
            .collect();

        let mut discarded = 0usize;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(source) = result {
                match self.config.failure_policy {
                    ParticleFailurePolicy::Abort => {
                        return Err(FilterError::ParticleFailed { index, source });
                    }
                    ParticleFailurePolicy::Discard => {
                        warn!(index, error = %source, "particle discarded");
                        self.weights[index] = 0.0;
                        discarded += 1;
                    }
                }
            }
        }

        if discarded == self.particles.len() {
            return Err(FilterError::Degenerate { epoch });
        }
        Ok(discarded)
    }

    /// Multiply carried weights by each observation's Gaussian likelihood,
    /// in log space, then normalize.
    fn reweight(&mut self, observations: &ObservationSet, epoch: u64) -> Result<(), FilterError> {
        let mut logw: Vec<f64> = self
            .weights
            .iter()
            .map(|&w| if w > 0.0 { w.ln() } else { f64::NEG_INFINITY })
            .collect();

        for record in observations.iter() {
            if record.std <= 0.0 || !record.std.is_finite() {
                return Err(FilterError::InvalidConfig(format!(
                    "observation std for {} must be positive",
                    record.key
                )));
            }
            for (particle, lw) in self.particles.iter().zip(logw.iter_mut()) {
                if lw.is_finite() {
                    let predicted = particle.tree.read_in(&record.key, record.unit)?;
                    let z = (record.value - predicted) / record.std;
                    *lw += -0.5 * z * z;
                }
            }
        }

        let max_lw = logw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max_lw.is_finite() {
            return Err(FilterError::Degenerate { epoch });
        }

        let mut total = 0.0;
        for (w, lw) in self.weights.iter_mut().zip(&logw) {
            *w = (lw - max_lw).exp();
            total += *w;
        }
        if total <= 0.0 || !total.is_finite() {
            return Err(FilterError::Degenerate { epoch });
        }
        for w in &mut self.weights {
            *w /= total;
        }
        Ok(())
    }

    fn renormalize(&mut self, epoch: u64) -> Result<(), FilterError> {
        let total: f64 = self.weights.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(FilterError::Degenerate { epoch });
        }
        for w in &mut self.weights {
            *w /= total;
        }
        Ok(())
    }

    /// Replace the ensemble by ancestors drawn under the configured scheme.
    /// Every clone gets a fresh RNG stream so siblings diverge again.
    fn resample(&mut self) {
        let n = self.particles.len();
        let indices = self.config.scheme.resample(&self.weights, n, &mut self.rng);

        let mut next = Vec::with_capacity(n);
        for &ancestor in &indices {
            let mut particle = self.particles[ancestor].clone();
            particle.rng = SmallRng::seed_from_u64(self.rng.gen());
            next.push(particle);
        }
        self.particles = next;

        let uniform = 1.0 / n as f64;
        for w in &mut self.weights {
            *w = uniform;
        }
        debug!(n, "ensemble resampled");
    }
}

fn step_particle(
    particle: &mut Particle,
    forcing: &Forcing,
    noise: &ProcessNoise,
) -> Result<(), TreeError> {
    particle.tree.step(forcing, &mut particle.rng)?;
    for (key, value) in particle.tree.state_vector()? {
        let std = noise.std_for(&key, value);
        if std > 0.0 {
            let jitter = std * sample_standard_normal(&mut particle.rng);
            particle.tree.write_state(&key, value + jitter)?;
        }
    }
    Ok(())
}

impl Estimator for BootstrapFilter {
    fn initialize(&mut self, ensemble: &InitialEnsemble) -> Result<(), FilterError> {
        BootstrapFilter::initialize(self, ensemble)
    }

    fn step(
        &mut self,
        forcing: &Forcing,
        observations: Option<&ObservationSet>,
    ) -> Result<StepDiagnostics, FilterError> {
        BootstrapFilter::step(self, forcing, observations)
    }

    fn state_estimate(&self) -> Result<StateEstimate, FilterError> {
        BootstrapFilter::state_estimate(self)
    }
}

// ============================================================================
// Tests
// ============================================================================
