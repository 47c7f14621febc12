//! State estimation over model trees.
//!
//! An [`Estimator`] consumes per-epoch forcing and (optionally) observations
//! and maintains a posterior over the tree's state quantities. The shipped
//! implementation is a bootstrap particle filter ([`BootstrapFilter`]); the
//! trait keeps the evaluation driver agnostic of the estimation scheme.

mod bootstrap;
mod diagnostics;
mod resample;

pub use bootstrap::{
    BootstrapFilter, BpfConfig, NoiseOverride, NoiseStd, ParticleFailurePolicy, ProcessNoise,
};
pub use diagnostics::{StateEstimate, StateStat, StepDiagnostics};
pub use resample::ResamplingScheme;

use serde::{Deserialize, Serialize};

use crate::errors::FilterError;
use crate::stats::DistributionDescriptor;
use crate::tree::{Forcing, ModelTree, QuantityKey};
use crate::units::Unit;

// ============================================================================
// Observations
// ============================================================================

/// One measured quantity with its Gaussian error model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservationRecord {
    /// Key of the model quantity the measurement is compared against
    pub key: QuantityKey,
    pub value: f64,
    /// Measurement standard deviation, strictly positive
    pub std: f64,
    pub unit: Unit,
}

/// The measurements available for one epoch.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObservationSet {
    records: Vec<ObservationRecord>,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: QuantityKey, value: f64, std: f64, unit: Unit) -> Self {
        self.records.push(ObservationRecord {
            key,
            value,
            std,
            unit,
        });
        self
    }

    pub fn push(&mut self, record: ObservationRecord) {
        self.records.push(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObservationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Initial ensemble
// ============================================================================

/// A validated template tree plus prior distributions for uncertain states.
///
/// States without a prior start at the template's initial value in every
/// particle.
#[derive(Debug, Clone)]
pub struct InitialEnsemble {
    template: ModelTree,
    priors: Vec<(QuantityKey, DistributionDescriptor)>,
}

impl InitialEnsemble {
    pub fn new(template: ModelTree) -> Self {
        Self {
            template,
            priors: Vec::new(),
        }
    }

    pub fn with_prior(mut self, key: QuantityKey, descriptor: DistributionDescriptor) -> Self {
        self.priors.push((key, descriptor));
        self
    }

    pub fn template(&self) -> &ModelTree {
        &self.template
    }

    pub fn priors(&self) -> impl Iterator<Item = (&QuantityKey, &DistributionDescriptor)> {
        self.priors.iter().map(|(k, d)| (k, d))
    }
}

// ============================================================================
// Estimator
// ============================================================================

/// Sequential state estimator over a model tree.
pub trait Estimator: Send {
    /// Build the internal ensemble from a template and its priors.
    fn initialize(&mut self, ensemble: &InitialEnsemble) -> Result<(), FilterError>;

    /// Advance one epoch. `observations` absent or empty means pure
    /// propagation.
    fn step(
        &mut self,
        forcing: &Forcing,
        observations: Option<&ObservationSet>,
    ) -> Result<StepDiagnostics, FilterError>;

    /// Posterior summary of every state quantity at the current epoch.
    fn state_estimate(&self) -> Result<StateEstimate, FilterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::fit_gamma_mean;
    use crate::tree::{Domain, ModelPath};

    #[test]
    fn test_observation_set_builder() {
        let key: QuantityKey = "soil.tank:level".parse().unwrap();
        let obs = ObservationSet::new().with(key.clone(), 12.0, 0.5, Unit::Millimeter);
        assert_eq!(obs.len(), 1);
        assert!(!obs.is_empty());
        let rec = obs.iter().next().unwrap();
        assert_eq!(rec.key, key);
        assert_eq!(rec.value, 12.0);
        assert_eq!(rec.std, 0.5);
    }

    #[test]
    fn test_initial_ensemble_collects_priors() {
        let mut template = ModelTree::new();
        template
            .define_forcing(
                QuantityKey::new(ModelPath::root(Domain::Atmosphere).child("weather"), "rain"),
                Unit::Millimeter,
            )
            .unwrap();
        let key: QuantityKey = "soil.tank:level".parse().unwrap();
        let ens = InitialEnsemble::new(template)
            .with_prior(key.clone(), fit_gamma_mean(10.0, 2.0).unwrap());
        let collected: Vec<_> = ens.priors().collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].0, &key);
    }
}
