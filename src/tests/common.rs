//! Shared scenario builders for the integration and stress suites.
//!
//! The canonical fixture is a two-node tree: a leaky soil reservoir whose
//! drainage fraction is a hierarchical parameter, plus a management rule
//! that skims level above a threshold. Truth trajectories and noisy
//! measurements are synthesized from the same dynamics.

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::stats::special::sample_standard_normal;
use crate::{
    Constraint, DistributionDescriptor, Domain, EvalWindow, Forcing, HPFunction, KeyRef,
    MemoryForcing, MemoryObservations, ModelError, ModelPath, ModelTree, ObservationSet, ParamSpec,
    Production, QuantityKey, Requirement, Submodel, TransitionCtx, TransitionOutput, Unit,
};

pub(crate) const CAPACITY_MM: f64 = 100.0;

pub(crate) fn rain_key() -> QuantityKey {
    QuantityKey::new(ModelPath::root(Domain::Atmosphere).child("weather"), "rain")
}

pub(crate) fn level_key() -> QuantityKey {
    QuantityKey::new(ModelPath::root(Domain::Soil).child("reservoir"), "level")
}

pub(crate) fn release_key() -> QuantityKey {
    QuantityKey::new(ModelPath::root(Domain::Management).child("release"), "release")
}

/// Leaky storage: level grows with infiltration and drains by a daily
/// fraction drawn from the configured parameter source.
#[derive(Debug, Clone)]
pub(crate) struct Reservoir {
    pub(crate) capacity: f64,
    pub(crate) drain: HPFunction,
}

impl Reservoir {
    /// Gamma drainage with mean 0.10 and std 0.02, redrawn every epoch.
    pub(crate) fn stochastic() -> Self {
        Self {
            capacity: CAPACITY_MM,
            drain: HPFunction::stochastic(DistributionDescriptor::Gamma {
                shape: 25.0,
                rate: 250.0,
            }),
        }
    }

    pub(crate) fn fixed(fraction: f64) -> Self {
        Self {
            capacity: CAPACITY_MM,
            drain: HPFunction::constant(fraction),
        }
    }
}

impl Submodel for Reservoir {
    fn name(&self) -> &str {
        "reservoir"
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![
            Requirement::previous("level", KeyRef::own("level"), Unit::Millimeter),
            Requirement::current("infil", KeyRef::absolute(rain_key()), Unit::Millimeter),
        ]
    }

    fn produces(&self) -> Vec<Production> {
        vec![
            Production::state("level", Unit::Millimeter),
            Production::rate("drawn", Unit::Millimeter),
        ]
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new("drain", Unit::Fraction, self.drain.clone())]
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::bounds("level", 0.0, self.capacity)]
    }

    fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError> {
        let level = ctx.input("level")?;
        let drawn = ctx.param("drain")? * level;
        Ok(TransitionOutput::new()
            .set("level", level + ctx.input("infil")? - drawn)
            .set("drawn", drawn))
    }

    fn boxed(&self) -> Box<dyn Submodel> {
        Box::new(self.clone())
    }
}

/// Management rule: skim a fraction of whatever sits above the threshold.
#[derive(Debug, Clone)]
pub(crate) struct Release {
    pub(crate) threshold: f64,
    pub(crate) fraction: f64,
}

impl Submodel for Release {
    fn name(&self) -> &str {
        "release"
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![Requirement::current(
            "level",
            KeyRef::absolute(level_key()),
            Unit::Millimeter,
        )]
    }

    fn produces(&self) -> Vec<Production> {
        vec![Production::rate("release", Unit::Millimeter)]
    }

    fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError> {
        let level = ctx.input("level")?;
        let release = if level > self.threshold {
            self.fraction * (level - self.threshold)
        } else {
            0.0
        };
        Ok(TransitionOutput::new().set("release", release))
    }

    fn boxed(&self) -> Box<dyn Submodel> {
        Box::new(self.clone())
    }
}

/// Reservoir + release tree, validated and initialized at `initial_level`.
pub(crate) fn scenario_tree(initial_level: f64, reservoir: Reservoir) -> ModelTree {
    let mut tree = ModelTree::new();
    tree.register(&ModelPath::root(Domain::Soil), reservoir).unwrap();
    tree.register(
        &ModelPath::root(Domain::Management),
        Release {
            threshold: 30.0,
            fraction: 0.25,
        },
    )
    .unwrap();
    tree.define_forcing(rain_key(), Unit::Millimeter).unwrap();
    tree.set_initial(&level_key(), initial_level, Unit::Millimeter).unwrap();
    tree.validate().unwrap();
    tree
}

/// Alternating wet and dry spells, deterministic per day index.
pub(crate) fn rain_for_day(day_index: u32) -> f64 {
    if day_index % 5 < 2 {
        8.0
    } else {
        1.0
    }
}

pub(crate) struct SyntheticTruth {
    pub(crate) levels: Vec<f64>,
    pub(crate) forcing: MemoryForcing,
    pub(crate) observations: MemoryObservations,
}

/// Steps a truth tree across the window, recording its level trajectory,
/// the rain series and noisy level measurements every `obs_every` days.
pub(crate) fn synthesize(
    window: &EvalWindow,
    initial_level: f64,
    seed: u64,
    obs_std: f64,
    obs_every: u32,
) -> SyntheticTruth {
    let mut truth = scenario_tree(initial_level, Reservoir::stochastic());
    let mut truth_rng = SmallRng::seed_from_u64(seed);
    let mut obs_rng = SmallRng::seed_from_u64(seed.wrapping_add(1));

    let mut levels = Vec::new();
    let mut forcing = MemoryForcing::new();
    let mut observations = MemoryObservations::new();

    for (day_index, date) in window.dates().enumerate() {
        let day = Forcing::new().with(rain_key(), rain_for_day(day_index as u32), Unit::Millimeter);
        truth.step(&day, &mut truth_rng).unwrap();
        let level = truth.read(&level_key()).unwrap();
        levels.push(level);

        if day_index as u32 % obs_every == 0 {
            let noisy = (level + obs_std * sample_standard_normal(&mut obs_rng)).max(0.0);
            observations.insert(
                date,
                ObservationSet::new().with(level_key(), noisy, obs_std, Unit::Millimeter),
            );
        }
        forcing.insert(date, day);
    }

    SyntheticTruth {
        levels,
        forcing,
        observations,
    }
}
