//! Stress tests for scheduling depth, layered width and long filter runs.
//!
//! Tests verify system behavior at scale:
//! - Deep dependency chains registered out of order
//! - Wide layered soil profiles
//! - Long-horizon tree stability under stochastic parameters
//! - Large ensembles over multi-week windows
//! - Forced resampling pressure without ensemble collapse
//! - Partial particle failures under the discard policy

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::tests::common::{level_key, rain_key, scenario_tree, synthesize, Reservoir};
use crate::{
    BootstrapFilter, BpfConfig, Constraint, DistributionDescriptor, Domain, EvalRun, EvalWindow,
    Forcing, InitialEnsemble, KeyRef, ModelError, ModelPath, ModelTree, ParticleFailurePolicy,
    Production, QuantityKey, Requirement, ResamplingScheme, Submodel, TransitionCtx,
    TransitionOutput, Unit,
};

fn window(days: u64) -> EvalWindow {
    let start = chrono::NaiveDate::from_ymd_opt(2021, 5, 1).unwrap();
    let end = start
        .checked_add_days(chrono::Days::new(days - 1))
        .unwrap();
    EvalWindow::new(start, end).unwrap()
}

// =========================================================================
// Scheduling Depth
// =========================================================================

#[derive(Debug, Clone)]
struct Source;

impl Submodel for Source {
    fn name(&self) -> &str {
        "link00"
    }
    fn requires(&self) -> Vec<Requirement> {
        vec![Requirement::current(
            "rain",
            KeyRef::absolute(rain_key()),
            Unit::Millimeter,
        )]
    }
    fn produces(&self) -> Vec<Production> {
        vec![Production::rate("x", Unit::Millimeter)]
    }
    fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError> {
        Ok(TransitionOutput::new().set("x", ctx.input("rain")?))
    }
    fn boxed(&self) -> Box<dyn Submodel> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
struct Link {
    name: String,
    upstream: QuantityKey,
}

impl Submodel for Link {
    fn name(&self) -> &str {
        &self.name
    }
    fn requires(&self) -> Vec<Requirement> {
        vec![Requirement::current(
            "up",
            KeyRef::absolute(self.upstream.clone()),
            Unit::Millimeter,
        )]
    }
    fn produces(&self) -> Vec<Production> {
        vec![Production::rate("x", Unit::Millimeter)]
    }
    fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError> {
        Ok(TransitionOutput::new().set("x", ctx.input("up")? + 1.0))
    }
    fn boxed(&self) -> Box<dyn Submodel> {
        Box::new(self.clone())
    }
}

#[test]
fn test_deep_chain_registered_in_reverse_still_orders() {
    let crop = ModelPath::root(Domain::Crop);
    let mut tree = ModelTree::new();

    // register the far end of the chain first to stress the scheduler
    for i in (1..=24u32).rev() {
        tree.register(
            &crop,
            Link {
                name: format!("link{i:02}"),
                upstream: QuantityKey::new(crop.child(format!("link{:02}", i - 1)), "x"),
            },
        )
        .unwrap();
    }
    tree.register(&crop, Source).unwrap();
    tree.define_forcing(rain_key(), Unit::Millimeter).unwrap();
    tree.validate().unwrap();

    let mut rng = SmallRng::seed_from_u64(1);
    tree.step(&Forcing::new().with(rain_key(), 5.0, Unit::Millimeter), &mut rng)
        .unwrap();

    let last = QuantityKey::new(crop.child("link24"), "x");
    assert!((tree.read(&last).unwrap() - 29.0).abs() < 1e-12, "5 mm plus 24 increments");
}

// =========================================================================
// Layered Width
// =========================================================================

#[derive(Debug, Clone)]
struct Column {
    layers: u16,
}

impl Submodel for Column {
    fn name(&self) -> &str {
        "column"
    }
    fn requires(&self) -> Vec<Requirement> {
        (0..self.layers)
            .map(|l| {
                Requirement::previous(
                    format!("w{l}"),
                    KeyRef::own("w").at_layer(l),
                    Unit::Millimeter,
                )
            })
            .collect()
    }
    fn produces(&self) -> Vec<Production> {
        (0..self.layers)
            .map(|l| Production::state("w", Unit::Millimeter).at_layer(l))
            .collect()
    }
    fn constraints(&self) -> Vec<Constraint> {
        (0..self.layers)
            .map(|l| Constraint::bounds("w", 0.0, 50.0).at_layer(l))
            .collect()
    }
    fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError> {
        let mut out = TransitionOutput::new();
        for l in 0..self.layers {
            out = out.set_layer("w", l, ctx.input(&format!("w{l}"))? * 0.9);
        }
        Ok(out)
    }
    fn boxed(&self) -> Box<dyn Submodel> {
        Box::new(self.clone())
    }
}

#[test]
fn test_wide_layered_profile_steps_every_layer() {
    let layers = 40u16;
    let mut tree = ModelTree::new();
    tree.register(&ModelPath::root(Domain::Soil), Column { layers }).unwrap();

    let path = ModelPath::root(Domain::Soil).child("column");
    for l in 0..layers {
        tree.set_initial(&QuantityKey::layered(path.clone(), "w", l), 10.0, Unit::Millimeter)
            .unwrap();
    }
    tree.validate().unwrap();

    let mut rng = SmallRng::seed_from_u64(2);
    for _ in 0..3 {
        tree.step(&Forcing::new(), &mut rng).unwrap();
    }

    for l in 0..layers {
        let w = tree.read(&QuantityKey::layered(path.clone(), "w", l)).unwrap();
        assert!((w - 7.29).abs() < 1e-9, "layer {l} holds {w}");
    }
}

// =========================================================================
// Long-horizon Stability
// =========================================================================

#[test]
fn test_long_horizon_run_stays_bounded() {
    let mut tree = scenario_tree(10.0, Reservoir::stochastic());
    let mut rng = SmallRng::seed_from_u64(3);

    for day in 0..400u32 {
        let rain = if day % 5 < 2 { 8.0 } else { 1.0 };
        tree.step(&Forcing::new().with(rain_key(), rain, Unit::Millimeter), &mut rng)
            .unwrap();
        let level = tree.read(&level_key()).unwrap();
        assert!(level.is_finite(), "day {day}");
        assert!((0.0..=100.0).contains(&level), "day {day}: level {level}");
    }
    assert_eq!(tree.epoch(), 400);
}

// =========================================================================
// Filter at Scale
// =========================================================================

#[test]
fn test_large_ensemble_long_window_stays_live() {
    let window = window(40);
    let truth = synthesize(&window, 10.0, 61, 0.5, 4);

    let template = scenario_tree(15.0, Reservoir::stochastic());
    let ensemble = InitialEnsemble::new(template)
        .with_prior(level_key(), crate::fit_truncnorm(15.0, 5.0, 0.0, 100.0).unwrap());

    let config = BpfConfig {
        n_particles: 800,
        seed: Some(62),
        ..BpfConfig::default()
    };
    let mut filter = BootstrapFilter::new(config).unwrap();
    filter.initialize(&ensemble).unwrap();

    let mut run = EvalRun::new(window, filter);
    let daily = run.execute(&truth.forcing, &truth.observations).unwrap();
    assert_eq!(daily.len(), 40);

    let mut resamples = 0;
    for (day_index, day) in daily.iter().enumerate() {
        let stat = day.estimate.stat(&level_key()).unwrap();
        assert!(stat.mean.is_finite() && stat.std.is_finite(), "day {day_index}");
        assert!(day.diagnostics.ess >= 1.0, "day {day_index}: ess {}", day.diagnostics.ess);
        assert_eq!(day.diagnostics.epoch, day_index as u64 + 1);
        if day.diagnostics.resampled {
            resamples += 1;
        }
    }
    assert!(resamples >= 1, "tight measurements should trigger at least one resample");
}

#[test]
fn test_forced_resampling_every_step_keeps_diversity() {
    let window = window(30);
    let truth = synthesize(&window, 10.0, 71, 0.5, 1);

    let template = scenario_tree(10.0, Reservoir::stochastic());
    let ensemble = InitialEnsemble::new(template)
        .with_prior(level_key(), crate::fit_truncnorm(10.0, 3.0, 0.0, 100.0).unwrap());

    let config = BpfConfig {
        n_particles: 150,
        resample_threshold: 1.0,
        scheme: ResamplingScheme::Stratified,
        seed: Some(72),
        ..BpfConfig::default()
    };
    let mut filter = BootstrapFilter::new(config).unwrap();
    filter.initialize(&ensemble).unwrap();

    let mut run = EvalRun::new(window, filter);
    let daily = run.execute(&truth.forcing, &truth.observations).unwrap();

    for day in &daily {
        assert!(day.diagnostics.resampled, "threshold 1.0 resamples on every observed step");
    }
    let final_std = daily.last().unwrap().estimate.stat(&level_key()).unwrap().std;
    assert!(final_std > 0.0, "parameter noise must keep the ensemble spread open");

    let filter = run.into_estimator();
    let n = filter.weights().len() as f64;
    for w in filter.weights() {
        assert!((w - 1.0 / n).abs() < 1e-12, "weights reset to uniform after resampling");
    }
}

#[test]
fn test_discard_policy_survives_partial_failures_at_scale() {
    #[derive(Debug, Clone)]
    struct FragileReservoir {
        breaks_above: f64,
    }
    impl Submodel for FragileReservoir {
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
            vec![Production::state("level", Unit::Millimeter)]
        }
        fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError> {
            let level = ctx.input("level")?;
            if level > self.breaks_above {
                return Err(ModelError::custom("overflow sensor tripped"));
            }
            Ok(TransitionOutput::new().set("level", level * 0.9 + ctx.input("infil")?))
        }
        fn boxed(&self) -> Box<dyn Submodel> {
            Box::new(self.clone())
        }
    }

    let mut template = ModelTree::new();
    template
        .register(&ModelPath::root(Domain::Soil), FragileReservoir { breaks_above: 14.0 })
        .unwrap();
    template.define_forcing(rain_key(), Unit::Millimeter).unwrap();
    template.set_initial(&level_key(), 10.0, Unit::Millimeter).unwrap();
    template.validate().unwrap();

    // roughly the upper tail of the prior sits past the tripwire
    let ensemble = InitialEnsemble::new(template).with_prior(
        level_key(),
        DistributionDescriptor::TruncNormal {
            mean: 10.0,
            std: 4.0,
            lower: 0.0,
            upper: 50.0,
        },
    );

    let config = BpfConfig {
        n_particles: 500,
        resample_threshold: 0.0,
        failure_policy: ParticleFailurePolicy::Discard,
        seed: Some(81),
        ..BpfConfig::default()
    };
    let mut filter = BootstrapFilter::new(config).unwrap();
    filter.initialize(&ensemble).unwrap();

    let forcing = Forcing::new().with(rain_key(), 1.0, Unit::Millimeter);
    for _ in 0..5 {
        let diag = filter.step(&forcing, None).unwrap();
        assert!(diag.discarded < 500, "some particles must survive");
        let total: f64 = filter.weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "live weights renormalize to one");
    }

    let estimate = filter.state_estimate().unwrap();
    let mean = estimate.stat(&level_key()).unwrap().mean;
    assert!(mean.is_finite() && mean <= 14.0, "survivor mean {mean} stays under the tripwire");
}
