//! Synthetic Twin Evaluation
//!
//! A diagnostic binary that runs the bootstrap filter against a known truth:
//! - builds a two-node tree (soil reservoir + management release)
//! - simulates a truth trajectory with stochastic drainage
//! - synthesizes noisy level measurements from the truth
//! - assimilates them and reports how tightly the filter tracks
//!
//! Usage:
//! ```bash
//! cargo run --bin synthetic_run -- --days 20 --particles 500 --seed 42
//! ```

use clap::Parser;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use chrono::NaiveDate;
use cropcast::stats::special::sample_standard_normal;
use cropcast::{
    fit_truncnorm, BootstrapFilter, BpfConfig, Constraint, DistributionDescriptor, Domain, EvalRun,
    EvalWindow, Forcing, HPFunction, InitialEnsemble, KeyRef, MemoryForcing, MemoryObservations,
    ModelError, ModelPath, ModelTree, ObservationSet, ParamSpec, Production, QuantityKey,
    Requirement, Submodel, TransitionCtx, TransitionOutput, Unit,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "synthetic_run")]
#[command(version, about = "Bootstrap filter shakedown on a synthetic reservoir", long_about = None)]
struct Cli {
    /// Number of days to evaluate
    #[arg(long, default_value = "20")]
    days: u32,

    /// First day of the window (YYYY-MM-DD)
    #[arg(long, default_value = "2021-05-01")]
    start: String,

    /// Ensemble size
    #[arg(short = 'n', long, default_value = "500")]
    particles: usize,

    /// Master seed for truth, measurements and filter
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Measurement noise std in mm
    #[arg(long, default_value = "0.5")]
    obs_std: f64,

    /// Take a measurement every this many days
    #[arg(long, default_value = "1")]
    obs_every: u32,

    /// Initial level guess handed to the filter, mm (truth starts at 10)
    #[arg(long, default_value = "20.0")]
    guess: f64,

    /// Output file path for JSON export
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,
}

// ============================================================================
// Scenario submodels
// ============================================================================

const CAPACITY_MM: f64 = 100.0;
const TRUTH_INITIAL_MM: f64 = 10.0;

/// Leaky storage: level grows with infiltration and drains by a stochastic
/// daily fraction.
#[derive(Debug, Clone)]
struct Reservoir {
    capacity: f64,
}

impl Submodel for Reservoir {
    fn name(&self) -> &str {
        "reservoir"
    }

    fn requires(&self) -> Vec<Requirement> {
        vec![
            Requirement::previous("level", KeyRef::own("level"), Unit::Millimeter),
            Requirement::current(
                "infil",
                KeyRef::absolute(rain_key()),
                Unit::Millimeter,
            ),
        ]
    }

    fn produces(&self) -> Vec<Production> {
        vec![
            Production::state("level", Unit::Millimeter),
            Production::rate("drawn", Unit::Millimeter),
        ]
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        // daily drainage fraction, redrawn every epoch: Gamma with mean 0.10, std 0.02
        vec![ParamSpec::new(
            "drain",
            Unit::Fraction,
            HPFunction::stochastic(DistributionDescriptor::Gamma {
                shape: 25.0,
                rate: 250.0,
            }),
        )]
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::bounds("level", 0.0, self.capacity)]
    }

    fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError> {
        let level = ctx.input("level")?;
        let drawn = ctx.param("drain")? * level;
        let next = level + ctx.input("infil")? - drawn;
        Ok(TransitionOutput::new()
            .set("level", next)
            .set("drawn", drawn))
    }

    fn boxed(&self) -> Box<dyn Submodel> {
        Box::new(self.clone())
    }
}

/// Management rule: skim a fraction of whatever sits above the threshold.
#[derive(Debug, Clone)]
struct Release {
    threshold: f64,
    fraction: f64,
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

fn rain_key() -> QuantityKey {
    QuantityKey::new(ModelPath::root(Domain::Atmosphere).child("weather"), "rain")
}

fn level_key() -> QuantityKey {
    QuantityKey::new(ModelPath::root(Domain::Soil).child("reservoir"), "level")
}

fn build_tree(initial_level: f64) -> Result<ModelTree, Box<dyn std::error::Error>> {
    let mut tree = ModelTree::new();
    tree.register(
        &ModelPath::root(Domain::Soil),
        Reservoir {
            capacity: CAPACITY_MM,
        },
    )?;
    tree.register(
        &ModelPath::root(Domain::Management),
        Release {
            threshold: 30.0,
            fraction: 0.25,
        },
    )?;
    tree.define_forcing(rain_key(), Unit::Millimeter)?;
    tree.set_initial(&level_key(), initial_level, Unit::Millimeter)?;
    tree.validate()?;
    Ok(tree)
}

/// Alternating wet and dry spells, deterministic per day index.
fn rain_for_day(day_index: u32) -> f64 {
    if day_index % 5 < 2 {
        8.0
    } else {
        1.0
    }
}

// ============================================================================
// Report rows
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct DayRow {
    date: NaiveDate,
    truth_mm: f64,
    mean_mm: f64,
    std_mm: f64,
    ci90_mm: (f64, f64),
    ess: f64,
    resampled: bool,
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let start = NaiveDate::parse_from_str(&cli.start, "%Y-%m-%d")?;
    let end = start
        .checked_add_days(chrono::Days::new(u64::from(cli.days.saturating_sub(1))))
        .ok_or("window end overflows the calendar")?;
    let window = EvalWindow::new(start, end)?;

    info!(
        days = cli.days,
        particles = cli.particles,
        seed = cli.seed,
        "synthetic evaluation starting"
    );

    // ------------------------------------------------------------------------
    // Truth trajectory and synthetic measurements
    // ------------------------------------------------------------------------

    let mut truth_tree = build_tree(TRUTH_INITIAL_MM)?;
    let mut truth_rng = SmallRng::seed_from_u64(cli.seed ^ 0x7452_5554);
    let mut obs_rng = SmallRng::seed_from_u64(cli.seed ^ 0x4f42_5300);

    let mut forcing = MemoryForcing::new();
    let mut observations = MemoryObservations::new();
    let mut truth_levels = Vec::with_capacity(cli.days as usize);

    for (day_index, date) in window.dates().enumerate() {
        let day_forcing = Forcing::new().with(
            rain_key(),
            rain_for_day(day_index as u32),
            Unit::Millimeter,
        );
        truth_tree.step(&day_forcing, &mut truth_rng)?;
        let truth_level = truth_tree.read(&level_key())?;
        truth_levels.push(truth_level);

        if day_index as u32 % cli.obs_every == 0 {
            let noisy = (truth_level + cli.obs_std * sample_standard_normal(&mut obs_rng)).max(0.0);
            observations.insert(
                date,
                ObservationSet::new().with(level_key(), noisy, cli.obs_std, Unit::Millimeter),
            );
        }
        forcing.insert(date, day_forcing);
    }

    // ------------------------------------------------------------------------
    // Filter run
    // ------------------------------------------------------------------------

    let template = build_tree(cli.guess)?;
    let ensemble = InitialEnsemble::new(template)
        .with_prior(level_key(), fit_truncnorm(cli.guess, 5.0, 0.0, CAPACITY_MM)?);

    let config = BpfConfig {
        n_particles: cli.particles,
        seed: Some(cli.seed),
        ..BpfConfig::default()
    };
    let mut filter = BootstrapFilter::new(config)?;
    filter.initialize(&ensemble)?;

    let mut run = EvalRun::new(window, filter);
    let daily = run.execute(&forcing, &observations)?;

    // ------------------------------------------------------------------------
    // Report
    // ------------------------------------------------------------------------

    println!();
    println!("  date         truth    mean     std    90% interval      ess");
    println!("  ----------  ------  ------  ------  ----------------  ------");

    let mut rows = Vec::with_capacity(daily.len());
    let mut abs_err_sum = 0.0;
    for (day, truth_mm) in daily.iter().zip(&truth_levels) {
        let stat = day
            .estimate
            .stat(&level_key())
            .ok_or("level missing from estimate")?;
        abs_err_sum += (stat.mean - truth_mm).abs();
        println!(
            "  {}  {:6.2}  {:6.2}  {:6.2}  [{:6.2}, {:6.2}]  {:6.0}{}",
            day.date,
            truth_mm,
            stat.mean,
            stat.std,
            stat.ci90.0,
            stat.ci90.1,
            day.diagnostics.ess,
            if day.diagnostics.resampled { "  R" } else { "" },
        );
        rows.push(DayRow {
            date: day.date,
            truth_mm: *truth_mm,
            mean_mm: stat.mean,
            std_mm: stat.std,
            ci90_mm: stat.ci90,
            ess: day.diagnostics.ess,
            resampled: day.diagnostics.resampled,
        });
    }

    let mae = abs_err_sum / daily.len() as f64;
    println!();
    println!("  mean absolute error: {:.3} mm over {} days", mae, daily.len());

    if let Some(path) = &cli.output {
        serde_json::to_writer_pretty(File::create(path)?, &rows)?;
        info!(path = %path.display(), "report written");
    }

    Ok(())
}
