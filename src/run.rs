//! Dated evaluation runs.
//!
//! A run walks an [`Estimator`] through an inclusive date window, one epoch
//! per day. Forcing must exist for every day; observations are assimilated
//! whenever the source has any for the date, otherwise the day is pure
//! propagation. Initial values refer to the day before the window starts.

use chrono::{Days, NaiveDate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::RunError;
use crate::filter::{Estimator, ObservationSet, StateEstimate, StepDiagnostics};
use crate::tree::Forcing;

// ============================================================================
// Window
// ============================================================================

/// Inclusive day range of an evaluation, with its initialization day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalWindow {
    init: NaiveDate,
    start: NaiveDate,
    end: NaiveDate,
}

impl EvalWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RunError> {
        if end < start {
            return Err(RunError::InvalidWindow(format!(
                "end {} precedes start {}",
                end, start
            )));
        }
        let init = start.checked_sub_days(Days::new(1)).ok_or_else(|| {
            RunError::InvalidWindow(format!("start {} has no preceding day", start))
        })?;
        Ok(Self { init, start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// The day initial state values refer to, one day before `start`.
    pub fn init_date(&self) -> NaiveDate {
        self.init
    }

    pub fn n_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Every day of the window in order, `start` and `end` included.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }
}

// ============================================================================
// Data sources
// ============================================================================

/// Per-day external inputs for the tree.
pub trait ForcingSource {
    /// `None` means no forcing is known for the day, which fails the run.
    fn forcing_for(&self, date: NaiveDate) -> Option<Forcing>;
}

/// Per-day measurements for the estimator.
pub trait ObservationSource {
    fn observations_for(&self, date: NaiveDate) -> Option<ObservationSet>;
}

/// In-memory forcing table with an optional base layer of constant drivers.
#[derive(Debug, Clone, Default)]
pub struct MemoryForcing {
    base: Forcing,
    days: IndexMap<NaiveDate, Forcing>,
}

impl MemoryForcing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forcing merged into every day (site constants, management settings).
    pub fn with_base(base: Forcing) -> Self {
        Self {
            base,
            days: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, date: NaiveDate, forcing: Forcing) {
        self.days.insert(date, forcing);
    }
}

impl ForcingSource for MemoryForcing {
    fn forcing_for(&self, date: NaiveDate) -> Option<Forcing> {
        self.days.get(&date).map(|day| self.base.merged(day))
    }
}

/// In-memory observation table.
#[derive(Debug, Clone, Default)]
pub struct MemoryObservations {
    days: IndexMap<NaiveDate, ObservationSet>,
}

impl MemoryObservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, observations: ObservationSet) {
        self.days.insert(date, observations);
    }
}

impl ObservationSource for MemoryObservations {
    fn observations_for(&self, date: NaiveDate) -> Option<ObservationSet> {
        self.days.get(&date).cloned()
    }
}

/// Source with no measurements at all, for pure simulation runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObservations;

impl ObservationSource for NoObservations {
    fn observations_for(&self, _date: NaiveDate) -> Option<ObservationSet> {
        None
    }
}

// ============================================================================
// Run driver
// ============================================================================

/// Estimate and health indicators for one day of the run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DailyEstimate {
    pub date: NaiveDate,
    pub diagnostics: StepDiagnostics,
    pub estimate: StateEstimate,
}

/// Drives an initialized estimator across a window, day by day.
pub struct EvalRun<E> {
    window: EvalWindow,
    estimator: E,
}

impl<E: Estimator> EvalRun<E> {
    pub fn new(window: EvalWindow, estimator: E) -> Self {
        Self { window, estimator }
    }

    pub fn window(&self) -> EvalWindow {
        self.window
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn into_estimator(self) -> E {
        self.estimator
    }

    pub fn execute(
        &mut self,
        forcing: &dyn ForcingSource,
        observations: &dyn ObservationSource,
    ) -> Result<Vec<DailyEstimate>, RunError> {
        info!(start = %self.window.start, end = %self.window.end, "evaluation started");

        let mut out = Vec::with_capacity(self.window.n_days());
        for date in self.window.dates() {
            let day_forcing = forcing
                .forcing_for(date)
                .ok_or(RunError::MissingForcing { date })?;
            let day_obs = observations.observations_for(date);

            let diagnostics = self.estimator.step(&day_forcing, day_obs.as_ref())?;
            let estimate = self.estimator.state_estimate()?;
            debug!(date = %date, ess = diagnostics.ess, resampled = diagnostics.resampled, "day assimilated");

            out.push(DailyEstimate {
                date,
                diagnostics,
                estimate,
            });
        }

        info!(days = out.len(), "evaluation finished");
        Ok(out)
    }
}

// ============================================================================
// Tests
// ============================================================================
