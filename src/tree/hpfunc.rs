//! Parameter sources, resolved once per epoch.
//!
//! A submodel parameter can be a fixed constant, a deterministic lookup over a
//! driver quantity (piecewise linear), or a fresh draw from a parametric
//! distribution. The stochastic variants are what make parameters part of the
//! uncertainty a particle ensemble tracks: every tree replica resolves its own
//! values each epoch.
//!
//! Driver quantities are read at the previous epoch, so resolution never
//! depends on the execution order of the epoch in progress.

use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::errors::TreeError;
use crate::stats::{draw, DistributionDescriptor};
use crate::tree::key::{EpochRef, KeyRef, ModelPath, QuantityKey};
use crate::tree::registry::Registry;

// ============================================================================
// Piecewise-linear tables
// ============================================================================

/// Piecewise-linear map with flat extrapolation beyond the end points.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct PiecewiseLinear {
    points: Vec<(f64, f64)>,
}

impl PiecewiseLinear {
    /// Build from `(x, y)` support points with strictly increasing `x`.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, TreeError> {
        if points.is_empty() {
            return Err(TreeError::InvalidParamFunction(
                "table needs at least one support point".to_string(),
            ));
        }
        for pair in points.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(TreeError::InvalidParamFunction(format!(
                    "support points must have strictly increasing x ({} then {})",
                    pair[0].0, pair[1].0
                )));
            }
        }
        Ok(Self { points })
    }

    /// Interpolate at `x`, flat beyond the first and last support point.
    pub fn eval(&self, x: f64) -> f64 {
        let first = self.points[0];
        if x <= first.0 {
            return first.1;
        }
        let last = self.points[self.points.len() - 1];
        if x >= last.0 {
            return last.1;
        }

        let mut i = 0;
        while self.points[i + 1].0 < x {
            i += 1;
        }
        let (x0, y0) = self.points[i];
        let (x1, y1) = self.points[i + 1];
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }
}

impl TryFrom<Vec<(f64, f64)>> for PiecewiseLinear {
    type Error = TreeError;

    fn try_from(points: Vec<(f64, f64)>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<PiecewiseLinear> for Vec<(f64, f64)> {
    fn from(pl: PiecewiseLinear) -> Self {
        pl.points
    }
}

// ============================================================================
// Parameter sources
// ============================================================================

/// How a parameter gets its value each epoch.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HPFunction {
    /// Fixed value
    Constant { value: f64 },

    /// Deterministic lookup over a driver quantity
    Table {
        driver: KeyRef,
        table: PiecewiseLinear,
    },

    /// Fresh draw each epoch
    Stochastic { descriptor: DistributionDescriptor },

    /// Lookup over a driver with per-epoch sampled support values. Each
    /// support point has its own descriptor, so uncertainty can vary along
    /// the curve.
    StochasticTable {
        driver: KeyRef,
        xs: Vec<f64>,
        ys: Vec<DistributionDescriptor>,
    },
}

impl HPFunction {
    pub fn constant(value: f64) -> Self {
        HPFunction::Constant { value }
    }

    pub fn stochastic(descriptor: DistributionDescriptor) -> Self {
        HPFunction::Stochastic { descriptor }
    }

    /// Resolve relative driver references against the declaring node's path
    /// and validate the table shape.
    pub(crate) fn bind(
        &self,
        node_path: &ModelPath,
    ) -> Result<BoundHPFunction, TreeError> {
        let resolve_driver = |driver: &KeyRef| {
            driver
                .resolve(node_path)
                .ok_or_else(|| TreeError::PathEscapesRoot {
                    node: node_path.to_string(),
                })
        };

        match self {
            HPFunction::Constant { value } => Ok(BoundHPFunction::Constant(*value)),
            HPFunction::Table { driver, table } => Ok(BoundHPFunction::Table {
                driver: resolve_driver(driver)?,
                table: table.clone(),
            }),
            HPFunction::Stochastic { descriptor } => {
                Ok(BoundHPFunction::Stochastic(descriptor.clone()))
            }
            HPFunction::StochasticTable { driver, xs, ys } => {
                if xs.len() != ys.len() {
                    return Err(TreeError::InvalidParamFunction(format!(
                        "stochastic table has {} xs but {} descriptors",
                        xs.len(),
                        ys.len()
                    )));
                }
                if xs.is_empty() {
                    return Err(TreeError::InvalidParamFunction(
                        "stochastic table needs at least one support point".to_string(),
                    ));
                }
                for pair in xs.windows(2) {
                    if pair[1] <= pair[0] {
                        return Err(TreeError::InvalidParamFunction(
                            "stochastic table xs must be strictly increasing".to_string(),
                        ));
                    }
                }
                Ok(BoundHPFunction::StochasticTable {
                    driver: resolve_driver(driver)?,
                    xs: xs.clone(),
                    ys: ys.clone(),
                })
            }
        }
    }
}

/// A parameter source with driver references resolved to absolute keys.
#[derive(Debug, Clone)]
pub(crate) enum BoundHPFunction {
    Constant(f64),
    Table {
        driver: QuantityKey,
        table: PiecewiseLinear,
    },
    Stochastic(DistributionDescriptor),
    StochasticTable {
        driver: QuantityKey,
        xs: Vec<f64>,
        ys: Vec<DistributionDescriptor>,
    },
}

impl BoundHPFunction {
    /// The driver key read at resolution time, if any.
    pub(crate) fn driver(&self) -> Option<&QuantityKey> {
        match self {
            BoundHPFunction::Table { driver, .. }
            | BoundHPFunction::StochasticTable { driver, .. } => Some(driver),
            _ => None,
        }
    }

    /// Produce this epoch's value for the parameter at `key`.
    pub(crate) fn sample_value(
        &self,
        key: &QuantityKey,
        registry: &Registry,
        rng: &mut SmallRng,
    ) -> Result<f64, TreeError> {
        match self {
            BoundHPFunction::Constant(value) => Ok(*value),
            BoundHPFunction::Table { driver, table } => {
                let x = registry.get(driver, EpochRef::Previous)?;
                Ok(table.eval(x))
            }
            BoundHPFunction::Stochastic(descriptor) => {
                draw(descriptor, rng).map_err(|e| TreeError::ParamResolution {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            }
            BoundHPFunction::StochasticTable { driver, xs, ys } => {
                let x = registry.get(driver, EpochRef::Previous)?;
                let mut points = Vec::with_capacity(xs.len());
                for (xi, desc) in xs.iter().zip(ys.iter()) {
                    let yi = draw(desc, rng).map_err(|e| TreeError::ParamResolution {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
                    points.push((*xi, yi));
                }
                let table = PiecewiseLinear::new(points)?;
                Ok(table.eval(x))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
