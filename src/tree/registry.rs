//! Shared quantity registry.
//!
//! The registry holds two insertion-ordered maps: `committed` carries the
//! values of the last completed epoch, `pending` collects the writes of the
//! epoch in progress. A `Current` read resolves against `pending`, a
//! `Previous` read against `committed`. Committing folds `pending` into
//! `committed`, so quantities not rewritten this epoch keep their last value;
//! rolling back discards `pending` and leaves `committed` untouched.
//!
//! Every quantity is defined once with a fixed unit. Writes in other units are
//! converted on the way in, reads always return the defined unit.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::RegistryError;
use crate::tree::key::{EpochRef, QuantityKey};
use crate::units::Unit;

/// Role of a quantity within its owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityKind {
    /// Carried across epochs, the estimator's target
    State,
    /// Fixed configuration value, resolved once per epoch
    Parameter,
    /// Function-valued parameter, resolved once per epoch
    ParamFunction,
    /// Externally supplied per-epoch value (forcing, measurements)
    Observation,
    /// Per-epoch flux produced by a transition
    RateOutput,
    /// Per-epoch derived value for inspection only
    DiagnosticOutput,
}

impl fmt::Display for QuantityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuantityKind::State => "state",
            QuantityKind::Parameter => "parameter",
            QuantityKind::ParamFunction => "param-function",
            QuantityKind::Observation => "observation",
            QuantityKind::RateOutput => "rate-output",
            QuantityKind::DiagnosticOutput => "diagnostic-output",
        };
        f.write_str(s)
    }
}

/// Unit and kind fixed at definition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct QuantityDef {
    pub unit: Unit,
    pub kind: QuantityKind,
}

/// Clone of the committed map, for transactional stepping and particle
/// duplication.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    committed: IndexMap<QuantityKey, f64>,
    epoch: u64,
}

/// The shared value store of one model tree.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    defs: IndexMap<QuantityKey, QuantityDef>,
    committed: IndexMap<QuantityKey, f64>,
    pending: IndexMap<QuantityKey, f64>,
    epoch: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a quantity identity. The unit is fixed for the registry's life.
    pub fn define(
        &mut self,
        key: QuantityKey,
        unit: Unit,
        kind: QuantityKind,
    ) -> Result<(), RegistryError> {
        if self.defs.contains_key(&key) {
            return Err(RegistryError::AlreadyDefined { key });
        }
        self.defs.insert(key, QuantityDef { unit, kind });
        Ok(())
    }

    pub fn def(&self, key: &QuantityKey) -> Option<&QuantityDef> {
        self.defs.get(key)
    }

    pub fn is_defined(&self, key: &QuantityKey) -> bool {
        self.defs.contains_key(key)
    }

    /// Read a value in the quantity's defined unit.
    pub fn get(&self, key: &QuantityKey, epoch_ref: EpochRef) -> Result<f64, RegistryError> {
        if !self.defs.contains_key(key) {
            return Err(RegistryError::UndefinedQuantity { key: key.clone() });
        }
        self.try_get(key, epoch_ref)
            .ok_or_else(|| RegistryError::UnresolvedDependency {
                key: key.clone(),
                epoch_ref,
            })
    }

    /// Read without distinguishing the failure mode.
    pub fn try_get(&self, key: &QuantityKey, epoch_ref: EpochRef) -> Option<f64> {
        match epoch_ref {
            EpochRef::Current => self.pending.get(key).copied(),
            EpochRef::Previous => self.committed.get(key).copied(),
        }
    }

    /// Read a value converted into `unit`.
    pub fn get_in(
        &self,
        key: &QuantityKey,
        epoch_ref: EpochRef,
        unit: Unit,
    ) -> Result<f64, RegistryError> {
        let value = self.get(key, epoch_ref)?;
        let def = &self.defs[key];
        Ok(def.unit.convert(value, unit)?)
    }

    /// Write into the epoch in progress, converting from `unit` into the
    /// defined unit.
    pub fn set(&mut self, key: &QuantityKey, value: f64, unit: Unit) -> Result<(), RegistryError> {
        let def = self
            .defs
            .get(key)
            .ok_or_else(|| RegistryError::UndefinedQuantity { key: key.clone() })?;
        let converted = unit.convert(value, def.unit)?;
        self.pending.insert(key.clone(), converted);
        Ok(())
    }

    /// Write directly into the committed map. Used for initial values before
    /// the first epoch and for external state injection between epochs.
    pub fn set_committed(
        &mut self,
        key: &QuantityKey,
        value: f64,
        unit: Unit,
    ) -> Result<(), RegistryError> {
        let def = self
            .defs
            .get(key)
            .ok_or_else(|| RegistryError::UndefinedQuantity { key: key.clone() })?;
        let converted = unit.convert(value, def.unit)?;
        self.committed.insert(key.clone(), converted);
        Ok(())
    }

    /// Clamp a pending value into `[min, max]` if one was written this epoch.
    pub fn clamp_pending(&mut self, key: &QuantityKey, min: f64, max: f64) {
        if let Some(v) = self.pending.get_mut(key) {
            *v = v.clamp(min, max);
        }
    }

    /// Fold the epoch in progress into the committed map and advance the
    /// epoch counter. Quantities not written this epoch keep their value.
    pub fn commit(&mut self) {
        for (key, value) in self.pending.drain(..) {
            self.committed.insert(key, value);
        }
        self.epoch += 1;
    }

    /// Discard the epoch in progress.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    /// Committed epoch counter. Zero until the first commit.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            committed: self.committed.clone(),
            epoch: self.epoch,
        }
    }

    /// Restore a snapshot. Definitions are untouched, pending writes dropped.
    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.committed = snapshot.committed;
        self.epoch = snapshot.epoch;
        self.pending.clear();
    }

    /// Defined keys in definition order.
    pub fn keys(&self) -> impl Iterator<Item = &QuantityKey> {
        self.defs.keys()
    }

    /// Defined keys of one kind, in definition order.
    pub fn keys_of_kind(&self, kind: QuantityKind) -> impl Iterator<Item = &QuantityKey> + '_ {
        self.defs
            .iter()
            .filter(move |(_, def)| def.kind == kind)
            .map(|(key, _)| key)
    }
}

// ============================================================================
// Tests
// ============================================================================
