//! Hierarchical model tree over a shared quantity registry.
//!
//! Submodels are registered under domain-rooted paths and communicate only
//! through the registry. Validation resolves every declared requirement,
//! builds the intra-epoch dependency graph, and caches a deterministic
//! execution order. Stepping is transactional: forcing writes, parameter
//! resolution, transitions, and constraint clamps all land in the pending
//! epoch, which is committed on success and discarded wholesale on the first
//! error.
//!
//! # Usage
//!
//! ```ignore
//! let mut tree = ModelTree::new();
//! tree.register(&ModelPath::root(Domain::Soil), Reservoir::default())?;
//! tree.define_forcing("atmosphere.weather:rain".parse()?, Unit::Millimeter)?;
//! tree.set_initial(&"soil.reservoir:level".parse()?, 4.0, Unit::Millimeter)?;
//! tree.validate()?;
//! tree.step(&forcing, &mut rng)?;
//! let level = tree.read(&"soil.reservoir:level".parse()?)?;
//! ```

mod graph;
mod hpfunc;
mod key;
mod node;
mod registry;

pub use hpfunc::{HPFunction, PiecewiseLinear};
pub use key::{Domain, EpochRef, KeyRef, ModelPath, QuantityKey};
pub use node::{
    Constraint, ParamSpec, Production, Requirement, Submodel, TransitionCtx, TransitionOutput,
};
pub use registry::{QuantityDef, QuantityKind, Registry, RegistrySnapshot};

use indexmap::{IndexMap, IndexSet};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ModelError, RegistryError, TreeError};
use crate::units::Unit;

use hpfunc::BoundHPFunction;

// ============================================================================
// Forcing
// ============================================================================

/// External inputs for one epoch (weather drivers, field measurements).
///
/// Keys must have been declared with [`ModelTree::define_forcing`]; values
/// are converted into the declared unit on write.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Forcing {
    values: IndexMap<QuantityKey, (f64, Unit)>,
}

impl Forcing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: QuantityKey, value: f64, unit: Unit) -> Self {
        self.values.insert(key, (value, unit));
        self
    }

    pub fn insert(&mut self, key: QuantityKey, value: f64, unit: Unit) {
        self.values.insert(key, (value, unit));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QuantityKey, f64, Unit)> {
        self.values.iter().map(|(k, (v, u))| (k, *v, *u))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// This forcing plus every entry of `other` (entries of `other` win).
    pub fn merged(&self, other: &Forcing) -> Forcing {
        let mut values = self.values.clone();
        for (k, v) in &other.values {
            values.insert(k.clone(), *v);
        }
        Forcing { values }
    }
}

// ============================================================================
// Bound node plans
// ============================================================================

#[derive(Debug, Clone)]
struct BoundRequirement {
    alias: String,
    key: QuantityKey,
    unit: Unit,
    epoch: EpochRef,
}

#[derive(Debug, Clone)]
struct BoundProduction {
    quantity: String,
    layer: Option<u16>,
    key: QuantityKey,
    unit: Unit,
    kind: QuantityKind,
}

#[derive(Debug, Clone)]
struct BoundParam {
    id: String,
    key: QuantityKey,
    unit: Unit,
    hpf: BoundHPFunction,
}

#[derive(Debug, Clone)]
struct BoundConstraint {
    key: QuantityKey,
    min: f64,
    max: f64,
}

#[derive(Debug, Clone)]
struct NodePlan {
    requirements: Vec<BoundRequirement>,
    productions: Vec<BoundProduction>,
    params: Vec<BoundParam>,
    constraints: Vec<BoundConstraint>,
}

struct TreeNode {
    path: ModelPath,
    model: Box<dyn Submodel>,
    plan: NodePlan,
}

impl Clone for TreeNode {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            model: self.model.boxed(),
            plan: self.plan.clone(),
        }
    }
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("path", &self.path)
            .field("model", &self.model.name())
            .finish()
    }
}

// ============================================================================
// Model tree
// ============================================================================

/// Submodels, their shared registry, and the validated execution order.
#[derive(Debug, Clone, Default)]
pub struct ModelTree {
    nodes: Vec<TreeNode>,
    index: IndexMap<ModelPath, usize>,
    registry: Registry,
    forcing_keys: IndexSet<QuantityKey>,
    constraint_map: IndexMap<QuantityKey, (f64, f64)>,
    order: Option<Vec<usize>>,
}

impl ModelTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a submodel under `parent` (a domain root or a registered node).
    ///
    /// Declares the node's productions and parameters in the registry and
    /// resolves its relative references. Returns the node's full path.
    pub fn register(
        &mut self,
        parent: &ModelPath,
        model: impl Submodel + 'static,
    ) -> Result<ModelPath, TreeError> {
        self.register_boxed(parent, Box::new(model))
    }

    pub fn register_boxed(
        &mut self,
        parent: &ModelPath,
        model: Box<dyn Submodel>,
    ) -> Result<ModelPath, TreeError> {
        if parent.depth() > 0 && !self.index.contains_key(parent) {
            return Err(TreeError::UnknownParent {
                path: parent.to_string(),
            });
        }

        let path = parent.child(model.name());
        if self.index.contains_key(&path) {
            return Err(TreeError::DuplicatePath {
                path: path.to_string(),
            });
        }

        let plan = self.bind_plan(&path, model.as_ref())?;

        for prod in &plan.productions {
            self.registry
                .define(prod.key.clone(), prod.unit, prod.kind)
                .map_err(|e| match e {
                    RegistryError::AlreadyDefined { key } => TreeError::DuplicateProduction {
                        key,
                        producer: path.to_string(),
                    },
                    other => TreeError::Registry(other),
                })?;
        }
        for param in &plan.params {
            let kind = match param.hpf {
                BoundHPFunction::Constant(_) => QuantityKind::Parameter,
                _ => QuantityKind::ParamFunction,
            };
            self.registry
                .define(param.key.clone(), param.unit, kind)
                .map_err(|e| match e {
                    RegistryError::AlreadyDefined { key } => TreeError::DuplicateProduction {
                        key,
                        producer: path.to_string(),
                    },
                    other => TreeError::Registry(other),
                })?;
        }
        for c in &plan.constraints {
            self.constraint_map.insert(c.key.clone(), (c.min, c.max));
        }

        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            path: path.clone(),
            model,
            plan,
        });
        self.index.insert(path.clone(), idx);
        self.order = None;

        Ok(path)
    }

    fn bind_plan(&self, path: &ModelPath, model: &dyn Submodel) -> Result<NodePlan, TreeError> {
        let escape = || TreeError::PathEscapesRoot {
            node: path.to_string(),
        };

        let mut requirements = Vec::new();
        for req in model.requires() {
            let key = req.target.resolve(path).ok_or_else(escape)?;
            requirements.push(BoundRequirement {
                alias: req.alias,
                key,
                unit: req.unit,
                epoch: req.epoch,
            });
        }

        let mut productions = Vec::new();
        for prod in model.produces() {
            let key = match prod.layer {
                Some(layer) => QuantityKey::layered(path.clone(), prod.quantity.clone(), layer),
                None => QuantityKey::new(path.clone(), prod.quantity.clone()),
            };
            productions.push(BoundProduction {
                quantity: prod.quantity,
                layer: prod.layer,
                key,
                unit: prod.unit,
                kind: prod.kind,
            });
        }

        let mut params = Vec::new();
        for spec in model.parameters() {
            let key = QuantityKey::new(path.clone(), spec.id.clone());
            params.push(BoundParam {
                id: spec.id,
                key,
                unit: spec.unit,
                hpf: spec.source.bind(path)?,
            });
        }

        let mut constraints = Vec::new();
        for c in model.constraints() {
            let key = match c.layer {
                Some(layer) => QuantityKey::layered(path.clone(), c.quantity.clone(), layer),
                None => QuantityKey::new(path.clone(), c.quantity.clone()),
            };
            constraints.push(BoundConstraint {
                key,
                min: c.min,
                max: c.max,
            });
        }

        Ok(NodePlan {
            requirements,
            productions,
            params,
            constraints,
        })
    }

    /// Declare an externally supplied quantity (weather driver, measurement).
    pub fn define_forcing(&mut self, key: QuantityKey, unit: Unit) -> Result<(), TreeError> {
        self.registry
            .define(key.clone(), unit, QuantityKind::Observation)?;
        self.forcing_keys.insert(key);
        self.order = None;
        Ok(())
    }

    /// Write an initial value into the committed epoch, before the first step.
    pub fn set_initial(
        &mut self,
        key: &QuantityKey,
        value: f64,
        unit: Unit,
    ) -> Result<(), TreeError> {
        self.registry.set_committed(key, value, unit)?;
        Ok(())
    }

    /// Resolve requirements, check units and initial values, and cache the
    /// execution order.
    pub fn validate(&mut self) -> Result<(), TreeError> {
        let mut producer: IndexMap<&QuantityKey, usize> = IndexMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            for prod in &node.plan.productions {
                producer.insert(&prod.key, idx);
            }
        }

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (consumer_idx, node) in self.nodes.iter().enumerate() {
            let consumer = node.path.to_string();

            for req in &node.plan.requirements {
                let def = self.registry.def(&req.key).ok_or_else(|| {
                    TreeError::UnresolvedDependency {
                        consumer: consumer.clone(),
                        key: req.key.clone(),
                    }
                })?;
                if def.unit.convert(1.0, req.unit).is_err() {
                    return Err(TreeError::IncompatibleUnits {
                        consumer,
                        key: req.key.clone(),
                        wanted: req.unit,
                        defined: def.unit,
                    });
                }

                match req.epoch {
                    EpochRef::Current => {
                        if let Some(&producer_idx) = producer.get(&req.key) {
                            edges.push((producer_idx, consumer_idx));
                        }
                        // params and forcing resolve before any transition,
                        // so they never create an edge
                    }
                    EpochRef::Previous => {
                        if self.registry.try_get(&req.key, EpochRef::Previous).is_none() {
                            return Err(TreeError::UnresolvedDependency {
                                consumer,
                                key: req.key.clone(),
                            });
                        }
                    }
                }
            }

            for param in &node.plan.params {
                if let Some(driver) = param.hpf.driver() {
                    if self.registry.try_get(driver, EpochRef::Previous).is_none() {
                        return Err(TreeError::UnresolvedDependency {
                            consumer,
                            key: driver.clone(),
                        });
                    }
                }
            }
        }

        let order = graph::execution_order(self.nodes.len(), &edges).map_err(|involved| {
            TreeError::CyclicDependency {
                involved: involved
                    .into_iter()
                    .map(|i| self.nodes[i].path.to_string())
                    .collect(),
            }
        })?;

        debug!(
            nodes = self.nodes.len(),
            edges = edges.len(),
            "model tree validated"
        );
        self.order = Some(order);
        Ok(())
    }

    pub fn is_validated(&self) -> bool {
        self.order.is_some()
    }

    /// Advance one epoch. Returns the committed epoch index.
    ///
    /// All writes of the epoch are transactional: on any failure the tree is
    /// rolled back to its pre-call state and the error reported.
    pub fn step(&mut self, forcing: &Forcing, rng: &mut SmallRng) -> Result<u64, TreeError> {
        let order = self.order.clone().ok_or(TreeError::NotValidated)?;
        let epoch = self.registry.epoch() + 1;

        match self.run_epoch(&order, forcing, rng, epoch) {
            Ok(()) => {
                self.registry.commit();
                Ok(self.registry.epoch())
            }
            Err(e) => {
                warn!(epoch, error = %e, "epoch rolled back");
                self.registry.rollback();
                Err(e)
            }
        }
    }

    fn run_epoch(
        &mut self,
        order: &[usize],
        forcing: &Forcing,
        rng: &mut SmallRng,
        epoch: u64,
    ) -> Result<(), TreeError> {
        for (key, value, unit) in forcing.iter() {
            if !self.forcing_keys.contains(key) {
                return Err(TreeError::UndeclaredForcing { key: key.clone() });
            }
            self.registry.set(key, value, unit)?;
        }

        // Parameters resolve before any transition runs; their drivers read
        // the previous epoch, so node order is irrelevant here.
        for node in &self.nodes {
            for param in &node.plan.params {
                let value = param.hpf.sample_value(&param.key, &self.registry, rng)?;
                self.registry.set(&param.key, value, param.unit)?;
            }
        }

        for &idx in order {
            let node = &self.nodes[idx];

            let mut inputs = IndexMap::new();
            for req in &node.plan.requirements {
                let value = self
                    .registry
                    .get_in(&req.key, req.epoch, req.unit)
                    .map_err(|e| match e {
                        RegistryError::UnresolvedDependency { key, .. } => {
                            TreeError::UnresolvedDependency {
                                consumer: node.path.to_string(),
                                key,
                            }
                        }
                        other => TreeError::Registry(other),
                    })?;
                inputs.insert(req.alias.clone(), value);
            }

            let mut params = IndexMap::new();
            for param in &node.plan.params {
                params.insert(
                    param.id.clone(),
                    self.registry.get(&param.key, EpochRef::Current)?,
                );
            }

            let ctx = TransitionCtx::new(inputs, params, epoch);
            let output = node
                .model
                .transition(&ctx)
                .map_err(|source| TreeError::SubmodelFailure {
                    node: node.path.to_string(),
                    source,
                })?;

            for ((quantity, layer), &value) in output.values() {
                let prod = node
                    .plan
                    .productions
                    .iter()
                    .find(|p| p.quantity == *quantity && p.layer == *layer)
                    .ok_or_else(|| TreeError::UndeclaredProduction {
                        node: node.path.to_string(),
                        quantity: quantity.clone(),
                    })?;
                if !value.is_finite() {
                    return Err(TreeError::SubmodelFailure {
                        node: node.path.to_string(),
                        source: ModelError::NonFinite {
                            quantity: quantity.clone(),
                            value,
                        },
                    });
                }
                self.registry.set(&prod.key, value, prod.unit)?;
            }

            for c in &node.plan.constraints {
                self.registry.clamp_pending(&c.key, c.min, c.max);
            }
        }

        Ok(())
    }

    /// Read a committed value in the quantity's defined unit.
    pub fn read(&self, key: &QuantityKey) -> Result<f64, TreeError> {
        Ok(self.registry.get(key, EpochRef::Previous)?)
    }

    /// Read a committed value converted into `unit`.
    pub fn read_in(&self, key: &QuantityKey, unit: Unit) -> Result<f64, TreeError> {
        Ok(self.registry.get_in(key, EpochRef::Previous, unit)?)
    }

    /// Overwrite a committed state value (external injection between epochs).
    ///
    /// The value is taken in the quantity's defined unit and clamped to the
    /// owning node's constraint interval when one exists.
    pub fn write_state(&mut self, key: &QuantityKey, value: f64) -> Result<(), TreeError> {
        let def = self
            .registry
            .def(key)
            .ok_or_else(|| RegistryError::UndefinedQuantity { key: key.clone() })?;
        if def.kind != QuantityKind::State {
            return Err(TreeError::NotAState {
                key: key.clone(),
                kind: def.kind,
            });
        }
        let unit = def.unit;
        let value = match self.constraint_map.get(key) {
            Some(&(min, max)) => value.clamp(min, max),
            None => value,
        };
        self.registry.set_committed(key, value, unit)?;
        Ok(())
    }

    /// All state quantities with their committed values, in definition order.
    pub fn state_vector(&self) -> Result<Vec<(QuantityKey, f64)>, TreeError> {
        let mut out = Vec::new();
        for key in self.registry.keys_of_kind(QuantityKind::State) {
            let value = self.registry.get(key, EpochRef::Previous)?;
            out.push((key.clone(), value));
        }
        Ok(out)
    }

    /// Write a full state vector back (inverse of [`state_vector`]).
    ///
    /// [`state_vector`]: ModelTree::state_vector
    pub fn load_state_vector(&mut self, values: &[(QuantityKey, f64)]) -> Result<(), TreeError> {
        for (key, value) in values {
            self.write_state(key, *value)?;
        }
        Ok(())
    }

    /// Committed epoch counter. Zero until the first step commits.
    pub fn epoch(&self) -> u64 {
        self.registry.epoch()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registered node paths in registration order.
    pub fn node_paths(&self) -> impl Iterator<Item = &ModelPath> {
        self.nodes.iter().map(|n| &n.path)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.registry.restore(snapshot);
    }

    /// Deep copy, boxed submodels included.
    pub fn clone_tree(&self) -> ModelTree {
        self.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
