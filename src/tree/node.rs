//! The submodel seam.
//!
//! A submodel declares what it reads, what it writes, and its parameter
//! sources, then implements a pure `transition` over the resolved values. The
//! tree owns all registry access: a transition never touches shared state and
//! never draws random numbers itself (stochastic parameters are resolved
//! before the call). That keeps submodels trivial to test in isolation and
//! lets the estimation engine replicate whole trees freely.

use indexmap::IndexMap;

use crate::errors::ModelError;
use crate::tree::hpfunc::HPFunction;
use crate::tree::key::{EpochRef, KeyRef};
use crate::tree::registry::QuantityKind;
use crate::units::Unit;

// ============================================================================
// Declarations
// ============================================================================

/// One input of a submodel.
#[derive(Debug, Clone)]
pub struct Requirement {
    /// Name the transition uses to look the value up
    pub alias: String,
    /// Where the value comes from
    pub target: KeyRef,
    /// Unit the transition expects the value in
    pub unit: Unit,
    /// Intra-epoch read or recurrence
    pub epoch: EpochRef,
}

impl Requirement {
    /// Intra-epoch input; orders this node after the producer.
    pub fn current(alias: impl Into<String>, target: KeyRef, unit: Unit) -> Self {
        Self {
            alias: alias.into(),
            target,
            unit,
            epoch: EpochRef::Current,
        }
    }

    /// Recurrence input from the previous epoch; creates no ordering edge.
    pub fn previous(alias: impl Into<String>, target: KeyRef, unit: Unit) -> Self {
        Self {
            alias: alias.into(),
            target,
            unit,
            epoch: EpochRef::Previous,
        }
    }
}

/// One output of a submodel.
#[derive(Debug, Clone)]
pub struct Production {
    pub quantity: String,
    pub layer: Option<u16>,
    pub unit: Unit,
    pub kind: QuantityKind,
}

impl Production {
    pub fn state(quantity: impl Into<String>, unit: Unit) -> Self {
        Self {
            quantity: quantity.into(),
            layer: None,
            unit,
            kind: QuantityKind::State,
        }
    }

    pub fn rate(quantity: impl Into<String>, unit: Unit) -> Self {
        Self {
            quantity: quantity.into(),
            layer: None,
            unit,
            kind: QuantityKind::RateOutput,
        }
    }

    pub fn diagnostic(quantity: impl Into<String>, unit: Unit) -> Self {
        Self {
            quantity: quantity.into(),
            layer: None,
            unit,
            kind: QuantityKind::DiagnosticOutput,
        }
    }

    /// Same production pinned to a soil layer.
    pub fn at_layer(mut self, layer: u16) -> Self {
        self.layer = Some(layer);
        self
    }
}

/// One parameter of a submodel.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub id: String,
    pub unit: Unit,
    pub source: HPFunction,
}

impl ParamSpec {
    pub fn new(id: impl Into<String>, unit: Unit, source: HPFunction) -> Self {
        Self {
            id: id.into(),
            unit,
            source,
        }
    }

    pub fn constant(id: impl Into<String>, unit: Unit, value: f64) -> Self {
        Self::new(id, unit, HPFunction::constant(value))
    }
}

/// Clamp interval for one produced quantity, applied after the transition
/// writes and after any external perturbation of the value.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub quantity: String,
    pub layer: Option<u16>,
    pub min: f64,
    pub max: f64,
}

impl Constraint {
    pub fn bounds(quantity: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            quantity: quantity.into(),
            layer: None,
            min,
            max,
        }
    }

    pub fn non_negative(quantity: impl Into<String>) -> Self {
        Self::bounds(quantity, 0.0, f64::INFINITY)
    }

    pub fn at_layer(mut self, layer: u16) -> Self {
        self.layer = Some(layer);
        self
    }
}

// ============================================================================
// Transition values
// ============================================================================

/// Resolved inputs and parameters handed to a transition.
#[derive(Debug, Clone)]
pub struct TransitionCtx {
    inputs: IndexMap<String, f64>,
    params: IndexMap<String, f64>,
    epoch: u64,
}

impl TransitionCtx {
    pub(crate) fn new(
        inputs: IndexMap<String, f64>,
        params: IndexMap<String, f64>,
        epoch: u64,
    ) -> Self {
        Self {
            inputs,
            params,
            epoch,
        }
    }

    /// Input value by requirement alias, in the requirement's unit.
    pub fn input(&self, alias: &str) -> Result<f64, ModelError> {
        self.inputs
            .get(alias)
            .copied()
            .ok_or_else(|| ModelError::missing_input(alias))
    }

    /// This epoch's resolved parameter value.
    pub fn param(&self, id: &str) -> Result<f64, ModelError> {
        self.params
            .get(id)
            .copied()
            .ok_or_else(|| ModelError::MissingParam { id: id.to_string() })
    }

    /// Index of the epoch being computed.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Values a transition writes, keyed by produced quantity id.
#[derive(Debug, Clone, Default)]
pub struct TransitionOutput {
    values: IndexMap<(String, Option<u16>), f64>,
}

impl TransitionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a produced quantity.
    pub fn set(mut self, quantity: impl Into<String>, value: f64) -> Self {
        self.values.insert((quantity.into(), None), value);
        self
    }

    /// Write a layered produced quantity.
    pub fn set_layer(mut self, quantity: impl Into<String>, layer: u16, value: f64) -> Self {
        self.values.insert((quantity.into(), Some(layer)), value);
        self
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = (&(String, Option<u16>), &f64)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// The trait
// ============================================================================

/// One node of the model tree.
///
/// Implementations are plain cloneable structs holding their configuration.
/// `boxed` is the clone seam: the tree duplicates itself (for the particle
/// ensemble) by boxing a fresh copy of every node.
pub trait Submodel: Send + Sync {
    /// Node name, unique among its siblings.
    fn name(&self) -> &str;

    /// Inputs resolved before each transition.
    fn requires(&self) -> Vec<Requirement>;

    /// Outputs this node owns.
    fn produces(&self) -> Vec<Production>;

    /// Parameter sources, resolved once per epoch.
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Clamp intervals for produced quantities.
    fn constraints(&self) -> Vec<Constraint> {
        Vec::new()
    }

    /// Pure state transition for one epoch.
    fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError>;

    /// Clone into a box.
    fn boxed(&self) -> Box<dyn Submodel>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Doubler;

    impl Submodel for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn requires(&self) -> Vec<Requirement> {
            vec![Requirement::previous(
                "x",
                KeyRef::own("y"),
                Unit::Unitless,
            )]
        }

        fn produces(&self) -> Vec<Production> {
            vec![Production::state("y", Unit::Unitless)]
        }

        fn transition(&self, ctx: &TransitionCtx) -> Result<TransitionOutput, ModelError> {
            let x = ctx.input("x")?;
            Ok(TransitionOutput::new().set("y", 2.0 * x))
        }

        fn boxed(&self) -> Box<dyn Submodel> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_ctx_lookup_errors() {
        let ctx = TransitionCtx::new(
            IndexMap::from([("x".to_string(), 3.0)]),
            IndexMap::new(),
            1,
        );
        assert_eq!(ctx.input("x").unwrap(), 3.0);
        assert!(matches!(
            ctx.input("missing"),
            Err(ModelError::MissingInput { .. })
        ));
        assert!(matches!(
            ctx.param("k"),
            Err(ModelError::MissingParam { .. })
        ));
        assert_eq!(ctx.epoch(), 1);
    }

    #[test]
    fn test_output_builder() {
        let out = TransitionOutput::new()
            .set("a", 1.0)
            .set_layer("w", 2, 0.3);
        let collected: Vec<_> = out.values().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(
            collected[1],
            (&("w".to_string(), Some(2)), &0.3)
        );
    }

    #[test]
    fn test_trait_is_object_safe_and_boxable() {
        let node: Box<dyn Submodel> = Doubler.boxed();
        let ctx = TransitionCtx::new(
            IndexMap::from([("x".to_string(), 2.5)]),
            IndexMap::new(),
            0,
        );
        let out = node.transition(&ctx).unwrap();
        assert!(!out.is_empty());

        // boxed() of a box clones the underlying node
        let copy = node.boxed();
        assert_eq!(copy.name(), "doubler");
    }
}
