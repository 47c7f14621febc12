use thiserror::Error;

use crate::tree::{EpochRef, QuantityKey, QuantityKind};
use crate::units::Unit;

/// Malformed path or key string
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid path '{path}': {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

/// Unit conversion errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("No conversion from {from} to {to}")]
    UnitMismatch { from: Unit, to: Unit },
}

/// Quantity registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Quantity already defined: {key}")]
    AlreadyDefined { key: QuantityKey },

    #[error("Quantity not defined: {key}")]
    UndefinedQuantity { key: QuantityKey },

    #[error("Unresolved dependency: no value for {key} at {epoch_ref}")]
    UnresolvedDependency {
        key: QuantityKey,
        epoch_ref: EpochRef,
    },

    #[error(transparent)]
    Unit(#[from] UnitError),
}

/// Errors raised by a single submodel transition
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("Missing input: {alias}")]
    MissingInput { alias: String },

    #[error("Missing parameter: {id}")]
    MissingParam { id: String },

    #[error("Non-finite value for {quantity}: {value}")]
    NonFinite { quantity: String, value: f64 },

    #[error("Submodel error: {0}")]
    Custom(String),
}

/// Model tree construction and stepping errors
#[derive(Error, Debug, Clone)]
pub enum TreeError {
    #[error("Duplicate node path: {path}")]
    DuplicatePath { path: String },

    #[error("Duplicate production: {key} already produced by {producer}")]
    DuplicateProduction { key: QuantityKey, producer: String },

    #[error("Unknown parent path: {path}")]
    UnknownParent { path: String },

    #[error("Relative path escapes the tree root at node {node}")]
    PathEscapesRoot { node: String },

    #[error("Unresolved dependency: {consumer} requires {key}")]
    UnresolvedDependency { consumer: String, key: QuantityKey },

    #[error("{consumer} wants {key} in {wanted} but it is defined in {defined}")]
    IncompatibleUnits {
        consumer: String,
        key: QuantityKey,
        wanted: Unit,
        defined: Unit,
    },

    #[error("Cyclic dependency involving nodes: {}", involved.join(", "))]
    CyclicDependency { involved: Vec<String> },

    #[error("Tree has not been validated")]
    NotValidated,

    #[error("Node {node} wrote undeclared quantity {quantity}")]
    UndeclaredProduction { node: String, quantity: String },

    #[error("Forcing key {key} was never declared")]
    UndeclaredForcing { key: QuantityKey },

    #[error("Cannot write {key}: kind is {kind}, not state")]
    NotAState { key: QuantityKey, kind: QuantityKind },

    #[error("Invalid parameter function: {0}")]
    InvalidParamFunction(String),

    #[error("Parameter resolution failed for {key}: {reason}")]
    ParamResolution { key: QuantityKey, reason: String },

    #[error("Submodel {node} failed: {source}")]
    SubmodelFailure { node: String, source: ModelError },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Distribution fitting and sampling errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Invalid moments for {family}: {reason}")]
    InvalidMoments { family: String, reason: String },

    #[error("Invalid descriptor for {family}: {reason}")]
    InvalidDescriptor { family: String, reason: String },

    #[error("Sampling failed for {family}: {reason}")]
    SamplingFailed { family: String, reason: String },
}

/// Particle filter errors
#[derive(Error, Debug, Clone)]
pub enum FilterError {
    #[error("Filter has not been initialized")]
    NotInitialized,

    #[error("Filter degenerate at epoch {epoch}: total weight mass collapsed")]
    Degenerate { epoch: u64 },

    #[error("Particle {index} failed: {source}")]
    ParticleFailed { index: usize, source: TreeError },

    #[error("Invalid filter configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Evaluation run errors
#[derive(Error, Debug, Clone)]
pub enum RunError {
    #[error("Invalid evaluation window: {0}")]
    InvalidWindow(String),

    #[error("No forcing available for {date}")]
    MissingForcing { date: chrono::NaiveDate },

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Crate-level error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Run(#[from] RunError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// Convenience constructors for common error patterns
impl ModelError {
    /// Create a custom submodel error
    pub fn custom(msg: impl Into<String>) -> Self {
        ModelError::Custom(msg.into())
    }

    /// Create a missing-input error
    pub fn missing_input(alias: impl Into<String>) -> Self {
        ModelError::MissingInput {
            alias: alias.into(),
        }
    }
}

impl StatsError {
    /// Create an invalid-moments error
    pub fn invalid_moments(family: impl Into<String>, reason: impl Into<String>) -> Self {
        StatsError::InvalidMoments {
            family: family.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-descriptor error
    pub fn invalid_descriptor(family: impl Into<String>, reason: impl Into<String>) -> Self {
        StatsError::InvalidDescriptor {
            family: family.into(),
            reason: reason.into(),
        }
    }

    /// Create a sampling-failure error
    pub fn sampling_failed(family: impl Into<String>, reason: impl Into<String>) -> Self {
        StatsError::SamplingFailed {
            family: family.into(),
            reason: reason.into(),
        }
    }
}
