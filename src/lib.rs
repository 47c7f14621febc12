#![deny(unreachable_pub)]

// Core modules
mod errors;

#[cfg(test)]
mod tests;

// Feature modules
pub mod filter;
pub mod run;
pub mod stats;
pub mod tree;
pub mod units;

// Re-exports
pub use errors::{
    Error, FilterError, ModelError, PathError, RegistryError, Result, RunError, StatsError,
    TreeError, UnitError,
};
pub use filter::{
    BootstrapFilter, BpfConfig, Estimator, InitialEnsemble, NoiseOverride, NoiseStd,
    ObservationRecord, ObservationSet, ParticleFailurePolicy, ProcessNoise, ResamplingScheme,
    StateEstimate, StateStat, StepDiagnostics,
};
pub use run::{
    DailyEstimate, EvalRun, EvalWindow, ForcingSource, MemoryForcing, MemoryObservations,
    NoObservations, ObservationSource,
};
pub use stats::{
    draw, fit_beta, fit_categorical, fit_gamma_mean, fit_gamma_mode, fit_truncnorm,
    get_values_probs, DistributionDescriptor, RvSampler,
};
pub use tree::{
    Constraint, Domain, EpochRef, Forcing, HPFunction, KeyRef, ModelPath, ModelTree, ParamSpec,
    PiecewiseLinear, Production, QuantityDef, QuantityKey, QuantityKind, Registry,
    RegistrySnapshot, Requirement, Submodel, TransitionCtx, TransitionOutput,
};
pub use units::Unit;
