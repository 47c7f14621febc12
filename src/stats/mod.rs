//! Distribution utilities: moment-matching fitters, descriptors, sampling,
//! and the special functions behind them.

mod fit;
mod sampler;
pub mod special;

pub use fit::{
    fit_beta, fit_categorical, fit_gamma_mean, fit_gamma_mode, fit_truncnorm, get_values_probs,
    truncnorm_bounds, DistributionDescriptor,
};
pub use sampler::{draw, RvSampler};
