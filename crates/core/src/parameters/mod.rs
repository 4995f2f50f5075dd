//! Study configuration parameters and their canonicalization.

mod parameter_normalizer;
mod parameters_model;

pub use parameter_normalizer::{normalize_parameters, resolves_to};
pub use parameters_model::*;
