//! Error types for the latent causal model

use thiserror::Error;

/// Result type alias for model construction and forward passes
pub type Result<T> = std::result::Result<T, LatentCausalError>;

#[derive(Error, Debug)]
pub enum LatentCausalError {
    /// Only the Gaussian family is implemented for every role
    #[error("unsupported distribution `{family}` for {role}: only `gaussian` is implemented")]
    UnsupportedDistribution { role: &'static str, family: String },

    /// The closed-form Gaussian KL came out negative (numerical instability)
    #[error("KL = {kl} has to be >= 0 (iteration {iteration})")]
    NegativeKl { kl: f64, iteration: usize },

    /// Ground-truth tensors were requested but are not available
    #[error("ground-truth {0} requested but not supplied")]
    MissingGroundTruth(&'static str),

    /// Gumbel relaxations divide by the temperature
    #[error("temperature must be positive, got {0}")]
    InvalidTemperature(f64),

    #[error("{0} must be positive")]
    InvalidDimension(&'static str),

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}
