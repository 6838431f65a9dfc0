use thiserror::Error;

/// Failure kinds surfaced by the timestepping machinery.
///
/// Public APIs return `anyhow::Result`; callers that need to branch on the
/// failure kind can `downcast_ref::<HjbError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HjbError {
    #[error("control grid has no nodes")]
    EmptyControlGrid,

    #[error("control domain has dimension {domain}, but the system expects {system} controls")]
    ControlDimensionMismatch { domain: usize, system: usize },

    #[error("expected {expected} control input vectors, got {actual}")]
    InputCountMismatch { expected: usize, actual: usize },

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("invalid axis: {0}")]
    InvalidAxis(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("matrix is singular")]
    SingularMatrix,

    #[error("solver called before a matrix was factorized")]
    NotFactorized,

    #[error("linear solver did not converge after {iterations} iterations (residual {residual:e})")]
    NotConverged { iterations: usize, residual: f64 },
}
