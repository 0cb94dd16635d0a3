//! Typed errors for restraint construction, the per-step calling contract,
//! and ensemble reduction.

use thiserror::Error;

/// Failure reported by an [`Ensemble`](crate::ensemble::Ensemble) collaborator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReductionError {
    /// Send and receive grids (or the grids of two replicas) disagree in length.
    #[error("reduction shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// The collaborator itself failed or timed out.
    #[error("ensemble collaborator failed: {0}")]
    Collaborator(String),
}

#[derive(Debug, Error)]
pub enum BiasError {
    /// Parameters rejected at construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The host broke the expected calling cadence. Not recoverable.
    #[error("calling contract violated: {0}")]
    CallingContract(String),

    /// Propagated unchanged; replicas must agree, so there is no local retry.
    #[error("ensemble reduction failed: {0}")]
    Reduction(#[from] ReductionError),
}

impl BiasError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Builds a calling-contract error and logs it, since the host usually
    /// aborts the run on this error.
    pub fn calling_contract(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("{message}");
        Self::CallingContract(message)
    }
}

impl From<validator::ValidationErrors> for BiasError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Configuration(format!("{e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shape_mismatch() {
        let err = ReductionError::ShapeMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "reduction shape mismatch: expected 4 values, got 3"
        );
    }

    #[test]
    fn reduction_error_converts() {
        let err: BiasError = ReductionError::Collaborator("rank 2 hung up".into()).into();
        assert!(matches!(err, BiasError::Reduction(_)));
        assert!(err.to_string().contains("rank 2 hung up"));
    }

    #[test]
    fn calling_contract_keeps_message() {
        let err = BiasError::calling_contract("time went backwards");
        assert_eq!(
            err.to_string(),
            "calling contract violated: time went backwards"
        );
    }
}
