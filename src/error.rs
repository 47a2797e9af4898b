//! Error types of the pricing loop.

use thiserror::Error;

use crate::pricing::job::BlockId;

/// Errors that end a pricing phase.
///
/// Every other solver outcome (infeasible block, limits) is handled inside the round.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    /// Settings failed validation
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A subproblem solver failed internally. Bounds and stabilization can no longer be trusted.
    #[error("Pricing solver failed on block {block}: {message}")]
    SolverInternal { block: BlockId, message: String },

    /// No registered solver accepted an exact job
    #[error("No pricing solver applicable to block {0}")]
    NoApplicableSolver(BlockId),

    /// A worker thread panicked while solving
    #[error("Pricing worker panicked")]
    WorkerPanicked,
}

/// Result type for pricing operations.
pub type PricingResult<T> = Result<T, PricingError>;
