//! Pipeline error types.

use super::stage::Stage;
use thiserror::Error;

/// Errors raised by the classification pipeline itself.
///
/// Per-call failures of collaborators never surface here; workers log and
/// skip them. These variants indicate broken invariants or a dead session.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Backward promotion of {symbol}: {from} -> {to}")]
    BackwardPromotion {
        symbol: String,
        from: Stage,
        to: Stage,
    },

    #[error("{symbol} is not a member of {stage}")]
    NotInStage { symbol: String, stage: Stage },

    #[error("Start gate dropped before opening")]
    GateClosed,

    #[error("Worker task failed: {0}")]
    WorkerPanicked(String),
}
