//! Signal evaluation on three timeframes.
//!
//! Contains:
//! - The potential score vocabulary and the evaluator seam used by the pipeline
//! - Moving average and stochastic indicators
//! - The bar-backed triple-timeframe evaluator

mod evaluator;
pub mod indicators;
mod signal;

pub use evaluator::TripleScreenEvaluator;
#[cfg(test)]
pub use signal::MockPotentialEvaluator;
pub use signal::{EvaluationError, Oscillator, Potential, PotentialEvaluator, Timeframe};
