//! Risk management for open positions.
//!
//! Provides the trailing stop used by the sell stage to exit positions
//! that give back part of their best unrealized gain.

mod trailing;

pub use trailing::{StopDecision, TrailingStop};
