//! Stage names and the worker kinds that consume them.

use crate::strategy::Timeframe;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named partition of the entity universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initial,
    Potential,
    Standby,
    Buy,
    Bought,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Initial,
        Stage::Potential,
        Stage::Standby,
        Stage::Buy,
        Stage::Bought,
    ];

    /// Progress index: promotions never lower it. `standby` and `buy` share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            Stage::Initial => 0,
            Stage::Potential => 1,
            Stage::Standby | Stage::Buy => 2,
            Stage::Bought => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::Potential => "potential",
            Stage::Standby => "standby",
            Stage::Buy => "buy",
            Stage::Bought => "bought",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the five polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Trend,
    Tactical,
    Standby,
    Execute,
    Sell,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 5] = [
        WorkerKind::Trend,
        WorkerKind::Tactical,
        WorkerKind::Standby,
        WorkerKind::Execute,
        WorkerKind::Sell,
    ];

    /// Stage scanned on every pass.
    pub fn input_stage(&self) -> Stage {
        match self {
            WorkerKind::Trend => Stage::Initial,
            WorkerKind::Tactical => Stage::Potential,
            WorkerKind::Standby => Stage::Standby,
            WorkerKind::Execute => Stage::Buy,
            WorkerKind::Sell => Stage::Bought,
        }
    }

    /// Timeframe handed to the evaluator.
    pub fn timeframe(&self) -> Timeframe {
        match self {
            WorkerKind::Trend => Timeframe::Trend,
            WorkerKind::Tactical | WorkerKind::Standby | WorkerKind::Sell => Timeframe::Tactical,
            WorkerKind::Execute => Timeframe::Execution,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Trend => "trend",
            WorkerKind::Tactical => "tactical",
            WorkerKind::Standby => "standby",
            WorkerKind::Execute => "execute",
            WorkerKind::Sell => "sell",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
