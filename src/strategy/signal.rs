//! Signal vocabulary shared by the evaluator and the pipeline.

use crate::exchange::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Timeframe class an evaluation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// Daily bars, long-term direction
    Trend,
    /// Hourly bars, momentum oscillator
    Tactical,
    /// Minute bars, entry timing
    Execution,
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Trend => write!(f, "trend"),
            Timeframe::Tactical => write!(f, "tactical"),
            Timeframe::Execution => write!(f, "execution"),
        }
    }
}

/// Potential score of the most recent evaluation.
///
/// Trend and execution evaluations are binary (`None`/`Strong`); only the
/// tactical timeframe yields `Weak`, parking the entity in standby.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Potential {
    #[default]
    None,
    Weak,
    Strong,
}

impl Potential {
    pub fn score(self) -> u8 {
        match self {
            Potential::None => 0,
            Potential::Weak => 1,
            Potential::Strong => 2,
        }
    }

    pub fn from_score(score: u8) -> Option<Self> {
        match score {
            0 => Some(Potential::None),
            1 => Some(Potential::Weak),
            2 => Some(Potential::Strong),
            _ => None,
        }
    }
}

impl fmt::Display for Potential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.score())
    }
}

/// Last stochastic reading on the tactical timeframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Oscillator {
    /// %K (fast line)
    pub k: f64,
    /// %D (slow line)
    pub d: f64,
}

impl Oscillator {
    /// Fast line at or below the slow line.
    pub fn crossed_down(&self) -> bool {
        self.k <= self.d
    }
}

/// Failure of a single evaluation.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("bar data unavailable: {0}")]
    Data(#[from] GatewayError),

    #[error("insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("stochastic undefined: flat high/low range")]
    FlatRange,

    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
}

/// Scores an instrument on one timeframe class.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PotentialEvaluator: Send + Sync {
    /// Potential of `symbol` on `timeframe`.
    async fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Potential, EvaluationError>;

    /// Latest tactical oscillator, used by the sell stage.
    async fn oscillator(&self, symbol: &str) -> Result<Oscillator, EvaluationError>;
}
