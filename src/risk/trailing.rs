//! Trailing-stop tracking of open positions.
//!
//! Each observation of a position's unrealized P/L either raises the
//! high-water mark, or is checked for a retracement from it.

use crate::exchange::OpenPosition;
use crate::pipeline::PositionRecord;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

/// Outcome of one trailing-stop observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopDecision {
    /// Gain exceeded the previous maximum; never a sell.
    NewHigh,
    /// Gain did not improve but stays above the trailing threshold.
    Hold,
    /// Gain fell below `max * (1 - trailing)`.
    Retraced { threshold: Decimal },
}

impl StopDecision {
    /// Whether the exit conditions should be re-evaluated.
    pub fn needs_review(&self) -> bool {
        !matches!(self, StopDecision::NewHigh)
    }
}

/// Trailing stop on the unrealized P/L percentage.
#[derive(Debug, Clone)]
pub struct TrailingStop {
    trailing_percent: Decimal,
}

impl Default for TrailingStop {
    fn default() -> Self {
        Self::new(dec!(0.08))
    }
}

impl TrailingStop {
    pub fn new(trailing_percent: Decimal) -> Self {
        Self { trailing_percent }
    }

    pub fn trailing_percent(&self) -> Decimal {
        self.trailing_percent
    }

    /// Gain below which a position with high-water mark `max_gain` retraced.
    pub fn threshold(&self, max_gain: Decimal) -> Decimal {
        max_gain * (Decimal::ONE - self.trailing_percent)
    }

    /// Fold a new observation into `record` and classify it.
    ///
    /// The first observation seeds the cost basis. A retracement is only
    /// possible once a positive high-water mark exists.
    pub fn observe(&self, record: &mut PositionRecord, observation: &OpenPosition) -> StopDecision {
        let current = observation.unrealized_plpc;

        if record.cost_basis.is_none() {
            record.cost_basis = Some(observation.cost_basis);
            if current > Decimal::ZERO {
                warn!(
                    symbol = %record.symbol,
                    unrealized_plpc = %current,
                    "First observation already in profit; baseline seeded from current reading"
                );
            }
        }

        record.unrealized_plpc = current;

        if current > record.max_unrealized_plpc {
            debug!(
                symbol = %record.symbol,
                previous_max = %record.max_unrealized_plpc,
                new_max = %current,
                "New high-water mark"
            );
            record.max_unrealized_plpc = current;
            return StopDecision::NewHigh;
        }

        let max_gain = record.max_unrealized_plpc;
        if max_gain > Decimal::ZERO {
            let threshold = self.threshold(max_gain);
            if current < threshold {
                return StopDecision::Retraced { threshold };
            }
        }

        StopDecision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> PositionRecord {
        PositionRecord::open("GOOG", Utc::now())
    }

    fn observation(cost_basis: Decimal, plpc: Decimal) -> OpenPosition {
        OpenPosition {
            cost_basis,
            unrealized_plpc: plpc,
        }
    }

    #[test]
    fn test_first_observation_seeds_cost_basis() {
        let stop = TrailingStop::default();
        let mut record = record();

        stop.observe(&mut record, &observation(dec!(1500), dec!(0.01)));
        assert_eq!(record.cost_basis, Some(dec!(1500)));

        // Later observations never overwrite the seeded basis
        stop.observe(&mut record, &observation(dec!(1600), dec!(0.02)));
        assert_eq!(record.cost_basis, Some(dec!(1500)));
    }

    #[test]
    fn test_new_high_updates_maximum() {
        let stop = TrailingStop::default();
        let mut record = record();

        let decision = stop.observe(&mut record, &observation(dec!(100), dec!(0.05)));
        assert_eq!(decision, StopDecision::NewHigh);
        assert_eq!(record.max_unrealized_plpc, dec!(0.05));
        assert!(!decision.needs_review());
    }

    #[test]
    fn test_retrace_below_threshold() {
        let stop = TrailingStop::default();
        let mut record = record();
        record.cost_basis = Some(dec!(100));
        record.max_unrealized_plpc = dec!(0.10);

        let decision = stop.observe(&mut record, &observation(dec!(100), dec!(0.09)));
        assert_eq!(
            decision,
            StopDecision::Retraced {
                threshold: dec!(0.092)
            }
        );
        assert_eq!(record.unrealized_plpc, dec!(0.09));
        assert_eq!(record.max_unrealized_plpc, dec!(0.10));
    }

    #[test]
    fn test_small_dip_holds() {
        let stop = TrailingStop::default();
        let mut record = record();
        record.cost_basis = Some(dec!(100));
        record.max_unrealized_plpc = dec!(0.10);

        let decision = stop.observe(&mut record, &observation(dec!(100), dec!(0.095)));
        assert_eq!(decision, StopDecision::Hold);
        assert!(decision.needs_review());
    }

    #[test]
    fn test_no_retrace_without_positive_high() {
        let stop = TrailingStop::default();
        let mut record = record();

        let decision = stop.observe(&mut record, &observation(dec!(100), dec!(-0.03)));
        assert_eq!(decision, StopDecision::Hold);
    }
}
