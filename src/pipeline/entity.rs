//! Instruments under evaluation and their position records.

use crate::strategy::Potential;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of one bought position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub opened_at: DateTime<Utc>,
    /// Seeded from the first broker observation
    pub cost_basis: Option<Decimal>,
    pub unrealized_plpc: Decimal,
    /// High-water mark of `unrealized_plpc`
    pub max_unrealized_plpc: Decimal,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    pub fn open(symbol: impl Into<String>, opened_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            opened_at,
            cost_basis: None,
            unrealized_plpc: Decimal::ZERO,
            max_unrealized_plpc: Decimal::ZERO,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// One instrument under evaluation.
///
/// The stage is not stored here; it is derived from set membership.
#[derive(Debug, Clone)]
pub struct Tradable {
    symbol: String,
    /// Most recent evaluation result; never persisted
    pub potential: Potential,
    is_open: bool,
    pub sell_signal: bool,
    position: Option<PositionRecord>,
}

impl Tradable {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            potential: Potential::None,
            is_open: false,
            sell_signal: false,
            position: None,
        }
    }

    /// Rebuild an already-open entity from a persisted position.
    pub fn from_open_position(record: PositionRecord) -> Self {
        Self {
            symbol: record.symbol.clone(),
            potential: Potential::None,
            is_open: true,
            sell_signal: false,
            position: Some(record),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn position(&self) -> Option<&PositionRecord> {
        self.position.as_ref()
    }

    pub fn position_mut(&mut self) -> Option<&mut PositionRecord> {
        self.position.as_mut()
    }

    pub fn reset_potential(&mut self) {
        self.potential = Potential::None;
    }

    /// Mark the entity as bought at `at`.
    pub fn open_position(&mut self, at: DateTime<Utc>) {
        self.position = Some(PositionRecord::open(self.symbol.clone(), at));
        self.is_open = true;
        self.reset_potential();
    }

    /// Stamp the exit time and hand back the terminal record.
    pub fn close_position(&mut self, at: DateTime<Utc>) -> Option<PositionRecord> {
        self.is_open = false;
        self.sell_signal = false;
        self.position.take().map(|mut record| {
            record.closed_at = Some(at);
            record
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_open_position_resets_potential() {
        let mut entity = Tradable::new("MSFT");
        entity.potential = Potential::Strong;
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();

        entity.open_position(at);

        assert!(entity.is_open());
        assert_eq!(entity.potential, Potential::None);
        assert_eq!(entity.position().unwrap().opened_at, at);
        assert!(entity.position().unwrap().cost_basis.is_none());
    }

    #[test]
    fn test_close_position_stamps_exit() {
        let mut entity = Tradable::new("GOOG");
        let opened = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
        let closed = Utc.with_ymd_and_hms(2024, 3, 1, 16, 30, 0).unwrap();
        entity.open_position(opened);
        entity.sell_signal = true;

        let record = entity.close_position(closed).unwrap();

        assert_eq!(record.closed_at, Some(closed));
        assert!(record.is_closed());
        assert!(!entity.is_open());
        assert!(!entity.sell_signal);
        assert!(entity.position().is_none());
    }

    #[test]
    fn test_rebuilt_entity_is_open() {
        let record = PositionRecord::open("AAPL", Utc::now());
        let entity = Tradable::from_open_position(record);
        assert!(entity.is_open());
        assert_eq!(entity.symbol(), "AAPL");
    }
}
