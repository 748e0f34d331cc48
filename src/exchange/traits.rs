//! Broker-agnostic traits used by the scan pipeline.
//!
//! The pipeline only talks to brokers and data vendors through these seams:
//! - `OrderGateway` for order placement, position exits and P/L snapshots
//! - `BarSource` for historical bars feeding the signal evaluator
//! - `WatchlistSource` for symbols seeding the `initial` stage

use super::error::GatewayError;
use super::types::{Bar, BarTimeframe, OpenPosition, OrderSide};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Order routing and position access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Whether the symbol can currently be traded.
    async fn is_tradable(&self, symbol: &str) -> Result<bool, GatewayError>;

    /// Place an order. `Ok(false)` means the broker declined it (e.g. not tradable).
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u32,
    ) -> Result<bool, GatewayError>;

    /// Liquidate the whole position in `symbol`.
    async fn close_position(&self, symbol: &str) -> Result<(), GatewayError>;

    /// Current cost basis and unrealized P/L for an open position.
    async fn get_open_position(&self, symbol: &str) -> Result<OpenPosition, GatewayError>;
}

/// Historical bar provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Fetch up to `limit` most recent bars, oldest first.
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: BarTimeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, GatewayError>;
}

/// Provider of candidate symbols.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchlistSource: Send + Sync {
    /// Short label for logging.
    fn label(&self) -> &'static str;

    /// Fetch the current symbol set.
    async fn symbols(&self) -> Result<BTreeSet<String>, GatewayError>;
}
