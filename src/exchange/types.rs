//! Type definitions for Alpaca API requests and responses.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bar aggregation requested from the market-data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarTimeframe {
    Day,
    Hour,
    Minute,
}

impl BarTimeframe {
    /// Alpaca query value for this timeframe.
    pub fn as_str(&self) -> &'static str {
        match self {
            BarTimeframe::Day => "1Day",
            BarTimeframe::Hour => "1Hour",
            BarTimeframe::Minute => "1Min",
        }
    }
}

impl fmt::Display for BarTimeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub time: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v", default)]
    pub volume: u64,
}

/// Bars response for a single symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: Option<Vec<Bar>>,
    #[serde(default)]
    pub symbol: String,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Take-profit leg of a bracket order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TakeProfit {
    #[serde(with = "rust_decimal::serde::str")]
    pub limit_price: Decimal,
}

/// Stop-loss leg of a bracket order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopLoss {
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub limit_price: Decimal,
}

/// New order request (bracket market order).
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    pub symbol: String,
    pub qty: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: String,
    pub time_in_force: String,
    pub order_class: String,
    pub take_profit: TakeProfit,
    pub stop_loss: StopLoss,
}

/// Order acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub symbol: String,
    pub status: String,
}

/// Tradable asset information.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub status: String,
    pub tradable: bool,
}

impl Asset {
    pub fn is_tradable(&self) -> bool {
        self.status == "active" && self.tradable
    }
}

/// Watchlist with its assets.
#[derive(Debug, Clone, Deserialize)]
pub struct Watchlist {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// Latest NBBO quote.
#[derive(Debug, Clone, Deserialize)]
pub struct Quote {
    #[serde(rename = "bp")]
    pub bid_price: Decimal,
    #[serde(rename = "ap")]
    pub ask_price: Decimal,
}

/// Latest quote response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct LatestQuoteResponse {
    pub symbol: String,
    pub quote: Quote,
}

/// Open position as reported by the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct Position {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub cost_basis: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unrealized_plpc: Decimal,
}

/// Snapshot of an open position used by the sell stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenPosition {
    pub cost_basis: Decimal,
    /// Unrealized profit/loss as a fraction of cost basis (0.05 = 5%)
    pub unrealized_plpc: Decimal,
}

impl From<&Position> for OpenPosition {
    fn from(position: &Position) -> Self {
        Self {
            cost_basis: position.cost_basis,
            unrealized_plpc: position.unrealized_plpc,
        }
    }
}
