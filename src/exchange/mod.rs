//! Broker integration for the scan pipeline.
//!
//! ## Alpaca
//! REST connectivity for:
//! - Watchlists, assets and open positions
//! - Bracket order placement and position liquidation
//! - Historical bars and latest quotes (market data API)
//!
//! ## Paper
//! In-memory broker that fills immediately, for paper sessions and tests.

mod client;
mod error;
pub mod paper;
mod traits;
mod types;

pub use client::AlpacaClient;
pub use error::GatewayError;
pub use paper::PaperBroker;
pub use traits::{BarSource, OrderGateway, WatchlistSource};
#[cfg(test)]
pub use traits::{MockBarSource, MockOrderGateway, MockWatchlistSource};
pub use types::*;
