//! # Triple-Timeframe Trader
//!
//! Scans a universe of stocks on three timeframes and autonomously opens and
//! closes positions on Alpaca.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Alpaca REST client and in-memory paper broker
//! - `feed`: Candidate symbol sources (broker watchlist, gainers screener)
//! - `strategy`: Indicators and the triple-timeframe potential evaluator
//! - `risk`: Trailing stop on open positions
//! - `pipeline`: Concurrent staged classification and the session scheduler
//! - `persistence`: SQLite storage of open positions and the trade ledger

pub mod config;
pub mod exchange;
pub mod feed;
pub mod persistence;
pub mod pipeline;
pub mod risk;
pub mod strategy;

pub use config::Config;
