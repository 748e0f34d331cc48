//! Configuration management for the triple-timeframe trader.
//!
//! Loads settings from environment variables and config files.

use crate::pipeline::{PromotionPolicy, Termination};
use anyhow::{Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Alpaca API credentials
    #[serde(default)]
    pub alpaca: AlpacaConfig,
    /// Session lifetime and trading parameters
    #[serde(default)]
    pub session: SessionConfig,
    /// Per-stage polling and rate limiting
    #[serde(default)]
    pub stages: StagesConfig,
    /// Indicator windows
    #[serde(default)]
    pub indicators: IndicatorConfig,
    /// Screener feed filters
    #[serde(default)]
    pub feed: FeedConfig,
    /// Trade store location
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaConfig {
    /// API key id
    #[serde(default)]
    pub api_key: String,
    /// API secret key
    #[serde(default)]
    pub api_secret: String,
    /// Use the paper trading endpoint
    #[serde(default = "default_paper")]
    pub paper: bool,
    /// Watchlist seeding the `initial` stage (empty = none)
    #[serde(default)]
    pub watchlist_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// When stage workers stop looping
    #[serde(default = "default_termination")]
    pub termination: Termination,
    /// Whether promotion removes the entity from its upstream stage
    #[serde(default)]
    pub promotion: PromotionPolicy,
    /// Upper bound on any single evaluator or broker call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Shares per buy order
    #[serde(default = "default_order_quantity")]
    pub order_quantity: u32,
    /// Retracement from the best unrealized gain that triggers a sell (0.0-1.0)
    #[serde(default = "default_trailing_percent")]
    pub trailing_percent: Decimal,
}

/// Poll interval and per-item delay of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageTimingConfig {
    /// Sleep between passes, outside the lock
    pub poll_interval_secs: u64,
    /// Sleep after each external call, inside the lock
    pub item_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "default_trend_timing")]
    pub trend: StageTimingConfig,
    #[serde(default = "default_tactical_timing")]
    pub tactical: StageTimingConfig,
    #[serde(default = "default_standby_timing")]
    pub standby: StageTimingConfig,
    #[serde(default = "default_execute_timing")]
    pub execute: StageTimingConfig,
    #[serde(default = "default_sell_timing")]
    pub sell: StageTimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Trend moving average window (daily bars)
    #[serde(default = "default_sma_window")]
    pub sma_window: usize,
    /// Stochastic fast %K window
    #[serde(default = "default_stoch_fast_k")]
    pub stoch_fast_k: usize,
    /// Stochastic %K smoothing window
    #[serde(default = "default_stoch_k")]
    pub stoch_k: usize,
    /// Stochastic %D window
    #[serde(default = "default_stoch_d")]
    pub stoch_d: usize,
    /// Tolerance (in %) for "within range" comparisons
    #[serde(default = "default_range_percent")]
    pub range_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Include the gainers screener in the watchlist union
    #[serde(default = "default_feed_enabled")]
    pub enabled: bool,
    /// Screener API base URL
    #[serde(default = "default_feed_url")]
    pub base_url: String,
    /// Exclusive lower price bound
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    /// Exclusive upper price bound
    #[serde(default = "default_max_price")]
    pub max_price: f64,
    /// Minimum positive daily change
    #[serde(default = "default_min_change")]
    pub min_change: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// SQLite database path for `--paper` sessions
    #[serde(default = "default_paper_db_path")]
    pub paper_db_path: String,
}

impl PersistenceConfig {
    /// Store used by a live or a paper session.
    pub fn db_path_for(&self, paper: bool) -> &str {
        if paper {
            &self.paper_db_path
        } else {
            &self.db_path
        }
    }
}

// Default value functions
fn default_paper() -> bool {
    true
}

fn default_termination() -> Termination {
    Termination::MarketClose {
        close_at: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
    }
}

fn default_call_timeout() -> u64 {
    10
}

fn default_order_quantity() -> u32 {
    10
}

fn default_trailing_percent() -> Decimal {
    Decimal::new(8, 2) // 0.08
}

fn default_trend_timing() -> StageTimingConfig {
    StageTimingConfig {
        poll_interval_secs: 900,
        item_delay_ms: 200,
    }
}

fn default_tactical_timing() -> StageTimingConfig {
    StageTimingConfig {
        poll_interval_secs: 300,
        item_delay_ms: 1000,
    }
}

fn default_standby_timing() -> StageTimingConfig {
    StageTimingConfig {
        poll_interval_secs: 120,
        item_delay_ms: 1000,
    }
}

fn default_execute_timing() -> StageTimingConfig {
    StageTimingConfig {
        poll_interval_secs: 60,
        item_delay_ms: 2000,
    }
}

fn default_sell_timing() -> StageTimingConfig {
    StageTimingConfig {
        poll_interval_secs: 300,
        item_delay_ms: 2000,
    }
}

fn default_sma_window() -> usize {
    50
}

fn default_stoch_fast_k() -> usize {
    8
}

fn default_stoch_k() -> usize {
    3
}

fn default_stoch_d() -> usize {
    5
}

fn default_range_percent() -> f64 {
    10.0
}

fn default_feed_enabled() -> bool {
    true
}

fn default_feed_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

fn default_min_price() -> f64 {
    20.0
}

fn default_max_price() -> f64 {
    800.0
}

fn default_min_change() -> f64 {
    0.5
}

fn default_db_path() -> String {
    "data/trades.db".to_string()
}

fn default_paper_db_path() -> String {
    "data/paper_trades.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("TTF")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.session.trailing_percent > Decimal::ZERO
                && self.session.trailing_percent < Decimal::ONE,
            "trailing_percent must be between 0 and 1"
        );

        anyhow::ensure!(
            self.session.order_quantity > 0,
            "order_quantity must be positive"
        );

        anyhow::ensure!(
            self.session.call_timeout_secs > 0,
            "call_timeout_secs must be positive"
        );

        if let Termination::Bounded { passes } = self.session.termination {
            anyhow::ensure!(passes > 0, "bounded termination needs at least one pass");
        }

        anyhow::ensure!(
            self.indicators.sma_window > 0
                && self.indicators.stoch_fast_k > 0
                && self.indicators.stoch_k > 0
                && self.indicators.stoch_d > 0,
            "indicator windows must be positive"
        );

        anyhow::ensure!(
            self.feed.min_price < self.feed.max_price,
            "feed min_price must be below max_price"
        );

        anyhow::ensure!(
            self.persistence.db_path != self.persistence.paper_db_path,
            "paper_db_path must differ from db_path"
        );

        Ok(())
    }
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            paper: default_paper(),
            watchlist_id: String::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            termination: default_termination(),
            promotion: PromotionPolicy::default(),
            call_timeout_secs: default_call_timeout(),
            order_quantity: default_order_quantity(),
            trailing_percent: default_trailing_percent(),
        }
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            trend: default_trend_timing(),
            tactical: default_tactical_timing(),
            standby: default_standby_timing(),
            execute: default_execute_timing(),
            sell: default_sell_timing(),
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_window: default_sma_window(),
            stoch_fast_k: default_stoch_fast_k(),
            stoch_k: default_stoch_k(),
            stoch_d: default_stoch_d(),
            range_percent: default_range_percent(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: default_feed_enabled(),
            base_url: default_feed_url(),
            min_price: default_min_price(),
            max_price: default_max_price(),
            min_change: default_min_change(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            paper_db_path: default_paper_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_follow_session_wiring() {
        let config = Config::default();
        assert_eq!(config.stages.trend.poll_interval_secs, 900);
        assert_eq!(config.stages.execute.item_delay_ms, 2000);
        assert_eq!(config.session.promotion, PromotionPolicy::Move);
        assert_eq!(
            config.session.termination,
            Termination::MarketClose {
                close_at: NaiveTime::from_hms_opt(17, 0, 0).unwrap()
            }
        );
    }

    #[test]
    fn test_zero_bounded_passes_rejected() {
        let mut config = Config::default();
        config.session.termination = Termination::Bounded { passes: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trailing_percent_bounds() {
        let mut config = Config::default();
        config.session.trailing_percent = Decimal::ONE;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paper_sessions_use_their_own_store() {
        let config = Config::default();
        assert_eq!(config.persistence.db_path_for(false), "data/trades.db");
        assert_eq!(config.persistence.db_path_for(true), "data/paper_trades.db");

        let mut shared = Config::default();
        shared.persistence.paper_db_path = shared.persistence.db_path.clone();
        assert!(shared.validate().is_err());
    }

    #[test]
    fn test_bounded_termination_from_toml() {
        let source = r#"
            [session]
            promotion = "retain"

            [session.termination]
            mode = "bounded"
            passes = 3
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.session.termination, Termination::Bounded { passes: 3 });
        assert_eq!(config.session.promotion, PromotionPolicy::Retain);
        assert_eq!(config.session.order_quantity, 10);
    }
}
