//! Alpaca REST API client (trading + market data).

use crate::config::AlpacaConfig;
use crate::exchange::error::GatewayError;
use crate::exchange::traits::{BarSource, OrderGateway, WatchlistSource};
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
const DATA_BASE_URL: &str = "https://data.alpaca.markets";

/// Bracket take-profit relative to the last bid.
const TAKE_PROFIT_RATIO: Decimal = dec!(1.30);
/// Bracket stop trigger relative to the last ask.
const STOP_TRIGGER_RATIO: Decimal = dec!(0.90);
/// Bracket stop limit relative to the last ask.
const STOP_LIMIT_RATIO: Decimal = dec!(0.88);

/// Alpaca API client for trading and market data.
pub struct AlpacaClient {
    http: Client,
    trading_url: String,
    data_url: String,
    watchlist_id: String,
}

impl AlpacaClient {
    /// Create a new Alpaca client from configuration.
    pub fn new(config: &AlpacaConfig) -> Result<Self> {
        let trading_url = if config.paper {
            PAPER_BASE_URL
        } else {
            LIVE_BASE_URL
        };
        Self::with_urls(config, trading_url, DATA_BASE_URL)
    }

    /// Create a client against explicit base URLs.
    pub fn with_urls(
        config: &AlpacaConfig,
        trading_url: impl Into<String>,
        data_url: impl Into<String>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            HeaderValue::from_str(&config.api_key).context("Invalid Alpaca API key")?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            HeaderValue::from_str(&config.api_secret).context("Invalid Alpaca API secret")?,
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            trading_url: trading_url.into(),
            data_url: data_url.into(),
            watchlist_id: config.watchlist_id.clone(),
        })
    }

    /// Map non-success statuses to `GatewayError::Api`.
    async fn check(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let response = self.http.get(url).query(query).send().await?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    // ==================== Account & Trading ====================

    /// Get the configured watchlist.
    #[instrument(skip(self))]
    pub async fn get_watchlist(&self) -> Result<Watchlist, GatewayError> {
        let url = format!("{}/v2/watchlists/{}", self.trading_url, self.watchlist_id);
        self.get_json(&url, &[]).await
    }

    /// Get asset details for a symbol.
    #[instrument(skip(self))]
    pub async fn get_asset(&self, symbol: &str) -> Result<Asset, GatewayError> {
        let url = format!("{}/v2/assets/{}", self.trading_url, symbol);
        self.get_json(&url, &[]).await
    }

    /// Get all open positions.
    #[instrument(skip(self))]
    pub async fn get_positions(&self) -> Result<Vec<Position>, GatewayError> {
        let url = format!("{}/v2/positions", self.trading_url);
        self.get_json(&url, &[]).await
    }

    /// Get the open position for a symbol.
    #[instrument(skip(self))]
    pub async fn get_position(&self, symbol: &str) -> Result<Position, GatewayError> {
        let url = format!("{}/v2/positions/{}", self.trading_url, symbol);
        match self.get_json(&url, &[]).await {
            Err(GatewayError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(GatewayError::NoPosition(symbol.to_string()))
            }
            other => other,
        }
    }

    /// Submit a new order.
    #[instrument(skip(self, order), fields(symbol = %order.symbol, side = %order.side))]
    pub async fn submit_order(&self, order: &NewOrder) -> Result<OrderResponse, GatewayError> {
        let url = format!("{}/v2/orders", self.trading_url);
        let response = self.http.post(&url).json(order).send().await?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    // ==================== Market Data ====================

    /// Get the latest quote for a symbol.
    #[instrument(skip(self))]
    pub async fn get_latest_quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_url, symbol);
        let response: LatestQuoteResponse = self.get_json(&url, &[]).await?;
        Ok(response.quote)
    }

    /// Build a bracket market order around the latest quote.
    pub fn bracket_order(symbol: &str, side: OrderSide, quantity: u32, quote: &Quote) -> NewOrder {
        NewOrder {
            symbol: symbol.to_string(),
            qty: quantity.to_string(),
            side,
            order_type: "market".to_string(),
            time_in_force: "gtc".to_string(),
            order_class: "bracket".to_string(),
            take_profit: TakeProfit {
                limit_price: (quote.bid_price * TAKE_PROFIT_RATIO).round_dp(2),
            },
            stop_loss: StopLoss {
                stop_price: (quote.ask_price * STOP_TRIGGER_RATIO).round_dp(2),
                limit_price: (quote.ask_price * STOP_LIMIT_RATIO).round_dp(2),
            },
        }
    }
}

#[async_trait]
impl OrderGateway for AlpacaClient {
    async fn is_tradable(&self, symbol: &str) -> Result<bool, GatewayError> {
        let asset = self.get_asset(symbol).await?;
        Ok(asset.is_tradable())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u32,
    ) -> Result<bool, GatewayError> {
        if !self.is_tradable(symbol).await? {
            warn!(%symbol, "Asset not tradable, order skipped");
            return Ok(false);
        }

        let quote = self.get_latest_quote(symbol).await?;
        let order = Self::bracket_order(symbol, side, quantity, &quote);
        let response = self.submit_order(&order).await?;

        info!(
            %symbol,
            order_id = %response.id,
            status = %response.status,
            take_profit = %order.take_profit.limit_price,
            stop = %order.stop_loss.stop_price,
            "Bracket order submitted"
        );
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn close_position(&self, symbol: &str) -> Result<(), GatewayError> {
        let url = format!("{}/v2/positions/{}", self.trading_url, symbol);
        let response = self.http.delete(&url).send().await?;
        Self::check(response).await?;
        debug!(%symbol, "Close position request accepted");
        Ok(())
    }

    async fn get_open_position(&self, symbol: &str) -> Result<OpenPosition, GatewayError> {
        let position = self.get_position(symbol).await?;
        Ok(OpenPosition::from(&position))
    }
}

#[async_trait]
impl BarSource for AlpacaClient {
    #[instrument(skip(self))]
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: BarTimeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, GatewayError> {
        let url = format!("{}/v2/stocks/{}/bars", self.data_url, symbol);
        let response: BarsResponse = self
            .get_json(
                &url,
                &[
                    ("timeframe", timeframe.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(response.bars.unwrap_or_default())
    }
}

#[async_trait]
impl WatchlistSource for AlpacaClient {
    fn label(&self) -> &'static str {
        "alpaca-watchlist"
    }

    async fn symbols(&self) -> Result<BTreeSet<String>, GatewayError> {
        if self.watchlist_id.is_empty() {
            info!("No Alpaca watchlist configured");
            return Ok(BTreeSet::new());
        }
        let watchlist = self.get_watchlist().await?;
        debug!(name = %watchlist.name, assets = watchlist.assets.len(), "Fetched watchlist");
        Ok(watchlist.assets.into_iter().map(|a| a.symbol).collect())
    }
}
