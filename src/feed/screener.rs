//! Day-gainers screener feed.

use crate::config::FeedConfig;
use crate::exchange::{GatewayError, WatchlistSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, instrument};

const SCREENER_PATH: &str = "/v1/finance/screener/predefined/saved";
const SCREENER_ID: &str = "day_gainers";
const SCREENER_COUNT: u32 = 100;

#[derive(Debug, Deserialize)]
struct ScreenerResponse {
    finance: ScreenerFinance,
}

#[derive(Debug, Deserialize)]
struct ScreenerFinance {
    #[serde(default)]
    result: Vec<ScreenerResult>,
}

#[derive(Debug, Deserialize)]
struct ScreenerResult {
    #[serde(default)]
    quotes: Vec<serde_json::Value>,
}

/// One screener row that parsed cleanly.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenerQuote {
    pub symbol: String,
    pub regular_market_price: f64,
    pub regular_market_change: f64,
}

/// Which screener rows become candidates.
#[derive(Debug, Clone)]
pub struct ScreenerFilter {
    /// Exclusive lower price bound
    pub min_price: f64,
    /// Exclusive upper price bound
    pub max_price: f64,
    /// Minimum daily change
    pub min_change: f64,
}

impl From<&FeedConfig> for ScreenerFilter {
    fn from(config: &FeedConfig) -> Self {
        Self {
            min_price: config.min_price,
            max_price: config.max_price,
            min_change: config.min_change,
        }
    }
}

impl ScreenerFilter {
    /// Crypto pairs (`BTC-USD`), penny stocks, expensive stocks and weak
    /// movers are rejected.
    pub fn accepts(&self, quote: &ScreenerQuote) -> bool {
        !quote.symbol.contains('-')
            && self.min_price < quote.regular_market_price
            && quote.regular_market_price < self.max_price
            && quote.regular_market_change > self.min_change
    }
}

/// Watchlist source backed by a gainers screener endpoint.
pub struct ScreenerFeed {
    http: Client,
    base_url: String,
    filter: ScreenerFilter,
}

impl ScreenerFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            filter: ScreenerFilter::from(config),
        })
    }

    /// Fetch the screener and keep the rows passing the filter.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<BTreeSet<String>, GatewayError> {
        let url = format!("{}{}", self.base_url, SCREENER_PATH);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("scrIds", SCREENER_ID.to_string()),
                ("count", SCREENER_COUNT.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: ScreenerResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let symbols: BTreeSet<String> = body
            .finance
            .result
            .into_iter()
            .flat_map(|result| result.quotes)
            .filter_map(|row| serde_json::from_value::<ScreenerQuote>(row).ok())
            .filter(|quote| {
                let accepted = self.filter.accepts(quote);
                if accepted {
                    debug!(symbol = %quote.symbol, "Added to watchlist");
                }
                accepted
            })
            .map(|quote| quote.symbol)
            .collect();

        info!(count = symbols.len(), "Screener symbols fetched");
        Ok(symbols)
    }
}

#[async_trait]
impl WatchlistSource for ScreenerFeed {
    fn label(&self) -> &'static str {
        "screener"
    }

    async fn symbols(&self) -> Result<BTreeSet<String>, GatewayError> {
        self.fetch().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_for(server: &MockServer) -> ScreenerFeed {
        let config = FeedConfig {
            base_url: server.uri(),
            ..FeedConfig::default()
        };
        ScreenerFeed::new(&config).unwrap()
    }

    fn quote(symbol: &str, price: f64, change: f64) -> ScreenerQuote {
        ScreenerQuote {
            symbol: symbol.to_string(),
            regular_market_price: price,
            regular_market_change: change,
        }
    }

    #[test]
    fn test_filter_rules() {
        let filter = ScreenerFilter::from(&FeedConfig::default());

        assert!(filter.accepts(&quote("AMD", 150.0, 2.5)));
        assert!(!filter.accepts(&quote("BTC-USD", 150.0, 2.5)));
        assert!(!filter.accepts(&quote("PENNY", 3.0, 0.9)));
        assert!(!filter.accepts(&quote("PRICY", 1200.0, 30.0)));
        assert!(!filter.accepts(&quote("FLAT", 100.0, 0.5)));
        // Bounds are exclusive
        assert!(!filter.accepts(&quote("EDGE", 20.0, 1.0)));
    }

    #[tokio::test]
    async fn test_fetch_filters_and_skips_bad_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SCREENER_PATH))
            .and(query_param("scrIds", "day_gainers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "finance": {
                    "result": [{
                        "quotes": [
                            {"symbol": "AMD", "regularMarketPrice": 150.1, "regularMarketChange": 4.2},
                            {"symbol": "ETH-USD", "regularMarketPrice": 300.0, "regularMarketChange": 9.0},
                            {"symbol": "SNDL", "regularMarketPrice": 1.2, "regularMarketChange": 0.6},
                            {"symbol": "NOPRICE"},
                            {"symbol": "AMD", "regularMarketPrice": 150.1, "regularMarketChange": 4.2}
                        ]
                    }]
                }
            })))
            .mount(&server)
            .await;

        let symbols = feed_for(&server).symbols().await.unwrap();
        assert_eq!(symbols.into_iter().collect::<Vec<_>>(), vec!["AMD".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SCREENER_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = feed_for(&server).fetch().await.unwrap_err();
        assert!(matches!(err, GatewayError::Api { status: 503, .. }));
        assert!(err.is_transient());
    }
}
