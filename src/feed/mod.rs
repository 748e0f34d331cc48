//! Candidate symbol feeds seeding the `initial` stage.
//!
//! Sources are unioned; a failing source contributes nothing and never
//! stops the session from starting.

mod screener;

pub use screener::{ScreenerFeed, ScreenerFilter, ScreenerQuote};

use crate::exchange::{GatewayError, WatchlistSource};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Fixed list of symbols.
#[derive(Debug, Clone, Default)]
pub struct StaticWatchlist {
    symbols: BTreeSet<String>,
}

impl StaticWatchlist {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl WatchlistSource for StaticWatchlist {
    fn label(&self) -> &'static str {
        "static"
    }

    async fn symbols(&self) -> Result<BTreeSet<String>, GatewayError> {
        Ok(self.symbols.clone())
    }
}

/// Union of every source, deduplicated by symbol.
pub async fn combined_watchlist(sources: &[Arc<dyn WatchlistSource>]) -> BTreeSet<String> {
    let mut union = BTreeSet::new();
    for source in sources {
        match source.symbols().await {
            Ok(symbols) => {
                info!(source = source.label(), count = symbols.len(), "Watchlist fetched");
                union.extend(symbols);
            }
            Err(e) => {
                warn!(source = source.label(), error = %e, "Watchlist unavailable, adding 0 symbols");
            }
        }
    }
    union
}
