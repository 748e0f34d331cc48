//! Typed failures for broker and market-data calls.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single broker or data-API call.
///
/// Every call site in the pipeline matches on this result and skips the
/// affected symbol for the current pass instead of aborting.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0} is not tradable")]
    NotTradable(String),

    #[error("no open position for {0}")]
    NoPosition(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    /// True for failures worth retrying on the next pass.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(_) | GatewayError::Timeout(_) => true,
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(GatewayError::Api {
            status: 429,
            body: "rate limited".to_string()
        }
        .is_transient());
        assert!(!GatewayError::Api {
            status: 403,
            body: "forbidden".to_string()
        }
        .is_transient());
        assert!(!GatewayError::NoPosition("AAPL".to_string()).is_transient());
    }
}
