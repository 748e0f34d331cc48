//! In-memory paper broker for paper sessions and tests.

use super::error::GatewayError;
use super::traits::OrderGateway;
use super::types::{OpenPosition, OrderSide};
use crate::pipeline::PositionRecord;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated open position.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperPosition {
    pub symbol: String,
    pub quantity: u32,
    pub cost_basis: Decimal,
    pub unrealized_plpc: Decimal,
}

/// Paper trading state.
#[derive(Debug, Default)]
pub struct PaperState {
    pub positions: HashMap<String, PaperPosition>,
    /// Last known price per symbol, used to derive cost basis on fill
    pub prices: HashMap<String, Decimal>,
    /// Symbols the broker refuses to trade
    pub untradable: HashSet<String>,
    /// Symbols whose positions were closed, in order
    pub closed: Vec<String>,
}

/// Paper broker that fills every order immediately.
pub struct PaperBroker {
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperState::default())),
            order_id_counter: AtomicU64::new(1),
        }
    }

    /// Set the simulated price used for new fills.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    /// Set the simulated unrealized P/L of an open position.
    pub async fn set_unrealized_plpc(&self, symbol: &str, plpc: Decimal) {
        if let Some(position) = self.state.write().await.positions.get_mut(symbol) {
            position.unrealized_plpc = plpc;
        }
    }

    /// Refuse future orders for `symbol`.
    pub async fn mark_untradable(&self, symbol: &str) {
        self.state
            .write()
            .await
            .untradable
            .insert(symbol.to_string());
    }

    /// Re-open positions carried over from a previous paper session.
    pub async fn restore(&self, records: &[PositionRecord], quantity: u32) -> usize {
        let mut state = self.state.write().await;
        for record in records.iter().filter(|record| !record.is_closed()) {
            state.positions.insert(
                record.symbol.clone(),
                PaperPosition {
                    symbol: record.symbol.clone(),
                    quantity,
                    cost_basis: record.cost_basis.unwrap_or_default(),
                    unrealized_plpc: record.unrealized_plpc,
                },
            );
        }
        info!(positions = state.positions.len(), "Paper positions restored");
        state.positions.len()
    }

    /// Number of orders filled so far.
    pub fn order_count(&self) -> u64 {
        self.order_id_counter.load(Ordering::SeqCst) - 1
    }

    pub async fn position(&self, symbol: &str) -> Option<PaperPosition> {
        self.state.read().await.positions.get(symbol).cloned()
    }

    pub async fn closed_symbols(&self) -> Vec<String> {
        self.state.read().await.closed.clone()
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderGateway for PaperBroker {
    async fn is_tradable(&self, symbol: &str) -> Result<bool, GatewayError> {
        Ok(!self.state.read().await.untradable.contains(symbol))
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u32,
    ) -> Result<bool, GatewayError> {
        let mut state = self.state.write().await;
        if state.untradable.contains(symbol) {
            debug!(%symbol, "Paper order refused: not tradable");
            return Ok(false);
        }

        let price = state.prices.get(symbol).copied().unwrap_or(Decimal::ONE);
        match side {
            OrderSide::Buy => {
                let position = state
                    .positions
                    .entry(symbol.to_string())
                    .or_insert_with(|| PaperPosition {
                        symbol: symbol.to_string(),
                        quantity: 0,
                        cost_basis: Decimal::ZERO,
                        unrealized_plpc: Decimal::ZERO,
                    });
                position.quantity += quantity;
                position.cost_basis += price * Decimal::from(quantity);
            }
            OrderSide::Sell => {
                let Some(position) = state.positions.get_mut(symbol) else {
                    return Err(GatewayError::NoPosition(symbol.to_string()));
                };
                position.quantity = position.quantity.saturating_sub(quantity);
                if position.quantity == 0 {
                    state.positions.remove(symbol);
                    state.closed.push(symbol.to_string());
                }
            }
        }

        let order_id = self.next_order_id();
        info!(order_id, %symbol, %side, quantity, %price, "Paper order filled");
        Ok(true)
    }

    async fn close_position(&self, symbol: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        if state.positions.remove(symbol).is_none() {
            return Err(GatewayError::NoPosition(symbol.to_string()));
        }
        state.closed.push(symbol.to_string());
        info!(%symbol, "Paper position closed");
        Ok(())
    }

    async fn get_open_position(&self, symbol: &str) -> Result<OpenPosition, GatewayError> {
        let state = self.state.read().await;
        let position = state
            .positions
            .get(symbol)
            .ok_or_else(|| GatewayError::NoPosition(symbol.to_string()))?;
        Ok(OpenPosition {
            cost_basis: position.cost_basis,
            unrealized_plpc: position.unrealized_plpc,
        })
    }
}
