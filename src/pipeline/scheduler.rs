//! Session scheduler: builds the shared sets, starts the five workers
//! behind the start gate and flushes the ledger once they all stop.

use super::entity::Tradable;
use super::error::PipelineError;
use super::gate::{start_gate, StopListener};
use super::lock::{LockHolder, SharedSets};
use super::sets::ClassificationSets;
use super::settings::SessionSettings;
use super::stage::{Stage, WorkerKind};
use super::worker::{system_clock, Clock, StageContext, StageWorker, WorkerReport};
use crate::exchange::{OrderGateway, WatchlistSource};
use crate::feed::combined_watchlist;
use crate::persistence::TradeStore;
use crate::strategy::PotentialEvaluator;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one trading session.
#[derive(Debug)]
pub struct SessionReport {
    pub workers: Vec<WorkerReport>,
    /// Trades flushed to the store
    pub trades_flushed: usize,
    /// Positions carried into the next session
    pub open_positions: usize,
}

pub struct Scheduler {
    evaluator: Arc<dyn PotentialEvaluator>,
    gateway: Arc<dyn OrderGateway>,
    watchlists: Vec<Arc<dyn WatchlistSource>>,
    store: Arc<dyn TradeStore>,
    settings: SessionSettings,
    clock: Clock,
    stop: StopListener,
}

impl Scheduler {
    pub fn new(
        evaluator: Arc<dyn PotentialEvaluator>,
        gateway: Arc<dyn OrderGateway>,
        watchlists: Vec<Arc<dyn WatchlistSource>>,
        store: Arc<dyn TradeStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            evaluator,
            gateway,
            watchlists,
            store,
            settings,
            clock: system_clock(),
            stop: StopListener::default(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Let an external switch end the session early. Workers finish their
    /// current pass and the ledger is still flushed.
    pub fn with_stop(mut self, stop: StopListener) -> Self {
        self.stop = stop;
        self
    }

    /// Seed the sets: persisted open positions go to `bought`, watchlist
    /// symbols not already tracked go to `initial`.
    pub async fn build_sets(&self) -> Result<ClassificationSets> {
        let mut sets = ClassificationSets::new(self.settings.promotion);

        let open = self
            .store
            .load_open_positions()
            .context("Failed to load open positions")?;
        for record in open {
            let symbol = record.symbol.clone();
            sets.add(Stage::Bought, Tradable::from_open_position(record))
                .with_context(|| format!("Failed to restore {symbol}"))?;
        }

        let candidates = combined_watchlist(&self.watchlists).await;
        let mut added = 0;
        for symbol in candidates {
            if sets.get(&symbol).is_some() {
                continue;
            }
            if sets.add(Stage::Initial, Tradable::new(symbol))? {
                added += 1;
            }
        }

        info!(
            initial = added,
            bought = sets.stage_len(Stage::Bought),
            "Classification sets built"
        );
        Ok(sets)
    }

    /// Build the sets and run one full session.
    pub async fn run(&self) -> Result<SessionReport> {
        let sets = self.build_sets().await?;
        self.run_with(SharedSets::new(sets)).await
    }

    /// Run one session over already-built sets.
    pub async fn run_with(&self, sets: SharedSets) -> Result<SessionReport> {
        let ctx = Arc::new(StageContext {
            sets: sets.clone(),
            evaluator: self.evaluator.clone(),
            gateway: self.gateway.clone(),
            settings: self.settings.clone(),
            clock: self.clock.clone(),
            stop: self.stop.clone(),
        });

        let (signal, gate) = start_gate();
        let handles: Vec<_> = WorkerKind::ALL
            .iter()
            .map(|kind| {
                let worker = StageWorker::new(*kind, ctx.clone());
                let gate = gate.clone();
                (*kind, tokio::spawn(worker.run(gate)))
            })
            .collect();

        info!(workers = handles.len(), "Opening start gate");
        signal.open();

        let mut workers = Vec::with_capacity(handles.len());
        let mut first_failure: Option<PipelineError> = None;
        for (kind, handle) in handles {
            let outcome = handle
                .await
                .map_err(|e| PipelineError::WorkerPanicked(e.to_string()))
                .and_then(|result| result);
            match outcome {
                Ok(report) => workers.push(report),
                Err(e) => {
                    error!(worker = %kind, error = %e, "Worker failed");
                    first_failure.get_or_insert(e);
                }
            }
        }

        // Flush exactly once, after every worker (including Sell) has stopped.
        let (trades, open) = {
            let mut sets = sets.acquire(LockHolder::Scheduler).await;
            (
                sets.take_trades(self.settings.session_date),
                sets.open_positions(),
            )
        };

        self.store
            .append_trades(self.settings.session_date, &trades)
            .context("Failed to flush trade ledger")?;
        self.store
            .store_open_positions(&open)
            .context("Failed to store open positions")?;
        info!(
            date = %self.settings.session_date,
            trades = trades.len(),
            open_positions = open.len(),
            "Session flushed"
        );

        if let Some(e) = first_failure {
            warn!("Session ended with a failed worker");
            return Err(e.into());
        }

        Ok(SessionReport {
            workers,
            trades_flushed: trades.len(),
            open_positions: open.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockOrderGateway, MockWatchlistSource, OpenPosition, PaperBroker};
    use crate::feed::StaticWatchlist;
    use crate::persistence::{MockTradeStore, SqliteTradeStore};
    use crate::pipeline::gate::Termination;
    use crate::pipeline::settings::StageTiming;
    use crate::pipeline::PositionRecord;
    use crate::strategy::{MockPotentialEvaluator, Oscillator, Potential, Timeframe};
    use chrono::{NaiveDate, Utc};
    use mockall::predicate::{always, eq};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn session_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn settings(passes: u32) -> SessionSettings {
        SessionSettings::default()
            .with_termination(Termination::Bounded { passes })
            .with_session_date(session_date())
            .with_uniform_timing(StageTiming {
                poll_interval: Duration::from_millis(1),
                item_delay: Duration::ZERO,
            })
    }

    fn open_record(symbol: &str) -> PositionRecord {
        let mut record = PositionRecord::open(symbol, Utc::now());
        record.cost_basis = Some(dec!(100));
        record
    }

    #[tokio::test]
    async fn test_build_sets_restores_bought_and_dedups_watchlists() {
        let mut store = MockTradeStore::new();
        store
            .expect_load_open_positions()
            .returning(|| Ok(vec![open_record("MSFT")]));

        let mut failing = MockWatchlistSource::new();
        failing.expect_label().return_const("alpaca-watchlist");
        failing.expect_symbols().returning(|| {
            Err(crate::exchange::GatewayError::InvalidResponse(
                "down".to_string(),
            ))
        });

        let scheduler = Scheduler::new(
            Arc::new(MockPotentialEvaluator::new()),
            Arc::new(MockOrderGateway::new()),
            vec![
                Arc::new(StaticWatchlist::new(["AAPL", "MSFT"])),
                Arc::new(StaticWatchlist::new(["AAPL", "TSLA"])),
                Arc::new(failing),
            ],
            Arc::new(store),
            settings(1),
        );

        let sets = scheduler.build_sets().await.unwrap();

        assert_eq!(sets.snapshot(Stage::Initial), vec!["AAPL", "TSLA"]);
        assert_eq!(sets.snapshot(Stage::Bought), vec!["MSFT"]);
        assert!(sets.get("MSFT").unwrap().is_open());
        sets.check_partition().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_session_flushes_ledger_once() {
        let mut evaluator = MockPotentialEvaluator::new();
        evaluator
            .expect_evaluate()
            .with(always(), eq(Timeframe::Trend))
            .returning(|_, _| Ok(Potential::Strong));
        evaluator
            .expect_evaluate()
            .with(always(), eq(Timeframe::Tactical))
            .returning(|_, _| Ok(Potential::None));
        evaluator
            .expect_oscillator()
            .returning(|_| Ok(Oscillator { k: 10.0, d: 50.0 }));

        let mut gateway = MockOrderGateway::new();
        gateway.expect_get_open_position().returning(|_| {
            Ok(OpenPosition {
                cost_basis: dec!(100),
                unrealized_plpc: dec!(-0.01),
            })
        });
        gateway
            .expect_close_position()
            .with(eq("GOOG"))
            .times(1)
            .returning(|_| Ok(()));

        let mut store = MockTradeStore::new();
        store
            .expect_load_open_positions()
            .returning(|| Ok(vec![open_record("GOOG")]));
        store
            .expect_append_trades()
            .withf(|date, records| {
                *date == session_date() && records.len() == 1 && records[0].symbol == "GOOG"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_store_open_positions()
            .withf(|records| records.is_empty())
            .times(1)
            .returning(|_| Ok(()));

        let scheduler = Scheduler::new(
            Arc::new(evaluator),
            Arc::new(gateway),
            vec![Arc::new(StaticWatchlist::new(["AAPL"]))],
            Arc::new(store),
            settings(3),
        );

        let report = scheduler.run().await.unwrap();

        assert_eq!(report.workers.len(), 5);
        assert!(report.workers.iter().all(|w| w.passes == 3));
        assert_eq!(report.trades_flushed, 1);
        assert_eq!(report.open_positions, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_never_share_the_lock() {
        let mut evaluator = MockPotentialEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _| Ok(Potential::Weak));
        evaluator
            .expect_oscillator()
            .returning(|_| Ok(Oscillator { k: 60.0, d: 50.0 }));

        let gateway = PaperBroker::new();
        let store = SqliteTradeStore::in_memory().unwrap();

        let scheduler = Scheduler::new(
            Arc::new(evaluator),
            Arc::new(gateway),
            vec![Arc::new(StaticWatchlist::new(["AAPL", "AMD", "NVDA"]))],
            Arc::new(store),
            settings(5),
        );
        let sets = SharedSets::instrumented(scheduler.build_sets().await.unwrap());

        scheduler.run_with(sets.clone()).await.unwrap();

        let spans = sets.spans();
        let worker_spans = spans
            .iter()
            .filter(|span| span.holder != LockHolder::Scheduler)
            .count();
        assert_eq!(worker_spans, 25);
        for (i, a) in spans.iter().enumerate() {
            for b in &spans[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }

        let sets = sets.acquire(LockHolder::Scheduler).await;
        sets.check_partition().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interrupted_session_still_flushes() {
        let mut evaluator = MockPotentialEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _| Ok(Potential::Strong));
        evaluator
            .expect_oscillator()
            .returning(|_| Ok(Oscillator { k: 60.0, d: 50.0 }));

        let broker = Arc::new(PaperBroker::new());
        let store = Arc::new(SqliteTradeStore::in_memory().unwrap());
        let (switch, stop) = crate::pipeline::gate::stop_switch();

        let scheduler = Scheduler::new(
            Arc::new(evaluator),
            broker.clone(),
            Vec::new(),
            store.clone(),
            settings(u32::MAX).with_uniform_timing(StageTiming {
                poll_interval: Duration::from_millis(5),
                item_delay: Duration::ZERO,
            }),
        )
        .with_stop(stop);
        let mut sets = ClassificationSets::default();
        sets.add(Stage::Buy, Tradable::new("AAPL")).unwrap();

        let session = tokio::spawn(async move { scheduler.run_with(SharedSets::new(sets)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        switch.trigger();

        let report = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.workers.len(), 5);
        assert_eq!(report.open_positions, 1);
        let carried = store.load_open_positions().unwrap();
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_paper_session_buys_and_carries_position() {
        let mut evaluator = MockPotentialEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _| Ok(Potential::Strong));
        evaluator
            .expect_oscillator()
            .returning(|_| Ok(Oscillator { k: 60.0, d: 50.0 }));

        let broker = Arc::new(PaperBroker::new());
        broker.set_price("AAPL", dec!(180)).await;
        let store = Arc::new(SqliteTradeStore::in_memory().unwrap());

        let scheduler = Scheduler::new(
            Arc::new(evaluator),
            broker.clone(),
            Vec::new(),
            store.clone(),
            settings(2),
        );
        let mut sets = ClassificationSets::default();
        sets.add(Stage::Buy, Tradable::new("AAPL")).unwrap();

        scheduler.run_with(SharedSets::new(sets)).await.unwrap();

        assert_eq!(broker.order_count(), 1);
        let carried = store.load_open_positions().unwrap();
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].symbol, "AAPL");
        assert!(store.trades_on(session_date()).unwrap().is_empty());
    }
}
