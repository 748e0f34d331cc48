//! Stage workers: the five polling loops over the shared sets.
//!
//! Every pass runs entirely under the shared lock. Collaborator failures are
//! logged and skip the affected entity for that pass; the next pass is the
//! retry. Only invariant violations end a worker early.

use super::error::PipelineError;
use super::gate::{StartGate, StopListener};
use super::lock::{LockHolder, SharedSets};
use super::sets::ClassificationSets;
use super::settings::SessionSettings;
use super::stage::{Stage, WorkerKind};
use crate::exchange::{GatewayError, OrderGateway, OrderSide};
use crate::risk::{StopDecision, TrailingStop};
use crate::strategy::{EvaluationError, Potential, PotentialEvaluator};
use chrono::{DateTime, Local, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Wall-clock source, injectable for market-close tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Local::now)
}

/// Everything a worker shares with its siblings.
pub struct StageContext {
    pub sets: SharedSets,
    pub evaluator: Arc<dyn PotentialEvaluator>,
    pub gateway: Arc<dyn OrderGateway>,
    pub settings: SessionSettings,
    pub clock: Clock,
    pub stop: StopListener,
}

impl StageContext {
    fn now(&self) -> DateTime<Local> {
        (self.clock)()
    }

    /// Termination or an interrupt, checked between passes only.
    fn should_stop(&self, passes_done: u32) -> bool {
        self.stop.is_triggered()
            || self
                .settings
                .termination
                .is_terminated(passes_done, self.now().time())
    }
}

/// Counters accumulated over a worker's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub kind: WorkerKind,
    pub passes: u32,
    pub evaluated: usize,
    pub skipped: usize,
    pub promoted: usize,
    pub orders_placed: usize,
    pub positions_closed: usize,
    pub failures: usize,
}

impl WorkerReport {
    fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            passes: 0,
            evaluated: 0,
            skipped: 0,
            promoted: 0,
            orders_placed: 0,
            positions_closed: 0,
            failures: 0,
        }
    }
}

pub struct StageWorker {
    kind: WorkerKind,
    ctx: Arc<StageContext>,
    stop: TrailingStop,
}

impl StageWorker {
    pub fn new(kind: WorkerKind, ctx: Arc<StageContext>) -> Self {
        let stop = TrailingStop::new(ctx.settings.trailing_percent);
        Self { kind, ctx, stop }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Wait for the gate, then loop until the session terminates.
    pub async fn run(self, mut gate: StartGate) -> Result<WorkerReport, PipelineError> {
        gate.wait().await?;

        let timing = self.ctx.settings.timing(self.kind);
        let termination = self.ctx.settings.termination;
        let mut report = WorkerReport::new(self.kind);
        info!(worker = %self.kind, ?termination, "Worker started");

        while !self.ctx.should_stop(report.passes) {
            {
                let mut sets = self.ctx.sets.acquire(LockHolder::Worker(self.kind)).await;
                self.run_pass(&mut sets, &mut report).await?;
                info!(
                    worker = %self.kind,
                    pass = report.passes + 1,
                    initial = sets.stage_len(Stage::Initial),
                    potential = sets.stage_len(Stage::Potential),
                    standby = sets.stage_len(Stage::Standby),
                    buy = sets.stage_len(Stage::Buy),
                    bought = sets.stage_len(Stage::Bought),
                    "Pass complete"
                );
            }
            report.passes += 1;

            if self.ctx.should_stop(report.passes) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(timing.poll_interval) => {}
                _ = self.ctx.stop.stopped() => break,
            }
        }

        info!(
            worker = %self.kind,
            passes = report.passes,
            promoted = report.promoted,
            failures = report.failures,
            "Worker stopped"
        );
        Ok(report)
    }

    /// One scan of the input stage. The caller holds the lock.
    pub async fn run_pass(
        &self,
        sets: &mut ClassificationSets,
        report: &mut WorkerReport,
    ) -> Result<(), PipelineError> {
        match self.kind {
            WorkerKind::Sell => self.sell_pass(sets, report).await?,
            _ => self.classify_pass(sets, report).await?,
        }
        sets.check_partition()
    }

    /// Whether a later stage already owns the entity.
    fn claimed_downstream(&self, sets: &ClassificationSets, symbol: &str) -> bool {
        let Some(entity) = sets.get(symbol) else {
            return true;
        };
        match self.kind {
            WorkerKind::Trend => entity.is_open() || sets.contains(Stage::Potential, symbol),
            WorkerKind::Tactical => {
                entity.is_open()
                    || sets.contains(Stage::Buy, symbol)
                    || sets.contains(Stage::Standby, symbol)
            }
            WorkerKind::Standby => entity.is_open() || sets.contains(Stage::Buy, symbol),
            WorkerKind::Execute => entity.is_open(),
            WorkerKind::Sell => false,
        }
    }

    async fn classify_pass(
        &self,
        sets: &mut ClassificationSets,
        report: &mut WorkerReport,
    ) -> Result<(), PipelineError> {
        let input = self.kind.input_stage();

        for symbol in sets.snapshot(input) {
            if self.claimed_downstream(sets, &symbol) {
                debug!(worker = %self.kind, %symbol, "Claimed downstream, skipping");
                report.skipped += 1;
                continue;
            }

            // Trend is a one-shot binary screen; the others re-score from zero.
            if self.kind != WorkerKind::Trend {
                sets.get_mut(&symbol)?.reset_potential();
            }

            let evaluation = self
                .bounded(
                    self.ctx.evaluator.evaluate(&symbol, self.kind.timeframe()),
                    EvaluationError::Timeout,
                )
                .await;

            match evaluation {
                Ok(potential) => {
                    report.evaluated += 1;
                    sets.get_mut(&symbol)?.potential = potential;
                    debug!(worker = %self.kind, %symbol, %potential, "Evaluated");
                    self.apply(sets, &symbol, potential, report).await?;
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(worker = %self.kind, %symbol, error = %e, "Evaluation failed, skipping");
                }
            }

            tokio::time::sleep(self.ctx.settings.timing(self.kind).item_delay).await;
        }

        Ok(())
    }

    /// Transition rule of a classification stage.
    async fn apply(
        &self,
        sets: &mut ClassificationSets,
        symbol: &str,
        potential: Potential,
        report: &mut WorkerReport,
    ) -> Result<(), PipelineError> {
        let target = match (self.kind, potential) {
            (WorkerKind::Trend, Potential::Strong) => Stage::Potential,
            (WorkerKind::Tactical, Potential::Strong) => Stage::Buy,
            (WorkerKind::Tactical, Potential::Weak) => Stage::Standby,
            (WorkerKind::Standby, Potential::Strong) => Stage::Buy,
            (WorkerKind::Execute, Potential::Strong) => {
                return self.buy(sets, symbol, report).await;
            }
            _ => return Ok(()),
        };

        sets.promote(symbol, self.kind.input_stage(), target)?;
        report.promoted += 1;
        info!(worker = %self.kind, %symbol, stage = %target, "Promoted");
        Ok(())
    }

    async fn buy(
        &self,
        sets: &mut ClassificationSets,
        symbol: &str,
        report: &mut WorkerReport,
    ) -> Result<(), PipelineError> {
        let quantity = self.ctx.settings.order_quantity;
        let placed = self
            .bounded(
                self.ctx.gateway.place_order(symbol, OrderSide::Buy, quantity),
                GatewayError::Timeout,
            )
            .await;

        match placed {
            Ok(true) => {
                let now = self.ctx.now().with_timezone(&Utc);
                sets.get_mut(symbol)?.open_position(now);
                sets.promote(symbol, Stage::Buy, Stage::Bought)?;
                report.orders_placed += 1;
                report.promoted += 1;
                info!(%symbol, quantity, "Bought");
            }
            Ok(false) => {
                info!(%symbol, "Order declined, staying in buy");
            }
            Err(e) => {
                report.failures += 1;
                warn!(%symbol, error = %e, "Order failed, staying in buy");
            }
        }
        Ok(())
    }

    async fn sell_pass(
        &self,
        sets: &mut ClassificationSets,
        report: &mut WorkerReport,
    ) -> Result<(), PipelineError> {
        let item_delay = self.ctx.settings.timing(self.kind).item_delay;

        for symbol in sets.snapshot(Stage::Bought) {
            self.review_position(sets, &symbol, report).await?;
            tokio::time::sleep(item_delay).await;
        }

        Ok(())
    }

    /// Trailing-stop and crossover check of one bought entity.
    async fn review_position(
        &self,
        sets: &mut ClassificationSets,
        symbol: &str,
        report: &mut WorkerReport,
    ) -> Result<(), PipelineError> {
        let observation = match self
            .bounded(
                self.ctx.gateway.get_open_position(symbol),
                GatewayError::Timeout,
            )
            .await
        {
            Ok(observation) => observation,
            Err(GatewayError::NoPosition(_)) => {
                // Bracket legs (take-profit, stop-loss) can flatten it at the broker.
                info!(%symbol, "Position closed by broker");
                return self.settle(sets, symbol, report);
            }
            Err(e) => {
                report.failures += 1;
                warn!(%symbol, error = %e, "Position lookup failed, skipping");
                return Ok(());
            }
        };
        report.evaluated += 1;

        let decision = {
            let record = sets.get_mut(symbol)?.position_mut().ok_or_else(|| {
                PipelineError::InvariantViolation(format!("{symbol} bought without a position record"))
            })?;
            self.stop.observe(record, &observation)
        };

        if decision.needs_review() {
            let crossed_down = match self
                .bounded(
                    self.ctx.evaluator.oscillator(symbol),
                    EvaluationError::Timeout,
                )
                .await
            {
                Ok(oscillator) => {
                    debug!(%symbol, k = oscillator.k, d = oscillator.d, "Tactical oscillator");
                    oscillator.crossed_down()
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(%symbol, error = %e, "Oscillator unavailable");
                    false
                }
            };

            let retraced = matches!(decision, StopDecision::Retraced { .. });
            if retraced || crossed_down {
                info!(%symbol, ?decision, crossed_down, "Sell signal");
                sets.get_mut(symbol)?.sell_signal = true;
            }
        }

        if !sets.get(symbol).is_some_and(|entity| entity.sell_signal) {
            return Ok(());
        }

        match self
            .bounded(self.ctx.gateway.close_position(symbol), GatewayError::Timeout)
            .await
        {
            Ok(()) => self.settle(sets, symbol, report)?,
            Err(GatewayError::NoPosition(_)) => {
                info!(%symbol, "Position already flat at broker");
                self.settle(sets, symbol, report)?;
            }
            Err(e) => {
                // sell_signal stays set, so the next pass retries the exit
                report.failures += 1;
                error!(%symbol, error = %e, "Failed to close position");
            }
        }
        Ok(())
    }

    /// Retire a position that is flat at the broker and book it in the day's ledger.
    fn settle(
        &self,
        sets: &mut ClassificationSets,
        symbol: &str,
        report: &mut WorkerReport,
    ) -> Result<(), PipelineError> {
        let now = self.ctx.now().with_timezone(&Utc);
        let record = sets.retire(symbol, now)?;
        info!(
            %symbol,
            unrealized_plpc = %record.unrealized_plpc,
            max_unrealized_plpc = %record.max_unrealized_plpc,
            "Sold"
        );
        sets.record_trade(self.ctx.settings.session_date, record);
        report.positions_closed += 1;
        Ok(())
    }

    /// Run a collaborator call under the session's call timeout.
    async fn bounded<T, E>(
        &self,
        call: impl Future<Output = Result<T, E>>,
        timed_out: fn(Duration) -> E,
    ) -> Result<T, E> {
        let limit = self.ctx.settings.call_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(timed_out(limit)))
    }
}
