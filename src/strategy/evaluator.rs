//! Triple-timeframe potential evaluator backed by historical bars.

use super::indicators::{is_in_range, is_trending_up, sma, stochastic};
use super::signal::{EvaluationError, Oscillator, Potential, PotentialEvaluator, Timeframe};
use crate::config::IndicatorConfig;
use crate::exchange::{Bar, BarSource, BarTimeframe};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Daily bars requested for the trend screen.
const TREND_BAR_LIMIT: usize = 200;
/// Rows of the trend screen that must close above the moving average.
const TREND_LOOKBACK: usize = 60;
/// Moving-average values checked for a rising trend.
const TREND_SMA_TAIL: usize = 30;
/// Step (in days) between compared moving-average values.
const TREND_SMA_STEP: usize = 10;
/// Recent lows checked for a pull-back.
const PULLBACK_LOWS: usize = 6;
/// Hourly bars requested for the tactical screen.
const TACTICAL_BAR_LIMIT: usize = 100;
/// Minute bars requested for the execution screen.
const EXECUTION_BAR_LIMIT: usize = 10;
/// Minute highs checked for upward momentum.
const EXECUTION_HIGHS: usize = 3;

/// Evaluates potential on the trend, tactical and execution timeframes.
pub struct TripleScreenEvaluator<B> {
    bars: Arc<B>,
    config: IndicatorConfig,
}

fn column(bars: &[Bar], field: impl Fn(&Bar) -> rust_decimal::Decimal) -> Vec<f64> {
    bars.iter()
        .map(|bar| field(bar).to_f64().unwrap_or(f64::NAN))
        .collect()
}

impl<B: BarSource> TripleScreenEvaluator<B> {
    pub fn new(bars: Arc<B>, config: IndicatorConfig) -> Self {
        Self { bars, config }
    }

    /// Trend screen on daily bars.
    ///
    /// Strong when every recent close holds above the moving average, the
    /// average itself rises, the last lows pull back, and the last low sits
    /// within range of the average.
    #[instrument(skip(self))]
    async fn trend_potential(&self, symbol: &str) -> Result<Potential, EvaluationError> {
        let bars = self
            .bars
            .get_bars(symbol, BarTimeframe::Day, TREND_BAR_LIMIT)
            .await?;
        self.score_trend(symbol, &bars)
    }

    fn score_trend(&self, symbol: &str, bars: &[Bar]) -> Result<Potential, EvaluationError> {
        let window = self.config.sma_window;
        let required = window + TREND_LOOKBACK - 1;
        if bars.len() < required {
            return Err(EvaluationError::InsufficientData {
                required,
                available: bars.len(),
            });
        }

        let closes = column(bars, |b| b.close);
        let lows = column(bars, |b| b.low);
        let averages = sma(&closes, window);

        let recent_closes = &closes[closes.len() - TREND_LOOKBACK..];
        let recent_averages = &averages[averages.len() - TREND_LOOKBACK..];
        let recent_lows = &lows[lows.len() - TREND_LOOKBACK..];

        let above_average = recent_closes
            .iter()
            .zip(recent_averages)
            .all(|(close, average)| close >= average);
        if !above_average {
            return Ok(Potential::None);
        }

        let average_tail = &recent_averages[TREND_LOOKBACK - TREND_SMA_TAIL..];
        if !is_trending_up(average_tail, TREND_SMA_STEP) {
            return Ok(Potential::None);
        }
        info!(%symbol, "Trending up");

        let last_lows = &recent_lows[TREND_LOOKBACK - PULLBACK_LOWS..];
        if is_trending_up(last_lows, 1) {
            return Ok(Potential::None);
        }
        info!(%symbol, "In a recent pull-back");

        let last_low = recent_lows[TREND_LOOKBACK - 1];
        let last_average = recent_averages[TREND_LOOKBACK - 1];
        if is_in_range(last_low, last_average, self.config.range_percent) {
            info!(%symbol, last_low, last_average, "Low in range of moving average");
            return Ok(Potential::Strong);
        }

        Ok(Potential::None)
    }

    /// Latest stochastic reading on hourly bars.
    #[instrument(skip(self))]
    async fn tactical_oscillator(&self, symbol: &str) -> Result<Oscillator, EvaluationError> {
        let bars = self
            .bars
            .get_bars(symbol, BarTimeframe::Hour, TACTICAL_BAR_LIMIT)
            .await?;

        let readings = stochastic(
            &column(&bars, |b| b.high),
            &column(&bars, |b| b.low),
            &column(&bars, |b| b.close),
            self.config.stoch_fast_k,
            self.config.stoch_k,
            self.config.stoch_d,
        );

        let last = readings
            .last()
            .copied()
            .ok_or(EvaluationError::InsufficientData {
                required: self.config.stoch_fast_k + self.config.stoch_k + self.config.stoch_d - 2,
                available: bars.len(),
            })?;
        if !(last.k.is_finite() && last.d.is_finite()) {
            return Err(EvaluationError::FlatRange);
        }
        debug!(%symbol, k = last.k, d = last.d, "Calculated stochastic");
        Ok(last)
    }

    /// Tactical screen: weak when %K is within range of %D, strong when it
    /// is also at or above it.
    fn score_tactical(&self, oscillator: &Oscillator) -> Potential {
        if !is_in_range(oscillator.k, oscillator.d, self.config.range_percent) {
            return Potential::None;
        }
        if oscillator.k >= oscillator.d {
            Potential::Strong
        } else {
            Potential::Weak
        }
    }

    /// Execution screen: strong when the last minute highs keep rising.
    #[instrument(skip(self))]
    async fn execution_potential(&self, symbol: &str) -> Result<Potential, EvaluationError> {
        let bars = self
            .bars
            .get_bars(symbol, BarTimeframe::Minute, EXECUTION_BAR_LIMIT)
            .await?;
        if bars.len() < EXECUTION_HIGHS {
            return Err(EvaluationError::InsufficientData {
                required: EXECUTION_HIGHS,
                available: bars.len(),
            });
        }

        let highs = column(&bars[bars.len() - EXECUTION_HIGHS..], |b| b.high);
        debug!(%symbol, ?highs, "Last minute highs");
        Ok(if is_trending_up(&highs, 1) {
            Potential::Strong
        } else {
            Potential::None
        })
    }
}

#[async_trait]
impl<B: BarSource> PotentialEvaluator for TripleScreenEvaluator<B> {
    async fn evaluate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Potential, EvaluationError> {
        let potential = match timeframe {
            Timeframe::Trend => self.trend_potential(symbol).await?,
            Timeframe::Tactical => {
                let oscillator = self.tactical_oscillator(symbol).await?;
                self.score_tactical(&oscillator)
            }
            Timeframe::Execution => self.execution_potential(symbol).await?,
        };
        info!(%symbol, %timeframe, %potential, "Potential evaluated");
        Ok(potential)
    }

    async fn oscillator(&self, symbol: &str) -> Result<Oscillator, EvaluationError> {
        self.tactical_oscillator(symbol).await
    }
}
