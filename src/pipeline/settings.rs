//! Runtime settings of one trading session.

use super::gate::Termination;
use super::sets::PromotionPolicy;
use super::stage::WorkerKind;
use crate::config::{Config, StageTimingConfig};
use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use std::time::Duration;

/// Poll interval and per-item delay of one stage worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTiming {
    /// Sleep between passes, outside the lock
    pub poll_interval: Duration,
    /// Sleep after each external call, inside the lock
    pub item_delay: Duration,
}

impl From<StageTimingConfig> for StageTiming {
    fn from(config: StageTimingConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            item_delay: Duration::from_millis(config.item_delay_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub termination: Termination,
    pub promotion: PromotionPolicy,
    pub call_timeout: Duration,
    pub order_quantity: u32,
    pub trailing_percent: Decimal,
    /// Ledger key for trades closed in this session
    pub session_date: NaiveDate,
    trend: StageTiming,
    tactical: StageTiming,
    standby: StageTiming,
    execute: StageTiming,
    sell: StageTiming,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let session = &config.session;
        let stages = &config.stages;
        Self {
            termination: session.termination,
            promotion: session.promotion,
            call_timeout: Duration::from_secs(session.call_timeout_secs),
            order_quantity: session.order_quantity,
            trailing_percent: session.trailing_percent,
            session_date: Local::now().date_naive(),
            trend: stages.trend.into(),
            tactical: stages.tactical.into(),
            standby: stages.standby.into(),
            execute: stages.execute.into(),
            sell: stages.sell.into(),
        }
    }

    pub fn timing(&self, kind: WorkerKind) -> StageTiming {
        match kind {
            WorkerKind::Trend => self.trend,
            WorkerKind::Tactical => self.tactical,
            WorkerKind::Standby => self.standby,
            WorkerKind::Execute => self.execute,
            WorkerKind::Sell => self.sell,
        }
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_promotion(mut self, promotion: PromotionPolicy) -> Self {
        self.promotion = promotion;
        self
    }

    pub fn with_session_date(mut self, date: NaiveDate) -> Self {
        self.session_date = date;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Use the same timing for every stage.
    pub fn with_uniform_timing(mut self, timing: StageTiming) -> Self {
        self.trend = timing;
        self.tactical = timing;
        self.standby = timing;
        self.execute = timing;
        self.sell = timing;
        self
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_maps_timings() {
        let settings = SessionSettings::default();
        assert_eq!(
            settings.timing(WorkerKind::Trend),
            StageTiming {
                poll_interval: Duration::from_secs(900),
                item_delay: Duration::from_millis(200),
            }
        );
        assert_eq!(
            settings.timing(WorkerKind::Sell).item_delay,
            Duration::from_millis(2000)
        );
        assert_eq!(settings.call_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_uniform_timing_overrides_all_stages() {
        let timing = StageTiming {
            poll_interval: Duration::ZERO,
            item_delay: Duration::ZERO,
        };
        let settings = SessionSettings::default().with_uniform_timing(timing);
        for kind in WorkerKind::ALL {
            assert_eq!(settings.timing(kind), timing);
        }
    }
}
