//! Stage partition of all entities plus the per-day trade ledger.
//!
//! `ClassificationSets` has no internal lock. It is only reachable through
//! the guard handed out by [`super::lock::SharedSets`], so every read and
//! mutation happens under the single shared lock.

use super::entity::{PositionRecord, Tradable};
use super::error::PipelineError;
use super::stage::Stage;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// What a promotion does with the upstream membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionPolicy {
    /// Leave the upstream stage; every entity sits in exactly one stage.
    #[default]
    Move,
    /// Keep upstream memberships; downstream guards stop reprocessing and
    /// the entity's stage is its most advanced membership.
    Retain,
}

#[derive(Debug)]
pub struct ClassificationSets {
    entities: HashMap<String, Tradable>,
    stages: HashMap<Stage, HashSet<String>>,
    trades: BTreeMap<NaiveDate, Vec<PositionRecord>>,
    policy: PromotionPolicy,
}

impl Default for ClassificationSets {
    fn default() -> Self {
        Self::new(PromotionPolicy::default())
    }
}

impl ClassificationSets {
    pub fn new(policy: PromotionPolicy) -> Self {
        Self {
            entities: HashMap::new(),
            stages: Stage::ALL.iter().map(|s| (*s, HashSet::new())).collect(),
            trades: BTreeMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> PromotionPolicy {
        self.policy
    }

    /// Add `entity` to `stage`. Returns `false` if it was already a member.
    ///
    /// An entity already tracked elsewhere keeps its state; under
    /// [`PromotionPolicy::Move`] it may not join a second stage.
    pub fn add(&mut self, stage: Stage, entity: Tradable) -> Result<bool, PipelineError> {
        let symbol = entity.symbol().to_string();
        if self.contains(stage, &symbol) {
            return Ok(false);
        }
        if self.policy == PromotionPolicy::Move {
            if let Some(current) = self.stage_of(&symbol) {
                return Err(PipelineError::InvariantViolation(format!(
                    "{symbol} already in {current}, cannot add to {stage}"
                )));
            }
        }

        self.entities.entry(symbol.clone()).or_insert(entity);
        self.members_mut(stage).insert(symbol);
        Ok(true)
    }

    /// Drop `symbol` from `stage`. The entity is forgotten once it has no
    /// memberships left.
    pub fn remove(&mut self, stage: Stage, symbol: &str) -> bool {
        let removed = self.members_mut(stage).remove(symbol);
        if removed && self.stage_of(symbol).is_none() {
            self.entities.remove(symbol);
        }
        removed
    }

    pub fn contains(&self, stage: Stage, symbol: &str) -> bool {
        self.stages
            .get(&stage)
            .is_some_and(|members| members.contains(symbol))
    }

    /// Stable, sorted view of a stage's members at this instant.
    pub fn snapshot(&self, stage: Stage) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .stages
            .get(&stage)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        symbols
    }

    pub fn get(&self, symbol: &str) -> Option<&Tradable> {
        self.entities.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Result<&mut Tradable, PipelineError> {
        self.entities
            .get_mut(symbol)
            .ok_or_else(|| PipelineError::UnknownSymbol(symbol.to_string()))
    }

    /// Move `symbol` forward from `from` to `to`.
    pub fn promote(&mut self, symbol: &str, from: Stage, to: Stage) -> Result<(), PipelineError> {
        if !self.contains(from, symbol) {
            return Err(PipelineError::NotInStage {
                symbol: symbol.to_string(),
                stage: from,
            });
        }
        if to.rank() < from.rank() {
            return Err(PipelineError::BackwardPromotion {
                symbol: symbol.to_string(),
                from,
                to,
            });
        }

        self.members_mut(to).insert(symbol.to_string());
        if self.policy == PromotionPolicy::Move {
            self.members_mut(from).remove(symbol);
        }
        debug!(%symbol, %from, %to, "Promoted");

        self.check_entity(symbol)
    }

    /// Most advanced stage the entity belongs to.
    pub fn stage_of(&self, symbol: &str) -> Option<Stage> {
        self.memberships(symbol).into_iter().max()
    }

    pub fn memberships(&self, symbol: &str) -> Vec<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .filter(|stage| self.contains(*stage, symbol))
            .collect()
    }

    /// Verify the membership invariant for every tracked entity.
    pub fn check_partition(&self) -> Result<(), PipelineError> {
        for symbol in self.entities.keys() {
            self.check_entity(symbol)?;
        }
        for stage in Stage::ALL {
            for symbol in self.snapshot(stage) {
                if !self.entities.contains_key(&symbol) {
                    return Err(PipelineError::InvariantViolation(format!(
                        "{symbol} in {stage} has no entity"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_entity(&self, symbol: &str) -> Result<(), PipelineError> {
        let memberships = self.memberships(symbol);
        let valid = match self.policy {
            PromotionPolicy::Move => memberships.len() == 1,
            PromotionPolicy::Retain => !memberships.is_empty(),
        };
        if valid {
            Ok(())
        } else {
            Err(PipelineError::InvariantViolation(format!(
                "{symbol} has memberships {memberships:?} under {:?}",
                self.policy
            )))
        }
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn stage_len(&self, stage: Stage) -> usize {
        self.stages.get(&stage).map_or(0, HashSet::len)
    }

    /// Close a bought entity's position and drop it from every stage.
    pub fn retire(
        &mut self,
        symbol: &str,
        at: DateTime<Utc>,
    ) -> Result<PositionRecord, PipelineError> {
        if !self.contains(Stage::Bought, symbol) {
            return Err(PipelineError::NotInStage {
                symbol: symbol.to_string(),
                stage: Stage::Bought,
            });
        }

        let record = self.get_mut(symbol)?.close_position(at).ok_or_else(|| {
            PipelineError::InvariantViolation(format!("{symbol} bought without a position record"))
        })?;

        for members in self.stages.values_mut() {
            members.remove(symbol);
        }
        self.entities.remove(symbol);
        Ok(record)
    }

    pub fn record_trade(&mut self, date: NaiveDate, record: PositionRecord) {
        self.trades.entry(date).or_default().push(record);
    }

    pub fn trades_on(&self, date: NaiveDate) -> &[PositionRecord] {
        self.trades.get(&date).map_or(&[], Vec::as_slice)
    }

    /// Drain the ledger for `date`.
    pub fn take_trades(&mut self, date: NaiveDate) -> Vec<PositionRecord> {
        self.trades.remove(&date).unwrap_or_default()
    }

    /// Position records of every entity still open in `bought`.
    pub fn open_positions(&self) -> Vec<PositionRecord> {
        self.snapshot(Stage::Bought)
            .iter()
            .filter_map(|symbol| self.entities.get(symbol))
            .filter(|entity| entity.is_open())
            .filter_map(|entity| entity.position().cloned())
            .collect()
    }

    fn members_mut(&mut self, stage: Stage) -> &mut HashSet<String> {
        self.stages.entry(stage).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bought(sets: &mut ClassificationSets, symbol: &str) {
        let mut entity = Tradable::new(symbol);
        entity.open_position(Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap());
        sets.add(Stage::Bought, entity).unwrap();
    }

    #[test]
    fn test_add_and_snapshot() {
        let mut sets = ClassificationSets::default();
        assert!(sets.add(Stage::Initial, Tradable::new("TSLA")).unwrap());
        assert!(sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap());
        assert!(!sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap());

        assert_eq!(sets.snapshot(Stage::Initial), vec!["AAPL", "TSLA"]);
        assert_eq!(sets.len(), 2);
        assert!(sets.snapshot(Stage::Buy).is_empty());
    }

    #[test]
    fn test_move_rejects_second_membership() {
        let mut sets = ClassificationSets::new(PromotionPolicy::Move);
        sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap();
        let err = sets.add(Stage::Buy, Tradable::new("AAPL")).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(_)));
    }

    #[test]
    fn test_promote_move_leaves_upstream() {
        let mut sets = ClassificationSets::new(PromotionPolicy::Move);
        sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap();

        sets.promote("AAPL", Stage::Initial, Stage::Potential).unwrap();

        assert!(!sets.contains(Stage::Initial, "AAPL"));
        assert!(sets.contains(Stage::Potential, "AAPL"));
        assert_eq!(sets.stage_of("AAPL"), Some(Stage::Potential));
        sets.check_partition().unwrap();
    }

    #[test]
    fn test_promote_retain_keeps_upstream() {
        let mut sets = ClassificationSets::new(PromotionPolicy::Retain);
        sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap();

        sets.promote("AAPL", Stage::Initial, Stage::Potential).unwrap();

        assert!(sets.contains(Stage::Initial, "AAPL"));
        assert!(sets.contains(Stage::Potential, "AAPL"));
        assert_eq!(sets.stage_of("AAPL"), Some(Stage::Potential));
        sets.check_partition().unwrap();
    }

    #[test]
    fn test_backward_promotion_rejected() {
        let mut sets = ClassificationSets::default();
        bought(&mut sets, "MSFT");

        let err = sets.promote("MSFT", Stage::Bought, Stage::Buy).unwrap_err();
        assert!(matches!(err, PipelineError::BackwardPromotion { .. }));
        assert!(sets.contains(Stage::Bought, "MSFT"));
    }

    #[test]
    fn test_promote_requires_membership() {
        let mut sets = ClassificationSets::default();
        sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap();

        let err = sets.promote("AAPL", Stage::Potential, Stage::Buy).unwrap_err();
        assert!(matches!(err, PipelineError::NotInStage { .. }));
    }

    #[test]
    fn test_remove_forgets_entity_without_memberships() {
        let mut sets = ClassificationSets::new(PromotionPolicy::Retain);
        sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap();
        sets.promote("AAPL", Stage::Initial, Stage::Potential).unwrap();

        assert!(sets.remove(Stage::Initial, "AAPL"));
        assert!(sets.get("AAPL").is_some());
        assert!(sets.remove(Stage::Potential, "AAPL"));
        assert!(sets.get("AAPL").is_none());
        assert!(!sets.remove(Stage::Potential, "AAPL"));
    }

    #[test]
    fn test_check_partition_detects_double_membership() {
        let mut sets = ClassificationSets::new(PromotionPolicy::Move);
        sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap();
        sets.members_mut(Stage::Standby).insert("AAPL".to_string());

        assert!(sets.check_partition().is_err());
    }

    #[test]
    fn test_retire_records_exit_and_removes_everywhere() {
        let mut sets = ClassificationSets::new(PromotionPolicy::Retain);
        sets.add(Stage::Initial, Tradable::new("GOOG")).unwrap();
        sets.promote("GOOG", Stage::Initial, Stage::Potential).unwrap();
        sets.promote("GOOG", Stage::Potential, Stage::Buy).unwrap();
        sets.get_mut("GOOG")
            .unwrap()
            .open_position(Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap());
        sets.promote("GOOG", Stage::Buy, Stage::Bought).unwrap();

        let closed_at = Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap();
        let record = sets.retire("GOOG", closed_at).unwrap();

        assert_eq!(record.closed_at, Some(closed_at));
        assert!(sets.memberships("GOOG").is_empty());
        assert!(sets.is_empty());
    }

    #[test]
    fn test_retire_requires_bought() {
        let mut sets = ClassificationSets::default();
        sets.add(Stage::Buy, Tradable::new("GOOG")).unwrap();
        assert!(sets.retire("GOOG", Utc::now()).is_err());
    }

    #[test]
    fn test_trade_ledger_per_day() {
        let mut sets = ClassificationSets::default();
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let record = PositionRecord::open("GOOG", Utc::now());

        sets.record_trade(today, record.clone());
        sets.record_trade(tomorrow, record);

        assert_eq!(sets.trades_on(today).len(), 1);
        assert_eq!(sets.take_trades(today).len(), 1);
        assert!(sets.trades_on(today).is_empty());
        assert_eq!(sets.trades_on(tomorrow).len(), 1);
    }

    #[test]
    fn test_open_positions_only_bought() {
        let mut sets = ClassificationSets::default();
        sets.add(Stage::Initial, Tradable::new("AAPL")).unwrap();
        bought(&mut sets, "MSFT");

        let open = sets.open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "MSFT");
    }
}
