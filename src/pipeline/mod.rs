//! Concurrent multi-stage classification pipeline.
//!
//! Five workers (trend, tactical, standby, execute, sell) poll their input
//! stage under one shared lock and move entities forward:
//!
//! ```text
//! initial -> potential -> standby -> buy -> bought -> (sold)
//!                      \_________/
//! ```
//!
//! The scheduler seeds the stages, releases all workers at once through the
//! start gate and flushes the day's trade ledger after they stop.

mod entity;
mod error;
mod gate;
mod lock;
mod scheduler;
mod sets;
mod settings;
mod stage;
mod worker;

pub use entity::{PositionRecord, Tradable};
pub use error::PipelineError;
pub use gate::{start_gate, stop_switch, StartGate, StartSignal, StopListener, StopSwitch, Termination};
pub use lock::{LockHolder, LockSpan, SetsGuard, SharedSets};
pub use scheduler::{Scheduler, SessionReport};
pub use sets::{ClassificationSets, PromotionPolicy};
pub use settings::{SessionSettings, StageTiming};
pub use stage::{Stage, WorkerKind};
pub use worker::{system_clock, Clock, StageContext, StageWorker, WorkerReport};
