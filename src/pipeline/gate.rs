//! Startup gate and session termination.

use super::error::PipelineError;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Create a closed gate and the signal that opens it.
pub fn start_gate() -> (StartSignal, StartGate) {
    let (tx, rx) = watch::channel(false);
    (StartSignal { tx }, StartGate { rx })
}

/// Opens the gate once shared state is initialized.
#[derive(Debug)]
pub struct StartSignal {
    tx: watch::Sender<bool>,
}

impl StartSignal {
    pub fn open(self) {
        // Receivers may all be gone already; nothing left to release then.
        let _ = self.tx.send(true);
    }
}

/// Held by every worker until the session starts.
#[derive(Debug, Clone)]
pub struct StartGate {
    rx: watch::Receiver<bool>,
}

impl StartGate {
    /// Wait until the gate opens. Fails if the signal is dropped unopened.
    pub async fn wait(&mut self) -> Result<(), PipelineError> {
        self.rx
            .wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|_| PipelineError::GateClosed)
    }

    pub fn is_open(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Create an untriggered stop switch for an interrupted session.
pub fn stop_switch() -> (StopSwitch, StopListener) {
    let (tx, rx) = watch::channel(false);
    (StopSwitch { tx }, StopListener { rx })
}

/// Asks every worker to stop after its current pass.
#[derive(Debug)]
pub struct StopSwitch {
    tx: watch::Sender<bool>,
}

impl StopSwitch {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Worker side of the stop switch. The default listener never triggers.
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once triggered; pends forever if the switch is dropped untriggered.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for StopListener {
    fn default() -> Self {
        let (_, listener) = stop_switch();
        listener
    }
}

/// When stage workers stop looping. Checked once per pass, never mid-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Termination {
    /// Stop once local wall-clock time reaches `close_at`.
    MarketClose { close_at: NaiveTime },
    /// Stop after a fixed number of passes.
    Bounded { passes: u32 },
}

impl Termination {
    pub fn is_terminated(&self, passes_done: u32, now: NaiveTime) -> bool {
        match self {
            Termination::MarketClose { close_at } => now >= *close_at,
            Termination::Bounded { passes } => passes_done >= *passes,
        }
    }
}
