//! Service lifecycle state machine.
//!
//! ```text
//! Uninitialized → Starting → Running → Draining → Stopping → Stopped
//!                    │
//!                    └──────→ FailedStart
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Uninitialized,
    Starting,
    Running,
    Draining,
    Stopping,
    Stopped,
    FailedStart,
}

impl ServiceState {
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Uninitialized, Starting)
                | (Starting, Running)
                | (Starting, FailedStart)
                | (Running, Draining)
                | (Draining, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::FailedStart)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Draining => "draining",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::FailedStart => "failed_start",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ServiceState,
    pub to: ServiceState,
}

/// Shared, observable service state.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<ServiceState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServiceState::Uninitialized);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> ServiceState {
        *self.tx.borrow()
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&self, next: ServiceState) -> Result<ServiceState, InvalidTransition> {
        let mut result = Err(InvalidTransition {
            from: self.get(),
            to: next,
        });
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                result = Ok(*state);
                *state = next;
                true
            } else {
                result = Err(InvalidTransition { from: *state, to: next });
                false
            }
        });
        if let Ok(from) = result {
            tracing::info!(from = %from, to = %next, "Service state changed");
        }
        result
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.tx.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
