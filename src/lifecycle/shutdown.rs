//! Shutdown coordination.
//!
//! # Responsibilities
//! - `prepare_stop`: close the client listener, stop modules, drain connections
//! - `stop`: tear down the supervision root, abort leftover connection handlers, run subsystem
//!   stop actions, release the PID file
//!
//! # Design Decisions
//! - Once begun, shutdown runs to completion; every failure along the way is logged only
//! - The drain grace period is the one bounded wait; everything after it is teardown
//! - The grace period is read from the live configuration, not the startup snapshot

use crate::lifecycle::drain::{DrainReport, ShutdownDrainer};
use crate::lifecycle::sequencer::StopReport;
use crate::lifecycle::startup::Service;
use crate::lifecycle::state::ServiceState;
use crate::modules::ModuleReport;
use crate::net::listener::LISTENER_CHILD;

/// What `prepare_stop` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareStopReport {
    pub modules: ModuleReport,
    pub drain: DrainReport,
}

impl Service {
    /// Stop taking new work and let live connections wind down.
    ///
    /// Returns `None` if the service was not running.
    pub async fn prepare_stop(&mut self) -> Option<PrepareStopReport> {
        if let Err(e) = self.context.state.transition(ServiceState::Draining) {
            tracing::warn!(error = %e, "prepare_stop ignored");
            return None;
        }
        tracing::info!("Preparing to stop");

        match self.root.root().terminate_child(LISTENER_CHILD).await {
            Ok(()) => tracing::info!("Client listener stopped"),
            Err(e) => tracing::warn!(error = %e, "Client listener was not running"),
        }

        let modules = self.context.modules.stop_modules().await;

        let grace = self.context.store.current().shutdown.grace_period();
        let drain = ShutdownDrainer::new(self.context.connections.clone(), grace)
            .drain()
            .await;

        if let Err(e) = self.context.state.transition(ServiceState::Stopping) {
            tracing::warn!(error = %e, "Unexpected state after drain");
        }

        Some(PrepareStopReport { modules, drain })
    }

    /// Terminate the task tree and undo startup.
    pub async fn stop(mut self) -> StopReport {
        if self.context.state.get() == ServiceState::Running {
            self.prepare_stop().await;
        }

        self.root.root().shutdown().await;
        // Handlers that ignored the drain's terminate request.
        self.context.connections.abort_all();
        self.context.cluster.disconnect_all();

        let report = self.sequencer.stop().await;
        for failure in &report.failures {
            tracing::warn!(step = %failure.step, error = %failure.error, "Subsystem stop failed");
        }

        self.pid.release();

        if let Err(e) = self.context.state.transition(ServiceState::Stopped) {
            tracing::warn!(error = %e, "Unexpected state at stop");
        }

        let config = self.context.store.current();
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            node = %config.node.name,
            "xmppd {} stopped on node {}",
            env!("CARGO_PKG_VERSION"),
            config.node.name
        );
        report
    }
}
