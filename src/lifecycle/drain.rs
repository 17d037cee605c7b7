//! Graceful connection drain.
//!
//! # Responsibilities
//! - Capture the connection handlers live when the drain begins
//! - Ask each one to terminate itself, without blocking and without awaiting replies
//! - Hold the shutdown path for a fixed grace period, then let it continue regardless
//!
//! The grace period bounds shutdown latency; it does not guarantee handlers have exited.

use std::time::Duration;

use crate::net::connection::ConnectionSupervisor;
use crate::observability::metrics;

/// Grace period used when none is configured.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Handlers live when the drain began.
    pub captured: usize,
    /// Handlers that now have a terminate request pending.
    pub signalled: usize,
    /// Handlers still registered when the grace period ended.
    pub remaining: usize,
    pub grace: Duration,
}

#[derive(Debug, Clone)]
pub struct ShutdownDrainer {
    connections: ConnectionSupervisor,
    grace: Duration,
}

impl ShutdownDrainer {
    pub fn new(connections: ConnectionSupervisor, grace: Duration) -> Self {
        Self { connections, grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Signal every live handler, then wait out the grace period.
    pub async fn drain(&self) -> DrainReport {
        let children = self.connections.live();
        let captured = children.len();
        let signalled = children.iter().filter(|child| child.signal_terminate()).count();
        drop(children);

        metrics::record_drain_signals(signalled);
        tracing::info!(
            captured,
            signalled,
            grace = ?self.grace,
            "Draining client connections"
        );

        tokio::time::sleep(self.grace).await;

        let remaining = self.connections.active_count();
        if remaining > 0 {
            tracing::warn!(remaining, "Grace period elapsed with connections still open");
        } else {
            tracing::info!("All client connections drained");
        }

        DrainReport {
            captured,
            signalled,
            remaining,
            grace: self.grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn returns_at_deadline_even_if_children_never_exit() {
        let connections = ConnectionSupervisor::new();
        // Handlers that ignore the signal and never unregister.
        let stubborn: Vec<_> = (0..3).map(|_| connections.register(None)).collect();

        let drainer = ShutdownDrainer::new(connections.clone(), DEFAULT_GRACE_PERIOD);
        let started = Instant::now();
        let report = drainer.drain().await;

        assert!(started.elapsed() >= DEFAULT_GRACE_PERIOD);
        assert_eq!(report.captured, 3);
        assert_eq!(report.signalled, 3);
        assert_eq!(report.remaining, 3);
        drop(stubborn);
    }

    #[tokio::test(start_paused = true)]
    async fn cooperative_children_exit_within_grace() {
        let connections = ConnectionSupervisor::new();
        for _ in 0..4 {
            let (guard, mut signal) = connections.register(None);
            tokio::spawn(async move {
                signal.recv().await;
                drop(guard);
            });
        }

        let grace = Duration::from_secs(2);
        let started = Instant::now();
        let report = ShutdownDrainer::new(connections.clone(), grace).drain().await;

        assert!(started.elapsed() >= grace);
        assert_eq!(report.signalled, 4);
        assert_eq!(report.remaining, 0);
        assert_eq!(connections.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_even_with_nothing_to_drain() {
        let grace = Duration::from_millis(750);
        let started = Instant::now();
        let report = ShutdownDrainer::new(ConnectionSupervisor::new(), grace).drain().await;
        assert!(started.elapsed() >= grace);
        assert_eq!(report.captured, 0);
    }
}
