//! Connection supervision and per-connection terminate signals.
//!
//! # Responsibilities
//! - Track every live client connection handler
//! - Generate unique connection IDs for tracing
//! - Give each handler a terminate channel the drainer can signal without blocking
//! - Hold each handler task's abort handle so shutdown can end handlers that ignore the signal

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Receiving end of a handler's terminate channel.
#[derive(Debug)]
pub struct TerminateSignal {
    rx: mpsc::Receiver<()>,
    requested: bool,
}

impl TerminateSignal {
    /// Resolves when the handler is asked to terminate.
    pub async fn recv(&mut self) {
        if !self.requested {
            // A closed channel means the supervisor forgot us; treat it as a request too.
            let _ = self.rx.recv().await;
            self.requested = true;
        }
    }

    /// Non-blocking check.
    pub fn is_requested(&mut self) -> bool {
        if !self.requested {
            self.requested = !matches!(self.rx.try_recv(), Err(mpsc::error::TryRecvError::Empty));
        }
        self.requested
    }
}

#[derive(Debug)]
struct HandlerEntry {
    peer: Option<SocketAddr>,
    terminate: mpsc::Sender<()>,
    task: Option<AbortHandle>,
}

/// Snapshot of one live handler, as captured at drain time.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    terminate: mpsc::Sender<()>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Ask the handler to terminate itself. Never blocks, never waits for an answer.
    ///
    /// Returns true if a request is now pending for the handler.
    pub fn signal_terminate(&self) -> bool {
        match self.terminate.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

/// Registry of live connection handlers. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSupervisor {
    handlers: Arc<DashMap<ConnectionId, HandlerEntry>>,
}

impl ConnectionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new handler. The guard unregisters it on drop.
    pub fn register(&self, peer: Option<SocketAddr>) -> (ConnectionGuard, TerminateSignal) {
        let id = ConnectionId::next();
        let (terminate, rx) = mpsc::channel(1);
        self.handlers.insert(
            id,
            HandlerEntry {
                peer,
                terminate,
                task: None,
            },
        );
        metrics::set_active_connections(self.handlers.len());
        tracing::trace!(connection_id = %id, peer = ?peer, "Connection registered");

        let guard = ConnectionGuard {
            handlers: self.handlers.clone(),
            id,
        };
        (guard, TerminateSignal { rx, requested: false })
    }

    /// Handlers live right now.
    pub fn live(&self) -> Vec<ConnectionHandle> {
        self.handlers
            .iter()
            .map(|entry| ConnectionHandle {
                id: *entry.key(),
                peer: entry.value().peer,
                terminate: entry.value().terminate.clone(),
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.handlers.len()
    }

    /// Record the task serving `id`. A handler that already finished is ignored.
    pub fn attach(&self, id: ConnectionId, task: AbortHandle) {
        if let Some(mut entry) = self.handlers.get_mut(&id) {
            entry.task = Some(task);
        }
    }

    /// Abort every handler still registered and forget it. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.handlers.iter().map(|e| *e.key()).collect();
        let mut aborted = 0;
        for id in ids {
            if let Some((_, entry)) = self.handlers.remove(&id) {
                if let Some(task) = entry.task {
                    task.abort();
                }
                aborted += 1;
            }
        }
        metrics::set_active_connections(self.handlers.len());
        if aborted > 0 {
            tracing::warn!(aborted, "Aborted connection handlers that outlived the drain");
        }
        aborted
    }
}

/// Guard that tracks a connection handler's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    handlers: Arc<DashMap<ConnectionId, HandlerEntry>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.handlers.remove(&self.id);
        metrics::set_active_connections(self.handlers.len());
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let supervisor = ConnectionSupervisor::new();
        let (a, _sa) = supervisor.register(None);
        let (b, _sb) = supervisor.register(None);
        assert_ne!(a.id(), b.id());
        assert!(b.id().as_u64() > a.id().as_u64());
    }

    #[test]
    fn guards_unregister_on_drop() {
        let supervisor = ConnectionSupervisor::new();
        let (guard1, _s1) = supervisor.register(None);
        let (guard2, _s2) = supervisor.register("127.0.0.1:4000".parse().ok());
        assert_eq!(supervisor.active_count(), 2);

        drop(guard1);
        assert_eq!(supervisor.active_count(), 1);
        assert_eq!(supervisor.live()[0].peer(), "127.0.0.1:4000".parse().ok());

        drop(guard2);
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn terminate_signal_reaches_handler() {
        let supervisor = ConnectionSupervisor::new();
        let (_guard, mut signal) = supervisor.register(None);
        assert!(!signal.is_requested());

        let handle = supervisor.live().pop().unwrap();
        assert!(handle.signal_terminate());
        // A second request while one is pending is not an error.
        assert!(handle.signal_terminate());
        signal.recv().await;
    }

    #[tokio::test]
    async fn abort_all_ends_handlers_that_ignore_terminate() {
        let supervisor = ConnectionSupervisor::new();
        let (guard, _signal) = supervisor.register(None);
        let id = guard.id();
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        supervisor.attach(id, task.abort_handle());

        for handle in supervisor.live() {
            handle.signal_terminate();
        }
        assert_eq!(supervisor.active_count(), 1);

        assert_eq!(supervisor.abort_all(), 1);
        assert_eq!(supervisor.active_count(), 0);
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(supervisor.abort_all(), 0);
    }

    #[test]
    fn signalling_a_departed_handler_reports_false() {
        let supervisor = ConnectionSupervisor::new();
        let (guard, signal) = supervisor.register(None);
        let handle = supervisor.live().pop().unwrap();
        drop(signal);
        drop(guard);
        assert!(!handle.signal_terminate());
    }
}
