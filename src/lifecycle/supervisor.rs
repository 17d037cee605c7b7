//! Supervision root.
//!
//! # Responsibilities
//! - Own every long-lived child task of the service
//! - Restart children according to their policy, within a restart intensity
//! - Escalate when the intensity is exceeded: the root gives up and its waiters are told why
//! - Terminate children (newest first) on shutdown, aborting any that overstay
//!
//! # Design Decisions
//! - A child's exit is observed only by its monitor task, never by siblings
//! - Children receive a dedicated stop channel instead of being looked up by name
//! - Only the root may abort a child task

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{ShutdownConfig, SupervisorConfig};
use crate::lifecycle::sequencer::SubsystemError;
use crate::observability::metrics;
use crate::resilience::backoff::RestartBackoff;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("supervision root is no longer running")]
    NotRunning,

    #[error("a child named `{0}` is already supervised")]
    DuplicateChild(String),

    #[error("no child named `{0}`")]
    UnknownChild(String),

    #[error("supervision root gave up: {0}")]
    Escalated(String),
}

/// When a child that exited should be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Always restarted.
    Permanent,
    /// Restarted only after an abnormal exit.
    Transient,
    /// Never restarted.
    Temporary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChildExit {
    Normal,
    Failed(String),
    Panicked,
}

impl RestartPolicy {
    fn should_restart(self, exit: &ChildExit) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => *exit != ChildExit::Normal,
            RestartPolicy::Temporary => false,
        }
    }
}

/// Handed to each run of a child.
#[derive(Debug, Clone)]
pub struct ChildContext {
    name: Arc<str>,
    stop: watch::Receiver<bool>,
}

impl ChildContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once the root asks this child to stop.
    pub async fn stopped(&mut self) {
        while !*self.stop.borrow_and_update() {
            if self.stop.changed().await.is_err() {
                return;
            }
        }
    }
}

pub type ChildFuture = BoxFuture<'static, Result<(), SubsystemError>>;
type ChildFactory = Box<dyn Fn(ChildContext) -> ChildFuture + Send + Sync>;

/// How to run (and re-run) one child.
pub struct ChildSpec {
    name: Arc<str>,
    policy: RestartPolicy,
    factory: ChildFactory,
}

impl ChildSpec {
    pub fn new<F, Fut>(name: impl Into<String>, policy: RestartPolicy, run: F) -> Self
    where
        F: Fn(ChildContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SubsystemError>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            policy,
            factory: Box::new(move |ctx| run(ctx).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }
}

impl std::fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSpec")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Restart budget shared by all children of the root.
#[derive(Debug, Clone, Copy)]
pub struct RestartIntensity {
    pub max_restarts: u32,
    pub window: Duration,
    pub backoff: RestartBackoff,
}

impl RestartIntensity {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            window: Duration::from_secs(config.restart_window_secs),
            backoff: RestartBackoff::from_config(config),
        }
    }
}

impl Default for RestartIntensity {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

/// Lifecycle of the root itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootStatus {
    Running,
    Terminated,
    Escalated(String),
}

struct ChildEntry {
    name: Arc<str>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct RootInner {
    children: Mutex<Vec<ChildEntry>>,
    restarts: Mutex<VecDeque<Instant>>,
    intensity: RestartIntensity,
    stop_timeout: Duration,
    status: watch::Sender<RootStatus>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RootInner {
    fn is_running(&self) -> bool {
        *self.status.borrow() == RootStatus::Running
    }

    /// Record a restart; false once the intensity is exceeded.
    fn permit_restart(&self) -> bool {
        let now = Instant::now();
        let mut restarts = lock(&self.restarts);
        while restarts
            .front()
            .is_some_and(|at| now.duration_since(*at) > self.intensity.window)
        {
            restarts.pop_front();
        }
        restarts.push_back(now);
        restarts.len() <= self.intensity.max_restarts as usize
    }

    /// Give up: flag every child to stop and wake whoever waits on the root.
    fn escalate(&self, reason: String) {
        tracing::error!(reason = %reason, "Supervision root escalating, shutting down");
        self.status.send_if_modified(|status| {
            if *status == RootStatus::Running {
                *status = RootStatus::Escalated(reason);
                true
            } else {
                false
            }
        });
        for child in lock(&self.children).iter() {
            let _ = child.stop_tx.send(true);
        }
    }
}

/// Root of the service's task tree. Cheap to clone.
#[derive(Clone)]
pub struct SupervisionRoot {
    inner: Arc<RootInner>,
}

impl std::fmt::Debug for SupervisionRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisionRoot")
            .field("status", &self.status())
            .field("children", &self.children())
            .finish()
    }
}

impl SupervisionRoot {
    pub fn new(intensity: RestartIntensity, stop_timeout: Duration) -> Self {
        let (status, _) = watch::channel(RootStatus::Running);
        Self {
            inner: Arc::new(RootInner {
                children: Mutex::new(Vec::new()),
                restarts: Mutex::new(VecDeque::new()),
                intensity,
                stop_timeout,
                status,
            }),
        }
    }

    pub fn from_config(supervisor: &SupervisorConfig, shutdown: &ShutdownConfig) -> Self {
        Self::new(RestartIntensity::from_config(supervisor), shutdown.child_stop_timeout())
    }

    pub fn status(&self) -> RootStatus {
        self.inner.status.borrow().clone()
    }

    /// Names of supervised children, oldest first.
    pub fn children(&self) -> Vec<String> {
        lock(&self.inner.children)
            .iter()
            .map(|c| c.name.to_string())
            .collect()
    }

    /// Whether `name` is supervised and its monitor is still running.
    pub fn is_alive(&self, name: &str) -> bool {
        lock(&self.inner.children)
            .iter()
            .any(|c| &*c.name == name && !c.task.is_finished())
    }

    /// Start supervising a child.
    pub fn start_child(&self, spec: ChildSpec) -> Result<(), SupervisorError> {
        if !self.inner.is_running() {
            return Err(SupervisorError::NotRunning);
        }
        let mut children = lock(&self.inner.children);
        if children.iter().any(|c| c.name == spec.name) {
            return Err(SupervisorError::DuplicateChild(spec.name.to_string()));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let name = spec.name.clone();
        let task = tokio::spawn(supervise(self.inner.clone(), spec, stop_rx));
        tracing::debug!(child = %name, "Child started");
        children.push(ChildEntry { name, stop_tx, task });
        Ok(())
    }

    /// Stop one child and forget it.
    pub async fn terminate_child(&self, name: &str) -> Result<(), SupervisorError> {
        let entry = {
            let mut children = lock(&self.inner.children);
            let position = children
                .iter()
                .position(|c| &*c.name == name)
                .ok_or_else(|| SupervisorError::UnknownChild(name.to_string()))?;
            children.remove(position)
        };
        self.stop_entry(entry).await;
        Ok(())
    }

    /// Terminate every child, newest first.
    pub async fn shutdown(&self) {
        self.inner.status.send_if_modified(|status| {
            if *status == RootStatus::Running {
                *status = RootStatus::Terminated;
                true
            } else {
                false
            }
        });

        let children = std::mem::take(&mut *lock(&self.inner.children));
        tracing::info!(count = children.len(), "Terminating supervised children");
        for entry in children.into_iter().rev() {
            self.stop_entry(entry).await;
        }
    }

    /// Resolves when the root stops running.
    pub async fn wait(&self) -> Result<(), SupervisorError> {
        let mut rx = self.inner.status.subscribe();
        let status = match rx.wait_for(|status| *status != RootStatus::Running).await {
            Ok(status) => status.clone(),
            Err(_) => RootStatus::Terminated,
        };
        match status {
            RootStatus::Escalated(reason) => Err(SupervisorError::Escalated(reason)),
            _ => Ok(()),
        }
    }

    async fn stop_entry(&self, entry: ChildEntry) {
        let ChildEntry { name, stop_tx, mut task } = entry;
        let _ = stop_tx.send(true);
        match tokio::time::timeout(self.inner.stop_timeout, &mut task).await {
            Ok(_) => tracing::debug!(child = %name, "Child stopped"),
            Err(_) => {
                tracing::warn!(child = %name, timeout = ?self.inner.stop_timeout, "Child did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
    }
}

/// Backoff attempt for the next restart. A run that outlived the intensity window starts over.
fn next_attempt(previous: u32, ran_for: Duration, window: Duration) -> u32 {
    if ran_for > window {
        1
    } else {
        previous.saturating_add(1)
    }
}

/// Run a child until it is told to stop or its policy says it is done.
async fn supervise(root: Arc<RootInner>, spec: ChildSpec, mut stop_rx: watch::Receiver<bool>) {
    let mut attempt = 0u32;
    loop {
        let ctx = ChildContext {
            name: spec.name.clone(),
            stop: stop_rx.clone(),
        };
        let started = Instant::now();
        let result = AssertUnwindSafe((spec.factory)(ctx)).catch_unwind().await;

        if *stop_rx.borrow() {
            break;
        }

        let exit = match result {
            Ok(Ok(())) => ChildExit::Normal,
            Ok(Err(e)) => ChildExit::Failed(e.to_string()),
            Err(_) => ChildExit::Panicked,
        };
        match &exit {
            ChildExit::Normal => tracing::info!(child = %spec.name, "Child exited"),
            ChildExit::Failed(error) => tracing::warn!(child = %spec.name, error = %error, "Child failed"),
            ChildExit::Panicked => tracing::error!(child = %spec.name, "Child panicked"),
        }

        if !spec.policy.should_restart(&exit) {
            break;
        }
        if !root.permit_restart() {
            root.escalate(format!(
                "child `{}` exceeded {} restarts in {:?}",
                spec.name, root.intensity.max_restarts, root.intensity.window
            ));
            break;
        }

        attempt = next_attempt(attempt, started.elapsed(), root.intensity.window);
        metrics::record_child_restart(&spec.name);
        let delay = root.intensity.backoff.delay(attempt);
        tracing::info!(child = %spec.name, attempt, delay = ?delay, "Restarting child");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.wait_for(|stop| *stop) => break,
        }
    }
}
