//! Startup orchestration.
//!
//! # Responsibilities
//! - Reject unsupported start modes before anything is touched
//! - Write the PID file, then run the subsystem steps in order
//! - Create the supervision root with its liveness anchor and dependent children
//! - Kick off cluster links, start per-host modules, then open the client listener
//!
//! # Design Decisions
//! - Fail fast: the first fatal error aborts startup and undoes what already ran
//! - Steps run one after another, never concurrently
//! - The listener opens last, so traffic only arrives once everything else is up
//! - Startup returns a [`RootHandle`] to wait on instead of registering a global name

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::cluster::ClusterConnector;
use crate::config::ConfigStore;
use crate::lifecycle::anchor::LivenessAnchor;
use crate::lifecycle::pidfile::PidFileGuard;
use crate::lifecycle::sequencer::{SubsystemError, SubsystemSequencer, SubsystemStep};
use crate::lifecycle::state::{ServiceState, StateCell};
use crate::lifecycle::supervisor::{ChildSpec, SupervisionRoot, SupervisorError};
use crate::modules::{ModuleFramework, ModuleRegistry};
use crate::net::connection::ConnectionSupervisor;
use crate::net::listener::{ConnectionHandler, DiscardHandler, Listener, ListenerError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("service already started (state: {0})")]
    AlreadyStarted(ServiceState),

    #[error("subsystem `{step}` failed to start: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: SubsystemError,
    },

    #[error("cannot write PID file {}: {source}", .path.display())]
    CannotWritePidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("supervision root: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("client listener: {0}")]
    Listener(#[from] ListenerError),
}

/// How the node joins its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Normal,
    Takeover,
    Failover,
}

impl StartMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StartMode::Normal => "normal",
            StartMode::Takeover => "takeover",
            StartMode::Failover => "failover",
        }
    }
}

impl FromStr for StartMode {
    type Err = StartupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(StartMode::Normal),
            "takeover" => Ok(StartMode::Takeover),
            "failover" => Ok(StartMode::Failover),
            other => Err(StartupError::BadArgument(format!("unknown start mode `{other}`"))),
        }
    }
}

/// Shared handles every subsystem may need. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub store: ConfigStore,
    pub state: StateCell,
    pub connections: ConnectionSupervisor,
    pub cluster: ClusterConnector,
    pub modules: Arc<ModuleRegistry>,
}

/// Top-level handle returned by startup; the caller waits on it.
#[derive(Debug, Clone)]
pub struct RootHandle {
    root: SupervisionRoot,
    anchor: LivenessAnchor,
}

impl RootHandle {
    pub fn root(&self) -> &SupervisionRoot {
        &self.root
    }

    pub fn anchor(&self) -> &LivenessAnchor {
        &self.anchor
    }

    /// Resolves when the root stops, with an error if it gave up on a child.
    pub async fn wait(&self) -> Result<(), SupervisorError> {
        self.root.wait().await
    }
}

/// A started service. Shut it down with `prepare_stop` then `stop`.
#[derive(Debug)]
pub struct Service {
    pub(crate) context: ServiceContext,
    pub(crate) sequencer: SubsystemSequencer,
    pub(crate) pid: PidFileGuard,
    pub(crate) root: RootHandle,
    pub(crate) listener_addr: Option<SocketAddr>,
}

impl Service {
    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    pub fn root(&self) -> &RootHandle {
        &self.root
    }

    pub fn state(&self) -> ServiceState {
        self.context.state.get()
    }

    /// Address the client listener actually bound.
    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.listener_addr
    }
}

pub struct ServiceBuilder {
    context: ServiceContext,
    steps: Vec<SubsystemStep>,
    children: Vec<ChildSpec>,
    handler: Arc<dyn ConnectionHandler>,
}

impl std::fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("steps", &self.steps)
            .field("children", &self.children)
            .finish()
    }
}

impl ServiceBuilder {
    pub fn new(store: ConfigStore, framework: Arc<dyn ModuleFramework>) -> Self {
        let cluster = ClusterConnector::new(&store.current().cluster);
        let modules = Arc::new(ModuleRegistry::new(store.clone(), framework));
        Self {
            context: ServiceContext {
                store,
                state: StateCell::new(),
                connections: ConnectionSupervisor::new(),
                cluster,
                modules,
            },
            steps: Vec::new(),
            children: Vec::new(),
            handler: Arc::new(DiscardHandler),
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Append a subsystem step; steps start in the order they are added.
    pub fn step(mut self, step: SubsystemStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = SubsystemStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Add a dependent subsystem to run under the supervision root.
    pub fn child(mut self, spec: ChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    pub fn connection_handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Bring the service up.
    pub async fn start(self, mode: StartMode) -> Result<Service, StartupError> {
        if mode != StartMode::Normal {
            tracing::error!(mode = mode.as_str(), "Unsupported start mode");
            return Err(StartupError::BadArgument(format!(
                "start mode `{}` is not supported",
                mode.as_str()
            )));
        }

        let ServiceBuilder {
            context,
            steps,
            children,
            handler,
        } = self;

        context
            .state
            .transition(ServiceState::Starting)
            .map_err(|e| StartupError::AlreadyStarted(e.from))?;

        let config = context.store.current();
        tracing::info!(
            node = %config.node.name,
            version = env!("CARGO_PKG_VERSION"),
            hosts = config.hosts.len(),
            "Starting service"
        );

        let mut boot = Boot {
            context: context.clone(),
            sequencer: SubsystemSequencer::new(steps),
            pid: PidFileGuard::new(config.pid_file.clone()),
            root: None,
            modules_started: false,
        };

        if let Err(e) = boot.pid.acquire() {
            return Err(boot.abort(e).await);
        }
        if let Err(e) = boot.sequencer.start().await {
            return Err(boot.abort(e).await);
        }

        let root = SupervisionRoot::from_config(&config.supervisor, &config.shutdown);
        boot.root = Some(root.clone());
        let anchor = match LivenessAnchor::spawn(&root) {
            Ok(anchor) => anchor,
            Err(e) => return Err(boot.abort(e.into()).await),
        };
        for child in children {
            let name = child.name().to_string();
            if let Err(e) = root.start_child(child) {
                return Err(boot.abort(e.into()).await);
            }
            tracing::info!(child = %name, "Dependent subsystem started");
        }

        // Advisory; attempts run in the background and rollback cancels them.
        drop(context.cluster.connect_all());

        boot.modules_started = true;
        context.modules.start_modules().await;

        let listener = match Listener::bind(&config.listener).await {
            Ok(listener) => Arc::new(listener),
            Err(e) => return Err(boot.abort(e.into()).await),
        };
        let listener_addr = listener.local_addr().ok();
        if let Err(e) = root.start_child(listener.child_spec(context.connections.clone(), handler)) {
            return Err(boot.abort(e.into()).await);
        }

        if let Err(e) = context.state.transition(ServiceState::Running) {
            return Err(boot.abort(StartupError::AlreadyStarted(e.from)).await);
        }
        tracing::info!(node = %config.node.name, listener = ?listener_addr, "Service running");

        let Boot { sequencer, pid, .. } = boot;
        Ok(Service {
            context,
            sequencer,
            pid,
            root: RootHandle { root, anchor },
            listener_addr,
        })
    }
}

/// Startup progress, kept so a failure can undo what already ran.
struct Boot {
    context: ServiceContext,
    sequencer: SubsystemSequencer,
    pid: PidFileGuard,
    root: Option<SupervisionRoot>,
    modules_started: bool,
}

impl Boot {
    async fn abort(mut self, error: StartupError) -> StartupError {
        tracing::error!(error = %error, "Startup failed, rolling back");
        if self.modules_started {
            self.context.modules.stop_modules().await;
        }
        if let Some(root) = self.root.take() {
            root.shutdown().await;
        }
        self.context.connections.abort_all();
        self.context.cluster.disconnect_all();
        let report = self.sequencer.stop().await;
        if !report.is_clean() {
            tracing::warn!(failures = report.failures.len(), "Rollback left subsystems in a failed stop");
        }
        self.pid.release();
        if let Err(e) = self.context.state.transition(ServiceState::FailedStart) {
            tracing::warn!(error = %e, "Could not record failed start");
        }
        error
    }
}
