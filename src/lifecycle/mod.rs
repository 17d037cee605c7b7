//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     start mode check → pidfile.rs (acquire)
//!     → sequencer.rs (storage, security, administration, module framework, configuration)
//!     → supervisor.rs root + anchor.rs → dependent children
//!     → cluster links (best effort) → per-host modules → client listener
//!
//! Shutdown (shutdown.rs):
//!     prepare_stop: close listener → stop modules → drain.rs (signal, wait grace period)
//!     stop:         root shutdown → sequencer stop actions (reverse) → pidfile.rs (release)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//!     SIGHUP → config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: storage first, listeners last
//! - Ordered shutdown: stop accepting, drain, then tear down
//! - Shutdown is bounded: the drain waits a fixed grace period and never longer
//! - Progress is published through a watchable state machine (state.rs)

pub mod anchor;
pub mod drain;
pub mod pidfile;
pub mod sequencer;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;
pub mod supervisor;

pub use startup::{RootHandle, Service, ServiceBuilder, ServiceContext, StartMode, StartupError};
pub use state::ServiceState;
