//! Client network layer.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (supervised accept loop, connection limits)
//!     → connection.rs (registered with the ConnectionSupervisor, gets a TerminateSignal)
//!     → ConnectionHandler collaborator (stream handling is not ours)
//!
//! Drain:
//!     ShutdownDrainer → ConnectionSupervisor::live() → signal_terminate() on each
//! ```
//!
//! # Design Decisions
//! - Bounded accepting prevents resource exhaustion
//! - Each connection is tracked only so it can be told to stop
//! - TLS material is checked at startup; the handshake belongs to the handler

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionSupervisor, TerminateSignal};
pub use listener::{ConnectionHandler, DiscardHandler, Listener, ListenerError};
