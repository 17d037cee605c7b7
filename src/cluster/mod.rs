//! Cluster membership subsystem.
//!
//! # Data Flow
//! ```text
//! [cluster].nodes (read once at startup)
//!     → peer.rs (parse `name@host:port`)
//!     → connector.rs (one detached connect attempt per peer)
//!     → open links kept for status reporting, dropped on stop
//! ```
//!
//! # Design Decisions
//! - Advisory only: a peer that is down never delays or fails a lifecycle phase
//! - No retry state; a failed attempt is logged and forgotten

pub mod connector;
pub mod peer;

pub use connector::ClusterConnector;
pub use peer::PeerNode;
