//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Supervised child exits abnormally:
//!     → supervisor checks restart intensity
//!     → backoff.rs (delay before the next attempt)
//!     → child restarted
//! ```
//!
//! # Design Decisions
//! - Jitter keeps restarts of sibling children from synchronizing
//! - Delays are capped so a flapping child never stalls for long

pub mod backoff;
