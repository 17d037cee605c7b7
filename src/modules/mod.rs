//! Feature module activation subsystem.
//!
//! # Data Flow
//! ```text
//! start_modules():
//!     ConfigStore::current() → hosts → (module id, args) in list order
//!     → ModuleFramework::start_module (framework.rs)
//!     → failures recorded, iteration continues
//!
//! stop_modules():
//!     ConfigStore::current() → same enumeration
//!     → ModuleFramework::stop_module; configuration is left untouched
//! ```
//!
//! # Design Decisions
//! - The registry only iterates; what a module does is the framework's business
//! - Configuration is re-read per pass, not snapshotted

pub mod framework;
pub mod registry;

pub use framework::{ModuleCatalog, ModuleError, ModuleFramework, ModuleKey};
pub use registry::{ModuleFailure, ModuleRegistry, ModuleReport};
