//! tierload - hot-reloadable module runtime
//!
//! This crate discovers optional feature modules packaged as archives, resolves
//! their dependencies against package repositories, decides which modules may
//! run with full privilege, and assembles a layered loader hierarchy that can be
//! torn down and rebuilt while the host process keeps serving requests.
//!
//! ## Layers
//!
//! 1. **Registry** - persisted module descriptors reconciled against the modules directory
//! 2. **Resolver** - dependency closure against remote/local package repositories
//! 3. **Sandbox** - cumulative trust testing of modules in registry order
//! 4. **Loader hierarchy** - platform, trusted and untrusted loader nodes
//! 5. **Reload orchestrator** - gates traffic while the hierarchy is rebuilt
//!
//! ## Design Principles
//!
//! 1. **Joint trust**: a module is trusted only if it loads together with every
//!    previously trusted module
//! 2. **Local recovery**: resolution and archive errors exclude one module, never the host
//! 3. **Never half-initialized**: requests see a retryable 503 while a reload is in flight

pub mod config;
pub mod module;
pub mod server;
pub mod utils;

pub use config::RuntimeConfig;
pub use module::{
    Coordinate, LoaderMode, ModuleDescriptor, ModuleError, OrchestratorState, ReloadOrchestrator,
};
