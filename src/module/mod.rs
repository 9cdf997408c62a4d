//! Module system for tierload
//!
//! Discovers module archives, resolves their dependencies, partitions them into
//! trusted and untrusted sets, and publishes a layered loader hierarchy.
//!
//! ## Architecture
//!
//! - **Registry**: persisted descriptors reconciled against the modules directory
//! - **Resolver**: dependency closure against package repositories
//! - **Sandbox**: cumulative trust testing, rebuilt clean after every failure
//! - **Loader**: platform <- trusted <- untrusted nodes with parent-first lookup
//! - **Reload**: request gate and degrade-and-reload fallback

pub mod archive;
pub mod dispatch;
pub mod loader;
pub mod registry;
pub mod reload;
pub mod resolver;
pub mod sandbox;
pub mod security;
pub mod traits;
pub mod validation;

pub use security::{EntryPointRegistry, ModuleInitializer, Privilege};

pub use archive::ArchiveInspector;
pub use dispatch::{Dispatcher, DispatcherFactory, ModuleDispatcherFactory};
pub use loader::{LoaderHierarchy, LoaderKind, LoaderMode, LoaderNode};
pub use registry::{ModuleDescriptor, ModuleRegistry};
pub use reload::{DegradeLevel, OrchestratorState, ReloadOrchestrator};
pub use resolver::DependencyResolver;
pub use sandbox::TrustSandbox;
pub use traits::{Artifact, Coordinate, ModuleError};
