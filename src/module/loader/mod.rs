//! Module loaders
//!
//! Loader nodes index archive classes; the hierarchy stacks them as
//! platform, trusted and untrusted tiers.

pub mod hierarchy;
pub mod node;

pub use hierarchy::{LoaderHierarchy, LoaderMode};
pub use node::{platform_owner, ClassRef, LoadedModule, LoaderKind, LoaderNode};
