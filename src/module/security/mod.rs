//! Privilege enforcement for module entry points
//!
//! Modules served by the trusted loader run with full privilege, everything
//! else is restricted. Entry points are looked up in a registry of native
//! initializers and checked against the privilege of the module exposing them.

pub mod entry_points;
pub mod permissions;

pub use entry_points::{EntryPointRegistry, ModuleInitializer};
pub use permissions::{check_privilege, Privilege};
