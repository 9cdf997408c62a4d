//! Trust sandbox for module candidates
//!
//! Decides which modules may run with full privilege by loading them together
//! into a disposable loader, one at a time, in registry order.

pub mod trust;

pub use trust::{Partition, TrustSandbox};
