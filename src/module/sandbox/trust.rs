//! Cumulative trust partitioning
//!
//! Trust is about joint loadability: a candidate is trusted only if it loads
//! alongside every module trusted before it and its initializer class can be
//! loaded. After any failure the sandbox loader is thrown away and rebuilt from
//! the confirmed trusted list, so one bad module never affects the verdict on
//! later ones.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::module::archive::ArchiveInspector;
use crate::module::loader::{LoaderKind, LoaderNode};
use crate::module::registry::ModuleDescriptor;
use crate::module::traits::ModuleError;

/// Outcome of a trust pass, both lists in candidate order
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub trusted: Vec<ModuleDescriptor>,
    pub untrusted: Vec<ModuleDescriptor>,
}

impl Partition {
    /// Every candidate with its trust verdict recorded
    pub fn all(&self) -> Vec<ModuleDescriptor> {
        self.trusted
            .iter()
            .chain(self.untrusted.iter())
            .cloned()
            .collect()
    }
}

pub struct TrustSandbox {
    platform: Arc<LoaderNode>,
    inspector: Arc<ArchiveInspector>,
}

impl TrustSandbox {
    pub fn new(platform: Arc<LoaderNode>, inspector: Arc<ArchiveInspector>) -> Self {
        Self {
            platform,
            inspector,
        }
    }

    /// Fresh sandbox holding exactly the confirmed trusted modules
    fn fresh_loader(&self, trusted: &[ModuleDescriptor]) -> LoaderNode {
        let mut sandbox = LoaderNode::new(
            LoaderKind::Sandbox,
            self.platform.clone(),
            self.inspector.clone(),
        );
        for descriptor in trusted {
            if let Err(e) = sandbox.add_module(descriptor) {
                warn!(
                    "Replaying trusted module {} into sandbox failed: {}",
                    descriptor.coordinate, e
                );
            }
        }
        sandbox
    }

    /// Split candidates into trusted and untrusted modules
    ///
    /// Strictly sequential; the result depends only on the candidates and
    /// their order.
    pub fn partition(&self, candidates: &[ModuleDescriptor]) -> Partition {
        let mut partition = Partition::default();
        let mut sandbox = self.fresh_loader(&[]);

        for candidate in candidates {
            let mut candidate = candidate.clone();
            candidate.initializer = candidate
                .archive
                .as_deref()
                .and_then(|archive| self.inspector.find_initializer_class(archive));

            match Self::vet(&mut sandbox, &candidate) {
                Ok(()) => {
                    debug!("{} trusted", candidate.coordinate);
                    candidate.trusted = true;
                    partition.trusted.push(candidate);
                }
                Err(reason) => {
                    debug!("{} untrusted: {}", candidate.coordinate, reason);
                    candidate.trusted = false;
                    partition.untrusted.push(candidate);
                    sandbox = self.fresh_loader(&partition.trusted);
                }
            }
        }

        info!(
            "Trust sandbox: {} trusted, {} untrusted",
            partition.trusted.len(),
            partition.untrusted.len()
        );
        partition
    }

    fn vet(sandbox: &mut LoaderNode, candidate: &ModuleDescriptor) -> Result<(), ModuleError> {
        sandbox.add_module(candidate)?;
        let initializer = candidate.initializer.as_deref().ok_or_else(|| {
            ModuleError::ClassNotFound(format!("no initializer class in {}", candidate.coordinate))
        })?;
        sandbox.load_class(initializer)?;
        Ok(())
    }
}
