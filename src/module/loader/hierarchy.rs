//! Layered loader hierarchy
//!
//! Platform at the bottom, trusted on top of it, untrusted on top of trusted.
//! A rebuild replaces the trusted and untrusted nodes wholesale; the platform
//! node is shared across rebuilds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::module::archive::ArchiveInspector;
use crate::module::loader::node::{LoaderKind, LoaderNode};
use crate::module::registry::ModuleDescriptor;
use crate::module::traits::ModuleError;

/// Which node serves as the active loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderMode {
    #[default]
    Untrusted,
    Trusted,
    /// Platform only
    Custom,
}

impl fmt::Display for LoaderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderMode::Untrusted => "untrusted",
            LoaderMode::Trusted => "trusted",
            LoaderMode::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl FromStr for LoaderMode {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "untrusted" => Ok(LoaderMode::Untrusted),
            "trusted" => Ok(LoaderMode::Trusted),
            "custom" | "platform" => Ok(LoaderMode::Custom),
            other => Err(ModuleError::InvalidDescriptor(format!(
                "unknown loader mode '{}'",
                other
            ))),
        }
    }
}

/// The three live loader nodes
#[derive(Debug, Clone)]
pub struct LoaderHierarchy {
    platform: Arc<LoaderNode>,
    trusted: Arc<LoaderNode>,
    untrusted: Arc<LoaderNode>,
}

impl LoaderHierarchy {
    /// Build trusted and untrusted nodes from a partition
    ///
    /// Trusted modules that no longer load together are moved to the
    /// untrusted node. The untrusted node takes every module; classes already
    /// visible below it keep their definitions.
    pub fn build(
        platform: Arc<LoaderNode>,
        inspector: Arc<ArchiveInspector>,
        trusted: &[ModuleDescriptor],
        untrusted: &[ModuleDescriptor],
    ) -> Self {
        let mut trusted_node =
            LoaderNode::new(LoaderKind::Trusted, platform.clone(), inspector.clone());
        let mut demoted = Vec::new();
        for descriptor in trusted {
            if let Err(e) = trusted_node.add_module(descriptor) {
                warn!(
                    "Trusted module {} no longer loads cleanly, serving it untrusted: {}",
                    descriptor.coordinate, e
                );
                demoted.push(descriptor);
            }
        }
        let trusted_node = Arc::new(trusted_node);

        let mut untrusted_node =
            LoaderNode::new(LoaderKind::Untrusted, trusted_node.clone(), inspector);
        for descriptor in demoted.into_iter().chain(untrusted.iter()) {
            if let Err(e) = untrusted_node.add_module_shadowed(descriptor) {
                warn!("Skipping module {}: {}", descriptor.coordinate, e);
            }
        }

        info!(
            "Loader hierarchy built: {} trusted, {} untrusted modules",
            trusted_node.modules().len(),
            untrusted_node.modules().len()
        );
        Self {
            platform,
            trusted: trusted_node,
            untrusted: Arc::new(untrusted_node),
        }
    }

    /// Hierarchy with no modules at all
    pub fn empty(platform: Arc<LoaderNode>, inspector: Arc<ArchiveInspector>) -> Self {
        Self::build(platform, inspector, &[], &[])
    }

    pub fn platform(&self) -> &Arc<LoaderNode> {
        &self.platform
    }

    pub fn trusted(&self) -> &Arc<LoaderNode> {
        &self.trusted
    }

    pub fn untrusted(&self) -> &Arc<LoaderNode> {
        &self.untrusted
    }

    /// Node serving as active loader for `mode`
    pub fn loader(&self, mode: LoaderMode) -> Arc<LoaderNode> {
        match mode {
            LoaderMode::Untrusted => self.untrusted.clone(),
            LoaderMode::Trusted => self.trusted.clone(),
            LoaderMode::Custom => self.platform.clone(),
        }
    }
}
