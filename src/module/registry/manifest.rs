//! Build descriptor parsing
//!
//! Handles parsing `module.toml` build descriptors, either embedded in an
//! archive or published next to it in a package repository.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::module::traits::{Coordinate, ModuleError};

/// Build descriptor (module.toml structure)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    /// Group the module is published under
    #[serde(default)]
    pub group: String,
    /// Artifact name
    #[serde(default)]
    pub artifact: String,
    /// Module version
    #[serde(default)]
    pub version: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared dependencies as `group:artifact:version` strings
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl BuildDescriptor {
    /// Load a build descriptor from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModuleError::InvalidDescriptor(format!("Failed to read build descriptor: {}", e))
        })?;
        Self::parse(&contents)
    }

    /// Parse a build descriptor from TOML text
    pub fn parse(contents: &str) -> Result<Self, ModuleError> {
        toml::from_str(contents).map_err(|e| {
            ModuleError::InvalidDescriptor(format!("Failed to parse build descriptor TOML: {}", e))
        })
    }

    /// The module's own coordinate
    pub fn coordinate(&self) -> Result<Coordinate, ModuleError> {
        if self.group.trim().is_empty()
            || self.artifact.trim().is_empty()
            || self.version.trim().is_empty()
        {
            return Err(ModuleError::InvalidDescriptor(format!(
                "Incomplete coordinate '{}:{}:{}'",
                self.group, self.artifact, self.version
            )));
        }
        Ok(Coordinate::new(
            self.group.trim(),
            self.artifact.trim(),
            self.version.trim(),
        ))
    }

    /// Declared dependency coordinates
    ///
    /// Empty or malformed entries are skipped; they never fail the module.
    pub fn dependency_coordinates(&self) -> Vec<Coordinate> {
        self.dependencies
            .iter()
            .filter_map(|raw| match raw.parse::<Coordinate>() {
                Ok(c) => Some(c),
                Err(_) => {
                    debug!("Ignoring malformed dependency coordinate '{}'", raw);
                    None
                }
            })
            .collect()
    }
}
