//! Build descriptor validation
//!
//! Checks coordinates and declared dependencies for structure. Validation
//! problems are reported but never keep a module from being resolved.

use tracing::{debug, warn};

use crate::module::registry::manifest::BuildDescriptor;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Descriptor is valid
    Valid,
    /// Descriptor is invalid with specific errors
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Build descriptor validator
pub struct DescriptorValidator {
    /// Maximum length of a single coordinate part
    max_part_len: usize,
}

impl DescriptorValidator {
    pub fn new() -> Self {
        Self { max_part_len: 128 }
    }

    /// Validate a build descriptor
    pub fn validate(&self, descriptor: &BuildDescriptor) -> ValidationResult {
        let mut errors = Vec::new();

        if !self.is_valid_group(&descriptor.group) {
            errors.push(format!(
                "Invalid group: '{}' (dot-separated identifiers expected)",
                descriptor.group
            ));
        }
        if !self.is_valid_name(&descriptor.artifact) {
            errors.push(format!("Invalid artifact name: '{}'", descriptor.artifact));
        }
        if !self.is_valid_version(&descriptor.version) {
            errors.push(format!("Invalid version: '{}'", descriptor.version));
        }

        if let Err(dep_errors) = self.validate_dependencies(descriptor) {
            errors.extend(dep_errors);
        }

        if errors.is_empty() {
            debug!(
                "Build descriptor validation passed for {}:{}",
                descriptor.group, descriptor.artifact
            );
            ValidationResult::Valid
        } else {
            warn!(
                "Build descriptor validation failed for {}:{}: {:?}",
                descriptor.group, descriptor.artifact, errors
            );
            ValidationResult::Invalid(errors)
        }
    }

    /// Alphanumeric start, then alphanumerics, dashes, underscores and dots
    fn is_valid_name(&self, name: &str) -> bool {
        if name.is_empty() || name.len() > self.max_part_len {
            return false;
        }
        if !name.chars().next().is_some_and(|c| c.is_alphanumeric()) {
            return false;
        }
        name.chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    }

    fn is_valid_group(&self, group: &str) -> bool {
        !group.is_empty()
            && group.len() <= self.max_part_len
            && group.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
            })
    }

    /// Versions start with a digit; qualifiers like `-SNAPSHOT` are allowed
    fn is_valid_version(&self, version: &str) -> bool {
        !version.is_empty()
            && version.len() <= self.max_part_len
            && version.starts_with(|c: char| c.is_ascii_digit())
            && !version.contains(char::is_whitespace)
            && !version.contains(':')
    }

    fn validate_dependencies(&self, descriptor: &BuildDescriptor) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let own = format!("{}:{}", descriptor.group, descriptor.artifact);

        for raw in &descriptor.dependencies {
            let parts: Vec<&str> = raw.split(':').collect();
            if parts.len() != 3 {
                errors.push(format!("Malformed dependency coordinate: '{}'", raw));
                continue;
            }
            if !self.is_valid_group(parts[0])
                || !self.is_valid_name(parts[1])
                || !self.is_valid_version(parts[2])
            {
                errors.push(format!("Invalid dependency coordinate: '{}'", raw));
            }
            if format!("{}:{}", parts[0], parts[1]) == own {
                errors.push(format!("Module depends on itself: '{}'", raw));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for DescriptorValidator {
    fn default() -> Self {
        Self::new()
    }
}
