//! Module system core types
//!
//! Defines coordinates, artifacts and the error type shared by every layer of
//! the module runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Repository coordinate `group:artifact:version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl Coordinate {
    /// Create a new coordinate
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    /// `group:artifact` - identifies the artifact regardless of version
    pub fn key(&self) -> String {
        format!("{}:{}", self.group, self.artifact)
    }

    /// Repository-relative directory for this coordinate (Maven layout)
    pub fn repository_dir(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for segment in self.group.split('.') {
            path.push(segment);
        }
        path.push(&self.artifact);
        path.push(&self.version);
        path
    }

    /// Base file name (without extension) inside the repository directory
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.artifact, self.version)
    }

    /// Repository-relative path of the archive for this coordinate
    pub fn archive_path(&self) -> PathBuf {
        self.repository_dir().join(format!("{}.jar", self.file_stem()))
    }

    /// Repository-relative path of the build descriptor sidecar
    pub fn descriptor_path(&self) -> PathBuf {
        self.repository_dir().join(format!("{}.toml", self.file_stem()))
    }

    /// Derive a coordinate from an archive file name (`name-1.2.3.jar`)
    ///
    /// Used for archives that carry no build descriptor.
    pub fn from_archive_name(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(pos) = stem.rfind('-') {
            let (name, version) = (&stem[..pos], &stem[pos + 1..]);
            if !name.is_empty() && version.starts_with(|c: char| c.is_ascii_digit()) {
                return Self::new("local", name, version);
            }
        }
        Self::new("local", stem, "0")
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

impl FromStr for Coordinate {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ModuleError::InvalidCoordinate(s.to_string()));
        }
        Ok(Self::new(parts[0].trim(), parts[1].trim(), parts[2].trim()))
    }
}

impl TryFrom<String> for Coordinate {
    type Error = ModuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coordinate> for String {
    fn from(c: Coordinate) -> Self {
        c.to_string()
    }
}

/// A coordinate together with its resolved local archive (if downloaded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub coordinate: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
}

impl Artifact {
    pub fn new(coordinate: Coordinate, archive: Option<PathBuf>) -> Self {
        Self {
            coordinate,
            archive,
        }
    }

    /// True when the archive is present on disk
    pub fn is_available(&self) -> bool {
        self.archive.as_ref().map(|p| p.is_file()).unwrap_or(false)
    }
}

/// Module system errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid build descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("Archive unreadable: {0}")]
    ArchiveUnreadable(String),

    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Class {class} already defined by {existing}")]
    ClassConflict { class: String, existing: String },

    #[error("Version conflict for {artifact}: {loaded} already loaded, {requested} requested")]
    VersionConflict {
        artifact: String,
        loaded: String,
        requested: String,
    },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Dispatch layer initialization failed: {0}")]
    InitializationError(String),

    #[error("Descriptor file write failed: {0}")]
    DescriptorWrite(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for ModuleError {
    fn from(e: toml::de::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<toml::ser::Error> for ModuleError {
    fn from(e: toml::ser::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<zip::result::ZipError> for ModuleError {
    fn from(e: zip::result::ZipError) -> Self {
        ModuleError::ArchiveUnreadable(e.to_string())
    }
}

#[cfg(feature = "http-repository")]
impl From<reqwest::Error> for ModuleError {
    fn from(e: reqwest::Error) -> Self {
        ModuleError::RepositoryError(e.to_string())
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::InitializationError(e.to_string())
    }
}
