//! Module descriptors and their persistence
//!
//! The descriptor file is a TOML document with one `[[module]]` table per known
//! module. It is always rewritten whole through a temp file and a rename.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::module::traits::{Artifact, Coordinate, ModuleError};

/// Everything the runtime knows about one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub coordinate: Coordinate,

    /// Local archive; absent while the module is pending download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,

    /// Passed the trust sandbox on the last build
    #[serde(default)]
    pub trusted: bool,

    /// Take part in the next hierarchy build
    #[serde(rename = "load", default = "default_true")]
    pub should_load: bool,

    /// Declared by coordinate rather than discovered on disk
    #[serde(default)]
    pub pinned: bool,

    /// Turned off by an operator; restoring archives does not re-enable it
    #[serde(default)]
    pub disabled: bool,

    /// Initializer class found on the last sandbox pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<String>,

    /// Ordered dependency list
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<Artifact>,
}

fn default_true() -> bool {
    true
}

impl ModuleDescriptor {
    pub fn new(coordinate: Coordinate, archive: Option<PathBuf>) -> Self {
        Self {
            coordinate,
            archive,
            trusted: false,
            should_load: true,
            pinned: false,
            disabled: false,
            initializer: None,
            dependencies: Vec::new(),
        }
    }

    /// Main archive exists on disk
    pub fn has_archive(&self) -> bool {
        self.archive.as_ref().map(|p| p.is_file()).unwrap_or(false)
    }

    /// Main archive or any dependency archive is missing on disk
    pub fn is_incomplete(&self) -> bool {
        !self.has_archive() || self.dependencies.iter().any(|d| !d.is_available())
    }

    /// `should_load` with no archive yet
    pub fn is_pending(&self) -> bool {
        self.should_load && self.archive.is_none()
    }

    /// Key this descriptor is stored under in the registry
    pub fn key(&self) -> RegistryKey {
        match &self.archive {
            Some(path) => RegistryKey::Archive(path.clone()),
            None => RegistryKey::Pending(self.coordinate.clone()),
        }
    }

    /// Dependency archives followed by the module's own archive
    pub fn archives(&self) -> impl Iterator<Item = (&Coordinate, &Path)> {
        self.dependencies
            .iter()
            .filter_map(|d| d.archive.as_deref().map(|p| (&d.coordinate, p)))
            .chain(
                self.archive
                    .as_deref()
                    .map(|p| (&self.coordinate, p))
                    .into_iter(),
            )
    }
}

/// Registry mapping key: an archive path, or a placeholder for pending entries
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegistryKey {
    Archive(PathBuf),
    Pending(Coordinate),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DescriptorFile {
    #[serde(default, rename = "module")]
    modules: Vec<ModuleDescriptor>,
}

/// Reads and writes the descriptor file
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    path: PathBuf,
}

impl DescriptorStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load persisted descriptors; `None` when the file does not exist
    pub fn load(&self) -> Result<Option<Vec<ModuleDescriptor>>, ModuleError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let file: DescriptorFile = toml::from_str(&contents).map_err(|e| {
            ModuleError::InvalidDescriptor(format!("{}: {}", self.path.display(), e))
        })?;
        debug!(
            "Loaded {} module descriptors from {:?}",
            file.modules.len(),
            self.path
        );
        Ok(Some(file.modules))
    }

    /// Rewrite the descriptor file with the given entries
    pub fn save(&self, modules: &[ModuleDescriptor]) -> Result<(), ModuleError> {
        let file = DescriptorFile {
            modules: modules.to_vec(),
        };
        let contents = toml::to_string_pretty(&file)
            .map_err(|e| ModuleError::DescriptorWrite(e.to_string()))?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(&parent)?;
            let mut tmp = NamedTempFile::new_in(&parent)?;
            tmp.write_all(contents.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&self.path).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|e| {
            ModuleError::DescriptorWrite(format!("{}: {}", self.path.display(), e))
        })?;

        debug!("Wrote {} module descriptors to {:?}", modules.len(), self.path);
        Ok(())
    }

    /// Delete the descriptor file if present
    pub fn delete(&self) -> Result<(), ModuleError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ModuleError::DescriptorWrite(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
