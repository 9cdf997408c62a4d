//! Local artifact cache
//!
//! Downloaded archives are stored in the same layout the repositories use, so a
//! cache directory can itself serve as a directory repository.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::module::traits::{Coordinate, ModuleError};

pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cached archive for a coordinate, if present
    pub fn lookup(&self, coordinate: &Coordinate) -> Option<PathBuf> {
        let path = self.root.join(coordinate.archive_path());
        if path.is_file() {
            Some(fs::canonicalize(&path).unwrap_or(path))
        } else {
            None
        }
    }

    /// Store archive bytes; readers never see a partial file
    pub fn store(&self, coordinate: &Coordinate, bytes: &[u8]) -> Result<PathBuf, ModuleError> {
        let path = self.root.join(coordinate.archive_path());
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&path).map_err(|e| ModuleError::Io(e.error))?;
        Ok(fs::canonicalize(&path).unwrap_or(path))
    }
}
