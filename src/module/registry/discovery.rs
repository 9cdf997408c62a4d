//! Module discovery
//!
//! Scans the modules directory for archives. New files are only picked up by
//! the next reconciliation pass; the directory is not watched.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::module::archive::is_archive;
use crate::module::traits::ModuleError;

/// Module discovery scanner
pub struct ModuleDiscovery {
    /// Directory to scan for module archives
    modules_dir: PathBuf,
}

impl ModuleDiscovery {
    /// Create a new module discovery scanner
    pub fn new<P: AsRef<Path>>(modules_dir: P) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
        }
    }

    /// List every archive in the modules directory, sorted by path
    ///
    /// Paths are absolute so they stay valid as registry keys regardless of the
    /// working directory.
    pub fn discover_archives(&self) -> Result<Vec<PathBuf>, ModuleError> {
        if !self.modules_dir.exists() {
            debug!(
                "Modules directory does not exist, creating: {:?}",
                self.modules_dir
            );
            fs::create_dir_all(&self.modules_dir)?;
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.modules_dir)? {
            let path = entry?.path();
            if !path.is_file() || !is_archive(&path) {
                continue;
            }
            archives.push(fs::canonicalize(&path).unwrap_or(path));
        }
        archives.sort();

        info!(
            "Discovered {} module archives in {:?}",
            archives.len(),
            self.modules_dir
        );
        Ok(archives)
    }

    /// Whether a path lies inside the modules directory
    pub fn contains(&self, path: &Path) -> bool {
        let dir = fs::canonicalize(&self.modules_dir).unwrap_or_else(|_| self.modules_dir.clone());
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        path.starts_with(dir)
    }
}
