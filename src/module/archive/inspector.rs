//! Archive inspector
//!
//! Scans zip-format module archives in entry enumeration order. Lookups never
//! fail hard: a corrupt archive only makes that archive ineligible.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::module::traits::ModuleError;

/// File name of the build descriptor embedded in module archives
pub const BUILD_DESCRIPTOR_NAME: &str = "module.toml";

const CLASS_EXTENSION: &str = ".class";

/// Returns true if the path looks like a module archive
pub fn is_archive(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jar") | Some("zip")
    )
}

/// Naming convention a module initializer class must follow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializerConvention {
    /// Top-level namespace the class must be rooted under
    pub namespace: String,
    /// Suffix of the simple class name
    pub suffix: String,
}

impl Default for InitializerConvention {
    fn default() -> Self {
        Self {
            namespace: "tierload".to_string(),
            suffix: "Initializer".to_string(),
        }
    }
}

impl InitializerConvention {
    /// Check whether a qualified class name follows the convention
    pub fn matches(&self, qualified_name: &str) -> bool {
        qualified_name.starts_with(&format!("{}.", self.namespace))
            && qualified_name.ends_with(&self.suffix)
    }
}

/// Reads module archives and extracts build descriptors
pub struct ArchiveInspector {
    convention: InitializerConvention,
    /// Where the scratch directory is created
    scratch_root: PathBuf,
    /// Scratch directory, created on first extraction
    scratch_dir: Mutex<Option<PathBuf>>,
}

impl ArchiveInspector {
    /// Create a new inspector extracting descriptors under `scratch_root`
    pub fn new<P: AsRef<Path>>(scratch_root: P, convention: InitializerConvention) -> Self {
        Self {
            convention,
            scratch_root: scratch_root.as_ref().to_path_buf(),
            scratch_dir: Mutex::new(None),
        }
    }

    pub fn convention(&self) -> &InitializerConvention {
        &self.convention
    }

    /// Locate the embedded build descriptor and extract it to the scratch directory
    pub fn find_build_descriptor(&self, archive: &Path) -> Option<PathBuf> {
        match self.extract_build_descriptor(archive) {
            Ok(found) => found,
            Err(e) => {
                debug!("Cannot read build descriptor from {:?}: {}", archive, e);
                None
            }
        }
    }

    fn extract_build_descriptor(&self, archive: &Path) -> Result<Option<PathBuf>, ModuleError> {
        let mut zip = open_archive(archive)?;

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if entry.is_dir() || !entry.name().ends_with(BUILD_DESCRIPTOR_NAME) {
                continue;
            }

            let stem = archive
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "archive".to_string());
            let target = self
                .scratch_dir()?
                .join(format!("{}.{}", stem, BUILD_DESCRIPTOR_NAME));

            let mut out = File::create(&target)?;
            if let Err(e) = io::copy(&mut entry, &mut out) {
                drop(out);
                let _ = fs::remove_file(&target);
                return Err(e.into());
            }
            debug!("Extracted build descriptor of {:?} to {:?}", archive, target);
            return Ok(Some(target));
        }

        Ok(None)
    }

    /// Find the first class following the initializer convention
    pub fn find_initializer_class(&self, archive: &Path) -> Option<String> {
        if !is_archive(archive) {
            return None;
        }

        let scan = || -> Result<Option<String>, ModuleError> {
            let mut zip = open_archive(archive)?;
            for i in 0..zip.len() {
                let entry = zip.by_index(i)?;
                if let Some(name) = self.qualified_name(entry.name()) {
                    if self.convention.matches(&name) {
                        return Ok(Some(name));
                    }
                }
            }
            Ok(None)
        };

        match scan() {
            Ok(found) => found,
            Err(e) => {
                debug!("Cannot scan {:?} for initializer: {}", archive, e);
                None
            }
        }
    }

    /// All classes contained in the archive, as qualified names
    pub fn list_class_names(&self, archive: &Path) -> Result<BTreeSet<String>, ModuleError> {
        let mut zip = open_archive(archive)?;
        let mut names = BTreeSet::new();
        for i in 0..zip.len() {
            let entry = zip.by_index(i)?;
            if let Some(name) = self.qualified_name(entry.name()) {
                names.insert(name);
            }
        }
        Ok(names)
    }

    /// Read the bytes of a class entry
    pub fn read_class(&self, archive: &Path, qualified_name: &str) -> Result<Vec<u8>, ModuleError> {
        let mut zip = open_archive(archive)?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            if self.qualified_name(entry.name()).as_deref() == Some(qualified_name) {
                let mut bytes = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut bytes)?;
                return Ok(bytes);
            }
        }
        Err(ModuleError::ClassNotFound(format!(
            "{} in {:?}",
            qualified_name, archive
        )))
    }

    /// Map an archive entry name to a qualified class name
    ///
    /// Leading packaging directories (e.g. `BOOT-INF/classes/`) are dropped when
    /// the namespace root appears further down the path.
    fn qualified_name(&self, entry_name: &str) -> Option<String> {
        let dotted = entry_name.strip_suffix(CLASS_EXTENSION)?.replace('/', ".");
        if dotted.is_empty() {
            return None;
        }

        let root = format!("{}.", self.convention.namespace);
        if !dotted.starts_with(&root) {
            if let Some(pos) = dotted.find(&format!(".{}", root)) {
                return Some(dotted[pos + 1..].to_string());
            }
        }
        Some(dotted)
    }

    fn scratch_dir(&self) -> Result<PathBuf, ModuleError> {
        let mut guard = self
            .scratch_dir
            .lock()
            .map_err(|_| ModuleError::Io(io::Error::other("scratch directory lock poisoned")))?;
        if let Some(dir) = guard.as_ref() {
            if dir.is_dir() {
                return Ok(dir.clone());
            }
        }
        fs::create_dir_all(&self.scratch_root)?;
        *guard = Some(self.scratch_root.clone());
        Ok(self.scratch_root.clone())
    }

    /// Remove the scratch directory and everything extracted into it
    pub fn cleanup(&self) {
        let dir = match self.scratch_dir.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => return,
        };
        if let Some(dir) = dir {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("Cannot delete scratch directory {:?}: {}", dir, e);
            }
        }
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>, ModuleError> {
    let file = File::open(path)?;
    Ok(ZipArchive::new(file)?)
}
