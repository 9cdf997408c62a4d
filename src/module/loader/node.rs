//! Loader nodes
//!
//! A node indexes the classes of the archives it holds and resolves lookups
//! parent-first. Nodes are built mutably and sealed by wrapping them in an
//! `Arc`; a child holds its parent alive.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::module::archive::ArchiveInspector;
use crate::module::registry::ModuleDescriptor;
use crate::module::security::Privilege;
use crate::module::traits::{Coordinate, ModuleError};

/// Role of a node in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    Platform,
    Trusted,
    Untrusted,
    /// Disposable node used while vetting candidates
    Sandbox,
}

impl fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderKind::Platform => "platform",
            LoaderKind::Trusted => "trusted",
            LoaderKind::Untrusted => "untrusted",
            LoaderKind::Sandbox => "sandbox",
        };
        f.write_str(name)
    }
}

/// Owner recorded for classes the host provides
pub fn platform_owner() -> Coordinate {
    Coordinate::new("platform", "host", "0")
}

/// A module held by a node
#[derive(Debug, Clone, Serialize)]
pub struct LoadedModule {
    pub coordinate: Coordinate,
    pub archive: Option<PathBuf>,
    pub initializer: Option<String>,
    pub dependencies: Vec<Coordinate>,
}

/// Where a class is defined
#[derive(Debug, Clone)]
pub struct ClassSource {
    pub owner: Coordinate,
    /// `None` for classes provided by the host
    pub archive: Option<PathBuf>,
}

/// Result of loading a class
#[derive(Debug, Clone)]
pub struct ClassRef {
    pub name: String,
    pub owner: Coordinate,
    pub defined_by: LoaderKind,
    pub size: usize,
}

pub struct LoaderNode {
    kind: LoaderKind,
    parent: Option<Arc<LoaderNode>>,
    inspector: Arc<ArchiveInspector>,
    modules: Vec<LoadedModule>,
    classes: HashMap<String, ClassSource>,
    /// `group:artifact` -> coordinate of every archive this node defines
    artifacts: HashMap<String, Coordinate>,
}

impl LoaderNode {
    /// Bottom node exposing the host's own classes
    pub fn platform(inspector: Arc<ArchiveInspector>, classes: &[String]) -> Self {
        let owner = platform_owner();
        let classes = classes
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    ClassSource {
                        owner: owner.clone(),
                        archive: None,
                    },
                )
            })
            .collect();
        Self {
            kind: LoaderKind::Platform,
            parent: None,
            inspector,
            modules: Vec::new(),
            classes,
            artifacts: HashMap::new(),
        }
    }

    /// Empty node delegating to `parent`
    pub fn new(
        kind: LoaderKind,
        parent: Arc<LoaderNode>,
        inspector: Arc<ArchiveInspector>,
    ) -> Self {
        Self {
            kind,
            parent: Some(parent),
            inspector,
            modules: Vec::new(),
            classes: HashMap::new(),
            artifacts: HashMap::new(),
        }
    }

    pub fn kind(&self) -> LoaderKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&Arc<LoaderNode>> {
        self.parent.as_ref()
    }

    /// Modules held by this node only
    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    /// Modules visible from this node, ancestors first
    pub fn visible_modules(&self) -> Vec<(LoaderKind, &LoadedModule)> {
        let mut visible = match &self.parent {
            Some(parent) => parent.visible_modules(),
            None => Vec::new(),
        };
        visible.extend(self.modules.iter().map(|m| (self.kind, m)));
        visible
    }

    /// Privilege of modules held by this node
    pub fn privilege(&self) -> Privilege {
        match self.kind {
            LoaderKind::Platform | LoaderKind::Trusted => Privilege::Full,
            LoaderKind::Untrusted | LoaderKind::Sandbox => Privilege::Restricted,
        }
    }

    /// Privilege of the node holding `module`, searching ancestors too
    pub fn privilege_of(&self, module: &Coordinate) -> Option<Privilege> {
        if let Some(parent) = &self.parent {
            if let Some(privilege) = parent.privilege_of(module) {
                return Some(privilege);
            }
        }
        self.modules
            .iter()
            .any(|m| &m.coordinate == module)
            .then(|| self.privilege())
    }

    /// Whether a module with this coordinate is visible from this node
    pub fn holds(&self, module: &Coordinate) -> bool {
        self.privilege_of(module).is_some()
    }

    /// Names of classes defined by this node
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    fn find_artifact(&self, key: &str) -> Option<&Coordinate> {
        if let Some(parent) = &self.parent {
            if let Some(found) = parent.find_artifact(key) {
                return Some(found);
            }
        }
        self.artifacts.get(key)
    }

    fn find_source(&self, name: &str) -> Option<(&ClassSource, LoaderKind)> {
        if let Some(parent) = &self.parent {
            if let Some(found) = parent.find_source(name) {
                return Some(found);
            }
        }
        self.classes.get(name).map(|source| (source, self.kind))
    }

    /// Node kind that defines `name`, if the class is visible at all
    pub fn defining_loader(&self, name: &str) -> Option<LoaderKind> {
        self.find_source(name).map(|(_, kind)| kind)
    }

    /// Add a module and its dependency archives
    ///
    /// All or nothing: on error the node is left unchanged. A dependency that
    /// is already visible with the same coordinate is shared.
    pub fn add_module(&mut self, descriptor: &ModuleDescriptor) -> Result<(), ModuleError> {
        if self.holds(&descriptor.coordinate) {
            debug!(
                "{} already held by the {} hierarchy",
                descriptor.coordinate, self.kind
            );
            return Ok(());
        }
        Self::check_archives(descriptor)?;

        let mut staged_classes: HashMap<String, ClassSource> = HashMap::new();
        let mut staged_artifacts: HashMap<String, Coordinate> = HashMap::new();

        for (coordinate, archive) in descriptor.archives() {
            let key = coordinate.key();
            match self
                .find_artifact(&key)
                .or_else(|| staged_artifacts.get(&key))
            {
                Some(loaded) if loaded == coordinate => continue,
                Some(loaded) => {
                    return Err(ModuleError::VersionConflict {
                        artifact: key,
                        loaded: loaded.version.clone(),
                        requested: coordinate.version.clone(),
                    });
                }
                None => {}
            }

            for name in self.inspector.list_class_names(archive)? {
                let existing = self
                    .find_source(&name)
                    .map(|(source, _)| &source.owner)
                    .or_else(|| staged_classes.get(&name).map(|source| &source.owner));
                if let Some(existing) = existing {
                    return Err(ModuleError::ClassConflict {
                        class: name,
                        existing: existing.to_string(),
                    });
                }
                staged_classes.insert(
                    name,
                    ClassSource {
                        owner: coordinate.clone(),
                        archive: Some(archive.to_path_buf()),
                    },
                );
            }
            staged_artifacts.insert(key, coordinate.clone());
        }

        debug!(
            "{} node takes {} ({} classes)",
            self.kind,
            descriptor.coordinate,
            staged_classes.len()
        );
        self.classes.extend(staged_classes);
        self.artifacts.extend(staged_artifacts);
        self.record(descriptor);
        Ok(())
    }

    /// Add a module without rejecting it on conflicts
    ///
    /// A class name already visible keeps its existing definition and an
    /// artifact already visible in any version is not indexed again. Only a
    /// module with missing archives is refused.
    pub fn add_module_shadowed(
        &mut self,
        descriptor: &ModuleDescriptor,
    ) -> Result<(), ModuleError> {
        if self.holds(&descriptor.coordinate) {
            return Ok(());
        }
        Self::check_archives(descriptor)?;

        let mut defined = 0usize;
        let mut shadowed = 0usize;
        for (coordinate, archive) in descriptor.archives() {
            let key = coordinate.key();
            if let Some(loaded) = self.find_artifact(&key) {
                if loaded != coordinate {
                    warn!(
                        "{} wants {} but {} is already loaded, keeping the loaded one",
                        descriptor.coordinate, coordinate, loaded
                    );
                }
                continue;
            }
            for name in self.inspector.list_class_names(archive)? {
                if self.find_source(&name).is_some() {
                    shadowed += 1;
                    continue;
                }
                self.classes.insert(
                    name,
                    ClassSource {
                        owner: coordinate.clone(),
                        archive: Some(archive.to_path_buf()),
                    },
                );
                defined += 1;
            }
            self.artifacts.insert(key, coordinate.clone());
        }

        if shadowed > 0 {
            warn!(
                "{} node takes {} with {} classes shadowed by earlier definitions",
                self.kind, descriptor.coordinate, shadowed
            );
        } else {
            debug!(
                "{} node takes {} ({} classes)",
                self.kind, descriptor.coordinate, defined
            );
        }
        self.record(descriptor);
        Ok(())
    }

    fn check_archives(descriptor: &ModuleDescriptor) -> Result<(), ModuleError> {
        if descriptor.archive.is_none() {
            return Err(ModuleError::ArtifactNotFound(format!(
                "{} has no local archive",
                descriptor.coordinate
            )));
        }
        if let Some(missing) = descriptor.dependencies.iter().find(|d| d.archive.is_none()) {
            return Err(ModuleError::ArtifactNotFound(format!(
                "dependency {} of {} has no local archive",
                missing.coordinate, descriptor.coordinate
            )));
        }
        Ok(())
    }

    fn record(&mut self, descriptor: &ModuleDescriptor) {
        self.modules.push(LoadedModule {
            coordinate: descriptor.coordinate.clone(),
            archive: descriptor.archive.clone(),
            initializer: descriptor.initializer.clone(),
            dependencies: descriptor
                .dependencies
                .iter()
                .map(|d| d.coordinate.clone())
                .collect(),
        });
    }

    /// Load a class, parent-first, reading its bytes from the defining archive
    pub fn load_class(&self, name: &str) -> Result<ClassRef, ModuleError> {
        let (source, defined_by) = self
            .find_source(name)
            .ok_or_else(|| {
                ModuleError::ClassNotFound(format!("{} via {} loader", name, self.kind))
            })?;

        let size = match &source.archive {
            Some(archive) => self.inspector.read_class(archive, name)?.len(),
            None => 0,
        };
        Ok(ClassRef {
            name: name.to_string(),
            owner: source.owner.clone(),
            defined_by,
            size,
        })
    }
}

impl fmt::Debug for LoaderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderNode")
            .field("kind", &self.kind)
            .field("parent", &self.parent.as_ref().map(|p| p.kind))
            .field("modules", &self.modules.len())
            .field("classes", &self.classes.len())
            .finish()
    }
}
