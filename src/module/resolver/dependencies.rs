//! Dependency resolution
//!
//! Turns archives and coordinates into module descriptors with resolved
//! dependency archives. Repository failures mean "artifact absent": they
//! exclude the owning module and never abort a resolution pass.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::module::archive::ArchiveInspector;
use crate::module::registry::descriptor::ModuleDescriptor;
use crate::module::registry::manifest::BuildDescriptor;
use crate::module::resolver::cache::ArtifactCache;
use crate::module::resolver::repository::{repository_from_location, PackageRepository};
use crate::module::traits::{Artifact, Coordinate, ModuleError};
use crate::module::validation::{DescriptorValidator, ValidationResult};

/// Dependency resolver
pub struct DependencyResolver {
    repositories: Vec<Box<dyn PackageRepository>>,
    cache: ArtifactCache,
    inspector: Arc<ArchiveInspector>,
    /// Resolve dependencies of dependencies
    recursive: bool,
    validator: DescriptorValidator,
}

impl DependencyResolver {
    pub fn new(
        repositories: Vec<Box<dyn PackageRepository>>,
        cache: ArtifactCache,
        inspector: Arc<ArchiveInspector>,
        recursive: bool,
    ) -> Self {
        Self {
            repositories,
            cache,
            inspector,
            recursive,
            validator: DescriptorValidator::new(),
        }
    }

    /// Build a resolver from runtime configuration
    pub fn from_config(
        config: &RuntimeConfig,
        inspector: Arc<ArchiveInspector>,
    ) -> Result<Self, ModuleError> {
        let repositories = config
            .resolver
            .repositories
            .iter()
            .map(|location| repository_from_location(location, &config.resolver))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            repositories,
            ArtifactCache::new(&config.modules.cache_dir),
            inspector,
            config.resolver.resolve_recursively,
        ))
    }

    pub fn inspector(&self) -> &Arc<ArchiveInspector> {
        &self.inspector
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Fetch an archive, cache first, then each repository in order
    pub async fn download(&self, coordinate: &Coordinate) -> Option<Artifact> {
        if let Some(path) = self.cache.lookup(coordinate) {
            debug!("{} found in local cache", coordinate);
            return Some(Artifact::new(coordinate.clone(), Some(path)));
        }

        for repository in &self.repositories {
            match repository.fetch_archive(coordinate).await {
                Ok(bytes) => match self.cache.store(coordinate, &bytes) {
                    Ok(path) => {
                        info!("Downloaded {} from {}", coordinate, repository.name());
                        return Some(Artifact::new(coordinate.clone(), Some(path)));
                    }
                    Err(e) => {
                        warn!("Cannot cache {}: {}", coordinate, e);
                        return None;
                    }
                },
                Err(e) => debug!(
                    "{} not available from {}: {}",
                    coordinate,
                    repository.name(),
                    e
                ),
            }
        }

        warn!("Artifact {} not found in any repository", coordinate);
        None
    }

    /// Build descriptor embedded in a local archive
    fn embedded_descriptor(&self, archive: &Path) -> Option<BuildDescriptor> {
        let extracted = self.inspector.find_build_descriptor(archive)?;
        match BuildDescriptor::from_file(&extracted) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                debug!("Ignoring build descriptor of {:?}: {}", archive, e);
                None
            }
        }
    }

    /// Dependencies declared for a coordinate
    ///
    /// The repository's published descriptor wins; the descriptor embedded in
    /// the archive is the fallback.
    async fn declared_dependencies(
        &self,
        coordinate: &Coordinate,
        archive: Option<&Path>,
    ) -> Vec<Coordinate> {
        for repository in &self.repositories {
            match repository.fetch_descriptor(coordinate).await {
                Ok(Some(descriptor)) => return descriptor.dependency_coordinates(),
                Ok(None) => {}
                Err(e) => debug!(
                    "No descriptor for {} from {}: {}",
                    coordinate,
                    repository.name(),
                    e
                ),
            }
        }
        archive
            .and_then(|a| self.embedded_descriptor(a))
            .map(|d| d.dependency_coordinates())
            .unwrap_or_default()
    }

    /// Resolve declared dependencies in breadth-first order
    ///
    /// Unfetchable dependencies are kept with no archive so a later pass can
    /// retry them. The owner itself is never resolved as its own dependency.
    pub async fn resolve_dependencies(
        &self,
        owner: &Coordinate,
        declared: Vec<Coordinate>,
    ) -> Vec<Artifact> {
        let mut seen: HashSet<Coordinate> = HashSet::from([owner.clone()]);
        let mut queue: VecDeque<Coordinate> = declared.into();
        let mut resolved = Vec::new();

        while let Some(coordinate) = queue.pop_front() {
            if !seen.insert(coordinate.clone()) {
                continue;
            }
            match self.download(&coordinate).await {
                Some(artifact) => {
                    if self.recursive {
                        let nested = self
                            .declared_dependencies(&coordinate, artifact.archive.as_deref())
                            .await;
                        queue.extend(nested);
                    }
                    resolved.push(artifact);
                }
                None => {
                    warn!("Dependency {} of {} cannot be fetched", coordinate, owner);
                    resolved.push(Artifact::new(coordinate, None));
                }
            }
        }

        resolved
    }

    /// Resolve a module by coordinate
    pub async fn resolve(&self, coordinate: &Coordinate) -> Result<ModuleDescriptor, ModuleError> {
        let main = self.download(coordinate).await.ok_or_else(|| {
            ModuleError::ResolutionFailed(format!("{} is not available", coordinate))
        })?;

        let declared = self
            .declared_dependencies(coordinate, main.archive.as_deref())
            .await;
        let dependencies = self.resolve_dependencies(coordinate, declared).await;
        if let Some(missing) = dependencies.iter().find(|d| d.archive.is_none()) {
            return Err(ModuleError::ResolutionFailed(format!(
                "dependency {} of {} is not available",
                missing.coordinate, coordinate
            )));
        }

        let mut descriptor = ModuleDescriptor::new(coordinate.clone(), main.archive);
        descriptor.dependencies = dependencies;
        Ok(descriptor)
    }

    /// Resolve an archive found on disk with no prior metadata
    ///
    /// An archive without a build descriptor is a module with no dependencies
    /// whose coordinate comes from its file name.
    pub async fn resolve_archive(&self, archive: &Path) -> ModuleDescriptor {
        let (coordinate, declared) = match self.embedded_descriptor(archive) {
            Some(build) => {
                let coordinate = match build.coordinate() {
                    Ok(coordinate) => {
                        if let ValidationResult::Invalid(errors) = self.validator.validate(&build) {
                            debug!("{:?} has descriptor issues: {:?}", archive, errors);
                        }
                        coordinate
                    }
                    Err(e) => {
                        debug!("{:?}: {}; deriving coordinate from file name", archive, e);
                        Coordinate::from_archive_name(archive)
                    }
                };
                (coordinate, build.dependency_coordinates())
            }
            None => (Coordinate::from_archive_name(archive), Vec::new()),
        };

        let mut descriptor = ModuleDescriptor::new(coordinate, Some(archive.to_path_buf()));
        descriptor.dependencies = self
            .resolve_dependencies(&descriptor.coordinate, declared)
            .await;

        if descriptor.dependencies.iter().any(|d| d.archive.is_none()) {
            warn!(
                "Excluding module {} ({:?}): unresolved dependencies",
                descriptor.coordinate, archive
            );
            descriptor.should_load = false;
        } else {
            debug!(
                "Resolved {} with {} dependencies",
                descriptor.coordinate,
                descriptor.dependencies.len()
            );
        }
        descriptor
    }

    /// Resolve the dependencies declared in a standalone build descriptor file
    pub async fn resolve_from_descriptor_file(
        &self,
        path: &Path,
    ) -> Result<Vec<Artifact>, ModuleError> {
        let build = BuildDescriptor::from_file(path)?;
        let owner = build
            .coordinate()
            .unwrap_or_else(|_| Coordinate::from_archive_name(path));
        Ok(self
            .resolve_dependencies(&owner, build.dependency_coordinates())
            .await)
    }

    /// Download whatever a known descriptor is missing
    ///
    /// On failure the descriptor is excluded from loading; on success it is
    /// eligible again unless an operator disabled it.
    pub async fn download_missing(&self, descriptor: &mut ModuleDescriptor) -> bool {
        let complete = self.fill_missing(descriptor).await;
        descriptor.should_load = complete && !descriptor.disabled;
        if !complete {
            warn!(
                "Module {} excluded: archives missing and not downloadable",
                descriptor.coordinate
            );
        }
        complete
    }

    async fn fill_missing(&self, descriptor: &mut ModuleDescriptor) -> bool {
        let mut fresh = false;
        if !descriptor.has_archive() {
            match self.download(&descriptor.coordinate).await {
                Some(artifact) => {
                    descriptor.archive = artifact.archive;
                    fresh = true;
                }
                None => return false,
            }
        }

        if fresh && descriptor.dependencies.is_empty() {
            let declared = self
                .declared_dependencies(&descriptor.coordinate, descriptor.archive.as_deref())
                .await;
            descriptor.dependencies = self
                .resolve_dependencies(&descriptor.coordinate, declared)
                .await;
            return descriptor.dependencies.iter().all(|d| d.archive.is_some());
        }

        let mut complete = true;
        for dependency in descriptor.dependencies.iter_mut() {
            if dependency.is_available() {
                continue;
            }
            match self.download(&dependency.coordinate).await {
                Some(artifact) => dependency.archive = artifact.archive,
                None => {
                    dependency.archive = None;
                    complete = false;
                }
            }
        }
        complete
    }
}
