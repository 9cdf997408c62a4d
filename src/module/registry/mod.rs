//! Module registry
//!
//! Keeps the set of known modules, persists it to the descriptor file and
//! reconciles it against the modules directory on every build.

pub mod descriptor;
pub mod discovery;
pub mod manifest;

pub use descriptor::{DescriptorStore, ModuleDescriptor, RegistryKey};
pub use discovery::ModuleDiscovery;
pub use manifest::BuildDescriptor;

use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::module::resolver::DependencyResolver;
use crate::module::traits::{Coordinate, ModuleError};

type Entries = BTreeMap<RegistryKey, ModuleDescriptor>;

/// Registry of known modules
///
/// All mutations go through one lock, so the descriptor file has a single
/// writer. The in-memory mapping only changes after the file write succeeded.
pub struct ModuleRegistry {
    modules_dir: PathBuf,
    discovery: ModuleDiscovery,
    store: DescriptorStore,
    resolver: Arc<DependencyResolver>,
    entries: Mutex<Entries>,
}

impl ModuleRegistry {
    pub fn new<P: AsRef<Path>>(
        modules_dir: P,
        store: DescriptorStore,
        resolver: Arc<DependencyResolver>,
    ) -> Self {
        let modules_dir = modules_dir.as_ref().to_path_buf();
        Self {
            discovery: ModuleDiscovery::new(&modules_dir),
            modules_dir,
            store,
            resolver,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    /// Reconcile persisted state with the modules directory
    ///
    /// Returns the descriptors to load, in registry order. On a descriptor
    /// file write failure the previous in-memory state is kept and the error
    /// is returned.
    pub async fn reconcile(&self) -> Result<Vec<ModuleDescriptor>, ModuleError> {
        let mut entries = self.entries.lock().await;
        info!("Reconciling module registry with {:?}", self.modules_dir);

        let mut map = Entries::new();
        match self.store.load() {
            Ok(Some(persisted)) => {
                for descriptor in persisted {
                    map.insert(descriptor.key(), descriptor);
                }
            }
            Ok(None) => debug!("No descriptor file at {:?}", self.store.path()),
            Err(e) => warn!("Ignoring unreadable descriptor file: {}", e),
        }
        let persisted = map.clone();

        self.refresh_incomplete(&mut map).await;

        let known: HashSet<PathBuf> = map.values().filter_map(|d| d.archive.clone()).collect();
        let fresh: Vec<PathBuf> = self
            .discovery
            .discover_archives()?
            .into_iter()
            .filter(|archive| !known.contains(archive))
            .collect();
        if !fresh.is_empty() {
            info!("Resolving {} new module archives", fresh.len());
        }
        let resolved = join_all(fresh.iter().map(|a| self.resolver.resolve_archive(a))).await;
        for descriptor in resolved {
            map.insert(descriptor.key(), descriptor);
        }

        if map != persisted {
            self.persist(&map)?;
        }
        *entries = map;

        let loadable: Vec<ModuleDescriptor> = entries
            .values()
            .filter(|d| d.should_load)
            .cloned()
            .collect();
        info!(
            "Registry holds {} modules, {} to load",
            entries.len(),
            loadable.len()
        );
        Ok(loadable)
    }

    /// Re-download missing archives; purge entries that stay missing unless pinned
    async fn refresh_incomplete(&self, map: &mut Entries) {
        let incomplete: Vec<RegistryKey> = map
            .iter()
            .filter(|(_, d)| d.is_incomplete())
            .map(|(k, _)| k.clone())
            .collect();

        for key in incomplete {
            let Some(mut descriptor) = map.remove(&key) else {
                continue;
            };
            if self.resolver.download_missing(&mut descriptor).await {
                info!("Restored archives of {}", descriptor.coordinate);
                map.remove(&RegistryKey::Pending(descriptor.coordinate.clone()));
                map.insert(descriptor.key(), descriptor);
            } else if descriptor.pinned {
                descriptor.archive = descriptor.archive.filter(|p| p.is_file());
                map.insert(descriptor.key(), descriptor);
            } else {
                info!("Purging stale registry entry {}", descriptor.coordinate);
            }
        }
    }

    /// Write the mapping, or delete the file when nothing qualifies for loading
    ///
    /// Pinned entries keep the file alive so they can be retried later.
    fn persist(&self, map: &Entries) -> Result<(), ModuleError> {
        if map.values().any(|d| d.should_load || d.pinned) {
            let modules: Vec<ModuleDescriptor> = map.values().cloned().collect();
            self.store.save(&modules)
        } else {
            debug!("No module qualifies for loading, removing descriptor file");
            self.store.delete()
        }
    }

    /// Apply a change to a copy of the mapping, persist it, then publish it
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Entries) -> Result<T, ModuleError>,
    ) -> Result<T, ModuleError> {
        let mut entries = self.entries.lock().await;
        let mut map = entries.clone();
        let result = change(&mut map)?;
        if map != *entries {
            self.persist(&map)?;
            *entries = map;
        }
        Ok(result)
    }

    /// Descriptors currently marked for loading
    pub async fn loadable(&self) -> Vec<ModuleDescriptor> {
        self.entries
            .lock()
            .await
            .values()
            .filter(|d| d.should_load)
            .cloned()
            .collect()
    }

    /// Every known descriptor, in registry order
    pub async fn snapshot(&self) -> Vec<ModuleDescriptor> {
        self.entries.lock().await.values().cloned().collect()
    }

    /// Declare a module by coordinate
    ///
    /// The entry is pinned. If it cannot be resolved now it is recorded as
    /// pending and retried by the next reconciliation.
    pub async fn declare(&self, coordinate: &Coordinate) -> Result<ModuleDescriptor, ModuleError> {
        let mut descriptor = match self.resolver.resolve(coordinate).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("{} recorded as pending: {}", coordinate, e);
                ModuleDescriptor::new(coordinate.clone(), None)
            }
        };
        descriptor.pinned = true;

        let declared = descriptor.clone();
        self.mutate(move |map| {
            map.retain(|_, d| d.coordinate != descriptor.coordinate);
            map.insert(descriptor.key(), descriptor);
            Ok(())
        })
        .await?;
        info!("Declared module {}", declared.coordinate);
        Ok(declared)
    }

    /// Enable or disable a module for the next build
    ///
    /// The entry becomes pinned so the choice outlives a reconciliation that
    /// finds nothing else to load. A disabled entry stays disabled when its
    /// archives are later downloaded again.
    pub async fn set_should_load(
        &self,
        coordinate: &Coordinate,
        should_load: bool,
    ) -> Result<(), ModuleError> {
        self.mutate(|map| {
            let mut found = false;
            for descriptor in map.values_mut().filter(|d| &d.coordinate == coordinate) {
                descriptor.should_load = should_load;
                descriptor.disabled = !should_load;
                descriptor.pinned = true;
                found = true;
            }
            if found {
                Ok(())
            } else {
                Err(ModuleError::ModuleNotFound(coordinate.to_string()))
            }
        })
        .await
    }

    /// Forget a module; its archive is deleted if it lives in the modules directory
    pub async fn remove(&self, coordinate: &Coordinate) -> Result<ModuleDescriptor, ModuleError> {
        let removed = self
            .mutate(|map| {
                let key = map
                    .iter()
                    .find(|(_, d)| &d.coordinate == coordinate)
                    .map(|(k, _)| k.clone())
                    .ok_or_else(|| ModuleError::ModuleNotFound(coordinate.to_string()))?;
                map.remove(&key)
                    .ok_or_else(|| ModuleError::ModuleNotFound(coordinate.to_string()))
            })
            .await?;

        if let Some(archive) = &removed.archive {
            if self.discovery.contains(archive) {
                if let Err(e) = std::fs::remove_file(archive) {
                    warn!("Cannot delete archive {:?}: {}", archive, e);
                }
            }
        }
        info!("Removed module {}", coordinate);
        Ok(removed)
    }

    /// Record the outcome of a trust partition
    pub async fn record_trust(&self, outcome: &[ModuleDescriptor]) -> Result<(), ModuleError> {
        self.mutate(|map| {
            for result in outcome {
                if let Some(entry) = map.get_mut(&result.key()) {
                    entry.trusted = result.trusted;
                    entry.initializer = result.initializer.clone();
                }
            }
            Ok(())
        })
        .await
    }
}
