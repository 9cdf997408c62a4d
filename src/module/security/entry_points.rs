//! Entry point registry
//!
//! Module archives name their initializer class; the host binds each class
//! name to a native initializer before the runtime starts.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::module::security::permissions::Privilege;
use crate::module::traits::{Coordinate, ModuleError};

/// Native side of a module initializer
#[async_trait]
pub trait ModuleInitializer: Send + Sync {
    /// Path prefix this module serves, e.g. `/reports`
    fn mount_path(&self) -> String;

    /// Privilege the module needs to be initialized
    fn required_privilege(&self) -> Privilege {
        Privilege::Restricted
    }

    /// Called when a dispatch layer mounts the module
    async fn on_initialize(
        &self,
        _module: &Coordinate,
        _privilege: Privilege,
    ) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Handle a request routed to this module
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes>;

    /// Called when the dispatch layer is torn down
    async fn on_destroy(&self) {}
}

/// Maps initializer class names to native initializers
#[derive(Default, Clone)]
pub struct EntryPointRegistry {
    entries: HashMap<String, Arc<dyn ModuleInitializer>>,
}

impl EntryPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an initializer class name; a previous binding is replaced
    pub fn register(
        &mut self,
        class_name: impl Into<String>,
        initializer: Arc<dyn ModuleInitializer>,
    ) {
        let class_name = class_name.into();
        debug!("Registering entry point {}", class_name);
        self.entries.insert(class_name, initializer);
    }

    pub fn get(&self, class_name: &str) -> Option<Arc<dyn ModuleInitializer>> {
        self.entries.get(class_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
