//! Request dispatch layer
//!
//! A dispatcher is created against one active loader and routes requests to
//! the module initializers visible from it. The factory is chosen when the
//! runtime is constructed.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, info};

use crate::module::loader::LoaderNode;
use crate::module::security::{check_privilege, EntryPointRegistry, ModuleInitializer, Privilege};
use crate::module::traits::{Coordinate, ModuleError};

/// Serves requests on behalf of the loaded modules
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: Request<Bytes>) -> Response<Bytes>;

    /// Release module resources; called once when the layer is torn down
    async fn shutdown(&self);

    /// Mounted path prefixes
    fn mounts(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Creates a dispatch layer for an active loader
#[async_trait]
pub trait DispatcherFactory: Send + Sync {
    async fn create(&self, loader: Arc<LoaderNode>) -> Result<Arc<dyn Dispatcher>, ModuleError>;
}

/// Response with a plain-text body and the given status
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

struct Route {
    mount: String,
    module: Coordinate,
    initializer: Arc<dyn ModuleInitializer>,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        self.mount == "/"
            || path == self.mount
            || path
                .strip_prefix(self.mount.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn normalize_mount(path: String) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Routes by longest matching mount prefix
pub struct ModuleDispatcher {
    routes: Vec<Route>,
    loader: Arc<LoaderNode>,
}

impl ModuleDispatcher {
    pub fn loader(&self) -> &Arc<LoaderNode> {
        &self.loader
    }
}

#[async_trait]
impl Dispatcher for ModuleDispatcher {
    async fn dispatch(&self, request: Request<Bytes>) -> Response<Bytes> {
        let path = request.uri().path().to_string();
        match self.routes.iter().find(|route| route.matches(&path)) {
            Some(route) => {
                debug!("{} -> {}", path, route.module);
                route.initializer.handle(request).await
            }
            None => text_response(StatusCode::NOT_FOUND, "no module serves this path"),
        }
    }

    async fn shutdown(&self) {
        for route in &self.routes {
            route.initializer.on_destroy().await;
        }
    }

    fn mounts(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.mount.clone()).collect()
    }
}

/// Binds module initializers from an entry point registry
pub struct ModuleDispatcherFactory {
    entry_points: EntryPointRegistry,
}

impl ModuleDispatcherFactory {
    pub fn new(entry_points: EntryPointRegistry) -> Self {
        Self { entry_points }
    }

    async fn mount_all(
        &self,
        loader: &Arc<LoaderNode>,
        routes: &mut Vec<Route>,
    ) -> Result<(), ModuleError> {
        for (_, module) in loader.visible_modules() {
            let Some(class) = module.initializer.as_deref() else {
                continue;
            };
            let Some(initializer) = self.entry_points.get(class) else {
                debug!("No entry point bound for {} ({})", class, module.coordinate);
                continue;
            };

            loader.load_class(class).map_err(|e| {
                ModuleError::InitializationError(format!("{}: {}", module.coordinate, e))
            })?;
            let privilege = loader
                .privilege_of(&module.coordinate)
                .unwrap_or(Privilege::Restricted);
            check_privilege(&module.coordinate, privilege, initializer.required_privilege())?;

            let mount = normalize_mount(initializer.mount_path());
            if let Some(existing) = routes.iter().find(|r| r.mount == mount) {
                return Err(ModuleError::InitializationError(format!(
                    "{} and {} both mount {}",
                    existing.module, module.coordinate, mount
                )));
            }

            initializer
                .on_initialize(&module.coordinate, privilege)
                .await
                .map_err(|e| {
                    ModuleError::InitializationError(format!("{}: {}", module.coordinate, e))
                })?;
            info!(
                "Mounted {} at {} ({} privilege)",
                module.coordinate, mount, privilege
            );
            routes.push(Route {
                mount,
                module: module.coordinate.clone(),
                initializer,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DispatcherFactory for ModuleDispatcherFactory {
    async fn create(&self, loader: Arc<LoaderNode>) -> Result<Arc<dyn Dispatcher>, ModuleError> {
        let mut routes = Vec::new();
        if let Err(e) = self.mount_all(&loader, &mut routes).await {
            for route in &routes {
                route.initializer.on_destroy().await;
            }
            return Err(e);
        }

        routes.sort_by(|a, b| b.mount.len().cmp(&a.mount.len()));
        Ok(Arc::new(ModuleDispatcher { routes, loader }))
    }
}
