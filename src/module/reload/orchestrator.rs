//! Reload orchestrator
//!
//! Owns the active loader hierarchy and dispatch layer for the process. Builds
//! them at startup, rebuilds them on request, gates traffic while rebuilding,
//! and falls back to a smaller loader when the dispatch layer cannot start.

use bytes::Bytes;
use http::{header, HeaderValue, Request, Response, StatusCode};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{ExhaustedPolicy, ReloadConfig, RuntimeConfig};
use crate::module::archive::ArchiveInspector;
use crate::module::dispatch::{text_response, Dispatcher, DispatcherFactory};
use crate::module::loader::{LoaderHierarchy, LoaderKind, LoaderMode, LoaderNode};
use crate::module::registry::{DescriptorStore, ModuleDescriptor, ModuleRegistry};
use crate::module::resolver::DependencyResolver;
use crate::module::sandbox::TrustSandbox;
use crate::module::traits::{Coordinate, ModuleError};

/// Which tier failed to start the dispatch layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeLevel {
    UntrustedFailed,
    TrustedFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Initializing,
    Reloading,
    /// Dispatch layer up
    Running,
    Degraded(DegradeLevel),
    /// Dispatch layer failed even on the platform loader
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Completed(OrchestratorState),
    /// Another reload was in flight
    Skipped,
}

/// Clears the reloading flag however the reload ends
struct ReloadGuard<'a>(&'a AtomicBool);

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One module as reported to operators
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub coordinate: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    pub trusted: bool,
    pub load: bool,
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initializer: Option<String>,
    pub dependencies: Vec<Coordinate>,
    /// Node serving the module in the current hierarchy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub state: OrchestratorState,
    pub mode: LoaderMode,
    pub reloading: bool,
    /// Id of the hierarchy build currently serving, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
    pub mounts: Vec<String>,
    pub modules: Vec<ModuleStatus>,
}

/// Process-wide runtime context
pub struct ReloadOrchestrator {
    config: ReloadConfig,
    registry: Arc<ModuleRegistry>,
    inspector: Arc<ArchiveInspector>,
    platform: Arc<LoaderNode>,
    factory: Arc<dyn DispatcherFactory>,
    reloading: AtomicBool,
    /// Set when a failed start switched the mode; consumed after the flag clears
    fallback_requested: AtomicBool,
    state: RwLock<OrchestratorState>,
    mode: RwLock<LoaderMode>,
    hierarchy: RwLock<Option<LoaderHierarchy>>,
    dispatcher: RwLock<Option<Arc<dyn Dispatcher>>>,
    generation: RwLock<Option<String>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    halt_tx: watch::Sender<bool>,
    this: Weak<ReloadOrchestrator>,
}

impl ReloadOrchestrator {
    /// Wire up inspector, resolver and registry from configuration
    pub fn new(
        config: &RuntimeConfig,
        factory: Arc<dyn DispatcherFactory>,
    ) -> Result<Arc<Self>, ModuleError> {
        let inspector = Arc::new(ArchiveInspector::new(
            &config.modules.scratch_dir,
            config.initializer_convention(),
        ));
        let resolver = Arc::new(DependencyResolver::from_config(config, inspector.clone())?);
        let registry = Arc::new(ModuleRegistry::new(
            &config.modules.dir,
            DescriptorStore::new(config.modules.descriptor_path()),
            resolver,
        ));
        let platform = Arc::new(LoaderNode::platform(inspector, &config.platform.classes));
        Ok(Self::with_registry(
            config.reload.clone(),
            registry,
            platform,
            factory,
        ))
    }

    /// Build around an existing registry and platform node
    pub fn with_registry(
        config: ReloadConfig,
        registry: Arc<ModuleRegistry>,
        platform: Arc<LoaderNode>,
        factory: Arc<dyn DispatcherFactory>,
    ) -> Arc<Self> {
        let inspector = registry.resolver().inspector().clone();
        let (halt_tx, _) = watch::channel(false);
        let mode = config.initial_mode;
        Arc::new_cyclic(|this| Self {
            config,
            registry,
            inspector,
            platform,
            factory,
            reloading: AtomicBool::new(false),
            fallback_requested: AtomicBool::new(false),
            state: RwLock::new(OrchestratorState::Idle),
            mode: RwLock::new(mode),
            hierarchy: RwLock::new(None),
            dispatcher: RwLock::new(None),
            generation: RwLock::new(None),
            pending: Mutex::new(Vec::new()),
            halt_tx,
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &ReloadConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: OrchestratorState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn mode(&self) -> LoaderMode {
        *self.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the active loader selector; takes effect for the dispatch layer
    /// on the next reload
    pub fn set_mode(&self, mode: LoaderMode) {
        let previous = std::mem::replace(
            &mut *self.mode.write().unwrap_or_else(|e| e.into_inner()),
            mode,
        );
        if previous != mode {
            info!("Loader mode {} -> {}", previous, mode);
        }
    }

    pub fn reset_mode(&self) {
        self.set_mode(LoaderMode::default());
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::SeqCst)
    }

    /// Current hierarchy, if one has been built
    pub fn hierarchy(&self) -> Option<LoaderHierarchy> {
        self.hierarchy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Node selected by the current mode
    pub fn active_loader(&self) -> Option<Arc<LoaderNode>> {
        let mode = self.mode();
        self.hierarchy().map(|h| h.loader(mode))
    }

    fn current_dispatcher(&self) -> Option<Arc<dyn Dispatcher>> {
        self.dispatcher
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Receiver that flips to `true` when the runtime gives up
    pub fn subscribe_halt(&self) -> watch::Receiver<bool> {
        self.halt_tx.subscribe()
    }

    pub fn is_halted(&self) -> bool {
        *self.halt_tx.borrow()
    }

    /// Initial build of hierarchy and dispatch layer
    pub async fn start(&self) -> Result<OrchestratorState, ModuleError> {
        let result = {
            let _guard = ReloadGuard(&self.reloading);
            self.reloading.store(true, Ordering::SeqCst);
            self.set_state(OrchestratorState::Initializing);
            info!("Starting module runtime in {} mode", self.mode());
            self.initialize().await
        };
        self.schedule_fallback_reload();
        result
    }

    /// Reconcile, partition, build, install, create the dispatch layer
    async fn initialize(&self) -> Result<OrchestratorState, ModuleError> {
        let mode = self.mode();
        let generation = format!("gen_{}", uuid::Uuid::new_v4());
        debug!("Building hierarchy {}", generation);

        let candidates = match self.registry.reconcile().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    "Registry reconciliation failed, using previous state: {}",
                    e
                );
                self.registry.loadable().await
            }
        };

        let sandbox = TrustSandbox::new(self.platform.clone(), self.inspector.clone());
        let partition = sandbox.partition(&candidates);
        if let Err(e) = self.registry.record_trust(&partition.all()).await {
            warn!("Cannot persist trust results: {}", e);
        }

        let hierarchy = LoaderHierarchy::build(
            self.platform.clone(),
            self.inspector.clone(),
            &partition.trusted,
            &partition.untrusted,
        );
        let loader = hierarchy.loader(mode);
        *self.hierarchy.write().unwrap_or_else(|e| e.into_inner()) = Some(hierarchy);
        info!("Installed {} loader as active loader", loader.kind());

        match self.factory.create(loader).await {
            Ok(dispatcher) => {
                *self.dispatcher.write().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
                info!("Dispatch layer {} running in {} mode", generation, mode);
                *self.generation.write().unwrap_or_else(|e| e.into_inner()) = Some(generation);
                self.set_state(OrchestratorState::Running);
                Ok(OrchestratorState::Running)
            }
            Err(e) => self.degrade(mode, e),
        }
    }

    /// Fall back one tier after a dispatch layer failure
    fn degrade(
        &self,
        mode: LoaderMode,
        cause: ModuleError,
    ) -> Result<OrchestratorState, ModuleError> {
        let (next, level) = match mode {
            LoaderMode::Untrusted => (LoaderMode::Trusted, DegradeLevel::UntrustedFailed),
            LoaderMode::Trusted => (LoaderMode::Custom, DegradeLevel::TrustedFailed),
            LoaderMode::Custom => {
                error!(
                    "Dispatch layer failed on the platform loader, no fallback left: {}",
                    cause
                );
                self.set_state(OrchestratorState::Failed);
                return match self.config.on_exhausted {
                    ExhaustedPolicy::Halt => {
                        self.halt_tx.send_replace(true);
                        Err(cause)
                    }
                    ExhaustedPolicy::StayDegraded => {
                        warn!("Staying up without a dispatch layer");
                        Ok(OrchestratorState::Failed)
                    }
                };
            }
        };

        warn!(
            "Dispatch layer failed in {} mode, falling back to {}: {}",
            mode, next, cause
        );
        self.set_mode(next);
        let state = OrchestratorState::Degraded(level);
        self.set_state(state);
        self.fallback_requested.store(true, Ordering::SeqCst);
        Ok(state)
    }

    fn schedule_fallback_reload(&self) {
        if self.fallback_requested.swap(false, Ordering::SeqCst) {
            self.schedule_reload(self.config.fallback_delay(), Duration::ZERO);
        }
    }

    /// Drop the dispatch layer; in-flight requests keep their own reference
    async fn teardown(&self) {
        let dispatcher = self
            .dispatcher
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.generation
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(dispatcher) = dispatcher {
            debug!("Tearing down dispatch layer");
            dispatcher.shutdown().await;
        }
    }

    /// Rebuild everything; dropped if a reload is already running
    pub async fn reload(&self, wait: Duration) -> Result<ReloadOutcome, ModuleError> {
        if self
            .reloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reload already in progress, request dropped");
            return Ok(ReloadOutcome::Skipped);
        }

        let result = {
            let _guard = ReloadGuard(&self.reloading);
            self.set_state(OrchestratorState::Reloading);
            info!("Reloading modules");
            self.teardown().await;

            let wait = self.config.bounded_wait(wait);
            if !wait.is_zero() {
                debug!("Draining for {:?}", wait);
                sleep(wait).await;
            }
            self.initialize().await
        };
        self.schedule_fallback_reload();
        result.map(ReloadOutcome::Completed)
    }

    /// Run `reload(wait)` once after `delay`, off the caller's task
    pub fn schedule_reload(&self, delay: Duration, wait: Duration) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        info!("Reload scheduled in {:?}", delay);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            match this.reload(wait).await {
                Ok(ReloadOutcome::Completed(state)) => {
                    debug!("Scheduled reload finished: {:?}", state)
                }
                Ok(ReloadOutcome::Skipped) => debug!("Scheduled reload skipped"),
                Err(e) => error!("Scheduled reload failed: {}", e),
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Whether a scheduled reload has not run yet
    pub fn reload_scheduled(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|h| !h.is_finished())
    }

    /// Retryable response used while no dispatch layer can serve
    pub fn unavailable(&self) -> Response<Bytes> {
        let mut response = text_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "modules are reloading, retry shortly",
        );
        let retry_after = self.config.default_wait().as_secs().max(1);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }

    /// Request gate
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        if self.is_reloading() {
            return self.unavailable();
        }
        match self.current_dispatcher() {
            Some(dispatcher) => dispatcher.dispatch(request).await,
            None => self.unavailable(),
        }
    }

    /// Registry and hierarchy view for operators
    pub async fn status(&self) -> RuntimeStatus {
        let hierarchy = self.hierarchy();
        let held_by = |descriptor: &ModuleDescriptor| {
            let hierarchy = hierarchy.as_ref()?;
            [hierarchy.trusted(), hierarchy.untrusted()]
                .into_iter()
                .find(|node| {
                    node.modules()
                        .iter()
                        .any(|m| m.coordinate == descriptor.coordinate)
                })
                .map(|node| node.kind())
        };

        let modules = self
            .registry
            .snapshot()
            .await
            .iter()
            .map(|d| ModuleStatus {
                coordinate: d.coordinate.clone(),
                archive: d.archive.clone(),
                trusted: d.trusted,
                load: d.should_load,
                pinned: d.pinned,
                initializer: d.initializer.clone(),
                dependencies: d.dependencies.iter().map(|a| a.coordinate.clone()).collect(),
                loader: held_by(d),
            })
            .collect();

        RuntimeStatus {
            state: self.state(),
            mode: self.mode(),
            reloading: self.is_reloading(),
            generation: self
                .generation
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            mounts: self
                .current_dispatcher()
                .map(|d| d.mounts())
                .unwrap_or_default(),
            modules,
        }
    }

    /// Tear down the dispatch layer, cancel pending reloads, drop scratch files
    pub async fn shutdown(&self) {
        let pending: Vec<JoinHandle<()>> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in pending {
            handle.abort();
        }
        self.teardown().await;
        self.inspector.cleanup();
        self.set_state(OrchestratorState::Idle);
        info!("Module runtime shut down");
    }
}
