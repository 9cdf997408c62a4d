//! Configuration management for tierload
//!
//! Handles configuration loading (TOML or JSON), environment overrides and
//! defaults for every subsystem.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::module::archive::InitializerConvention;
use crate::module::loader::LoaderMode;
use crate::utils::env::{env_bool_opt, env_opt};

/// Module directory and on-disk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directory scanned for module archives
    #[serde(default = "default_modules_dir")]
    pub dir: PathBuf,

    /// Registry descriptor file (defaults to `modules.toml` next to `dir`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_file: Option<PathBuf>,

    /// Scratch directory for extracted build descriptors
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Local artifact cache (repository layout)
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("data/scratch")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/repository")
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            dir: default_modules_dir(),
            descriptor_file: None,
            scratch_dir: default_scratch_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl ModulesConfig {
    /// Location of the registry descriptor file
    pub fn descriptor_path(&self) -> PathBuf {
        if let Some(path) = &self.descriptor_file {
            return path.clone();
        }
        match self.dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join("modules.toml"),
            _ => PathBuf::from("modules.toml"),
        }
    }
}

/// Dependency resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Package repositories, tried in order (`http(s)://` URL or directory path)
    #[serde(default = "default_repositories")]
    pub repositories: Vec<String>,

    /// Resolve dependencies of dependencies
    #[serde(default)]
    pub resolve_recursively: bool,

    /// Attempts per remote fetch
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for one remote request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_repositories() -> Vec<String> {
    vec!["https://repo.maven.apache.org/maven2".to_string()]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            repositories: default_repositories(),
            resolve_recursively: false,
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Initializer naming convention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializerConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_suffix")]
    pub suffix: String,
}

fn default_namespace() -> String {
    "tierload".to_string()
}

fn default_suffix() -> String {
    "Initializer".to_string()
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            suffix: default_suffix(),
        }
    }
}

impl From<&InitializerConfig> for InitializerConvention {
    fn from(config: &InitializerConfig) -> Self {
        InitializerConvention {
            namespace: config.namespace.clone(),
            suffix: config.suffix.clone(),
        }
    }
}

/// Classes provided by the host itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub classes: Vec<String>,
}

/// What happens when the dispatch layer fails even under the platform loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Report a fatal error and ask the host process to stop
    #[default]
    Halt,
    /// Keep running without a dispatch layer; requests get 503
    StayDegraded,
}

/// Reload timings and fallback policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Delay before the automatic reload that follows a fallback
    #[serde(default = "default_fallback_delay")]
    pub fallback_delay_ms: u64,

    /// Default delay for operator-requested reloads
    #[serde(default = "default_delay")]
    pub default_delay_ms: u64,

    /// Default drain wait for operator-requested reloads
    #[serde(default = "default_wait")]
    pub default_wait_ms: u64,

    /// Upper bound for any drain wait
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,

    /// Loader mode used at startup
    #[serde(default)]
    pub initial_mode: LoaderMode,

    #[serde(default)]
    pub on_exhausted: ExhaustedPolicy,
}

fn default_fallback_delay() -> u64 {
    1000
}

fn default_delay() -> u64 {
    3000
}

fn default_wait() -> u64 {
    5000
}

fn default_max_wait() -> u64 {
    30_000
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            fallback_delay_ms: default_fallback_delay(),
            default_delay_ms: default_delay(),
            default_wait_ms: default_wait(),
            max_wait_ms: default_max_wait(),
            initial_mode: LoaderMode::default(),
            on_exhausted: ExhaustedPolicy::default(),
        }
    }
}

impl ReloadConfig {
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.default_wait_ms)
    }

    /// Clamp a requested drain wait to the configured maximum
    pub fn bounded_wait(&self, wait: Duration) -> Duration {
        wait.min(Duration::from_millis(self.max_wait_ms))
    }
}

/// HTTP front door
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "tierload::module=debug"); RUST_LOG takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub modules: ModulesConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub initializer: InitializerConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub reload: ReloadConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load configuration from a TOML or JSON file (chosen by extension)
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Save configuration as TOML
    pub fn to_toml_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `TIERLOAD_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_opt("TIERLOAD_MODULES_DIR") {
            self.modules.dir = PathBuf::from(dir);
        }
        if let Some(repos) = env_opt("TIERLOAD_REPOSITORIES") {
            self.resolver.repositories = repos
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
        }
        if let Some(recursive) = env_bool_opt("TIERLOAD_RESOLVE_RECURSIVELY") {
            self.resolver.resolve_recursively = recursive;
        }
        if let Some(addr) = env_opt("TIERLOAD_LISTEN_ADDR").and_then(|a| a.parse().ok()) {
            self.server.listen_addr = addr;
        }
    }

    /// Initializer convention derived from config
    pub fn initializer_convention(&self) -> InitializerConvention {
        InitializerConvention::from(&self.initializer)
    }
}
