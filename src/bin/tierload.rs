//! tierload - serve hot-reloadable modules over HTTP

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use tierload::config::RuntimeConfig;
use tierload::module::{EntryPointRegistry, ModuleDispatcherFactory, ReloadOrchestrator};
use tierload::server::ModuleServer;
use tierload::utils::{init_logging_from_config, wait_for_shutdown_signal};

/// Hot-reloadable module runtime
#[derive(Parser, Debug)]
#[command(name = "tierload", author, version, about)]
struct Cli {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory scanned for module archives
    #[arg(long)]
    modules_dir: Option<PathBuf>,

    /// Listen address for the HTTP server
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "tierload::module=debug"
    #[arg(long)]
    log_filter: Option<String>,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(dir) = cli.modules_dir {
        config.modules.dir = dir;
    }
    if let Some(addr) = cli.listen {
        config.server.listen_addr = addr;
    }
    if let Some(filter) = cli.log_filter {
        config.logging.filter = Some(filter);
    }

    if let Some(path) = cli.dump_config {
        config.to_toml_file(&path)?;
        return Ok(());
    }

    init_logging_from_config(&config.logging);
    info!("tierload {} starting", env!("CARGO_PKG_VERSION"));

    // Embedders register their initializers here; the stock binary ships none.
    let factory = Arc::new(ModuleDispatcherFactory::new(EntryPointRegistry::new()));
    let orchestrator = ReloadOrchestrator::new(&config, factory)?;
    if let Err(e) = orchestrator.start().await {
        error!("Module runtime failed to start: {}", e);
        orchestrator.shutdown().await;
        return Err(e.into());
    }

    let mut halt = orchestrator.subscribe_halt();
    let server = ModuleServer::new(config.server.listen_addr, orchestrator.clone());
    let shutdown = async move {
        tokio::select! {
            _ = wait_for_shutdown_signal() => {}
            _ = halt.wait_for(|halted| *halted) => {
                warn!("Module runtime halted, stopping server");
            }
        }
    };

    let result = server.run(shutdown).await;
    orchestrator.shutdown().await;

    if orchestrator.is_halted() {
        anyhow::bail!("module runtime exhausted every loader mode");
    }
    result
}
