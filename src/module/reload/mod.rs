//! Hot reload of the module runtime
//!
//! The orchestrator is the single runtime context: it publishes the active
//! loader hierarchy and dispatch layer and gates requests while rebuilding.

pub mod orchestrator;

pub use orchestrator::{
    DegradeLevel, ModuleStatus, OrchestratorState, ReloadOrchestrator, ReloadOutcome,
    RuntimeStatus,
};
