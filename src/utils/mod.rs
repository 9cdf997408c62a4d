//! Utility modules shared by the runtime and the binary

pub mod env;
pub mod logging;
pub mod retry;
pub mod signal;

pub use env::{env_bool_opt, env_opt};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use retry::{retry_async_with_backoff, RetryConfig};
pub use signal::wait_for_shutdown_signal;
