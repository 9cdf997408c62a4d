//! Environment variable utilities
//!
//! Helpers for reading configuration overrides from the environment.

/// Get environment variable as Option
///
/// Returns `Some(value)` if set and non-empty, `None` otherwise.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get environment variable as an optional boolean
///
/// `true`, `1`, `yes`, `on` map to `Some(true)`; `false`, `0`, `no`, `off` to
/// `Some(false)` (case-insensitive). Unset or unrecognized values give `None`.
pub fn env_bool_opt(key: &str) -> Option<bool> {
    let value = env_opt(key)?.to_lowercase();
    match value.trim() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
