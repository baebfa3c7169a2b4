//! Environment variable helpers
//!
//! Runtime configuration reads overrides through these functions so that a
//! missing or malformed variable silently falls back to the compiled default.
//!
//! ```ignore
//! use sockline_core::env::{env_get, env_get_millis};
//!
//! let backlog: i32 = env_get("SOCKLINE_LISTEN_BACKLOG", 1);
//! let probe = env_get_millis("SOCKLINE_LIVENESS_PROBE_MS", 10_000);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
///
/// Works with any type that implements `FromStr`, including the config enums
/// of the runtime crate.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as optional value
///
/// `None` when the variable is unset or does not parse.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get a millisecond count from the environment as a `Duration`
#[inline]
pub fn env_get_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}
