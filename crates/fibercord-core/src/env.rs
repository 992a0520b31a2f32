//! Environment variable utilities
//!
//! Typed lookups with defaults, used by the config layer and the logger.
//!
//! ```ignore
//! use fibercord_core::env::{env_get, env_get_bool, env_get_size};
//!
//! let pool_max: usize = env_get("FIBERCORD_POOL_MAX", 1024);
//! let abort = env_get_bool("FIBERCORD_ABORT_ON_LEAK", false);
//! let stack = env_get_size("FIBERCORD_STACK_SIZE", 512 * 1024); // accepts "512K", "1M"
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// A value that fails to parse is treated as unset.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `Some(T)` if the variable is set and parses, `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Byte size with an optional `K`, `M` or `G` suffix (powers of 1024).
pub fn env_get_size(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_size(&v))
        .unwrap_or(default)
}

/// Parse "4096", "64K", "1m", "2G".
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last()? {
        (i, 'k' | 'K') => (&s[..i], 10),
        (i, 'm' | 'M') => (&s[..i], 20),
        (i, 'g' | 'G') => (&s[..i], 30),
        _ => (s, 0),
    };
    let n: usize = digits.trim().parse().ok()?;
    n.checked_mul(1usize << shift)
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}
