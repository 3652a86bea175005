//! Helpers for reading configuration from environment variables.
//!
//! Each crate's `*Config::from_env()` delegates to a `from_lookup`
//! constructor that takes a key lookup function, so configuration can be
//! built from a map in tests without touching the process environment.

use std::str::FromStr;

use crate::error::CoreError;

/// Lookup from the real process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Read a string value, falling back to `default` when unset or empty.
pub fn string_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Read a value that must be present and non-empty.
pub fn required<F>(lookup: &F, key: &str) -> Result<String, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::Config(format!("{key} must be set")))
}

/// Parse a value, falling back to `default` when unset. A present but
/// unparseable value is an error rather than silently defaulted.
pub fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| CoreError::Config(format!("{key} has an invalid value: {v:?}"))),
    }
}
