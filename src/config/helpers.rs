//! Environment variable loading helpers, mirroring the teacher's
//! `config::helpers` but erroring instead of panicking: a missing
//! procedure-specific API key is routine, not a startup bug.

use std::env;

use crate::error::{PmlError, PmlResult};

pub fn require_env(key: &str) -> PmlResult<String> {
    env::var(key).map_err(|_| PmlError::Configuration(format!("missing required env var: {key}")))
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn env_bool_or(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}
