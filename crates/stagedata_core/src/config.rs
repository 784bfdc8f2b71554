//! Configuration loading from environment variables.

use crate::constants::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_PAGE_SIZE, ENV_EVENT_CAPACITY, ENV_PAGE_SIZE,
    ENV_PRUNE_ON_REFRESH,
};
use std::env;

/// Runtime configuration for a buffering provider and its in-memory sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Capacity of the broadcast channel carrying provider events.
    pub event_capacity: usize,
    /// Page size used when a fetch does not request one.
    pub page_size: usize,
    /// Drop staged remove/update edits for keys missing upstream on refresh.
    pub prune_on_refresh: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
            prune_on_refresh: true,
        }
    }
}

/// Parse a boolean-like environment flag value.
///
/// # Supported Values
/// - Truthy: `1`, `true`, `yes`, `on`
/// - Falsy: `0`, `false`, `no`, `off`, empty string
///
/// Matching is case-insensitive and ignores surrounding whitespace.
///
/// # Returns
/// `Some(bool)` when the value is recognized, otherwise `None`.
pub fn parse_env_flag(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn positive_from_env(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(0) | Err(_) => {
                tracing::warn!("Ignoring invalid {}='{}'; using {}", name, raw, default);
                default
            }
            Ok(value) => value,
        },
        Err(_) => default,
    }
}

impl ProviderConfig {
    /// Load configuration from environment variables.
    ///
    /// # Returns
    /// A populated [`ProviderConfig`] with defaults applied when env vars are
    /// missing or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            event_capacity: positive_from_env(ENV_EVENT_CAPACITY, defaults.event_capacity),
            page_size: positive_from_env(ENV_PAGE_SIZE, defaults.page_size),
            prune_on_refresh: env::var(ENV_PRUNE_ON_REFRESH)
                .ok()
                .and_then(|value| parse_env_flag(&value))
                .unwrap_or(defaults.prune_on_refresh),
        }
    }
}
