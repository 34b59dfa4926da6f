//! Session configuration

use serde::{Deserialize, Serialize};

use crate::transaction::RetryPolicy;

/// Default number of hash entries requested per cursor page.
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// Default number of sequence elements fetched per iteration chunk.
pub const DEFAULT_LIST_CHUNK: usize = 100;

/// Configuration for a [`Session`](crate::Session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix prepended to every logical key name (default: none)
    pub key_prefix: Option<String>,
    /// Hash cursor page size
    pub scan_count: usize,
    /// Sequence iteration chunk size
    pub list_chunk: usize,
    /// Retry policy used by [`Session::transaction`](crate::Session::transaction)
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_prefix: None,
            scan_count: DEFAULT_SCAN_COUNT,
            list_chunk: DEFAULT_LIST_CHUNK,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the hash cursor page size
    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count.max(1);
        self
    }

    /// Set the sequence iteration chunk size
    pub fn with_list_chunk(mut self, chunk: usize) -> Self {
        self.list_chunk = chunk.max(1);
        self
    }

    /// Set the transaction retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create from environment variables
    ///
    /// Reads (all optional):
    /// - OXKV_KEY_PREFIX
    /// - OXKV_SCAN_COUNT (default: 100)
    /// - OXKV_LIST_CHUNK (default: 100)
    /// - OXKV_TX_MAX_ATTEMPTS (default: 3)
    /// - OXKV_TX_BACKOFF_MS (default: 10)
    /// - OXKV_TX_MAX_BACKOFF_MS (default: 1000)
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut config = Self::default();
        if let Ok(prefix) = std::env::var("OXKV_KEY_PREFIX") {
            config.key_prefix = Some(prefix);
        }
        if let Some(count) = parse_env("OXKV_SCAN_COUNT")? {
            config = config.with_scan_count(count);
        }
        if let Some(chunk) = parse_env("OXKV_LIST_CHUNK")? {
            config = config.with_list_chunk(chunk);
        }
        if let Some(attempts) = parse_env("OXKV_TX_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(base) = parse_env("OXKV_TX_BACKOFF_MS")? {
            config.retry.backoff_base_ms = base;
        }
        if let Some(max) = parse_env("OXKV_TX_MAX_BACKOFF_MS")? {
            config.retry.max_backoff_ms = max;
        }
        Ok(config)
    }

    /// Apply the key prefix to a logical key name.
    pub fn resolve_key(&self, name: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> std::result::Result<Option<T>, String> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("{var} has an invalid value: {raw}")),
        Err(_) => Ok(None),
    }
}
