//! Shared helpers for integration tests.

#![allow(dead_code)]

use oxidized_kv::fakes::MemoryStore;
use oxidized_kv::{RetryPolicy, Session, SessionConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a test subscriber once; honours `RUST_LOG`, silent otherwise.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init()
        .ok();
}

/// A fresh store and one session on it.
pub fn session() -> (MemoryStore, Session) {
    init_tracing();
    let store = MemoryStore::new();
    let session = Session::new(store.connect());
    (store, session)
}

/// A second, independent session on `store` using `policy` for retries.
pub fn session_on(store: &MemoryStore, policy: RetryPolicy) -> Session {
    Session::with_config(store.connect(), SessionConfig::new().with_retry(policy))
}

/// Key name unique to one test run.
pub fn unique_key(prefix: &str) -> String {
    format!("{prefix}:{}", uuid::Uuid::new_v4())
}
