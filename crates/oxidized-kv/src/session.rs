//! Session: the entry point binding key names to typed proxies.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::SessionConfig;
use crate::error::{Error, StoreError};
use crate::op::Op;
use crate::protocol::{Command, Connection, Reply};
use crate::transaction::{run_transaction, RetryPolicy, Transaction};
use crate::types::{Shape, ValueType};
use crate::Result;

struct SessionInner {
    conn: Mutex<Box<dyn Connection>>,
    config: SessionConfig,
    /// Set while a transaction owns this connection's watch set
    transaction_active: AtomicBool,
    /// A transaction ended without clearing its watch set
    stale_watch: AtomicBool,
}

/// A handle on one store connection.
///
/// Cloning shares the connection. Proxies hold a clone and route every
/// command through it, so all proxies obtained from the same session observe
/// the same [`SessionConfig`] and the same transaction.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field(
                "transaction_active",
                &self.inner.transaction_active.load(Ordering::Acquire),
            )
            .finish()
    }
}

impl Session {
    pub fn new(conn: impl Connection + 'static) -> Self {
        Self::with_config(conn, SessionConfig::default())
    }

    pub fn with_config(conn: impl Connection + 'static, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                conn: Mutex::new(Box::new(conn)),
                config,
                transaction_active: AtomicBool::new(false),
                stale_watch: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Key name as stored, after the configured prefix.
    pub fn resolve_key(&self, name: &str) -> String {
        self.inner.config.resolve_key(name)
    }

    /// Whether both handles share one connection.
    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bind `name` to `value_type` without touching the store.
    ///
    /// The proxy is lazy: an absent key behaves as an empty collection or a
    /// missing scalar, and a key of another shape fails on first use with
    /// [`StoreError::WrongType`].
    pub fn get<V: ValueType>(&self, name: &str, value_type: V) -> V::Proxy {
        value_type.bind(self.clone(), self.resolve_key(name))
    }

    /// Like [`get`](Self::get), but first checks that an existing key has the
    /// declared shape.
    pub async fn get_checked<V: ValueType>(&self, name: &str, value_type: V) -> Result<V::Proxy> {
        let key = self.resolve_key(name);
        if let Some(found) = self.shape_at(&key).await? {
            let expected = value_type.shape();
            if found != expected {
                return Err(Error::TypeMismatch {
                    key,
                    expected: expected.to_string(),
                    found: found.to_string(),
                    bulk: None,
                });
            }
        }
        Ok(value_type.bind(self.clone(), key))
    }

    /// Native shape of the value stored under `name`, if any.
    pub async fn shape_of(&self, name: &str) -> Result<Option<Shape>> {
        self.shape_at(&self.resolve_key(name)).await
    }

    async fn shape_at(&self, key: &str) -> Result<Option<Shape>> {
        let reply = self.execute(Command::Type { key: key.to_string() }).await?;
        let name = reply.into_status("TYPE")?;
        if name == "none" {
            return Ok(None);
        }
        Shape::from_type_name(&name).map(Some).ok_or_else(|| {
            Error::from(StoreError::UnexpectedReply {
                command: "TYPE",
                reply: name,
            })
        })
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let key = self.resolve_key(name);
        Ok(self.execute(Command::Exists { key }).await?.into_integer("EXISTS")? > 0)
    }

    /// Remove the value under `name`, whatever its shape. Returns whether
    /// anything was removed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        self.delete_resolved(&self.resolve_key(name)).await
    }

    pub(crate) async fn delete_resolved(&self, key: &str) -> Result<bool> {
        let keys = vec![key.to_string()];
        Ok(self.execute(Command::Del { keys }).await?.into_integer("DEL")? > 0)
    }

    /// Start a transaction watching `names`.
    ///
    /// Only one transaction may be open per session; a second `begin` fails
    /// with [`Error::TransactionInProgress`] until the first one commits,
    /// aborts or is dropped.
    pub async fn begin(&self, names: &[&str]) -> Result<Transaction> {
        Transaction::begin(self.clone(), self.resolve_keys(names), 1).await
    }

    /// Run `block` inside a transaction, retrying on conflict under the
    /// session's configured [`RetryPolicy`].
    ///
    /// `block` runs once per attempt with a fresh transaction and must not
    /// commit it. Side effects outside the store are repeated on retry. Its
    /// error type only needs to absorb [`Error`], so application errors
    /// pass through unchanged.
    pub async fn transaction<T, E, F, Fut>(&self, names: &[&str], block: F) -> std::result::Result<T, E>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let policy = self.inner.config.retry.clone();
        self.transaction_with(names, &policy, block).await
    }

    /// [`transaction`](Self::transaction) with an explicit policy.
    #[instrument(skip(self, policy, block), fields(max_attempts = policy.max_attempts))]
    pub async fn transaction_with<T, E, F, Fut>(
        &self,
        names: &[&str],
        policy: &RetryPolicy,
        block: F,
    ) -> std::result::Result<T, E>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        run_transaction(self, self.resolve_keys(names), policy, block).await
    }

    fn resolve_keys(&self, names: &[&str]) -> Vec<String> {
        names.iter().map(|name| self.resolve_key(name)).collect()
    }

    pub(crate) async fn execute(&self, command: Command) -> Result<Reply> {
        debug!(command = command.name(), keys = ?command.keys(), "executing");
        let mut conn = self.inner.conn.lock().await;
        Ok(conn.execute(command).await?)
    }

    /// Run an operation outside any transaction. Multi-command operations
    /// apply atomically.
    pub(crate) async fn run<T: 'static>(&self, mut op: Op<T>) -> Result<T> {
        let mut commands = std::mem::take(&mut op.commands);
        let replies = match commands.len() {
            0 => Vec::new(),
            1 => {
                let command = commands.remove(0);
                vec![self.execute(command).await?]
            }
            count => {
                let mut conn = self.inner.conn.lock().await;
                // An open transaction owns the watch set; an atomic batch
                // would clear it.
                if self.inner.transaction_active.load(Ordering::Acquire) {
                    return Err(Error::TransactionInProgress);
                }
                // Cleared only once the store has dropped the old watch set.
                if self.inner.stale_watch.load(Ordering::Acquire) {
                    conn.unwatch().await?;
                    self.inner.stale_watch.store(false, Ordering::Release);
                }
                debug!(commands = count, "executing atomic batch");
                conn.exec(commands).await?.ok_or_else(|| Error::RetryableConflict { keys: Vec::new() })?
            }
        };
        op.finish(replies)
    }

    pub(crate) fn acquire_transaction(&self) -> Result<()> {
        self.inner
            .transaction_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::TransactionInProgress)
    }

    pub(crate) fn release_transaction(&self, stale: bool) {
        if stale {
            self.inner.stale_watch.store(true, Ordering::Release);
        }
        self.inner.transaction_active.store(false, Ordering::Release);
    }

    pub(crate) async fn watch(&self, keys: &[String]) -> Result<()> {
        let mut conn = self.inner.conn.lock().await;
        conn.watch(keys).await?;
        self.inner.stale_watch.store(false, Ordering::Release);
        Ok(())
    }

    pub(crate) async fn unwatch(&self) -> Result<()> {
        let mut conn = self.inner.conn.lock().await;
        conn.unwatch().await?;
        Ok(())
    }

    pub(crate) async fn exec_watched(&self, commands: Vec<Command>) -> Result<Option<Vec<Reply>>> {
        let mut conn = self.inner.conn.lock().await;
        Ok(conn.exec(commands).await?)
    }
}
