//! Optimistic transactions
//!
//! A [`Transaction`] watches a set of keys, answers reads immediately until
//! the first write is queued, then buffers every write and submits the batch
//! atomically on [`commit`](Transaction::commit). If any watched key changed
//! since the watch began, the batch is rejected with
//! [`Error::RetryableConflict`] and nothing is applied.
//!
//! [`Session::transaction`](crate::Session::transaction) wraps the whole
//! begin/run/commit cycle in a bounded retry loop.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::Error;
use crate::op::Op;
use crate::protocol::{Command, Reply};
use crate::session::Session;
use crate::Result;

/// Bounded retry with exponential backoff for conflicting transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub backoff_base_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 10,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Run the block exactly once and surface any conflict as-is.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_base_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay_ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    /// Keys are watched; reads execute immediately
    Watching,
    /// At least one write is queued; reads are refused
    Queuing,
    Committed,
    Aborted,
}

impl TxState {
    pub fn is_open(self) -> bool {
        matches!(self, TxState::Watching | TxState::Queuing)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::Idle => "idle",
            TxState::Watching => "watching",
            TxState::Queuing => "queuing",
            TxState::Committed => "committed",
            TxState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result slot of a queued write, filled once the transaction commits.
pub struct Pending<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Pending<T> {
    fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn fill(&self, value: T) {
        *self.lock() = Some(value);
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the commit has delivered a result.
    pub fn is_ready(&self) -> bool {
        self.lock().is_some()
    }

    /// Take the result out of the slot. Returns `None` before commit, after a
    /// conflict or abort, or if it was already taken.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }
}

impl<T: Clone> Pending<T> {
    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pending").field(&*self.lock()).finish()
    }
}

type Resolver = Box<dyn FnOnce(Vec<Reply>) -> Result<()> + Send>;

struct Queued {
    commands: Vec<Command>,
    resolve: Resolver,
}

struct TxInner {
    state: TxState,
    queue: Vec<Queued>,
    released: bool,
}

struct TxShared {
    session: Session,
    keys: Vec<String>,
    attempt: u32,
    inner: Mutex<TxInner>,
}

impl TxShared {
    fn lock(&self) -> MutexGuard<'_, TxInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand the session back. `stale` marks the watch set as possibly left
    /// behind on the connection.
    fn release(&self, stale: bool) {
        let mut inner = self.lock();
        if !inner.released {
            inner.released = true;
            self.session.release_transaction(stale);
        }
    }
}

impl Drop for TxShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !inner.released {
            debug!(keys = ?self.keys, state = %inner.state, "transaction dropped before completion");
            inner.released = true;
            self.session.release_transaction(true);
        }
    }
}

/// An optimistic unit of work over a set of watched keys.
///
/// Cloning is cheap; clones share the same queue and state. Proxies join a
/// transaction through their `within(&tx)` views.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<TxShared>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Transaction")
            .field("keys", &self.shared.keys)
            .field("attempt", &self.shared.attempt)
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .finish()
    }
}

impl Transaction {
    /// Claim the session and watch `keys` (already resolved).
    pub(crate) async fn begin(session: Session, keys: Vec<String>, attempt: u32) -> Result<Self> {
        session.acquire_transaction()?;
        let tx = Transaction {
            shared: Arc::new(TxShared {
                session,
                keys,
                attempt,
                inner: Mutex::new(TxInner {
                    state: TxState::Idle,
                    queue: Vec::new(),
                    released: false,
                }),
            }),
        };
        // On failure the drop of `tx` releases the session.
        tx.shared.session.watch(&tx.shared.keys).await?;
        tx.shared.lock().state = TxState::Watching;
        debug!(keys = ?tx.shared.keys, attempt, "transaction watching");
        Ok(tx)
    }

    /// Resolved keys under watch.
    pub fn keys(&self) -> &[String] {
        &self.shared.keys
    }

    /// 1-based attempt number within a retry loop.
    pub fn attempt(&self) -> u32 {
        self.shared.attempt
    }

    pub fn state(&self) -> TxState {
        self.shared.lock().state
    }

    pub fn session(&self) -> &Session {
        &self.shared.session
    }

    /// Number of queued operations.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Run a read against live state. Refused once a write is queued.
    pub(crate) async fn query<T: 'static>(&self, op: Op<T>) -> Result<T> {
        match self.state() {
            TxState::Watching => {}
            TxState::Queuing => {
                let key = op
                    .commands
                    .first()
                    .and_then(|command| command.keys().first().map(|key| key.to_string()))
                    .unwrap_or_default();
                return Err(Error::QueryAfterWrite { key });
            }
            state => {
                return Err(Error::TransactionClosed {
                    state: state.to_string(),
                })
            }
        }
        self.shared.session.run(op).await
    }

    /// Queue a write. Its result lands in the returned slot after commit.
    pub(crate) fn enqueue<T: Send + 'static>(&self, op: Op<T>) -> Result<Pending<T>> {
        let mut inner = self.shared.lock();
        if !inner.state.is_open() {
            return Err(Error::TransactionClosed {
                state: inner.state.to_string(),
            });
        }
        inner.state = TxState::Queuing;

        let pending = Pending::new();
        let slot = pending.clone();
        let Op { commands, decode } = op;
        inner.queue.push(Queued {
            commands,
            resolve: Box::new(move |replies| {
                slot.fill(decode(replies)?);
                Ok(())
            }),
        });
        Ok(pending)
    }

    /// Submit the queued writes atomically.
    ///
    /// Returns [`Error::RetryableConflict`] if a watched key changed; in that
    /// case no write was applied and every [`Pending`] stays empty. A reply
    /// that fails to decode is reported after all other slots are filled.
    #[instrument(skip(self), fields(keys = ?self.shared.keys, attempt = self.shared.attempt))]
    pub async fn commit(&self) -> Result<()> {
        let queue = {
            let mut inner = self.shared.lock();
            if !inner.state.is_open() {
                return Err(Error::TransactionClosed {
                    state: inner.state.to_string(),
                });
            }
            inner.state = TxState::Committed;
            std::mem::take(&mut inner.queue)
        };
        let session = &self.shared.session;

        if queue.is_empty() {
            let result = session.unwatch().await;
            self.shared.release(result.is_err());
            debug!("committed with nothing queued");
            return result;
        }

        let mut commands = Vec::new();
        let mut slots = Vec::with_capacity(queue.len());
        for queued in queue {
            slots.push((queued.commands.len(), queued.resolve));
            commands.extend(queued.commands);
        }
        let total = commands.len();

        let replies = match session.exec_watched(commands).await {
            Ok(Some(replies)) => replies,
            Ok(None) => {
                self.close(TxState::Aborted, false);
                warn!("watched keys changed, batch rejected");
                return Err(Error::RetryableConflict {
                    keys: self.shared.keys.clone(),
                });
            }
            Err(err) => {
                self.close(TxState::Aborted, true);
                return Err(err);
            }
        };
        self.shared.release(false);
        info!(commands = total, "transaction committed");

        let mut replies = replies.into_iter();
        let mut first_error = None;
        for (count, resolve) in slots {
            let chunk: Vec<Reply> = replies.by_ref().take(count).collect();
            if let Err(err) = resolve(chunk) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Discard queued writes and stop watching. Idempotent.
    pub async fn abort(&self) -> Result<()> {
        {
            let mut inner = self.shared.lock();
            if !inner.state.is_open() && inner.state != TxState::Idle {
                return Ok(());
            }
            inner.queue.clear();
            inner.state = TxState::Aborted;
        }
        let result = self.shared.session.unwatch().await;
        self.shared.release(result.is_err());
        debug!(keys = ?self.shared.keys, "transaction aborted");
        result
    }

    fn close(&self, state: TxState, stale: bool) {
        self.shared.lock().state = state;
        self.shared.release(stale);
    }
}

/// Begin, run `block`, commit; re-run the whole cycle on conflict.
///
/// A block error aborts the attempt and is returned unchanged. Only
/// [`Error::RetryableConflict`] from commit is retried.
pub(crate) async fn run_transaction<T, E, F, Fut>(
    session: &Session,
    keys: Vec<String>,
    policy: &RetryPolicy,
    mut block: F,
) -> std::result::Result<T, E>
where
    F: FnMut(Transaction) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<Error>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let tx = Transaction::begin(session.clone(), keys.clone(), attempt).await?;
        let value = match block(tx.clone()).await {
            Ok(value) => value,
            Err(err) => {
                if let Err(abort_err) = tx.abort().await {
                    warn!(error = %abort_err, "abort after failed block did not complete");
                }
                return Err(err);
            }
        };

        match tx.commit().await {
            Ok(()) => return Ok(value),
            Err(Error::RetryableConflict { keys: conflicted }) => {
                if attempt >= max_attempts {
                    if max_attempts == 1 {
                        return Err(Error::RetryableConflict { keys: conflicted }.into());
                    }
                    warn!(attempts = attempt, keys = ?conflicted, "transaction retries exhausted");
                    return Err(Error::ConflictRetriesExhausted {
                        attempts: attempt,
                        keys: conflicted,
                    }
                    .into());
                }
                let delay = policy.backoff(attempt);
                info!(attempt, delay_ms = delay.as_millis() as u64, "transaction conflict, retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryStore;
    use crate::types::{Integer, Text};

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default().with_backoff(100, 250);
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(250));
        assert_eq!(policy.backoff(64), Duration::from_millis(250));
    }

    #[test]
    fn test_with_max_attempts_floors_at_one() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_tx_state_display() {
        assert_eq!(TxState::Watching.to_string(), "watching");
        assert!(TxState::Queuing.is_open());
        assert!(!TxState::Committed.is_open());
    }

    #[tokio::test]
    async fn test_commit_fills_pending_slots() {
        let session = Session::new(MemoryStore::new().connect());
        let counter = session.get("counter", Integer);
        let tx = session.begin(&["counter"]).await.unwrap();

        let first = counter.within(&tx).incr_by(2).unwrap();
        let second = counter.within(&tx).incr_by(3).unwrap();
        assert!(!first.is_ready());
        assert_eq!(tx.state(), TxState::Queuing);
        assert_eq!(tx.queued(), 2);

        tx.commit().await.unwrap();
        assert_eq!(tx.state(), TxState::Committed);
        assert_eq!(first.take(), Some(2));
        assert_eq!(second.take(), Some(5));
        assert_eq!(first.take(), None);
    }

    #[tokio::test]
    async fn test_closed_transaction_refuses_work() {
        let session = Session::new(MemoryStore::new().connect());
        let name = session.get("name", Text);
        let tx = session.begin(&["name"]).await.unwrap();
        tx.abort().await.unwrap();

        let err = name.within(&tx).set(&"x".to_string()).unwrap_err();
        assert!(matches!(err, Error::TransactionClosed { .. }));
        assert!(matches!(tx.commit().await, Err(Error::TransactionClosed { .. })));
        tx.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_transaction_frees_session() {
        let session = Session::new(MemoryStore::new().connect());
        {
            let _tx = session.begin(&["a"]).await.unwrap();
            assert!(matches!(
                session.begin(&["b"]).await,
                Err(Error::TransactionInProgress)
            ));
        }
        let tx = session.begin(&["b"]).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_commit_succeeds() {
        let session = Session::new(MemoryStore::new().connect());
        let tx = session.begin(&["a"]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(tx.state(), TxState::Committed);
    }
}
