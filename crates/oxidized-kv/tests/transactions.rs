//! Transaction contract tests: atomicity, conflicts, retry and misuse.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use oxidized_kv::{Error, HashType, Integer, ListType, RetryPolicy, Text, TxState};

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(attempts)
        .with_backoff(0, 0)
}

// ===========================================================================
// Commit and atomicity
// ===========================================================================

#[tokio::test]
async fn commit_applies_all_queued_writes() {
    let (store, session) = common::session();
    let observer = common::session_on(&store, RetryPolicy::no_retry());

    let profile = session.get("profile", HashType::new(Text, Text));
    let log = session.get("log", ListType::new(Text));
    let tx = session.begin(&["profile", "log"]).await.unwrap();

    let created = profile
        .within(&tx)
        .set_field(&"name".to_string(), &"ann".to_string())
        .unwrap();
    let length = log.within(&tx).append(&"renamed".to_string()).unwrap();

    // nothing is visible before commit
    assert!(!observer.exists("profile").await.unwrap());
    assert!(!observer.exists("log").await.unwrap());

    tx.commit().await.unwrap();
    assert_eq!(created.take(), Some(true));
    assert_eq!(length.take(), Some(1));
    assert_eq!(
        observer
            .get("profile", HashType::new(Text, Text))
            .get_field(&"name".to_string())
            .await
            .unwrap(),
        Some("ann".to_string())
    );
}

#[tokio::test]
async fn conflicting_write_rejects_whole_batch() {
    let (store, session) = common::session();
    let rival = common::session_on(&store, RetryPolicy::no_retry());

    let balance = session.get("balance", Integer);
    let audit = session.get("audit", ListType::new(Integer));
    balance.set(&10).await.unwrap();

    let tx = session.begin(&["balance"]).await.unwrap();
    let seen = balance.within(&tx).get().await.unwrap().unwrap();
    rival.get("balance", Integer).set(&50).await.unwrap();

    let written = balance.within(&tx).set(&(seen - 3)).unwrap();
    let logged = audit.within(&tx).append(&-3).unwrap();
    let err = tx.commit().await.unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(err, Error::RetryableConflict { ref keys } if keys == &["balance".to_string()]));
    assert_eq!(tx.state(), TxState::Aborted);
    assert!(written.take().is_none());
    assert!(logged.take().is_none());
    assert_eq!(balance.get().await.unwrap(), Some(50));
    assert!(audit.is_empty().await.unwrap());
}

#[tokio::test]
async fn unwatched_keys_do_not_conflict() {
    let (store, session) = common::session();
    let rival = common::session_on(&store, RetryPolicy::no_retry());

    let counter = session.get("counter", Integer);
    let tx = session.begin(&["counter"]).await.unwrap();
    rival.get("unrelated", Integer).set(&1).await.unwrap();
    counter.within(&tx).incr_by(1).unwrap();
    tx.commit().await.unwrap();
    assert_eq!(counter.get().await.unwrap(), Some(1));
}

// ===========================================================================
// Retry combinator
// ===========================================================================

#[tokio::test]
async fn retry_reruns_block_after_conflict() {
    let (store, session) = common::session();
    let rival = common::session_on(&store, RetryPolicy::no_retry()).get("counter", Integer);
    let counter = session.get("counter", Integer);

    let outcome = session
        .transaction_with(&["counter"], &fast_retry(3), |tx| {
            let counter = counter.clone();
            let rival = rival.clone();
            async move {
                let seen = counter.within(&tx).get().await?.unwrap_or(0);
                if tx.attempt() == 1 {
                    rival.set(&100).await?;
                }
                counter.within(&tx).set(&(seen + 1))?;
                Ok::<_, Error>((tx.attempt(), seen))
            }
        })
        .await
        .unwrap();

    assert_eq!(outcome, (2, 100));
    assert_eq!(counter.get().await.unwrap(), Some(101));
}

#[tokio::test]
async fn persistent_conflict_exhausts_retries() {
    let (store, session) = common::session();
    let rival = common::session_on(&store, RetryPolicy::no_retry()).get("hot", Integer);
    let hot = session.get("hot", Integer);
    let runs = Arc::new(AtomicU32::new(0));

    let err = session
        .transaction_with(&["hot"], &fast_retry(3), |tx| {
            let (hot, rival, runs) = (hot.clone(), rival.clone(), runs.clone());
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                rival.incr_by(1).await?;
                hot.within(&tx).set(&0)?;
                Ok::<_, Error>(())
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConflictRetriesExhausted { attempts: 3, .. }));
    assert!(!err.is_retryable());
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(hot.get().await.unwrap(), Some(3));
}

#[tokio::test]
async fn single_attempt_surfaces_retryable_conflict() {
    let (store, session) = common::session();
    let rival = common::session_on(&store, RetryPolicy::no_retry()).get("hot", Integer);
    let hot = session.get("hot", Integer);

    let err = session
        .transaction_with(&["hot"], &RetryPolicy::no_retry(), |tx| {
            let (hot, rival) = (hot.clone(), rival.clone());
            async move {
                rival.set(&1).await?;
                hot.within(&tx).set(&2)?;
                Ok::<_, Error>(())
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RetryableConflict { .. }));
}

#[derive(Debug)]
enum TransferError {
    Store(Error),
    Insufficient { available: i64 },
}

impl From<Error> for TransferError {
    fn from(err: Error) -> Self {
        TransferError::Store(err)
    }
}

#[tokio::test]
async fn block_error_aborts_without_writing() {
    let (_store, session) = common::session();
    let from = session.get("from", Integer);
    let to = session.get("to", Integer);
    from.set(&5).await.unwrap();

    let err = session
        .transaction(&["from", "to"], |tx| {
            let (from, to) = (from.clone(), to.clone());
            async move {
                let available = from.within(&tx).get().await?.unwrap_or(0);
                to.within(&tx).incr_by(20)?;
                if available < 20 {
                    return Err(TransferError::Insufficient { available });
                }
                from.within(&tx).incr_by(-20)?;
                Ok::<_, TransferError>(())
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Insufficient { available: 5 }));
    assert_eq!(to.get().await.unwrap(), None);

    // the session is free again
    let tx = session.begin(&["from"]).await.unwrap();
    tx.abort().await.unwrap();
}

#[tokio::test]
async fn connection_failure_is_not_retried() {
    let (store, session) = common::session();
    let counter = session.get("counter", Integer);
    let runs = Arc::new(AtomicU32::new(0));

    let err = session
        .transaction_with(&["counter"], &fast_retry(5), |tx| {
            let (counter, runs, store) = (counter.clone(), runs.clone(), store.clone());
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                store.set_offline(true);
                counter.within(&tx).get().await?;
                Ok::<_, Error>(())
            }
        })
        .await
        .unwrap_err();

    store.set_offline(false);
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// ===========================================================================
// Misuse
// ===========================================================================

#[tokio::test]
async fn nested_transaction_is_refused() {
    let (_store, session) = common::session();
    let tx = session.begin(&["a"]).await.unwrap();

    assert!(matches!(
        session.begin(&["b"]).await,
        Err(Error::TransactionInProgress)
    ));
    let nested: Result<(), Error> = session
        .transaction(&["b"], |_tx| async { Ok(()) })
        .await;
    assert!(matches!(nested, Err(Error::TransactionInProgress)));

    // multi-command batches would clobber the watch set
    let list = session.get("l", ListType::new(Integer));
    assert!(matches!(
        list.replace(&[1, 2]).await,
        Err(Error::TransactionInProgress)
    ));
    tx.abort().await.unwrap();
    list.replace(&[1, 2]).await.unwrap();
}

#[tokio::test]
async fn read_after_write_is_refused() {
    let (_store, session) = common::session();
    let name = session.get("name", Text);
    let tx = session.begin(&["name"]).await.unwrap();

    name.within(&tx).set(&"x".to_string()).unwrap();
    match name.within(&tx).get().await.unwrap_err() {
        Error::QueryAfterWrite { key } => assert_eq!(key, "name"),
        other => panic!("unexpected error: {other}"),
    }
    tx.commit().await.unwrap();
    assert_eq!(name.get().await.unwrap(), Some("x".to_string()));
}

#[tokio::test]
async fn dropped_transaction_leaves_no_stale_watch() {
    let (store, session) = common::session();
    let rival = common::session_on(&store, RetryPolicy::no_retry());
    let list = session.get("items", ListType::new(Integer));

    drop(session.begin(&["items"]).await.unwrap());
    rival.get("items", ListType::new(Integer)).append(&1).await.unwrap();

    // an atomic batch on the same connection must not inherit the old watch
    list.replace(&[7, 8]).await.unwrap();
    assert_eq!(list.to_vec().await.unwrap(), vec![7, 8]);
}

#[tokio::test]
async fn failed_unwatch_keeps_stale_watch_pending() {
    let (store, session) = common::session();
    let rival = common::session_on(&store, RetryPolicy::no_retry());
    let list = session.get("items", ListType::new(Integer));

    drop(session.begin(&["items"]).await.unwrap());
    store.set_offline(true);
    assert!(matches!(list.replace(&[1]).await, Err(Error::Connection(_))));
    store.set_offline(false);

    rival.get("items", ListType::new(Integer)).append(&1).await.unwrap();
    list.replace(&[7, 8]).await.unwrap();
    assert_eq!(list.to_vec().await.unwrap(), vec![7, 8]);
}

#[tokio::test]
async fn decode_failure_is_reported_after_commit() {
    let (_store, session) = common::session();
    session
        .get("mixed", ListType::new(Text))
        .append(&"word".to_string())
        .await
        .unwrap();

    let numbers = session.get("mixed", ListType::new(Integer));
    let counter = session.get("c", Integer);
    let tx = session.begin(&["mixed", "c"]).await.unwrap();
    let removed = numbers.within(&tx).remove_at(0).unwrap();
    let bumped = counter.within(&tx).incr_by(1).unwrap();

    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, Error::Decoding { ref key, .. } if key == "mixed"));
    // the batch was applied and the other slot still filled
    assert!(removed.take().is_none());
    assert_eq!(bumped.take(), Some(1));
    assert!(numbers.is_empty().await.unwrap());
}
