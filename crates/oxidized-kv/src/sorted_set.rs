//! Sorted-set proxy: distinct members ordered by an `f64` score.
//!
//! Ranges are ascending by score. Members with equal scores come back in a
//! stable order chosen by the store.

use crate::error::{EncodeError, Error, StoreError};
use crate::op::{self, Op};
use crate::protocol::Command;
use crate::session::Session;
use crate::transaction::{Pending, Transaction};
use crate::types::Bulk;
use crate::Result;

#[derive(Debug, Clone)]
pub struct SortedSet<T> {
    session: Session,
    key: String,
    value_type: T,
}

impl<T: Bulk> SortedSet<T> {
    pub(crate) fn new(session: Session, key: String, value_type: T) -> Self {
        Self {
            session,
            key,
            value_type,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn within<'a>(&'a self, tx: &'a Transaction) -> SortedSetTx<'a, T> {
        SortedSetTx { proxy: self, tx }
    }

    fn check_score(&self, score: f64) -> Result<f64> {
        if score.is_nan() {
            return Err(Error::encoding(
                &self.key,
                EncodeError::new("score", &score, "NaN has no position in a score order"),
            ));
        }
        Ok(score)
    }

    fn op_add(&self, value: &T::Value, score: f64) -> Result<Op<bool>> {
        let score = self.check_score(score)?;
        let member = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::ZAdd {
                key: self.key.clone(),
                member,
                score,
            },
            |reply| Ok(reply.into_integer("ZADD")? > 0),
        ))
    }

    fn op_increment(&self, value: &T::Value, delta: f64) -> Result<Op<f64>> {
        let delta = self.check_score(delta)?;
        let member = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::ZIncrBy {
                key: self.key.clone(),
                member,
                delta,
            },
            |reply| {
                reply.into_optional_double("ZINCRBY")?.ok_or_else(|| {
                    StoreError::UnexpectedReply {
                        command: "ZINCRBY",
                        reply: "nil".to_string(),
                    }
                    .into()
                })
            },
        ))
    }

    fn op_score_of(&self, value: &T::Value) -> Result<Op<Option<f64>>> {
        let member = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::ZScore {
                key: self.key.clone(),
                member,
            },
            |reply| Ok(reply.into_optional_double("ZSCORE")?),
        ))
    }

    fn op_remove(&self, value: &T::Value) -> Result<Op<bool>> {
        let member = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::ZRem {
                key: self.key.clone(),
                members: vec![member],
            },
            |reply| Ok(reply.into_integer("ZREM")? > 0),
        ))
    }

    fn op_len(&self) -> Op<usize> {
        Op::single(Command::ZCard { key: self.key.clone() }, |reply| {
            Ok(reply.into_integer("ZCARD")?.max(0) as usize)
        })
    }

    fn members(&self, command: Command) -> Op<Vec<T::Value>> {
        let name = command.name();
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::single(command, move |reply| {
            op::decode_all(&codec, &key, reply.into_bulks(name)?)
        })
    }

    fn scored(&self, command: Command) -> Op<Vec<(T::Value, f64)>> {
        let name = command.name();
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::single(command, move |reply| {
            reply
                .into_scored_bulks(name)?
                .into_iter()
                .map(|(member, score)| Ok((op::decode(&codec, &key, &member)?, score)))
                .collect()
        })
    }

    fn rank_command(&self, start: i64, stop: i64, with_scores: bool) -> Command {
        Command::ZRange {
            key: self.key.clone(),
            start,
            stop,
            with_scores,
        }
    }

    fn score_command(&self, min: f64, max: f64, with_scores: bool) -> Command {
        Command::ZRangeByScore {
            key: self.key.clone(),
            min,
            max,
            with_scores,
        }
    }

    /// Add `value` with `score`, or move it to `score`. Returns whether the
    /// member is new.
    pub async fn add(&self, value: &T::Value, score: f64) -> Result<bool> {
        self.session.run(self.op_add(value, score)?).await
    }

    /// Add `delta` to the member's score, starting from 0 if absent. Returns
    /// the new score.
    pub async fn increment(&self, value: &T::Value, delta: f64) -> Result<f64> {
        self.session.run(self.op_increment(value, delta)?).await
    }

    pub async fn score_of(&self, value: &T::Value) -> Result<Option<f64>> {
        self.session.run(self.op_score_of(value)?).await
    }

    pub async fn contains(&self, value: &T::Value) -> Result<bool> {
        Ok(self.score_of(value).await?.is_some())
    }

    pub async fn remove(&self, value: &T::Value) -> Result<bool> {
        self.session.run(self.op_remove(value)?).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.session.run(self.op_len()).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Members at ranks `start..=stop`; negative ranks count from the highest
    /// score.
    pub async fn range_by_rank(&self, start: i64, stop: i64) -> Result<Vec<T::Value>> {
        self.session.run(self.members(self.rank_command(start, stop, false))).await
    }

    pub async fn range_by_rank_with_scores(&self, start: i64, stop: i64) -> Result<Vec<(T::Value, f64)>> {
        self.session.run(self.scored(self.rank_command(start, stop, true))).await
    }

    /// Members with `min <= score <= max`.
    pub async fn range_by_score(&self, min: f64, max: f64) -> Result<Vec<T::Value>> {
        self.session.run(self.members(self.score_command(min, max, false))).await
    }

    pub async fn range_by_score_with_scores(&self, min: f64, max: f64) -> Result<Vec<(T::Value, f64)>> {
        self.session.run(self.scored(self.score_command(min, max, true))).await
    }

    /// Every member with its score, lowest first.
    pub async fn items(&self) -> Result<Vec<(T::Value, f64)>> {
        self.range_by_rank_with_scores(0, -1).await
    }

    pub async fn delete(&self) -> Result<bool> {
        self.session.delete_resolved(&self.key).await
    }
}

/// [`SortedSet`] operations inside a [`Transaction`].
#[derive(Debug, Clone)]
pub struct SortedSetTx<'a, T> {
    proxy: &'a SortedSet<T>,
    tx: &'a Transaction,
}

impl<'a, T: Bulk> SortedSetTx<'a, T> {
    pub async fn score_of(&self, value: &T::Value) -> Result<Option<f64>> {
        self.tx.query(self.proxy.op_score_of(value)?).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.tx.query(self.proxy.op_len()).await
    }

    pub async fn range_by_rank(&self, start: i64, stop: i64) -> Result<Vec<T::Value>> {
        let command = self.proxy.rank_command(start, stop, false);
        self.tx.query(self.proxy.members(command)).await
    }

    pub async fn range_by_score(&self, min: f64, max: f64) -> Result<Vec<T::Value>> {
        let command = self.proxy.score_command(min, max, false);
        self.tx.query(self.proxy.members(command)).await
    }

    pub async fn items(&self) -> Result<Vec<(T::Value, f64)>> {
        let command = self.proxy.rank_command(0, -1, true);
        self.tx.query(self.proxy.scored(command)).await
    }

    pub fn add(&self, value: &T::Value, score: f64) -> Result<Pending<bool>> {
        self.tx.enqueue(self.proxy.op_add(value, score)?)
    }

    pub fn increment(&self, value: &T::Value, delta: f64) -> Result<Pending<f64>> {
        self.tx.enqueue(self.proxy.op_increment(value, delta)?)
    }

    pub fn remove(&self, value: &T::Value) -> Result<Pending<bool>> {
        self.tx.enqueue(self.proxy.op_remove(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryStore;
    use crate::types::{SortedSetType, Text};

    async fn board(session: &Session) -> SortedSet<Text> {
        let board = session.get("board", SortedSetType::new(Text));
        for (name, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            board.add(&name.to_string(), score).await.unwrap();
        }
        board
    }

    #[tokio::test]
    async fn test_range_by_score_is_inclusive() {
        let session = Session::new(MemoryStore::new().connect());
        let board = board(&session).await;
        assert_eq!(
            board.range_by_score(1.0, 2.0).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            board.range_by_score_with_scores(2.5, f64::INFINITY).await.unwrap(),
            vec![("c".to_string(), 3.0)]
        );
    }

    #[tokio::test]
    async fn test_rank_ranges() {
        let session = Session::new(MemoryStore::new().connect());
        let board = board(&session).await;
        assert_eq!(board.range_by_rank(0, 0).await.unwrap(), vec!["a".to_string()]);
        assert_eq!(
            board.range_by_rank_with_scores(-2, -1).await.unwrap(),
            vec![("b".to_string(), 2.0), ("c".to_string(), 3.0)]
        );
    }

    #[tokio::test]
    async fn test_increment_and_rescore() {
        let session = Session::new(MemoryStore::new().connect());
        let board = board(&session).await;
        assert_eq!(board.increment(&"a".to_string(), 5.0).await.unwrap(), 6.0);
        assert_eq!(board.increment(&"z".to_string(), 0.5).await.unwrap(), 0.5);
        assert!(!board.add(&"b".to_string(), 10.0).await.unwrap());

        let order: Vec<String> = board.items().await.unwrap().into_iter().map(|(m, _)| m).collect();
        assert_eq!(order, vec!["z", "c", "a", "b"]);
        assert_eq!(board.len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_remove_and_score_of() {
        let session = Session::new(MemoryStore::new().connect());
        let board = board(&session).await;
        assert_eq!(board.score_of(&"b".to_string()).await.unwrap(), Some(2.0));
        assert!(board.remove(&"b".to_string()).await.unwrap());
        assert!(!board.contains(&"b".to_string()).await.unwrap());
        assert_eq!(board.score_of(&"b".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_nan_score_is_rejected() {
        let session = Session::new(MemoryStore::new().connect());
        let board = board(&session).await;
        let err = board.add(&"n".to_string(), f64::NAN).await.unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
        assert_eq!(board.len().await.unwrap(), 3);
    }
}
