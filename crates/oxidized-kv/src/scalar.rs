//! Scalar proxy: one key, one bulk.

use crate::op::{self, Op};
use crate::protocol::Command;
use crate::session::Session;
use crate::transaction::{Pending, Transaction};
use crate::types::{Bulk, Integer};
use crate::Result;

/// A key holding a single value encoded by `C`.
#[derive(Debug, Clone)]
pub struct Scalar<C> {
    session: Session,
    key: String,
    codec: C,
}

impl<C: Bulk> Scalar<C> {
    pub(crate) fn new(session: Session, key: String, codec: C) -> Self {
        Self { session, key, codec }
    }

    /// Resolved key name.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// View through which reads and writes join `tx`.
    pub fn within<'a>(&'a self, tx: &'a Transaction) -> ScalarTx<'a, C> {
        ScalarTx { proxy: self, tx }
    }

    fn op_get(&self) -> Op<Option<C::Value>> {
        let codec = self.codec.clone();
        let key = self.key.clone();
        Op::single(Command::Get { key: self.key.clone() }, move |reply| {
            reply
                .into_optional_bulk("GET")?
                .map(|bulk| op::decode(&codec, &key, &bulk))
                .transpose()
        })
    }

    fn op_set(&self, value: &C::Value) -> Result<Op<()>> {
        let value = op::encode(&self.codec, &self.key, value)?;
        Ok(Op::single(
            Command::Set {
                key: self.key.clone(),
                value,
            },
            |reply| Ok(reply.into_unit("SET")?),
        ))
    }

    fn op_delete(&self) -> Op<bool> {
        Op::single(
            Command::Del {
                keys: vec![self.key.clone()],
            },
            |reply| Ok(reply.into_integer("DEL")? > 0),
        )
    }

    fn op_exists(&self) -> Op<bool> {
        Op::single(Command::Exists { key: self.key.clone() }, |reply| {
            Ok(reply.into_integer("EXISTS")? > 0)
        })
    }

    /// Current value, or `None` if the key is absent.
    pub async fn get(&self) -> Result<Option<C::Value>> {
        self.session.run(self.op_get()).await
    }

    pub async fn set(&self, value: &C::Value) -> Result<()> {
        self.session.run(self.op_set(value)?).await
    }

    /// Remove the key. Returns whether it existed.
    pub async fn delete(&self) -> Result<bool> {
        self.session.run(self.op_delete()).await
    }

    pub async fn exists(&self) -> Result<bool> {
        self.session.run(self.op_exists()).await
    }
}

impl Scalar<Integer> {
    fn op_incr_by(&self, delta: i64) -> Op<i64> {
        Op::single(
            Command::IncrBy {
                key: self.key.clone(),
                delta,
            },
            |reply| Ok(reply.into_integer("INCRBY")?),
        )
    }

    /// Add `delta` atomically on the store, treating an absent key as 0.
    /// Returns the new value.
    pub async fn incr_by(&self, delta: i64) -> Result<i64> {
        self.session.run(self.op_incr_by(delta)).await
    }
}

/// [`Scalar`] operations inside a [`Transaction`].
#[derive(Debug, Clone)]
pub struct ScalarTx<'a, C> {
    proxy: &'a Scalar<C>,
    tx: &'a Transaction,
}

impl<'a, C: Bulk> ScalarTx<'a, C> {
    pub async fn get(&self) -> Result<Option<C::Value>> {
        self.tx.query(self.proxy.op_get()).await
    }

    pub async fn exists(&self) -> Result<bool> {
        self.tx.query(self.proxy.op_exists()).await
    }

    pub fn set(&self, value: &C::Value) -> Result<Pending<()>> {
        self.tx.enqueue(self.proxy.op_set(value)?)
    }

    pub fn delete(&self) -> Result<Pending<bool>> {
        self.tx.enqueue(self.proxy.op_delete())
    }
}

impl<'a> ScalarTx<'a, Integer> {
    pub fn incr_by(&self, delta: i64) -> Result<Pending<i64>> {
        self.tx.enqueue(self.proxy.op_incr_by(delta))
    }
}
