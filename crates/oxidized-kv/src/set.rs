//! Set proxy: an unordered collection of distinct bulks.
//!
//! Membership is decided on encoded bytes, so two values are the same member
//! exactly when the codec encodes them identically.

use std::collections::HashSet;
use std::hash::Hash;

use crate::op::{self, Op};
use crate::protocol::{Command, Reply};
use crate::session::Session;
use crate::transaction::{Pending, Transaction};
use crate::types::Bulk;
use crate::Result;

#[derive(Debug, Clone)]
pub struct Set<T> {
    session: Session,
    key: String,
    value_type: T,
}

impl<T: Bulk> Set<T> {
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

    pub fn within<'a>(&'a self, tx: &'a Transaction) -> SetTx<'a, T> {
        SetTx { proxy: self, tx }
    }

    fn op_contains(&self, value: &T::Value) -> Result<Op<bool>> {
        let member = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::SIsMember {
                key: self.key.clone(),
                member,
            },
            |reply| Ok(reply.into_flag("SISMEMBER")?),
        ))
    }

    fn op_add<'v, I>(&self, values: I) -> Result<Op<usize>>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        let members = op::encode_all(&self.value_type, &self.key, values)?;
        if members.is_empty() {
            return Ok(Op::batch(Vec::new(), |_| Ok(0)));
        }
        Ok(Op::single(
            Command::SAdd {
                key: self.key.clone(),
                members,
            },
            |reply| Ok(reply.into_integer("SADD")?.max(0) as usize),
        ))
    }

    fn op_discard(&self, value: &T::Value) -> Result<Op<bool>> {
        let member = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::SRem {
                key: self.key.clone(),
                members: vec![member],
            },
            |reply| Ok(reply.into_integer("SREM")? > 0),
        ))
    }

    fn op_pop(&self) -> Op<Option<T::Value>> {
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::single(Command::SPop { key: self.key.clone() }, move |reply| {
            reply
                .into_optional_bulk("SPOP")?
                .map(|bulk| op::decode(&codec, &key, &bulk))
                .transpose()
        })
    }

    fn op_len(&self) -> Op<usize> {
        Op::single(Command::SCard { key: self.key.clone() }, |reply| {
            Ok(reply.into_integer("SCARD")?.max(0) as usize)
        })
    }

    fn op_replace<'v, I>(&self, values: I) -> Result<Op<()>>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        let members = op::encode_all(&self.value_type, &self.key, values)?;
        let mut commands = vec![Command::Del {
            keys: vec![self.key.clone()],
        }];
        if !members.is_empty() {
            commands.push(Command::SAdd {
                key: self.key.clone(),
                members,
            });
        }
        Ok(Op::batch(commands, |_| Ok(())))
    }

    /// Every operand's key, this set first.
    fn operands(&self, others: &[&Set<T>]) -> Vec<String> {
        std::iter::once(&self.key)
            .chain(others.iter().map(|set| &set.key))
            .cloned()
            .collect()
    }

    fn with(&self, other: &Set<T>) -> Vec<String> {
        self.operands(&[other])
    }

    pub async fn contains(&self, value: &T::Value) -> Result<bool> {
        self.session.run(self.op_contains(value)?).await
    }

    /// Add one member. Returns whether it was new.
    pub async fn add(&self, value: &T::Value) -> Result<bool> {
        self.session.run(self.op_add([value])?.map(|added| added > 0)).await
    }

    /// Remove one member if present. Returns whether it was present.
    pub async fn discard(&self, value: &T::Value) -> Result<bool> {
        self.session.run(self.op_discard(value)?).await
    }

    /// Remove and return an arbitrary member, or `None` if the set is empty.
    pub async fn pop(&self) -> Result<Option<T::Value>> {
        self.session.run(self.op_pop()).await
    }

    /// Add many members in one command. Returns how many were new.
    pub async fn update<'v, I>(&self, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        self.session.run(self.op_add(values)?).await
    }

    /// Atomically replace the whole set with `values`.
    pub async fn replace<'v, I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        self.session.run(self.op_replace(values)?).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.session.run(self.op_len()).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn delete(&self) -> Result<bool> {
        self.session.delete_resolved(&self.key).await
    }
}

/// Set algebra. `other` may belong to any session; its resolved key is read
/// through this set's connection.
impl<T> Set<T>
where
    T: Bulk,
    T::Value: Eq + Hash,
{
    fn collect(&self, command: Command) -> Op<HashSet<T::Value>> {
        let name = command.name();
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::single(command, move |reply| decode_members(&codec, &key, name, reply))
    }

    fn op_members(&self) -> Op<HashSet<T::Value>> {
        self.collect(Command::SMembers { key: self.key.clone() })
    }

    fn op_union(&self, others: &[&Set<T>]) -> Op<HashSet<T::Value>> {
        self.collect(Command::SUnion { keys: self.operands(others) })
    }

    fn op_intersection(&self, others: &[&Set<T>]) -> Op<HashSet<T::Value>> {
        self.collect(Command::SInter { keys: self.operands(others) })
    }

    fn op_difference(&self, others: &[&Set<T>]) -> Op<HashSet<T::Value>> {
        self.collect(Command::SDiff { keys: self.operands(others) })
    }

    fn op_symmetric_difference(&self, other: &Set<T>) -> Op<HashSet<T::Value>> {
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::batch(
            vec![
                Command::SDiff { keys: self.with(other) },
                Command::SDiff { keys: other.with(self) },
            ],
            move |replies| {
                let mut members = HashSet::new();
                for reply in replies {
                    members.extend(decode_members(&codec, &key, "SDIFF", reply)?);
                }
                Ok(members)
            },
        )
    }

    pub async fn members(&self) -> Result<HashSet<T::Value>> {
        self.session.run(self.op_members()).await
    }

    /// Members of either set, in one round trip.
    pub async fn union(&self, other: &Set<T>) -> Result<HashSet<T::Value>> {
        self.union_all(&[other]).await
    }

    /// Members of this set or any of `others`, in one round trip.
    pub async fn union_all(&self, others: &[&Set<T>]) -> Result<HashSet<T::Value>> {
        self.session.run(self.op_union(others)).await
    }

    /// Members of both sets, in one round trip.
    pub async fn intersection(&self, other: &Set<T>) -> Result<HashSet<T::Value>> {
        self.intersection_all(&[other]).await
    }

    /// Members of this set found in every one of `others`.
    pub async fn intersection_all(&self, others: &[&Set<T>]) -> Result<HashSet<T::Value>> {
        self.session.run(self.op_intersection(others)).await
    }

    /// Members of this set that are not in `other`, in one round trip.
    pub async fn difference(&self, other: &Set<T>) -> Result<HashSet<T::Value>> {
        self.difference_all(&[other]).await
    }

    /// Members of this set found in none of `others`.
    pub async fn difference_all(&self, others: &[&Set<T>]) -> Result<HashSet<T::Value>> {
        self.session.run(self.op_difference(others)).await
    }

    /// Members of exactly one of the sets. Both halves are read in one
    /// atomic batch.
    pub async fn symmetric_difference(&self, other: &Set<T>) -> Result<HashSet<T::Value>> {
        self.session.run(self.op_symmetric_difference(other)).await
    }

    pub async fn is_subset(&self, other: &Set<T>) -> Result<bool> {
        Ok(self.difference(other).await?.is_empty())
    }

    pub async fn is_disjoint(&self, other: &Set<T>) -> Result<bool> {
        Ok(self.intersection(other).await?.is_empty())
    }
}

fn decode_members<T: Bulk>(codec: &T, key: &str, command: &'static str, reply: Reply) -> Result<HashSet<T::Value>>
where
    T::Value: Eq + Hash,
{
    reply
        .into_bulks(command)?
        .iter()
        .map(|bulk| op::decode(codec, key, bulk))
        .collect()
}

/// [`Set`] operations inside a [`Transaction`].
#[derive(Debug, Clone)]
pub struct SetTx<'a, T> {
    proxy: &'a Set<T>,
    tx: &'a Transaction,
}

impl<'a, T: Bulk> SetTx<'a, T> {
    pub async fn contains(&self, value: &T::Value) -> Result<bool> {
        self.tx.query(self.proxy.op_contains(value)?).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.tx.query(self.proxy.op_len()).await
    }

    pub fn add(&self, value: &T::Value) -> Result<Pending<bool>> {
        self.tx.enqueue(self.proxy.op_add([value])?.map(|added| added > 0))
    }

    pub fn pop(&self) -> Result<Pending<Option<T::Value>>> {
        self.tx.enqueue(self.proxy.op_pop())
    }

    pub fn discard(&self, value: &T::Value) -> Result<Pending<bool>> {
        self.tx.enqueue(self.proxy.op_discard(value)?)
    }

    pub fn update<'v, I>(&self, values: I) -> Result<Pending<usize>>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        self.tx.enqueue(self.proxy.op_add(values)?)
    }

    pub fn replace<'v, I>(&self, values: I) -> Result<Pending<()>>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        self.tx.enqueue(self.proxy.op_replace(values)?)
    }
}

impl<'a, T> SetTx<'a, T>
where
    T: Bulk,
    T::Value: Eq + Hash,
{
    pub async fn members(&self) -> Result<HashSet<T::Value>> {
        self.tx.query(self.proxy.op_members()).await
    }

    pub async fn union(&self, other: &Set<T>) -> Result<HashSet<T::Value>> {
        self.union_all(&[other]).await
    }

    pub async fn union_all(&self, others: &[&Set<T>]) -> Result<HashSet<T::Value>> {
        self.tx.query(self.proxy.op_union(others)).await
    }

    pub async fn intersection(&self, other: &Set<T>) -> Result<HashSet<T::Value>> {
        self.intersection_all(&[other]).await
    }

    pub async fn intersection_all(&self, others: &[&Set<T>]) -> Result<HashSet<T::Value>> {
        self.tx.query(self.proxy.op_intersection(others)).await
    }

    pub async fn difference(&self, other: &Set<T>) -> Result<HashSet<T::Value>> {
        self.difference_all(&[other]).await
    }

    pub async fn difference_all(&self, others: &[&Set<T>]) -> Result<HashSet<T::Value>> {
        self.tx.query(self.proxy.op_difference(others)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryStore;
    use crate::types::{Integer, SetType};

    async fn pair(session: &Session) -> (Set<Integer>, Set<Integer>) {
        let left = session.get("left", SetType::new(Integer));
        let right = session.get("right", SetType::new(Integer));
        left.update(&[1, 2, 3]).await.unwrap();
        right.update(&[2, 3, 4]).await.unwrap();
        (left, right)
    }

    #[tokio::test]
    async fn test_set_algebra() {
        let session = Session::new(MemoryStore::new().connect());
        let (left, right) = pair(&session).await;

        assert_eq!(left.union(&right).await.unwrap(), HashSet::from([1, 2, 3, 4]));
        assert_eq!(left.intersection(&right).await.unwrap(), HashSet::from([2, 3]));
        assert_eq!(left.difference(&right).await.unwrap(), HashSet::from([1]));
        assert_eq!(
            left.symmetric_difference(&right).await.unwrap(),
            HashSet::from([1, 4])
        );
        assert!(!left.is_subset(&right).await.unwrap());
        assert!(!left.is_disjoint(&right).await.unwrap());
    }

    #[tokio::test]
    async fn test_membership() {
        let session = Session::new(MemoryStore::new().connect());
        let set = session.get("tags", SetType::new(Integer));
        assert!(set.add(&7).await.unwrap());
        assert!(!set.add(&7).await.unwrap());
        assert!(set.contains(&7).await.unwrap());
        assert_eq!(set.len().await.unwrap(), 1);
        assert!(set.discard(&7).await.unwrap());
        assert!(!set.discard(&7).await.unwrap());
        assert!(set.members().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_absent_operand_is_empty() {
        let session = Session::new(MemoryStore::new().connect());
        let (left, _) = pair(&session).await;
        let missing = session.get("missing", SetType::new(Integer));
        assert_eq!(left.union(&missing).await.unwrap(), HashSet::from([1, 2, 3]));
        assert!(missing.is_subset(&left).await.unwrap());
        assert!(left.is_disjoint(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_many_operands_in_one_command() {
        let session = Session::new(MemoryStore::new().connect());
        let (left, right) = pair(&session).await;
        let third = session.get("third", SetType::new(Integer));
        third.update(&[3, 5]).await.unwrap();

        assert_eq!(
            left.union_all(&[&right, &third]).await.unwrap(),
            HashSet::from([1, 2, 3, 4, 5])
        );
        assert_eq!(left.intersection_all(&[&right, &third]).await.unwrap(), HashSet::from([3]));
        assert_eq!(left.difference_all(&[&right, &third]).await.unwrap(), HashSet::from([1]));
        assert_eq!(left.union_all(&[]).await.unwrap(), HashSet::from([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_pop_drains_the_set() {
        let session = Session::new(MemoryStore::new().connect());
        let (left, _) = pair(&session).await;
        let mut popped = HashSet::new();
        while let Some(member) = left.pop().await.unwrap() {
            popped.insert(member);
        }
        assert_eq!(popped, HashSet::from([1, 2, 3]));
        assert!(!session.exists("left").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_then_update() {
        let session = Session::new(MemoryStore::new().connect());
        let (left, _) = pair(&session).await;
        left.replace(&[10]).await.unwrap();
        assert_eq!(left.update(&[10, 11]).await.unwrap(), 1);
        assert_eq!(left.members().await.unwrap(), HashSet::from([10, 11]));
    }
}
