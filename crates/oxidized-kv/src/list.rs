//! List proxy: an ordered sequence of bulks.
//!
//! Indices are `i64` and may be negative, counting from the end (`-1` is the
//! last element).

use futures::stream::{self, Stream};

use crate::error::{Error, StoreError};
use crate::op::{self, Op};
use crate::protocol::Command;
use crate::session::Session;
use crate::transaction::{Pending, Transaction};
use crate::types::Bulk;
use crate::Result;

#[derive(Debug, Clone)]
pub struct List<T> {
    session: Session,
    key: String,
    value_type: T,
}

struct ChunkState<T> {
    offset: i64,
    done: bool,
    buffered: std::vec::IntoIter<T>,
}

impl<T: Bulk> List<T> {
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

    pub fn within<'a>(&'a self, tx: &'a Transaction) -> ListTx<'a, T> {
        ListTx { proxy: self, tx }
    }

    fn op_get_at(&self, index: i64) -> Op<T::Value> {
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::single(
            Command::LIndex {
                key: self.key.clone(),
                index,
            },
            move |reply| match reply.into_optional_bulk("LINDEX")? {
                Some(bulk) => op::decode(&codec, &key, &bulk),
                None => Err(Error::Command(StoreError::IndexOutOfRange { key, index })),
            },
        )
    }

    fn op_set_at(&self, index: i64, value: &T::Value) -> Result<Op<()>> {
        let value = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::LSet {
                key: self.key.clone(),
                index,
                value,
            },
            |reply| Ok(reply.into_unit("LSET")?),
        ))
    }

    fn op_insert(&self, index: i64, value: &T::Value) -> Result<Op<usize>> {
        let value = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::LInsertAt {
                key: self.key.clone(),
                index,
                value,
            },
            |reply| Ok(reply.into_integer("LINSERT")?.max(0) as usize),
        ))
    }

    fn op_remove_at(&self, index: i64) -> Op<T::Value> {
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::single(
            Command::LRemoveAt {
                key: self.key.clone(),
                index,
            },
            move |reply| op::decode(&codec, &key, &reply.into_bulk("LREMOVE")?),
        )
    }

    fn op_push<'v, I>(&self, values: I) -> Result<Op<usize>>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        let values = op::encode_all(&self.value_type, &self.key, values)?;
        if values.is_empty() {
            return Ok(self.op_len());
        }
        Ok(Op::single(
            Command::RPush {
                key: self.key.clone(),
                values,
            },
            |reply| Ok(reply.into_integer("RPUSH")?.max(0) as usize),
        ))
    }

    fn op_len(&self) -> Op<usize> {
        Op::single(Command::LLen { key: self.key.clone() }, |reply| {
            Ok(reply.into_integer("LLEN")?.max(0) as usize)
        })
    }

    fn op_range(&self, start: i64, stop: i64) -> Op<Vec<T::Value>> {
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::single(
            Command::LRange {
                key: self.key.clone(),
                start,
                stop,
            },
            move |reply| op::decode_all(&codec, &key, reply.into_bulks("LRANGE")?),
        )
    }

    fn op_replace<'v, I>(&self, values: I) -> Result<Op<()>>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        let values = op::encode_all(&self.value_type, &self.key, values)?;
        let mut commands = vec![Command::Del {
            keys: vec![self.key.clone()],
        }];
        if !values.is_empty() {
            commands.push(Command::RPush {
                key: self.key.clone(),
                values,
            });
        }
        Ok(Op::batch(commands, |_| Ok(())))
    }

    /// Element at `index`; [`StoreError::IndexOutOfRange`] if there is none.
    pub async fn get_at(&self, index: i64) -> Result<T::Value> {
        self.session.run(self.op_get_at(index)).await
    }

    /// Overwrite the element at `index`, which must exist.
    pub async fn set_at(&self, index: i64, value: &T::Value) -> Result<()> {
        self.session.run(self.op_set_at(index, value)?).await
    }

    /// Insert before the element currently at `index`.
    ///
    /// Negative indices count from the end, so `insert(-1, x)` places `x`
    /// just before the last element. Out-of-range indices clamp to the ends,
    /// like `Vec::insert` would if it did not panic. Returns the new length.
    pub async fn insert(&self, index: i64, value: &T::Value) -> Result<usize> {
        self.session.run(self.op_insert(index, value)?).await
    }

    /// Remove and return the element at `index`.
    pub async fn remove_at(&self, index: i64) -> Result<T::Value> {
        self.session.run(self.op_remove_at(index)).await
    }

    /// Push to the end. Returns the new length.
    pub async fn append(&self, value: &T::Value) -> Result<usize> {
        self.session.run(self.op_push([value])?).await
    }

    /// Push every value to the end in one command. Returns the new length.
    pub async fn extend<'v, I>(&self, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        self.session.run(self.op_push(values)?).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.session.run(self.op_len()).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Elements from `start` through `stop`, both inclusive, in the store's
    /// range convention (negative indices allowed, out-of-range clipped).
    pub async fn range(&self, start: i64, stop: i64) -> Result<Vec<T::Value>> {
        self.session.run(self.op_range(start, stop)).await
    }

    pub async fn to_vec(&self) -> Result<Vec<T::Value>> {
        self.range(0, -1).await
    }

    /// Lazily iterate in chunks of [`SessionConfig::list_chunk`](crate::SessionConfig).
    ///
    /// A chunk shorter than requested ends the stream. Concurrent writers
    /// can shift elements across chunk boundaries.
    pub fn iter(&self) -> impl Stream<Item = Result<T::Value>> + Send + '_ {
        let chunk = self.session.config().list_chunk.max(1);
        let start = ChunkState {
            offset: 0,
            done: false,
            buffered: Vec::new().into_iter(),
        };
        stream::try_unfold(start, move |state| self.chunk_next(state, chunk))
    }

    async fn chunk_next(
        &self,
        mut state: ChunkState<T::Value>,
        chunk: usize,
    ) -> Result<Option<(T::Value, ChunkState<T::Value>)>> {
        loop {
            if let Some(value) = state.buffered.next() {
                return Ok(Some((value, state)));
            }
            if state.done {
                return Ok(None);
            }
            let stop = state.offset + chunk as i64 - 1;
            let values = self.session.run(self.op_range(state.offset, stop)).await?;
            state.done = values.len() < chunk;
            state.offset += values.len() as i64;
            state.buffered = values.into_iter();
        }
    }

    /// Atomically replace the whole list with `values`.
    pub async fn replace<'v, I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        self.session.run(self.op_replace(values)?).await
    }

    pub async fn delete(&self) -> Result<bool> {
        self.session.delete_resolved(&self.key).await
    }
}

/// [`List`] operations inside a [`Transaction`].
#[derive(Debug, Clone)]
pub struct ListTx<'a, T> {
    proxy: &'a List<T>,
    tx: &'a Transaction,
}

impl<'a, T: Bulk> ListTx<'a, T> {
    pub async fn get_at(&self, index: i64) -> Result<T::Value> {
        self.tx.query(self.proxy.op_get_at(index)).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.tx.query(self.proxy.op_len()).await
    }

    pub async fn range(&self, start: i64, stop: i64) -> Result<Vec<T::Value>> {
        self.tx.query(self.proxy.op_range(start, stop)).await
    }

    pub async fn to_vec(&self) -> Result<Vec<T::Value>> {
        self.range(0, -1).await
    }

    pub fn set_at(&self, index: i64, value: &T::Value) -> Result<Pending<()>> {
        self.tx.enqueue(self.proxy.op_set_at(index, value)?)
    }

    pub fn insert(&self, index: i64, value: &T::Value) -> Result<Pending<usize>> {
        self.tx.enqueue(self.proxy.op_insert(index, value)?)
    }

    pub fn remove_at(&self, index: i64) -> Result<Pending<T::Value>> {
        self.tx.enqueue(self.proxy.op_remove_at(index))
    }

    pub fn append(&self, value: &T::Value) -> Result<Pending<usize>> {
        self.tx.enqueue(self.proxy.op_push([value])?)
    }

    pub fn extend<'v, I>(&self, values: I) -> Result<Pending<usize>>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        self.tx.enqueue(self.proxy.op_push(values)?)
    }

    pub fn replace<'v, I>(&self, values: I) -> Result<Pending<()>>
    where
        I: IntoIterator<Item = &'v T::Value>,
    {
        self.tx.enqueue(self.proxy.op_replace(values)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::fakes::MemoryStore;
    use crate::types::{Integer, ListType, Text};
    use futures::TryStreamExt;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_insert_negative_index() {
        let session = Session::new(MemoryStore::new().connect());
        let list = session.get("letters", ListType::new(Text));
        list.extend(&strings(&["a", "b", "c"])).await.unwrap();

        assert_eq!(list.insert(-1, &"x".to_string()).await.unwrap(), 4);
        assert_eq!(list.to_vec().await.unwrap(), strings(&["a", "b", "x", "c"]));
    }

    #[tokio::test]
    async fn test_insert_clamps_out_of_range() {
        let session = Session::new(MemoryStore::new().connect());
        let list = session.get("letters", ListType::new(Text));
        list.extend(&strings(&["a", "b"])).await.unwrap();

        list.insert(10, &"end".to_string()).await.unwrap();
        list.insert(-10, &"start".to_string()).await.unwrap();
        assert_eq!(list.to_vec().await.unwrap(), strings(&["start", "a", "b", "end"]));
    }

    #[tokio::test]
    async fn test_positional_access() {
        let session = Session::new(MemoryStore::new().connect());
        let list = session.get("nums", ListType::new(Integer));
        list.extend(&[1, 2, 3]).await.unwrap();

        assert_eq!(list.get_at(0).await.unwrap(), 1);
        assert_eq!(list.get_at(-1).await.unwrap(), 3);
        list.set_at(1, &20).await.unwrap();
        assert_eq!(list.remove_at(0).await.unwrap(), 1);
        assert_eq!(list.to_vec().await.unwrap(), vec![20, 3]);

        let err = list.get_at(5).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Command(StoreError::IndexOutOfRange { index: 5, .. })
        ));
        assert!(list.set_at(9, &0).await.is_err());
    }

    #[tokio::test]
    async fn test_iter_spans_chunks() {
        let config = SessionConfig::new().with_list_chunk(3);
        let session = Session::with_config(MemoryStore::new().connect(), config);
        let list = session.get("nums", ListType::new(Integer));
        let values: Vec<i64> = (0..7).collect();
        list.extend(&values).await.unwrap();

        let seen: Vec<i64> = list.iter().try_collect().await.unwrap();
        assert_eq!(seen, values);
        assert_eq!(list.range(2, 4).await.unwrap(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_replace_is_whole_value() {
        let session = Session::new(MemoryStore::new().connect());
        let list = session.get("nums", ListType::new(Integer));
        list.extend(&[1, 2, 3]).await.unwrap();
        list.replace(&[9]).await.unwrap();
        assert_eq!(list.to_vec().await.unwrap(), vec![9]);

        list.replace(&[]).await.unwrap();
        assert!(list.is_empty().await.unwrap());
        assert!(!list.delete().await.unwrap());
    }
}
