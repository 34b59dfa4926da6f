//! Hash proxy: a key holding field → value pairs.

use std::collections::HashMap;
use std::hash::Hash as StdHash;

use bytes::Bytes;
use futures::stream::{self, Stream};

use crate::op::{self, Op};
use crate::protocol::Command;
use crate::session::Session;
use crate::transaction::{Pending, Transaction};
use crate::types::Bulk;
use crate::Result;

/// A native hash whose fields are encoded by `K` and values by `V`.
#[derive(Debug, Clone)]
pub struct Hash<K, V> {
    session: Session,
    key: String,
    key_type: K,
    value_type: V,
}

type Entries<K, V> = Vec<(<K as Bulk>::Value, <V as Bulk>::Value)>;

/// Position of an in-flight cursor scan. `cursor` is `None` once the store
/// reported the last page.
struct ScanState<T> {
    cursor: Option<u64>,
    buffered: std::vec::IntoIter<T>,
}

impl<T> ScanState<T> {
    fn start() -> Self {
        Self {
            cursor: Some(0),
            buffered: Vec::new().into_iter(),
        }
    }
}

impl<K: Bulk, V: Bulk> Hash<K, V> {
    pub(crate) fn new(session: Session, key: String, key_type: K, value_type: V) -> Self {
        Self {
            session,
            key,
            key_type,
            value_type,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn within<'a>(&'a self, tx: &'a Transaction) -> HashTx<'a, K, V> {
        HashTx { proxy: self, tx }
    }

    fn op_get_field(&self, field: &K::Value) -> Result<Op<Option<V::Value>>> {
        let field = op::encode(&self.key_type, &self.key, field)?;
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Ok(Op::single(
            Command::HGet {
                key: self.key.clone(),
                field,
            },
            move |reply| {
                reply
                    .into_optional_bulk("HGET")?
                    .map(|bulk| op::decode(&codec, &key, &bulk))
                    .transpose()
            },
        ))
    }

    fn op_set_field(&self, field: &K::Value, value: &V::Value) -> Result<Op<bool>> {
        let field = op::encode(&self.key_type, &self.key, field)?;
        let value = op::encode(&self.value_type, &self.key, value)?;
        Ok(Op::single(
            Command::HSet {
                key: self.key.clone(),
                field,
                value,
            },
            |reply| Ok(reply.into_integer("HSET")? > 0),
        ))
    }

    fn op_delete_field(&self, field: &K::Value) -> Result<Op<bool>> {
        let field = op::encode(&self.key_type, &self.key, field)?;
        Ok(Op::single(
            Command::HDel {
                key: self.key.clone(),
                fields: vec![field],
            },
            |reply| Ok(reply.into_integer("HDEL")? > 0),
        ))
    }

    fn op_contains_field(&self, field: &K::Value) -> Result<Op<bool>> {
        let field = op::encode(&self.key_type, &self.key, field)?;
        Ok(Op::single(
            Command::HExists {
                key: self.key.clone(),
                field,
            },
            |reply| Ok(reply.into_flag("HEXISTS")?),
        ))
    }

    fn op_len(&self) -> Op<usize> {
        Op::single(Command::HLen { key: self.key.clone() }, |reply| {
            Ok(reply.into_integer("HLEN")?.max(0) as usize)
        })
    }

    fn op_keys(&self) -> Op<Vec<K::Value>> {
        let codec = self.key_type.clone();
        let key = self.key.clone();
        Op::single(Command::HKeys { key: self.key.clone() }, move |reply| {
            op::decode_all(&codec, &key, reply.into_bulks("HKEYS")?)
        })
    }

    fn op_values(&self) -> Op<Vec<V::Value>> {
        let codec = self.value_type.clone();
        let key = self.key.clone();
        Op::single(Command::HVals { key: self.key.clone() }, move |reply| {
            op::decode_all(&codec, &key, reply.into_bulks("HVALS")?)
        })
    }

    fn op_scan(&self, cursor: u64, count: usize) -> Op<(u64, Entries<K, V>)> {
        let key_type = self.key_type.clone();
        let value_type = self.value_type.clone();
        let key = self.key.clone();
        Op::single(
            Command::HScan {
                key: self.key.clone(),
                cursor,
                count,
            },
            move |reply| {
                let (next, page) = reply.into_scan_page("HSCAN")?;
                let entries = page
                    .into_iter()
                    .map(|(field, value)| {
                        Ok((
                            op::decode(&key_type, &key, &field)?,
                            op::decode(&value_type, &key, &value)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((next, entries))
            },
        )
    }

    fn op_update<'v, I>(&self, entries: I) -> Result<Op<()>>
    where
        I: IntoIterator<Item = (&'v K::Value, &'v V::Value)>,
    {
        let pairs = self.encode_entries(entries)?;
        if pairs.is_empty() {
            return Ok(Op::batch(Vec::new(), |_| Ok(())));
        }
        Ok(Op::single(
            Command::HSetMany {
                key: self.key.clone(),
                pairs,
            },
            |reply| {
                reply.into_integer("HSET")?;
                Ok(())
            },
        ))
    }

    fn op_replace<'v, I>(&self, entries: I) -> Result<Op<()>>
    where
        I: IntoIterator<Item = (&'v K::Value, &'v V::Value)>,
    {
        let pairs = self.encode_entries(entries)?;
        let mut commands = vec![Command::Del {
            keys: vec![self.key.clone()],
        }];
        if !pairs.is_empty() {
            commands.push(Command::HSetMany {
                key: self.key.clone(),
                pairs,
            });
        }
        Ok(Op::batch(commands, |_| Ok(())))
    }

    fn encode_entries<'v, I>(&self, entries: I) -> Result<Vec<(Bytes, Bytes)>>
    where
        I: IntoIterator<Item = (&'v K::Value, &'v V::Value)>,
    {
        entries
            .into_iter()
            .map(|(field, value)| {
                Ok((
                    op::encode(&self.key_type, &self.key, field)?,
                    op::encode(&self.value_type, &self.key, value)?,
                ))
            })
            .collect()
    }

    pub async fn get_field(&self, field: &K::Value) -> Result<Option<V::Value>> {
        self.session.run(self.op_get_field(field)?).await
    }

    /// Set one field. Returns whether the field is new.
    pub async fn set_field(&self, field: &K::Value, value: &V::Value) -> Result<bool> {
        self.session.run(self.op_set_field(field, value)?).await
    }

    /// Remove one field. Returns whether it was present.
    pub async fn delete_field(&self, field: &K::Value) -> Result<bool> {
        self.session.run(self.op_delete_field(field)?).await
    }

    pub async fn contains_field(&self, field: &K::Value) -> Result<bool> {
        self.session.run(self.op_contains_field(field)?).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.session.run(self.op_len()).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn keys(&self) -> Result<Vec<K::Value>> {
        self.session.run(self.op_keys()).await
    }

    pub async fn values(&self) -> Result<Vec<V::Value>> {
        self.session.run(self.op_values()).await
    }

    /// Lazily page through all entries with the store's cursor.
    ///
    /// Each call starts a fresh scan. Entries changed during the scan may be
    /// seen zero or one time; entries present throughout are seen once.
    pub fn items(&self) -> impl Stream<Item = Result<(K::Value, V::Value)>> + Send + '_ {
        let count = self.session.config().scan_count;
        stream::try_unfold(ScanState::start(), move |state| self.scan_next(state, count))
    }

    async fn scan_next(
        &self,
        mut state: ScanState<(K::Value, V::Value)>,
        count: usize,
    ) -> Result<Option<((K::Value, V::Value), ScanState<(K::Value, V::Value)>)>> {
        loop {
            if let Some(entry) = state.buffered.next() {
                return Ok(Some((entry, state)));
            }
            let Some(position) = state.cursor else {
                return Ok(None);
            };
            let (next, page) = self.session.run(self.op_scan(position, count)).await?;
            state.cursor = (next != 0).then_some(next);
            state.buffered = page.into_iter();
        }
    }

    /// Set many fields in one command, keeping the others.
    pub async fn update<'v, I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'v K::Value, &'v V::Value)>,
    {
        self.session.run(self.op_update(entries)?).await
    }

    /// Atomically replace the whole hash with `entries`.
    pub async fn replace<'v, I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'v K::Value, &'v V::Value)>,
    {
        self.session.run(self.op_replace(entries)?).await
    }

    pub async fn delete(&self) -> Result<bool> {
        self.session.delete_resolved(&self.key).await
    }
}

impl<K, V> Hash<K, V>
where
    K: Bulk,
    V: Bulk,
    K::Value: Eq + StdHash,
{
    /// Read every entry into a map with one cursor scan.
    pub async fn to_map(&self) -> Result<HashMap<K::Value, V::Value>> {
        use futures::TryStreamExt;
        self.items().try_collect().await
    }
}

/// [`Hash`] operations inside a [`Transaction`].
#[derive(Debug, Clone)]
pub struct HashTx<'a, K, V> {
    proxy: &'a Hash<K, V>,
    tx: &'a Transaction,
}

impl<'a, K: Bulk, V: Bulk> HashTx<'a, K, V> {
    pub async fn get_field(&self, field: &K::Value) -> Result<Option<V::Value>> {
        self.tx.query(self.proxy.op_get_field(field)?).await
    }

    pub async fn contains_field(&self, field: &K::Value) -> Result<bool> {
        self.tx.query(self.proxy.op_contains_field(field)?).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.tx.query(self.proxy.op_len()).await
    }

    pub async fn keys(&self) -> Result<Vec<K::Value>> {
        self.tx.query(self.proxy.op_keys()).await
    }

    pub async fn values(&self) -> Result<Vec<V::Value>> {
        self.tx.query(self.proxy.op_values()).await
    }

    pub fn set_field(&self, field: &K::Value, value: &V::Value) -> Result<Pending<bool>> {
        self.tx.enqueue(self.proxy.op_set_field(field, value)?)
    }

    pub fn delete_field(&self, field: &K::Value) -> Result<Pending<bool>> {
        self.tx.enqueue(self.proxy.op_delete_field(field)?)
    }

    pub fn update<'v, I>(&self, entries: I) -> Result<Pending<()>>
    where
        I: IntoIterator<Item = (&'v K::Value, &'v V::Value)>,
    {
        self.tx.enqueue(self.proxy.op_update(entries)?)
    }

    pub fn replace<'v, I>(&self, entries: I) -> Result<Pending<()>>
    where
        I: IntoIterator<Item = (&'v K::Value, &'v V::Value)>,
    {
        self.tx.enqueue(self.proxy.op_replace(entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::fakes::MemoryStore;
    use crate::types::{HashType, Integer, Text};
    use futures::TryStreamExt;

    fn scores(session: &Session) -> Hash<Text, Integer> {
        session.get("scores", HashType::new(Text, Integer))
    }

    #[tokio::test]
    async fn test_field_roundtrip() {
        let session = Session::new(MemoryStore::new().connect());
        let hash = scores(&session);
        assert!(hash.set_field(&"ann".to_string(), &3).await.unwrap());
        assert!(!hash.set_field(&"ann".to_string(), &4).await.unwrap());
        assert_eq!(hash.get_field(&"ann".to_string()).await.unwrap(), Some(4));
        assert_eq!(hash.get_field(&"bob".to_string()).await.unwrap(), None);
        assert!(hash.contains_field(&"ann".to_string()).await.unwrap());
        assert!(hash.delete_field(&"ann".to_string()).await.unwrap());
        assert!(hash.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_items_pages_through_cursor() {
        let config = SessionConfig::new().with_scan_count(2);
        let session = Session::with_config(MemoryStore::new().connect(), config);
        let hash = scores(&session);
        let names: Vec<String> = (0..5).map(|i| format!("p{i}")).collect();
        let values: Vec<i64> = (0..5).collect();
        hash.update(names.iter().zip(values.iter())).await.unwrap();

        let mut items: Vec<(String, i64)> = hash.items().try_collect().await.unwrap();
        items.sort();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0], ("p0".to_string(), 0));

        // a second pass re-queries the store
        hash.set_field(&"p9".to_string(), &9).await.unwrap();
        let again: Vec<(String, i64)> = hash.items().try_collect().await.unwrap();
        assert_eq!(again.len(), 6);
    }

    #[tokio::test]
    async fn test_replace_drops_old_fields() {
        let session = Session::new(MemoryStore::new().connect());
        let hash = scores(&session);
        hash.set_field(&"old".to_string(), &1).await.unwrap();
        let name = "new".to_string();
        hash.replace([(&name, &2)]).await.unwrap();

        let map = hash.to_map().await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("new"), Some(&2));
        assert_eq!(hash.keys().await.unwrap(), vec!["new".to_string()]);
        assert_eq!(hash.values().await.unwrap(), vec![2]);
    }
}
