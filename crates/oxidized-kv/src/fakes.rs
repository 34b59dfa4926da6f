//! In-memory store (testing only)
//!
//! `MemoryStore` holds one shared keyspace; every [`MemoryStore::connect`]
//! call returns an independent [`MemoryConnection`] with its own watch set,
//! so optimistic conflicts between connections can be reproduced without a
//! server. Every write bumps a per-key version; `exec` compares the watched
//! versions before applying anything.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::protocol::{Command, Connection, Reply, StoreResult};

#[derive(Debug, Clone)]
enum Entry {
    Str(Bytes),
    Hash(BTreeMap<Bytes, Bytes>),
    List(Vec<Bytes>),
    Set(BTreeSet<Bytes>),
    ZSet(HashMap<Bytes, f64>),
}

impl Entry {
    fn type_name(&self) -> &'static str {
        match self {
            Entry::Str(_) => "string",
            Entry::Hash(_) => "hash",
            Entry::List(_) => "list",
            Entry::Set(_) => "set",
            Entry::ZSet(_) => "zset",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Entry::Str(_) => false,
            Entry::Hash(map) => map.is_empty(),
            Entry::List(list) => list.is_empty(),
            Entry::Set(set) => set.is_empty(),
            Entry::ZSet(zset) => zset.is_empty(),
        }
    }
}

/// Read and create-on-write accessors for one collection kind.
macro_rules! accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        fn $get(&self, key: &str) -> StoreResult<Option<&$ty>> {
            match self.entries.get(key) {
                None => Ok(None),
                Some(Entry::$variant(value)) => Ok(Some(value)),
                Some(_) => Err(wrong_type(key)),
            }
        }

        fn $get_mut(&mut self, key: &str) -> StoreResult<&mut $ty> {
            let entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::$variant(Default::default()));
            match entry {
                Entry::$variant(value) => Ok(value),
                _ => Err(wrong_type(key)),
            }
        }
    };
}

#[derive(Debug, Clone, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    versions: HashMap<String, u64>,
    clock: u64,
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType { key: key.to_string() }
}

fn out_of_range(key: &str, index: i64) -> StoreError {
    StoreError::IndexOutOfRange {
        key: key.to_string(),
        index,
    }
}

fn count(n: usize) -> Reply {
    Reply::Integer(n as i64)
}

fn bulks(items: impl IntoIterator<Item = Bytes>) -> Reply {
    Reply::Array(items.into_iter().map(Reply::Bulk).collect())
}

fn ok() -> Reply {
    Reply::Status("OK".to_string())
}

/// Element position for `index` in a sequence of `len`, if it exists.
fn position(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Inclusive `start..=stop` with negative indices, clipped to `len`.
fn span(start: i64, stop: i64, len: usize) -> std::ops::Range<usize> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return 0..0;
    }
    start as usize..stop as usize + 1
}

fn ordered(zset: &HashMap<Bytes, f64>) -> Vec<(Bytes, f64)> {
    let mut members: Vec<(Bytes, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

fn scored_reply(members: Vec<(Bytes, f64)>, with_scores: bool) -> Reply {
    if !with_scores {
        return bulks(members.into_iter().map(|(member, _)| member));
    }
    let mut flat = Vec::with_capacity(members.len() * 2);
    for (member, score) in members {
        flat.push(Reply::Bulk(member));
        flat.push(Reply::Double(score));
    }
    Reply::Array(flat)
}

impl Keyspace {
    accessors!(hash, hash_mut, Hash, BTreeMap<Bytes, Bytes>);
    accessors!(list, list_mut, List, Vec<Bytes>);
    accessors!(set, set_mut, Set, BTreeSet<Bytes>);
    accessors!(zset, zset_mut, ZSet, HashMap<Bytes, f64>);

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Record a modification of `key` and drop it if it became empty.
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
        if self.entries.get(key).is_some_and(Entry::is_empty) {
            self.entries.remove(key);
        }
    }

    /// Drop an entry created by a `*_mut` accessor that nothing filled.
    fn settle(&mut self, key: &str, changed: bool) {
        if changed {
            self.touch(key);
        } else if self.entries.get(key).is_some_and(Entry::is_empty) {
            self.entries.remove(key);
        }
    }

    fn members_of(&self, key: &str) -> StoreResult<BTreeSet<Bytes>> {
        Ok(self.set(key)?.cloned().unwrap_or_default())
    }

    fn apply(&mut self, command: Command) -> StoreResult<Reply> {
        match command {
            Command::Del { keys } => {
                let mut removed = 0;
                for key in keys {
                    if self.entries.remove(&key).is_some() {
                        removed += 1;
                        self.touch(&key);
                    }
                }
                Ok(count(removed))
            }
            Command::Exists { key } => Ok(count(self.entries.contains_key(&key) as usize)),
            Command::Type { key } => {
                let name = self.entries.get(&key).map_or("none", Entry::type_name);
                Ok(Reply::Status(name.to_string()))
            }

            Command::Get { key } => match self.entries.get(&key) {
                None => Ok(Reply::Nil),
                Some(Entry::Str(value)) => Ok(Reply::Bulk(value.clone())),
                Some(_) => Err(wrong_type(&key)),
            },
            Command::Set { key, value } => {
                self.entries.insert(key.clone(), Entry::Str(value));
                self.touch(&key);
                Ok(ok())
            }
            Command::IncrBy { key, delta } => {
                let current = match self.entries.get(&key) {
                    None => 0,
                    Some(Entry::Str(value)) => std::str::from_utf8(value)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| StoreError::Rejected("value is not an integer".to_string()))?,
                    Some(_) => return Err(wrong_type(&key)),
                };
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| StoreError::Rejected("increment would overflow".to_string()))?;
                self.entries
                    .insert(key.clone(), Entry::Str(Bytes::from(next.to_string())));
                self.touch(&key);
                Ok(Reply::Integer(next))
            }

            Command::HGet { key, field } => Ok(self
                .hash(&key)?
                .and_then(|map| map.get(&field).cloned())
                .map_or(Reply::Nil, Reply::Bulk)),
            Command::HSet { key, field, value } => {
                let created = self.hash_mut(&key)?.insert(field, value).is_none();
                self.touch(&key);
                Ok(count(created as usize))
            }
            Command::HSetMany { key, pairs } => {
                let map = self.hash_mut(&key)?;
                let mut created = 0;
                for (field, value) in pairs {
                    if map.insert(field, value).is_none() {
                        created += 1;
                    }
                }
                self.touch(&key);
                Ok(count(created))
            }
            Command::HDel { key, fields } => {
                let map = self.hash_mut(&key)?;
                let removed = fields.iter().filter(|field| map.remove(*field).is_some()).count();
                self.settle(&key, removed > 0);
                Ok(count(removed))
            }
            Command::HExists { key, field } => Ok(count(
                self.hash(&key)?.is_some_and(|map| map.contains_key(&field)) as usize,
            )),
            Command::HLen { key } => Ok(count(self.hash(&key)?.map_or(0, BTreeMap::len))),
            Command::HKeys { key } => Ok(bulks(
                self.hash(&key)?.into_iter().flat_map(|map| map.keys().cloned()),
            )),
            Command::HVals { key } => Ok(bulks(
                self.hash(&key)?.into_iter().flat_map(|map| map.values().cloned()),
            )),
            Command::HScan { key, cursor, count: page } => {
                let entries: Vec<(Bytes, Bytes)> = self
                    .hash(&key)?
                    .into_iter()
                    .flat_map(|map| map.iter().map(|(f, v)| (f.clone(), v.clone())))
                    .collect();
                let start = (cursor as usize).min(entries.len());
                let end = start.saturating_add(page.max(1)).min(entries.len());
                let next = if end >= entries.len() { 0 } else { end as i64 };
                let mut flat = Vec::with_capacity((end - start) * 2);
                for (field, value) in &entries[start..end] {
                    flat.push(Reply::Bulk(field.clone()));
                    flat.push(Reply::Bulk(value.clone()));
                }
                Ok(Reply::Array(vec![Reply::Integer(next), Reply::Array(flat)]))
            }

            Command::LLen { key } => Ok(count(self.list(&key)?.map_or(0, Vec::len))),
            Command::LIndex { key, index } => Ok(self
                .list(&key)?
                .and_then(|list| position(index, list.len()).map(|at| list[at].clone()))
                .map_or(Reply::Nil, Reply::Bulk)),
            Command::LSet { key, index, value } => {
                let list = self.list(&key)?.ok_or_else(|| out_of_range(&key, index))?;
                let at = position(index, list.len()).ok_or_else(|| out_of_range(&key, index))?;
                self.list_mut(&key)?[at] = value;
                self.touch(&key);
                Ok(ok())
            }
            Command::LInsertAt { key, index, value } => {
                let list = self.list_mut(&key)?;
                let len = list.len() as i64;
                let at = if index < 0 { (len + index).max(0) } else { index.min(len) };
                list.insert(at as usize, value);
                let len = list.len();
                self.touch(&key);
                Ok(count(len))
            }
            Command::LRemoveAt { key, index } => {
                let len = self.list(&key)?.map_or(0, Vec::len);
                let at = position(index, len).ok_or_else(|| out_of_range(&key, index))?;
                let removed = self.list_mut(&key)?.remove(at);
                self.touch(&key);
                Ok(Reply::Bulk(removed))
            }
            Command::RPush { key, values } => {
                let list = self.list_mut(&key)?;
                list.extend(values);
                let len = list.len();
                self.touch(&key);
                Ok(count(len))
            }
            Command::LRange { key, start, stop } => {
                let list = self.list(&key)?.map(Vec::as_slice).unwrap_or_default();
                Ok(bulks(list[span(start, stop, list.len())].iter().cloned()))
            }

            Command::SAdd { key, members } => {
                let set = self.set_mut(&key)?;
                let added = members.into_iter().filter(|m| set.insert(m.clone())).count();
                self.settle(&key, added > 0);
                Ok(count(added))
            }
            Command::SRem { key, members } => {
                let set = self.set_mut(&key)?;
                let removed = members.iter().filter(|m| set.remove(*m)).count();
                self.settle(&key, removed > 0);
                Ok(count(removed))
            }
            Command::SPop { key } => {
                let popped = self.set_mut(&key)?.pop_first();
                self.settle(&key, popped.is_some());
                Ok(popped.map_or(Reply::Nil, Reply::Bulk))
            }
            Command::SIsMember { key, member } => Ok(count(
                self.set(&key)?.is_some_and(|set| set.contains(&member)) as usize,
            )),
            Command::SCard { key } => Ok(count(self.set(&key)?.map_or(0, BTreeSet::len))),
            Command::SMembers { key } => Ok(bulks(self.members_of(&key)?)),
            Command::SUnion { keys } => {
                let mut union = BTreeSet::new();
                for key in &keys {
                    union.extend(self.members_of(key)?);
                }
                Ok(bulks(union))
            }
            Command::SInter { keys } => {
                let mut sets = keys.iter().map(|key| self.members_of(key));
                let mut inter = match sets.next() {
                    Some(first) => first?,
                    None => BTreeSet::new(),
                };
                for set in sets {
                    let set = set?;
                    inter.retain(|m| set.contains(m));
                }
                Ok(bulks(inter))
            }
            Command::SDiff { keys } => {
                let mut sets = keys.iter().map(|key| self.members_of(key));
                let mut diff = match sets.next() {
                    Some(first) => first?,
                    None => BTreeSet::new(),
                };
                for set in sets {
                    let set = set?;
                    diff.retain(|m| !set.contains(m));
                }
                Ok(bulks(diff))
            }

            Command::ZAdd { key, member, score } => {
                if score.is_nan() {
                    return Err(StoreError::Rejected("score is not a number".to_string()));
                }
                let created = self.zset_mut(&key)?.insert(member, score).is_none();
                self.touch(&key);
                Ok(count(created as usize))
            }
            Command::ZIncrBy { key, member, delta } => {
                let current = self.zset(&key)?.and_then(|z| z.get(&member).copied()).unwrap_or(0.0);
                let next = current + delta;
                if next.is_nan() {
                    return Err(StoreError::Rejected("resulting score is not a number".to_string()));
                }
                self.zset_mut(&key)?.insert(member, next);
                self.touch(&key);
                Ok(Reply::Double(next))
            }
            Command::ZScore { key, member } => Ok(self
                .zset(&key)?
                .and_then(|z| z.get(&member).copied())
                .map_or(Reply::Nil, Reply::Double)),
            Command::ZRem { key, members } => {
                let zset = self.zset_mut(&key)?;
                let removed = members.iter().filter(|m| zset.remove(*m).is_some()).count();
                self.settle(&key, removed > 0);
                Ok(count(removed))
            }
            Command::ZCard { key } => Ok(count(self.zset(&key)?.map_or(0, HashMap::len))),
            Command::ZRange {
                key,
                start,
                stop,
                with_scores,
            } => {
                let members = self.zset(&key)?.map(ordered).unwrap_or_default();
                let range = span(start, stop, members.len());
                Ok(scored_reply(members[range].to_vec(), with_scores))
            }
            Command::ZRangeByScore {
                key,
                min,
                max,
                with_scores,
            } => {
                let members = self
                    .zset(&key)?
                    .map(ordered)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|(_, score)| *score >= min && *score <= max)
                    .collect();
                Ok(scored_reply(members, with_scores))
            }
        }
    }
}

/// Shared in-memory keyspace. Clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    keyspace: Arc<Mutex<Keyspace>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection with an empty watch set.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            store: self.clone(),
            watched: HashMap::new(),
        }
    }

    /// While offline, every connection call fails with
    /// [`StoreError::Connection`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of keys currently holding a value.
    pub fn key_count(&self) -> usize {
        self.keyspace.lock().unwrap().entries.len()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store is offline".to_string()));
        }
        Ok(())
    }
}

/// One client connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
    /// Watched key → version seen at watch time
    watched: HashMap<String, u64>,
}

impl MemoryConnection {
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, command: Command) -> StoreResult<Reply> {
        self.store.check_online()?;
        let mut keyspace = self.store.keyspace.lock().unwrap();
        keyspace.apply(command)
    }

    async fn watch(&mut self, keys: &[String]) -> StoreResult<()> {
        self.store.check_online()?;
        let keyspace = self.store.keyspace.lock().unwrap();
        self.watched = keys
            .iter()
            .map(|key| (key.clone(), keyspace.version(key)))
            .collect();
        Ok(())
    }

    async fn unwatch(&mut self) -> StoreResult<()> {
        self.store.check_online()?;
        self.watched.clear();
        Ok(())
    }

    async fn exec(&mut self, commands: Vec<Command>) -> StoreResult<Option<Vec<Reply>>> {
        self.store.check_online()?;
        let watched = std::mem::take(&mut self.watched);
        let mut keyspace = self.store.keyspace.lock().unwrap();
        if watched
            .iter()
            .any(|(key, version)| keyspace.version(key) != *version)
        {
            return Ok(None);
        }

        let mut staged = keyspace.clone();
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            replies.push(staged.apply(command)?);
        }
        *keyspace = staged;
        Ok(Some(replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    async fn run(conn: &mut MemoryConnection, command: Command) -> Reply {
        conn.execute(command).await.unwrap()
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = MemoryStore::new();
        let mut conn = store.connect();
        run(&mut conn, Command::Set { key: "k".into(), value: b("v") }).await;
        let err = conn.execute(Command::LLen { key: "k".into() }).await.unwrap_err();
        assert_eq!(err, StoreError::WrongType { key: "k".into() });
    }

    #[tokio::test]
    async fn test_exec_conflicts_after_foreign_write() {
        let store = MemoryStore::new();
        let mut watcher = store.connect();
        let mut writer = store.connect();

        watcher.watch(&["k".to_string()]).await.unwrap();
        run(&mut writer, Command::Set { key: "k".into(), value: b("1") }).await;
        let outcome = watcher
            .exec(vec![Command::Set { key: "k".into(), value: b("2") }])
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(run(&mut writer, Command::Get { key: "k".into() }).await, Reply::Bulk(b("1")));

        // the watch set was cleared by the rejected exec
        let outcome = watcher
            .exec(vec![Command::Set { key: "k".into(), value: b("2") }])
            .await
            .unwrap();
        assert!(outcome.is_some());
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let store = MemoryStore::new();
        let mut conn = store.connect();
        run(&mut conn, Command::Set { key: "s".into(), value: b("v") }).await;
        let result = conn
            .exec(vec![
                Command::Set { key: "a".into(), value: b("1") },
                Command::LLen { key: "s".into() },
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(run(&mut conn, Command::Exists { key: "a".into() }).await, Reply::Integer(0));
    }

    #[tokio::test]
    async fn test_empty_collections_disappear() {
        let store = MemoryStore::new();
        let mut conn = store.connect();
        run(&mut conn, Command::SAdd { key: "s".into(), members: vec![b("x")] }).await;
        run(&mut conn, Command::SRem { key: "s".into(), members: vec![b("x")] }).await;
        assert_eq!(store.key_count(), 0);

        run(&mut conn, Command::SRem { key: "t".into(), members: vec![b("x")] }).await;
        assert_eq!(store.key_count(), 0);
        assert_eq!(
            run(&mut conn, Command::Type { key: "s".into() }).await,
            Reply::Status("none".into())
        );
    }

    #[test]
    fn test_span_matches_inclusive_range_rules() {
        assert_eq!(span(0, -1, 3), 0..3);
        assert_eq!(span(-2, -1, 3), 1..3);
        assert_eq!(span(1, 10, 3), 1..3);
        assert_eq!(span(5, 6, 3), 0..0);
        assert_eq!(span(0, -1, 0), 0..0);
    }

    #[tokio::test]
    async fn test_offline_store_fails_every_call() {
        let store = MemoryStore::new();
        let mut conn = store.connect();
        store.set_offline(true);
        assert!(matches!(
            conn.execute(Command::Exists { key: "k".into() }).await,
            Err(StoreError::Connection(_))
        ));
        store.set_offline(false);
        assert!(conn.execute(Command::Exists { key: "k".into() }).await.is_ok());
    }
}
