//! Store command protocol
//!
//! The boundary to the remote key-value store. The crate never frames bytes
//! or opens sockets itself: it issues [`Command`] values through a
//! [`Connection`] and interprets the [`Reply`] values that come back.
//!
//! Index arguments follow the store's conventions: negative values count from
//! the end of the sequence, and range bounds are inclusive.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One abstract store command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Keys
    Del { keys: Vec<String> },
    Exists { key: String },
    Type { key: String },

    // Scalars
    Get { key: String },
    Set { key: String, value: Bytes },
    IncrBy { key: String, delta: i64 },

    // Hashes
    HGet { key: String, field: Bytes },
    HSet { key: String, field: Bytes, value: Bytes },
    HSetMany { key: String, pairs: Vec<(Bytes, Bytes)> },
    HDel { key: String, fields: Vec<Bytes> },
    HExists { key: String, field: Bytes },
    HLen { key: String },
    HKeys { key: String },
    HVals { key: String },
    HScan { key: String, cursor: u64, count: usize },

    // Sequences
    LLen { key: String },
    LIndex { key: String, index: i64 },
    LSet { key: String, index: i64, value: Bytes },
    LInsertAt { key: String, index: i64, value: Bytes },
    LRemoveAt { key: String, index: i64 },
    RPush { key: String, values: Vec<Bytes> },
    LRange { key: String, start: i64, stop: i64 },

    // Sets
    SAdd { key: String, members: Vec<Bytes> },
    SRem { key: String, members: Vec<Bytes> },
    SPop { key: String },
    SIsMember { key: String, member: Bytes },
    SCard { key: String },
    SMembers { key: String },
    SUnion { keys: Vec<String> },
    SInter { keys: Vec<String> },
    SDiff { keys: Vec<String> },

    // Score-ordered sets
    ZAdd { key: String, member: Bytes, score: f64 },
    ZIncrBy { key: String, member: Bytes, delta: f64 },
    ZScore { key: String, member: Bytes },
    ZRem { key: String, members: Vec<Bytes> },
    ZCard { key: String },
    ZRange { key: String, start: i64, stop: i64, with_scores: bool },
    ZRangeByScore { key: String, min: f64, max: f64, with_scores: bool },
}

impl Command {
    /// Command name as the store spells it.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Del { .. } => "DEL",
            Command::Exists { .. } => "EXISTS",
            Command::Type { .. } => "TYPE",
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::IncrBy { .. } => "INCRBY",
            Command::HGet { .. } => "HGET",
            Command::HSet { .. } => "HSET",
            Command::HSetMany { .. } => "HMSET",
            Command::HDel { .. } => "HDEL",
            Command::HExists { .. } => "HEXISTS",
            Command::HLen { .. } => "HLEN",
            Command::HKeys { .. } => "HKEYS",
            Command::HVals { .. } => "HVALS",
            Command::HScan { .. } => "HSCAN",
            Command::LLen { .. } => "LLEN",
            Command::LIndex { .. } => "LINDEX",
            Command::LSet { .. } => "LSET",
            Command::LInsertAt { .. } => "LINSERTAT",
            Command::LRemoveAt { .. } => "LREMOVEAT",
            Command::RPush { .. } => "RPUSH",
            Command::LRange { .. } => "LRANGE",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SPop { .. } => "SPOP",
            Command::SIsMember { .. } => "SISMEMBER",
            Command::SCard { .. } => "SCARD",
            Command::SMembers { .. } => "SMEMBERS",
            Command::SUnion { .. } => "SUNION",
            Command::SInter { .. } => "SINTER",
            Command::SDiff { .. } => "SDIFF",
            Command::ZAdd { .. } => "ZADD",
            Command::ZIncrBy { .. } => "ZINCRBY",
            Command::ZScore { .. } => "ZSCORE",
            Command::ZRem { .. } => "ZREM",
            Command::ZCard { .. } => "ZCARD",
            Command::ZRange { .. } => "ZRANGE",
            Command::ZRangeByScore { .. } => "ZRANGEBYSCORE",
        }
    }

    /// Every key the command touches, in argument order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Command::Del { keys }
            | Command::SUnion { keys }
            | Command::SInter { keys }
            | Command::SDiff { keys } => keys.iter().map(String::as_str).collect(),
            Command::Exists { key }
            | Command::Type { key }
            | Command::Get { key }
            | Command::Set { key, .. }
            | Command::IncrBy { key, .. }
            | Command::HGet { key, .. }
            | Command::HSet { key, .. }
            | Command::HSetMany { key, .. }
            | Command::HDel { key, .. }
            | Command::HExists { key, .. }
            | Command::HLen { key }
            | Command::HKeys { key }
            | Command::HVals { key }
            | Command::HScan { key, .. }
            | Command::LLen { key }
            | Command::LIndex { key, .. }
            | Command::LSet { key, .. }
            | Command::LInsertAt { key, .. }
            | Command::LRemoveAt { key, .. }
            | Command::RPush { key, .. }
            | Command::LRange { key, .. }
            | Command::SAdd { key, .. }
            | Command::SRem { key, .. }
            | Command::SIsMember { key, .. }
            | Command::SPop { key }
            | Command::SCard { key }
            | Command::SMembers { key }
            | Command::ZAdd { key, .. }
            | Command::ZIncrBy { key, .. }
            | Command::ZScore { key, .. }
            | Command::ZRem { key, .. }
            | Command::ZCard { key }
            | Command::ZRange { key, .. }
            | Command::ZRangeByScore { key, .. } => vec![key.as_str()],
        }
    }

    /// Whether the command may modify the keyspace.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Del { .. }
                | Command::Set { .. }
                | Command::IncrBy { .. }
                | Command::HSet { .. }
                | Command::HSetMany { .. }
                | Command::HDel { .. }
                | Command::LSet { .. }
                | Command::LInsertAt { .. }
                | Command::LRemoveAt { .. }
                | Command::RPush { .. }
                | Command::SAdd { .. }
                | Command::SRem { .. }
                | Command::SPop { .. }
                | Command::ZAdd { .. }
                | Command::ZIncrBy { .. }
                | Command::ZRem { .. }
        )
    }
}

/// A store reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Key or element absent
    Nil,
    /// Simple acknowledgement or status word (e.g. the `TYPE` reply)
    Status(String),
    Integer(i64),
    Bulk(Bytes),
    Double(f64),
    Array(Vec<Reply>),
}

impl Reply {
    fn unexpected(self, command: &'static str) -> StoreError {
        StoreError::UnexpectedReply {
            command,
            reply: format!("{self:?}"),
        }
    }

    /// Expect an acknowledgement.
    pub fn into_unit(self, command: &'static str) -> StoreResult<()> {
        match self {
            Reply::Status(_) => Ok(()),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_status(self, command: &'static str) -> StoreResult<String> {
        match self {
            Reply::Status(s) => Ok(s),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_integer(self, command: &'static str) -> StoreResult<i64> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(other.unexpected(command)),
        }
    }

    /// Integer replies used as booleans (`1`/`0`).
    pub fn into_flag(self, command: &'static str) -> StoreResult<bool> {
        self.into_integer(command).map(|n| n != 0)
    }

    /// A bulk or `Nil`.
    pub fn into_optional_bulk(self, command: &'static str) -> StoreResult<Option<Bytes>> {
        match self {
            Reply::Bulk(b) => Ok(Some(b)),
            Reply::Nil => Ok(None),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_bulk(self, command: &'static str) -> StoreResult<Bytes> {
        match self {
            Reply::Bulk(b) => Ok(b),
            other => Err(other.unexpected(command)),
        }
    }

    /// A double or `Nil`.
    pub fn into_optional_double(self, command: &'static str) -> StoreResult<Option<f64>> {
        match self {
            Reply::Double(d) => Ok(Some(d)),
            Reply::Nil => Ok(None),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_array(self, command: &'static str) -> StoreResult<Vec<Reply>> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(other.unexpected(command)),
        }
    }

    /// An array whose every element is a bulk.
    pub fn into_bulks(self, command: &'static str) -> StoreResult<Vec<Bytes>> {
        self.into_array(command)?
            .into_iter()
            .map(|item| item.into_bulk(command))
            .collect()
    }

    /// A flat `[member, score, member, score, ..]` array.
    pub fn into_scored_bulks(self, command: &'static str) -> StoreResult<Vec<(Bytes, f64)>> {
        let items = self.into_array(command)?;
        if items.len() % 2 != 0 {
            return Err(Reply::Array(items).unexpected(command));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
            let member = member.into_bulk(command)?;
            let score = score
                .into_optional_double(command)?
                .ok_or(StoreError::UnexpectedReply {
                    command,
                    reply: "missing score".to_string(),
                })?;
            pairs.push((member, score));
        }
        Ok(pairs)
    }

    /// A cursor reply: `[next_cursor, [field, value, field, value, ..]]`.
    pub fn into_scan_page(self, command: &'static str) -> StoreResult<(u64, Vec<(Bytes, Bytes)>)> {
        let mut parts = self.into_array(command)?;
        if parts.len() != 2 {
            return Err(Reply::Array(parts).unexpected(command));
        }
        let flat = parts.pop().map(|p| p.into_bulks(command)).transpose()?.unwrap_or_default();
        let cursor = parts.pop().map(|p| p.into_integer(command)).transpose()?.unwrap_or(0);
        if flat.len() % 2 != 0 {
            return Err(StoreError::UnexpectedReply {
                command,
                reply: format!("odd number of scan items ({})", flat.len()),
            });
        }
        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((field, value));
        }
        Ok((cursor as u64, pairs))
    }
}

/// A single connection to the store.
///
/// Guarantees expected from implementations:
/// - `execute` runs one command and returns its reply, or a `StoreError`
///   (`WrongType` when the key holds another native kind).
/// - `watch` replaces the connection's watch set and captures the current
///   version of each key.
/// - `exec` applies every command in order, atomically, and returns their
///   replies; if any watched key changed since `watch` it applies nothing and
///   returns `None`. Either way the watch set is cleared.
/// - Watch state belongs to the connection; two connections never share it.
#[async_trait]
pub trait Connection: Send {
    /// Run one command.
    async fn execute(&mut self, command: Command) -> StoreResult<Reply>;

    /// Replace the watch set with `keys`.
    async fn watch(&mut self, keys: &[String]) -> StoreResult<()>;

    /// Clear the watch set.
    async fn unwatch(&mut self) -> StoreResult<()>;

    /// Apply `commands` atomically, conditioned on the watch set.
    async fn exec(&mut self, commands: Vec<Command>) -> StoreResult<Option<Vec<Reply>>>;
}
