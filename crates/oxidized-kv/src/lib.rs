//! Oxidized-KV: Typed Persistence over a Remote Key-Value Store
//!
//! This crate maps application values onto the native data structures of a
//! Redis-like store (strings, hashes, lists, sets and sorted sets) through
//! immutable type descriptors, and exposes each key as a lazy, typed proxy.
//!
//! ## Key Components
//!
//! - `Session`: owns one store connection and resolves key names to proxies
//! - `types`: `Bulk` codecs (text, integers, temporal, tuples, JSON) and the
//!   collection descriptors `HashType`, `ListType`, `SetType`, `SortedSetType`
//! - `Scalar`, `Hash`, `List`, `Set`, `SortedSet`: proxies that encode on
//!   write and decode on read, with no local caching
//! - `Transaction`: optimistic watch/queue/commit with a bounded retry
//!   combinator (`Session::transaction`)
//! - `protocol::Connection`: the seam to a concrete store client
//!
//! ```ignore
//! let session = Session::new(MemoryStore::new().connect());
//! let visits = session.get("visits", HashType::new(Text, Integer));
//! visits.set_field(&"/index".to_string(), &1).await?;
//! ```

mod config;
mod error;
pub mod fakes;
mod hash;
mod list;
mod op;
pub mod protocol;
mod scalar;
mod session;
mod set;
mod sorted_set;
mod transaction;
pub mod types;

pub use config::{SessionConfig, DEFAULT_LIST_CHUNK, DEFAULT_SCAN_COUNT};
pub use error::{render_bulk, DecodeError, EncodeError, Error, StoreError};
pub use hash::{Hash, HashTx};
pub use list::{List, ListTx};
pub use protocol::{Command, Connection, Reply, StoreResult};
pub use scalar::{Scalar, ScalarTx};
pub use session::Session;
pub use set::{Set, SetTx};
pub use sorted_set::{SortedSet, SortedSetTx};
pub use transaction::{Pending, RetryPolicy, Transaction, TxState};
pub use types::{
    Boolean, Bulk, ByteString, Date, DateTime, Float, HashType, Integer, Json, ListType, SetType,
    Shape, SortedSetType, Text, Tuple, TupleFields, TzDateTime, ValueType,
};

/// Result type for oxidized-kv operations
pub type Result<T> = std::result::Result<T, Error>;
