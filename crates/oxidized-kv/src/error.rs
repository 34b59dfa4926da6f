//! Error types for oxidized-kv
//!
//! Three layers, innermost first:
//! - `EncodeError` / `DecodeError`: a codec rejected a value or a bulk
//! - `StoreError`: the store (or the transport to it) rejected a command
//! - `Error`: what every public operation returns, carrying the key involved

use thiserror::Error;

/// A value fell outside the domain of the codec asked to encode it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{codec} cannot encode {value}: {reason}")]
pub struct EncodeError {
    /// Name of the rejecting codec
    pub codec: &'static str,
    /// `Debug` rendering of the offending value
    pub value: String,
    /// Why the value is outside the domain
    pub reason: String,
}

impl EncodeError {
    pub fn new(codec: &'static str, value: &impl std::fmt::Debug, reason: impl Into<String>) -> Self {
        Self {
            codec,
            value: format!("{value:?}"),
            reason: reason.into(),
        }
    }
}

/// Stored bytes did not parse under the expected codec.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The bulk is malformed or truncated for this codec
    #[error("{codec} cannot decode bulk {bulk}: {reason}")]
    Malformed {
        codec: &'static str,
        bulk: String,
        reason: String,
    },

    /// The bulk is well-formed, but was written by a sibling codec
    #[error("{codec} cannot decode bulk {bulk}: it was written as {found}")]
    TypeMismatch {
        codec: &'static str,
        found: &'static str,
        bulk: String,
    },
}

impl DecodeError {
    pub fn malformed(codec: &'static str, bulk: &[u8], reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            codec,
            bulk: render_bulk(bulk),
            reason: reason.into(),
        }
    }

    pub fn type_mismatch(codec: &'static str, found: &'static str, bulk: &[u8]) -> Self {
        DecodeError::TypeMismatch {
            codec,
            found,
            bulk: render_bulk(bulk),
        }
    }
}

/// Human-readable rendering of a bulk for error messages.
///
/// Printable UTF-8 is quoted, anything else is shown as hex.
pub fn render_bulk(bulk: &[u8]) -> String {
    match std::str::from_utf8(bulk) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => format!("{s:?}"),
        _ => format!("0x{}", hex::encode(bulk)),
    }
}

/// Errors reported by a [`Connection`](crate::protocol::Connection).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The key holds a value of a different native kind
    #[error("WRONGTYPE operation against key {key} holding the wrong kind of value")]
    WrongType { key: String },

    /// A positional command addressed a missing element
    #[error("index {index} out of range for key {key}")]
    IndexOutOfRange { key: String, index: i64 },

    /// The store refused the command for another reason
    #[error("command rejected: {0}")]
    Rejected(String),

    /// The reply did not have the shape the command promises
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: String,
    },

    /// Transport failure
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Errors surfaced by sessions, proxies and transactions.
#[derive(Error, Debug)]
pub enum Error {
    /// A value could not be encoded for the given key
    #[error("encoding failed for key {key}: {source}")]
    Encoding {
        key: String,
        #[source]
        source: EncodeError,
    },

    /// Stored bytes at the given key did not decode
    #[error("decoding failed for key {key}: {source}")]
    Decoding {
        key: String,
        #[source]
        source: DecodeError,
    },

    /// The key holds data of a different shape than the one declared.
    /// `bulk` is the rendered stored value when a codec detected it.
    #[error("type mismatch for key {key}: expected {expected}, found {found}{}", stored(.bulk))]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
        bulk: Option<String>,
    },

    /// The store rejected the request
    #[error("store command failed: {0}")]
    Command(StoreError),

    /// Transport failure, never retried here
    #[error("connection error: {0}")]
    Connection(String),

    /// Watched keys changed before commit; the whole unit may be re-run
    #[error("transaction conflict on watched keys {keys:?}")]
    RetryableConflict { keys: Vec<String> },

    /// The retry policy gave up
    #[error("transaction conflict on {keys:?} persisted after {attempts} attempt(s)")]
    ConflictRetriesExhausted { attempts: u32, keys: Vec<String> },

    /// A transaction already holds this session's watch set
    #[error("a transaction is already in progress for this session")]
    TransactionInProgress,

    /// A read was attempted after the first queued write
    #[error("query on key {key} attempted after writes were queued")]
    QueryAfterWrite { key: String },

    /// The transaction was already committed or aborted
    #[error("transaction is {state}, no further operations are accepted")]
    TransactionClosed { state: String },
}

impl Error {
    pub(crate) fn encoding(key: &str, source: EncodeError) -> Self {
        Error::Encoding {
            key: key.to_string(),
            source,
        }
    }

    /// Sibling-codec mismatches are promoted to [`Error::TypeMismatch`].
    pub(crate) fn decoding(key: &str, source: DecodeError) -> Self {
        match source {
            DecodeError::TypeMismatch { codec, found, bulk } => Error::TypeMismatch {
                key: key.to_string(),
                expected: codec.to_string(),
                found: found.to_string(),
                bulk: Some(bulk),
            },
            source => Error::Decoding {
                key: key.to_string(),
                source,
            },
        }
    }

    /// Only optimistic conflicts are safe to re-run mechanically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RetryableConflict { .. })
    }
}

fn stored(bulk: &Option<String>) -> String {
    bulk.as_ref().map(|b| format!(" (stored {b})")).unwrap_or_default()
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => Error::Connection(msg),
            other => Error::Command(other),
        }
    }
}
