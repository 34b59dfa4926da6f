//! Deferred operations: commands paired with the decoding of their replies.
//!
//! Every proxy method is written once as an `Op`. A session runs it right
//! away; a transaction queues its commands and runs the decoder after
//! commit.

use bytes::Bytes;

use crate::error::{Error, StoreError};
use crate::protocol::{Command, Reply};
use crate::types::Bulk;
use crate::Result;

type Decoder<T> = Box<dyn FnOnce(Vec<Reply>) -> Result<T> + Send>;

pub(crate) struct Op<T> {
    pub(crate) commands: Vec<Command>,
    pub(crate) decode: Decoder<T>,
}

impl<T: 'static> Op<T> {
    /// A single command with a decoder for its reply.
    pub(crate) fn single<F>(command: Command, decode: F) -> Self
    where
        F: FnOnce(Reply) -> Result<T> + Send + 'static,
    {
        let name = command.name();
        Op {
            commands: vec![command],
            decode: Box::new(move |mut replies| match replies.pop() {
                Some(reply) if replies.is_empty() => decode(reply),
                _ => Err(StoreError::UnexpectedReply {
                    command: name,
                    reply: "wrong number of replies".to_string(),
                }
                .into()),
            }),
        }
    }

    /// Several commands that must apply together.
    pub(crate) fn batch<F>(commands: Vec<Command>, decode: F) -> Self
    where
        F: FnOnce(Vec<Reply>) -> Result<T> + Send + 'static,
    {
        Op {
            commands,
            decode: Box::new(decode),
        }
    }

    pub(crate) fn map<U, F>(self, f: F) -> Op<U>
    where
        F: FnOnce(T) -> U + Send + 'static,
        U: 'static,
    {
        let decode = self.decode;
        Op {
            commands: self.commands,
            decode: Box::new(move |replies| decode(replies).map(f)),
        }
    }

    pub(crate) fn finish(self, replies: Vec<Reply>) -> Result<T> {
        (self.decode)(replies)
    }
}

pub(crate) fn encode<C: Bulk>(codec: &C, key: &str, value: &C::Value) -> Result<Bytes> {
    codec.encode(value).map_err(|err| Error::encoding(key, err))
}

pub(crate) fn encode_all<'v, C, I>(codec: &C, key: &str, values: I) -> Result<Vec<Bytes>>
where
    C: Bulk,
    I: IntoIterator<Item = &'v C::Value>,
{
    values.into_iter().map(|value| encode(codec, key, value)).collect()
}

pub(crate) fn decode<C: Bulk>(codec: &C, key: &str, bulk: &[u8]) -> Result<C::Value> {
    codec.decode(bulk).map_err(|err| Error::decoding(key, err))
}

pub(crate) fn decode_all<C: Bulk>(codec: &C, key: &str, bulks: Vec<Bytes>) -> Result<Vec<C::Value>> {
    bulks.iter().map(|bulk| decode(codec, key, bulk)).collect()
}
