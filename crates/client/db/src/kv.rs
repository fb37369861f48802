use crate::{Column, DbError};
use std::fmt;

pub type KvIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), DbError>> + 'a>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { column: &'static Column, key: Vec<u8>, value: Vec<u8> },
    Delete { column: &'static Column, key: Vec<u8> },
}

/// A set of writes applied atomically by [`KvStore::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: &'static Column, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put { column, key: key.into(), value: value.into() });
    }

    pub fn delete(&mut self, column: &'static Column, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { column, key: key.into() });
    }

    /// Appends the writes of `other`, which take precedence over the current ones.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Narrow key/value interface over a column-oriented storage engine.
pub trait KvStore: fmt::Debug + Send + Sync + 'static {
    fn get(&self, column: &'static Column, key: &[u8]) -> Result<Option<Vec<u8>>, DbError>;

    /// Applies every write of the batch, or none of them.
    fn write(&self, batch: WriteBatch) -> Result<(), DbError>;

    /// Iterates `(key, value)` pairs of `column` in ascending key order, starting at the first key `>= start`.
    fn iter_from<'a>(&'a self, column: &'static Column, start: &[u8]) -> KvIter<'a>;

    fn contains(&self, column: &'static Column, key: &[u8]) -> Result<bool, DbError> {
        Ok(self.get(column, key)?.is_some())
    }

    fn put(&self, column: &'static Column, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let mut batch = WriteBatch::new();
        batch.put(column, key, value);
        self.write(batch)
    }

    /// Reads a big endian `u64`.
    fn get_u64(&self, column: &'static Column, key: &[u8]) -> Result<Option<u64>, DbError> {
        let Some(data) = self.get(column, key)? else { return Ok(None) };
        let bytes: [u8; 8] = data[..].try_into().map_err(|_| DbError::malformed(column, "expected an 8 byte integer"))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }
}
