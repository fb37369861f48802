use crate::Column;
use std::borrow::Cow;

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("Rocksdb error: {0:#}")]
    RocksDB(#[from] rocksdb::Error),
    #[error("Column `{0}` is not initialized")]
    MissingColumn(&'static str),
    #[error("Malformed value in column `{column}`: {reason}")]
    Malformed { column: &'static Column, reason: Cow<'static, str> },
}

impl DbError {
    pub fn malformed(column: &'static Column, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Malformed { column, reason: reason.into() }
    }
}
