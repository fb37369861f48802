//! Storage engines for the atomic trie.
//!
//! Everything above this crate talks to the [`KvStore`] trait: point reads, ordered iteration and atomic
//! [`WriteBatch`]es over a fixed set of [`Column`]s. Two engines are provided, [`RocksDBStorage`] for nodes and
//! [`InMemoryStorage`] for tests and ephemeral setups.

pub mod column;
mod error;
mod kv;
mod memory;
pub mod rocksdb;

pub use column::Column;
pub use error::DbError;
pub use kv::{BatchOp, KvIter, KvStore, WriteBatch};
pub use memory::InMemoryStorage;
pub use self::rocksdb::{RocksDBConfig, RocksDBStorage};
