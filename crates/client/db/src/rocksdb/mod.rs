use crate::{
    column::{Column, ALL_COLUMNS},
    BatchOp, DbError, KvIter, KvStore, WriteBatch,
};
use anyhow::Context;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, FlushOptions, IteratorMode, MultiThreaded,
    WriteOptions,
};
use std::{fmt, path::Path, sync::Arc};

mod options;

pub use options::{RocksDBConfig, StatsLevel};
use options::rocksdb_global_options;

type DB = DBWithThreadMode<MultiThreaded>;

struct RocksDBStorageInner {
    db: DB,
    writeopts: WriteOptions,
    config: RocksDBConfig,
}

impl Drop for RocksDBStorageInner {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::warn!("Error when flushing the database: {err:#}");
        }
        self.db.cancel_all_background_work(true);
    }
}

impl fmt::Debug for RocksDBStorageInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DBInner").field("config", &self.config).finish()
    }
}

impl RocksDBStorageInner {
    fn get_column(&self, col: &'static Column) -> Result<Arc<BoundColumnFamily<'_>>, DbError> {
        self.db.cf_handle(col.rocksdb_name).ok_or(DbError::MissingColumn(col.rocksdb_name))
    }

    fn flush(&self) -> anyhow::Result<()> {
        tracing::debug!("doing a db flush");
        let mut opts = FlushOptions::default();
        opts.set_wait(true);
        // we have to collect twice here :/
        let columns = ALL_COLUMNS.iter().map(|col| self.get_column(col)).collect::<Result<Vec<_>, _>>()?;
        let columns = columns.iter().collect::<Vec<_>>();

        self.db.flush_cfs_opt(&columns, &opts).context("Flushing database")?;

        Ok(())
    }
}

/// Implementation of [`KvStore`] using rocksdb, one column family per [`Column`].
#[derive(Debug, Clone)]
pub struct RocksDBStorage(Arc<RocksDBStorageInner>);

impl RocksDBStorage {
    pub fn open(path: &Path, config: &RocksDBConfig) -> anyhow::Result<Self> {
        let opts = rocksdb_global_options(config)?;
        tracing::debug!("Opening db at {:?}", path.display());
        let db = DB::open_cf_descriptors(
            &opts,
            path,
            ALL_COLUMNS.iter().map(|col| ColumnFamilyDescriptor::new(col.rocksdb_name, col.rocksdb_options(config))),
        )
        .with_context(|| format!("Opening database at {}", path.display()))?;

        let mut writeopts = WriteOptions::new();
        writeopts.disable_wal(!config.enable_wal);
        Ok(Self(Arc::new(RocksDBStorageInner { db, writeopts, config: config.clone() })))
    }

    /// Flushes all memtables to disk.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.0.flush()
    }
}

impl KvStore for RocksDBStorage {
    fn get(&self, column: &'static Column, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self.0.db.get_cf(&self.0.get_column(column)?, key)?)
    }

    #[tracing::instrument(skip(self, batch), fields(len = batch.len()))]
    fn write(&self, batch: WriteBatch) -> Result<(), DbError> {
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { column, key, value } => rocks_batch.put_cf(&self.0.get_column(column)?, key, value),
                BatchOp::Delete { column, key } => rocks_batch.delete_cf(&self.0.get_column(column)?, key),
            }
        }
        self.0.db.write_opt(rocks_batch, &self.0.writeopts)?;
        Ok(())
    }

    fn iter_from<'a>(&'a self, column: &'static Column, start: &[u8]) -> KvIter<'a> {
        let col = match self.0.get_column(column) {
            Ok(col) => col,
            Err(err) => return Box::new(std::iter::once(Err(err))),
        };
        let iter = self.0.db.iterator_cf(&col, IteratorMode::From(start, Direction::Forward));
        Box::new(iter.map(|res| res.map(|(k, v)| (k.into_vec(), v.into_vec())).map_err(DbError::from)))
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    /// A rocksdb instance living in a temporary directory, removed on drop.
    #[derive(Debug)]
    pub struct TempRocksDB {
        pub storage: RocksDBStorage,
        // dropped after `storage`
        _dir: tempfile::TempDir,
    }

    impl TempRocksDB {
        pub fn open() -> Self {
            let dir = tempfile::TempDir::new().expect("Creating temporary directory");
            let storage = RocksDBStorage::open(dir.path(), &RocksDBConfig::default()).expect("Opening database");
            Self { storage, _dir: dir }
        }
    }
}
