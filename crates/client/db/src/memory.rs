use crate::{column::ALL_COLUMNS, BatchOp, Column, DbError, KvIter, KvStore, WriteBatch};
use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

type ColumnData = BTreeMap<Vec<u8>, Vec<u8>>;

/// [`KvStore`] kept entirely in memory. Batches are applied under a single write lock.
#[derive(Debug)]
pub struct InMemoryStorage {
    columns: RwLock<HashMap<&'static str, ColumnData>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self { columns: RwLock::new(ALL_COLUMNS.iter().map(|col| (col.rocksdb_name, ColumnData::new())).collect()) }
    }

    /// Number of keys stored in `column`.
    pub fn len(&self, column: &'static Column) -> usize {
        self.columns.read().expect("Poisoned lock").get(column.rocksdb_name).map_or(0, |c| c.len())
    }
}

impl KvStore for InMemoryStorage {
    fn get(&self, column: &'static Column, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        let columns = self.columns.read().expect("Poisoned lock");
        let data = columns.get(column.rocksdb_name).ok_or(DbError::MissingColumn(column.rocksdb_name))?;
        Ok(data.get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), DbError> {
        let mut columns = self.columns.write().expect("Poisoned lock");
        // check every column first so that a failing batch leaves no partial writes behind
        for op in batch.ops() {
            let (BatchOp::Put { column, .. } | BatchOp::Delete { column, .. }) = op;
            if !columns.contains_key(column.rocksdb_name) {
                return Err(DbError::MissingColumn(column.rocksdb_name));
            }
        }
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { column, key, value } => {
                    columns.entry(column.rocksdb_name).or_default().insert(key, value);
                }
                BatchOp::Delete { column, key } => {
                    columns.entry(column.rocksdb_name).or_default().remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter_from<'a>(&'a self, column: &'static Column, start: &[u8]) -> KvIter<'a> {
        let columns = self.columns.read().expect("Poisoned lock");
        let Some(data) = columns.get(column.rocksdb_name) else {
            return Box::new(std::iter::once(Err(DbError::MissingColumn(column.rocksdb_name))));
        };
        // snapshot of the range, the lock is not held while iterating
        let entries: Vec<_> = data.range(start.to_vec()..).map(|(k, v)| Ok((k.clone(), v.clone()))).collect();
        Box::new(entries.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ATOMIC_META_COLUMN, SHARED_MEMORY_COLUMN};

    const UNKNOWN_COLUMN: &Column = &Column::new("unknown");

    #[test]
    fn batch_is_all_or_nothing() {
        let db = InMemoryStorage::new();
        let mut batch = WriteBatch::new();
        batch.put(ATOMIC_META_COLUMN, b"a".as_slice(), b"1".as_slice());
        batch.put(UNKNOWN_COLUMN, b"b".as_slice(), b"2".as_slice());
        assert!(matches!(db.write(batch), Err(DbError::MissingColumn("unknown"))));
        assert_eq!(db.get(ATOMIC_META_COLUMN, b"a").unwrap(), None);
    }

    #[test]
    fn later_writes_win() {
        let db = InMemoryStorage::new();
        let mut batch = WriteBatch::new();
        batch.put(SHARED_MEMORY_COLUMN, b"k".as_slice(), b"1".as_slice());
        batch.delete(SHARED_MEMORY_COLUMN, b"k".as_slice());
        batch.put(SHARED_MEMORY_COLUMN, b"k".as_slice(), b"2".as_slice());
        db.write(batch).unwrap();
        assert_eq!(db.get(SHARED_MEMORY_COLUMN, b"k").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.len(SHARED_MEMORY_COLUMN), 1);
    }

    #[test]
    fn iter_from_is_ordered() {
        let db = InMemoryStorage::new();
        for key in [3u64, 1, 2, 5] {
            db.put(ATOMIC_META_COLUMN, &key.to_be_bytes(), b"").unwrap();
        }
        let keys: Vec<u64> = db
            .iter_from(ATOMIC_META_COLUMN, &2u64.to_be_bytes())
            .map(|e| u64::from_be_bytes(e.unwrap().0.try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![2, 3, 5]);
    }
}
