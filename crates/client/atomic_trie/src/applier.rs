//! Replays the operations of the atomic trie into shared memory, exactly once per height.

use crate::{atomic_trie::decode_ops, AtomicTrie, TrieError};
use mc_db::{
    column::{ATOMIC_META_COLUMN, SHARED_MEMORY_COLUMN},
    DbError, KvStore, WriteBatch,
};
use mp_atomic::{AtomicKey, AtomicOps, ChainId};
use std::{sync::Arc, time::Instant};

const APPLY_CURSOR_KEY: &[u8] = b"APPLY_TO_SHARED_MEMORY_CURSOR";
const APPLY_CHUNK_SIZE: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error("Storage error: {0}")]
    Db(#[from] DbError),
    #[error("The shared memory cursor is not initialized")]
    CursorNotInitialized,
    #[error("Cannot move the shared memory cursor back from {current} to {requested}")]
    CursorRegression { current: u64, requested: u64 },
    #[error("Cannot apply up to height {target}, the atomic trie is synced up to {synced:?}")]
    NotSynced { target: u64, synced: Option<u64> },
    #[error("Applying height {height} to shared memory: {err:#}")]
    SharedMemory { height: u64, err: anyhow::Error },
}

/// The cross-chain ledger that atomic operations end up in.
pub trait SharedMemory: Send + Sync {
    /// Applies `ops` of every chain. The writes of `batch` must be committed atomically with them.
    fn apply(&self, ops: &AtomicOps, batch: WriteBatch) -> anyhow::Result<()>;
}

impl<T: SharedMemory + ?Sized> SharedMemory for Arc<T> {
    fn apply(&self, ops: &AtomicOps, batch: WriteBatch) -> anyhow::Result<()> {
        (**self).apply(ops, batch)
    }
}

/// Shared memory kept in the `shared_memory` column of the store backing the trie, under `chain_id ‖ key`.
#[derive(Debug)]
pub struct KvSharedMemory<S> {
    db: Arc<S>,
}

impl<S> Clone for KvSharedMemory<S> {
    fn clone(&self) -> Self {
        Self { db: Arc::clone(&self.db) }
    }
}

impl<S: KvStore> KvSharedMemory<S> {
    pub fn new(db: Arc<S>) -> Self {
        Self { db }
    }

    pub fn get(&self, chain_id: &ChainId, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        self.db.get(SHARED_MEMORY_COLUMN, &ledger_key(chain_id, key))
    }
}

impl<S: KvStore> SharedMemory for KvSharedMemory<S> {
    fn apply(&self, ops: &AtomicOps, batch: WriteBatch) -> anyhow::Result<()> {
        let mut ledger = WriteBatch::new();
        for (chain_id, requests) in ops {
            for key in &requests.remove_requests {
                ledger.delete(SHARED_MEMORY_COLUMN, ledger_key(chain_id, key));
            }
            for element in &requests.put_requests {
                ledger.put(SHARED_MEMORY_COLUMN, ledger_key(chain_id, &element.key), element.value.as_slice());
            }
        }
        ledger.extend(batch);
        self.db.write(ledger)?;
        Ok(())
    }
}

fn ledger_key(chain_id: &ChainId, key: &[u8]) -> Vec<u8> {
    [chain_id.as_bytes().as_slice(), key].concat()
}

/// Applies committed or accepted trie content to shared memory, tracking progress with a durable cursor.
///
/// The cursor of a height is written in the same batch as its operations, so an interrupted apply resumes right
/// after the last height that reached shared memory.
pub struct AtomicApplier<S, M> {
    trie: Arc<AtomicTrie<S>>,
    shared_memory: M,
}

impl<S: KvStore, M: SharedMemory> AtomicApplier<S, M> {
    pub fn new(trie: Arc<AtomicTrie<S>>, shared_memory: M) -> Self {
        Self { trie, shared_memory }
    }

    pub fn shared_memory(&self) -> &M {
        &self.shared_memory
    }

    /// Last height applied to shared memory.
    pub fn cursor(&self) -> Result<Option<u64>, ApplyError> {
        Ok(self.trie.db().get_u64(ATOMIC_META_COLUMN, APPLY_CURSOR_KEY)?)
    }

    /// Sets the cursor without applying anything. The cursor never goes back.
    pub fn mark_cursor(&self, height: u64) -> Result<(), ApplyError> {
        if let Some(current) = self.cursor()? {
            if height < current {
                return Err(ApplyError::CursorRegression { current, requested: height });
            }
        }
        self.trie.db().put(ATOMIC_META_COLUMN, APPLY_CURSOR_KEY, &height.to_be_bytes())?;
        tracing::debug!("Shared memory cursor set to {height}");
        Ok(())
    }

    /// Applies the operations of every height in `(cursor, target]`. Returns the number of heights with operations.
    ///
    /// On failure, the cursor stays at the last applied height: calling this again resumes from there.
    #[tracing::instrument(skip(self))]
    pub fn apply_up_to(&self, target: u64) -> Result<usize, ApplyError> {
        let cursor = self.cursor()?.ok_or(ApplyError::CursorNotInitialized)?;
        if target <= cursor {
            return Ok(0);
        }
        let source = match self.trie.latest_point() {
            Some(point) if point.height >= target => point,
            point => return Err(ApplyError::NotSynced { target, synced: point.map(|p| p.height) }),
        };

        let started = Instant::now();
        let end = AtomicKey::height_end(target);
        // cursor < target, so the next height exists
        let mut start = AtomicKey::height_start(cursor + 1);
        let mut group: Vec<(AtomicKey, Vec<u8>)> = Vec::new();
        let mut applied = 0;
        loop {
            let chunk = self.trie.leaves(source.root, &start, &end, APPLY_CHUNK_SIZE)?;
            let exhausted = chunk.len() < APPLY_CHUNK_SIZE;
            let next_start = chunk.last().and_then(|(key, _)| key.successor());

            for (key, value) in chunk {
                if group.first().is_some_and(|(first, _)| first.height() != key.height()) {
                    self.apply_height(std::mem::take(&mut group))?;
                    applied += 1;
                }
                group.push((key, value));
            }

            match next_start {
                Some(next) if !exhausted => start = next,
                _ => break,
            }
        }
        if !group.is_empty() {
            self.apply_height(group)?;
            applied += 1;
        }

        if self.cursor()?.map_or(true, |c| c < target) {
            self.trie.db().put(ATOMIC_META_COLUMN, APPLY_CURSOR_KEY, &target.to_be_bytes())?;
        }
        tracing::info!(
            "🔗 Applied {applied} heights of atomic operations to shared memory ({cursor}..={target}) in {:?}",
            started.elapsed()
        );
        Ok(applied)
    }

    fn apply_height(&self, leaves: Vec<(AtomicKey, Vec<u8>)>) -> Result<(), ApplyError> {
        let Some(height) = leaves.first().map(|(key, _)| key.height()) else { return Ok(()) };
        let ops = decode_ops(leaves)?;
        let mut batch = WriteBatch::new();
        batch.put(ATOMIC_META_COLUMN, APPLY_CURSOR_KEY, height.to_be_bytes());
        self.shared_memory.apply(&ops, batch).map_err(|err| ApplyError::SharedMemory { height, err })
    }
}
