use crate::{
    node::{NodeSet, TrieDb},
    proof::{self, ProofNode},
    trie, TrieError,
};
use mc_db::{
    column::{ATOMIC_COMMIT_HEIGHTS_COLUMN, ATOMIC_META_COLUMN},
    KvStore, WriteBatch,
};
use mp_atomic::{AtomicKey, AtomicOps, AtomicRequests, Hash, HASH_LEN};
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
    time::Instant,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub const DEFAULT_COMMIT_INTERVAL: u64 = 4096;

const LAST_COMMITTED_KEY: &[u8] = b"ATOMIC_TRIE_LAST_COMMITTED";
const LAST_ACCEPTED_KEY: &[u8] = b"ATOMIC_TRIE_LAST_ACCEPTED";

/// A height and the root of the trie holding every operation at or below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPoint {
    pub height: u64,
    pub root: Hash,
}

impl CommitPoint {
    fn encode(&self) -> Vec<u8> {
        [self.height.to_be_bytes().as_slice(), self.root.as_bytes().as_slice()].concat()
    }

    fn decode(key: &'static str, bytes: &[u8]) -> Result<Self, TrieError> {
        if bytes.len() != 8 + HASH_LEN {
            return Err(TrieError::MalformedMetadata { key });
        }
        let (height, root) = bytes.split_at(8);
        let height = u64::from_be_bytes(height.try_into().map_err(|_| TrieError::MalformedMetadata { key })?);
        let root = Hash::from_slice(root).ok_or(TrieError::MalformedMetadata { key })?;
        Ok(Self { height, root })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Root of the last committed interval of the handle.
    pub root: Hash,
    /// Whether at least one commit height was written.
    pub committed: bool,
}

/// Exclusive right to write to an [`AtomicTrie`], see [`AtomicTrie::try_lock_writer`].
pub type WriterGuard = OwnedMutexGuard<()>;

/// Uncommitted view of the trie: a committed base plus the leaves written above it.
///
/// Leaves are kept in memory until a commit height is crossed, at which point everything at or below that height is
/// persisted and becomes the new base.
#[derive(Debug, Clone, Default)]
pub struct TrieHandle {
    base: Option<CommitPoint>,
    height: u64,
    pending: BTreeMap<AtomicKey, Vec<u8>>,
}

impl TrieHandle {
    fn at(base: Option<CommitPoint>) -> Self {
        Self { base, height: base.map_or(0, |b| b.height), pending: BTreeMap::new() }
    }

    /// Last commit point of this handle, `None` when not even genesis is committed.
    pub fn base(&self) -> Option<CommitPoint> {
        self.base
    }

    pub fn base_root(&self) -> Hash {
        self.base.map_or(Hash::ZERO, |b| b.root)
    }

    /// Highest height written to or advanced by this handle.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Writes a raw leaf. Heights must be written in non-decreasing order, above the committed base.
    pub fn put_leaf(&mut self, key: AtomicKey, value: Vec<u8>) -> Result<(), TrieError> {
        self.check_writable(key.height())?;
        self.pending.insert(key, value);
        self.height = key.height();
        Ok(())
    }

    fn check_writable(&self, height: u64) -> Result<(), TrieError> {
        if let Some(base) = self.base {
            if height <= base.height {
                return Err(TrieError::AlreadyCommitted { height, committed: base.height });
            }
        }
        if height < self.height {
            return Err(TrieError::OutOfOrder { height, handle_height: self.height });
        }
        Ok(())
    }

    fn pending_entries(&self) -> Vec<(AtomicKey, &[u8])> {
        self.pending.iter().map(|(k, v)| (*k, v.as_slice())).collect()
    }
}

/// Merkle trie of the atomic operations of every height, with a persisted root every `commit_interval` heights.
///
/// `index[h]`, for every committed height `h`, is the root of the trie holding all the operations at heights `<= h`.
/// Roots share their unchanged subtrees, and committed heights are never rewritten.
#[derive(Debug)]
pub struct AtomicTrie<S> {
    db: Arc<S>,
    nodes: TrieDb<S>,
    commit_interval: u64,
    last_committed: RwLock<Option<CommitPoint>>,
    last_accepted: RwLock<Option<CommitPoint>>,
    writer: Arc<Mutex<()>>,
}

impl<S: KvStore> AtomicTrie<S> {
    pub fn new(db: Arc<S>, commit_interval: u64) -> Result<Self, TrieError> {
        if commit_interval == 0 {
            return Err(TrieError::InvalidCommitInterval(commit_interval));
        }
        let last_committed = read_point(db.as_ref(), LAST_COMMITTED_KEY, "last committed")?;
        let last_accepted = read_point(db.as_ref(), LAST_ACCEPTED_KEY, "last accepted")?;
        if let Some(point) = last_committed {
            if point.height % commit_interval != 0 {
                return Err(TrieError::InvalidCommitInterval(commit_interval));
            }
        }
        tracing::debug!(
            "Opened atomic trie: commit_interval={commit_interval} last_committed={:?} last_accepted={:?}",
            last_committed,
            last_accepted
        );
        Ok(Self {
            nodes: TrieDb::new(Arc::clone(&db)),
            db,
            commit_interval,
            last_committed: RwLock::new(last_committed),
            last_accepted: RwLock::new(last_accepted),
            writer: Arc::new(Mutex::new(())),
        })
    }

    pub fn db(&self) -> &Arc<S> {
        &self.db
    }

    pub fn commit_interval(&self) -> u64 {
        self.commit_interval
    }

    pub fn is_commit_height(&self, height: u64) -> bool {
        height % self.commit_interval == 0
    }

    pub fn last_committed(&self) -> Option<CommitPoint> {
        *self.last_committed.read().expect("Poisoned lock")
    }

    pub fn last_accepted(&self) -> Option<CommitPoint> {
        *self.last_accepted.read().expect("Poisoned lock")
    }

    /// The highest known root, committed or accepted.
    pub fn latest_point(&self) -> Option<CommitPoint> {
        match (self.last_committed(), self.last_accepted()) {
            (Some(c), Some(a)) => Some(if a.height > c.height { a } else { c }),
            (c, a) => c.or(a),
        }
    }

    /// Hands out the writer guard, or `None` while another writer holds it.
    pub fn try_lock_writer(&self) -> Option<WriterGuard> {
        Arc::clone(&self.writer).try_lock_owned().ok()
    }

    fn indexed_root(&self, height: u64) -> Result<Option<Hash>, TrieError> {
        let Some(bytes) = self.db.get(ATOMIC_COMMIT_HEIGHTS_COLUMN, &height.to_be_bytes())? else { return Ok(None) };
        Hash::from_slice(&bytes).map(Some).ok_or(TrieError::MalformedMetadata { key: "commit height index" })
    }

    /// Indexed commit points at heights `>= from`, in height order.
    pub fn commit_points(&self, from: u64) -> Result<Vec<CommitPoint>, TrieError> {
        let malformed = || TrieError::MalformedMetadata { key: "commit height index" };
        self.db
            .iter_from(ATOMIC_COMMIT_HEIGHTS_COLUMN, &from.to_be_bytes())
            .map(|entry| {
                let (key, value) = entry?;
                let height = u64::from_be_bytes(key.as_slice().try_into().map_err(|_| malformed())?);
                let root = Hash::from_slice(&value).ok_or_else(malformed)?;
                Ok(CommitPoint { height, root })
            })
            .collect()
    }

    /// Root at the nearest commit height `<= height`.
    pub fn root_at(&self, height: u64) -> Result<CommitPoint, TrieError> {
        let commit_height = height - height % self.commit_interval;
        match self.indexed_root(commit_height)? {
            Some(root) => Ok(CommitPoint { height: commit_height, root }),
            None if commit_height == 0 => Ok(CommitPoint { height: 0, root: Hash::ZERO }),
            None => {
                Err(TrieError::NotCommitted { height, last_committed: self.last_committed().map(|c| c.height) })
            }
        }
    }

    /// A handle on the trie as of the nearest commit height `<= height`.
    pub fn open(&self, height: u64) -> Result<TrieHandle, TrieError> {
        let commit_height = height - height % self.commit_interval;
        match self.indexed_root(commit_height)? {
            Some(root) => Ok(TrieHandle::at(Some(CommitPoint { height: commit_height, root }))),
            None if commit_height == 0 => Ok(TrieHandle::at(None)),
            None => Err(TrieError::NotFound(height)),
        }
    }

    /// A handle on the last committed root, where interrupted writers resume.
    pub fn open_last_committed(&self) -> TrieHandle {
        TrieHandle::at(self.last_committed())
    }

    /// Records the operations of `height` in the handle. Nothing is written to disk.
    pub fn update(&self, handle: &mut TrieHandle, height: u64, ops: &AtomicOps) -> Result<(), TrieError> {
        handle.check_writable(height)?;
        for (chain_id, requests) in ops {
            if requests.is_empty() {
                continue;
            }
            let key = AtomicKey::new(height, chain_id);
            let value = match handle.pending.get(&key) {
                Some(existing) => {
                    let mut merged = AtomicRequests::decode(existing)
                        .map_err(|source| TrieError::MalformedValue { key, source })?;
                    merged.merge(requests.clone());
                    merged.encode()
                }
                None => requests.encode(),
            }
            .map_err(|source| TrieError::MalformedValue { key, source })?;
            handle.pending.insert(key, value);
        }
        handle.height = height;
        Ok(())
    }

    /// Commits the handle if its height crossed a commit height. Otherwise, this does nothing.
    pub fn commit(&self, handle: &mut TrieHandle) -> Result<CommitOutcome, TrieError> {
        let height = handle.height;
        self.commit_to(handle, height)
    }

    /// Advances the handle to `height`, committing every commit height it crosses.
    pub fn commit_to(&self, handle: &mut TrieHandle, height: u64) -> Result<CommitOutcome, TrieError> {
        if height < handle.height {
            return Err(TrieError::OutOfOrder { height, handle_height: handle.height });
        }
        let mut outcome = CommitOutcome { root: handle.base_root(), committed: false };
        let mut commit_height = Some(handle.base.map_or(0, |b| b.height + self.commit_interval));
        while let Some(current) = commit_height.filter(|h| *h <= height) {
            let above = match current.checked_add(1) {
                Some(next) => handle.pending.split_off(&AtomicKey::height_start(next)),
                None => BTreeMap::new(),
            };
            let interval = std::mem::replace(&mut handle.pending, above);
            let point = self.write_commit(handle.base_root(), current, &interval)?;
            handle.base = Some(point);
            outcome = CommitOutcome { root: point.root, committed: true };
            commit_height = current.checked_add(self.commit_interval);
        }
        handle.height = height;
        Ok(outcome)
    }

    fn write_commit(
        &self,
        base_root: Hash,
        height: u64,
        leaves: &BTreeMap<AtomicKey, Vec<u8>>,
    ) -> Result<CommitPoint, TrieError> {
        let started = Instant::now();
        let entries: Vec<_> = leaves.iter().map(|(k, v)| (*k, v.as_slice())).collect();
        let mut nodes = NodeSet::default();
        let root = trie::insert_batch(&self.nodes, base_root, &entries, &mut nodes)?;

        if let Some(indexed) = self.indexed_root(height)? {
            if indexed != root {
                return Err(TrieError::ConflictingRoot { height, indexed, got: root });
            }
        }

        let point = CommitPoint { height, root };
        let mut batch = WriteBatch::new();
        nodes.write_to(&mut batch);
        batch.put(ATOMIC_COMMIT_HEIGHTS_COLUMN, height.to_be_bytes(), root.0);
        let advances = self.last_committed().map_or(true, |c| c.height < height);
        if advances {
            batch.put(ATOMIC_META_COLUMN, LAST_COMMITTED_KEY, point.encode());
        }
        self.db.write(batch)?;
        if advances {
            *self.last_committed.write().expect("Poisoned lock") = Some(point);
        }

        tracing::debug!(
            "🌳 Committed atomic trie at height {height}: root={root} leaves={} nodes={} in {:?}",
            entries.len(),
            nodes.len(),
            started.elapsed()
        );
        Ok(point)
    }

    /// Root of everything in the handle, committed or not, with the nodes that would have to be written.
    pub fn hash_pending(&self, handle: &TrieHandle) -> Result<(Hash, NodeSet), TrieError> {
        let mut nodes = NodeSet::default();
        let root = trie::insert_batch(&self.nodes, handle.base_root(), &handle.pending_entries(), &mut nodes)?;
        Ok((root, nodes))
    }

    /// Persists the nodes of the handle and records its height as the last accepted one, without touching the
    /// commit height index. Used when shutting down between two commit heights.
    #[tracing::instrument(skip(self, handle), fields(height = handle.height))]
    pub fn finalize(&self, handle: &TrieHandle) -> Result<CommitPoint, TrieError> {
        let (root, nodes) = self.hash_pending(handle)?;
        let point = CommitPoint { height: handle.height, root };
        let mut batch = WriteBatch::new();
        nodes.write_to(&mut batch);
        batch.put(ATOMIC_META_COLUMN, LAST_ACCEPTED_KEY, point.encode());
        self.db.write(batch)?;
        *self.last_accepted.write().expect("Poisoned lock") = Some(point);
        Ok(point)
    }

    /// Writes nodes of a trie built outside of a [`TrieHandle`]. `root` must be reachable afterwards.
    pub fn insert_foreign_trie(&self, nodes: NodeSet, root: Hash) -> Result<(), TrieError> {
        if !root.is_zero() && !nodes.contains(&root) && !self.nodes.contains(&root)? {
            return Err(TrieError::MissingNode(root));
        }
        let mut batch = WriteBatch::new();
        nodes.write_to(&mut batch);
        self.db.write(batch)?;
        Ok(())
    }

    /// Registers `root` as the trie at `height`: indexed if `height` is a commit height, and recorded as the last
    /// accepted root. Every commit height below `height` must already be committed.
    ///
    /// Returns whether a commit height was written.
    #[tracing::instrument(skip(self))]
    pub fn accept_foreign_trie(&self, height: u64, root: Hash) -> Result<bool, TrieError> {
        if let Some(below) = height.checked_sub(1).map(|h| h - h % self.commit_interval) {
            if self.last_committed().map_or(true, |c| c.height < below) {
                return Err(TrieError::UncommittedBoundary(below));
            }
        }
        if !self.has_root(&root)? {
            return Err(TrieError::MissingNode(root));
        }

        let point = CommitPoint { height, root };
        let mut batch = WriteBatch::new();
        let mut indexed = false;
        if self.is_commit_height(height) {
            match self.indexed_root(height)? {
                Some(existing) if existing == root => {}
                Some(existing) => return Err(TrieError::ConflictingRoot { height, indexed: existing, got: root }),
                None => {
                    batch.put(ATOMIC_COMMIT_HEIGHTS_COLUMN, height.to_be_bytes(), root.0);
                    batch.put(ATOMIC_META_COLUMN, LAST_COMMITTED_KEY, point.encode());
                    indexed = true;
                }
            }
        }
        batch.put(ATOMIC_META_COLUMN, LAST_ACCEPTED_KEY, point.encode());
        self.db.write(batch)?;

        if indexed {
            *self.last_committed.write().expect("Poisoned lock") = Some(point);
        }
        *self.last_accepted.write().expect("Poisoned lock") = Some(point);
        Ok(indexed)
    }

    pub fn has_root(&self, root: &Hash) -> Result<bool, TrieError> {
        if root.is_zero() {
            return Ok(true);
        }
        self.nodes.contains(root)
    }

    pub fn get(&self, root: Hash, key: &AtomicKey) -> Result<Option<Vec<u8>>, TrieError> {
        trie::get(&self.nodes, root, key)
    }

    /// Up to `limit` leaves of `root` in `[start, end]`.
    pub fn leaves(
        &self,
        root: Hash,
        start: &AtomicKey,
        end: &AtomicKey,
        limit: usize,
    ) -> Result<Vec<(AtomicKey, Vec<u8>)>, TrieError> {
        trie::leaves(&self.nodes, root, start, end, limit)
    }

    pub fn prove_range(&self, root: Hash, start: &AtomicKey, end: &AtomicKey) -> Result<Vec<ProofNode>, TrieError> {
        proof::prove_range(&self.nodes, root, start, end)
    }

    /// Operations of `height` found under `root`.
    pub fn ops_at_height(&self, root: Hash, height: u64) -> Result<AtomicOps, TrieError> {
        let leaves = self.leaves(root, &AtomicKey::height_start(height), &AtomicKey::height_end(height), usize::MAX)?;
        decode_ops(leaves)
    }
}

/// Groups leaves of a single height into operations.
pub(crate) fn decode_ops(
    leaves: impl IntoIterator<Item = (AtomicKey, Vec<u8>)>,
) -> Result<AtomicOps, TrieError> {
    leaves
        .into_iter()
        .map(|(key, value)| {
            let requests = AtomicRequests::decode(&value).map_err(|source| TrieError::MalformedValue { key, source })?;
            Ok((key.chain_id(), requests))
        })
        .collect()
}

fn read_point<S: KvStore>(db: &S, key: &[u8], name: &'static str) -> Result<Option<CommitPoint>, TrieError> {
    db.get(ATOMIC_META_COLUMN, key)?.map(|bytes| CommitPoint::decode(name, &bytes)).transpose()
}
