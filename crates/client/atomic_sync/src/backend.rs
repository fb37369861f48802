use crate::{
    config::ConfigError, AtomicSyncParams, AtomicSyncer, LeafClient, LeafsRequestHandler, NetworkClient,
    NetworkLeafClient,
};
use mc_atomic_trie::{ApplyError, AtomicApplier, AtomicTrie, CommitPoint, SharedMemory, TrieError};
use mc_db::KvStore;
use mp_atomic::Hash;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("Invalid atomic sync configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Trie(#[from] TrieError),
}

/// The atomic trie of a node, with its shared memory applier and the sync settings both sides of a sync use.
pub struct AtomicBackend<S, M> {
    trie: Arc<AtomicTrie<S>>,
    applier: AtomicApplier<S, M>,
    params: AtomicSyncParams,
}

impl<S: KvStore, M: SharedMemory> AtomicBackend<S, M> {
    pub fn new(db: Arc<S>, shared_memory: M, params: AtomicSyncParams) -> Result<Self, BackendError> {
        params.validate()?;
        let trie = Arc::new(AtomicTrie::new(db, params.atomic_commit_interval)?);
        let applier = AtomicApplier::new(Arc::clone(&trie), shared_memory);
        Ok(Self { trie, applier, params })
    }

    pub fn trie(&self) -> &Arc<AtomicTrie<S>> {
        &self.trie
    }

    pub fn applier(&self) -> &AtomicApplier<S, M> {
        &self.applier
    }

    pub fn params(&self) -> &AtomicSyncParams {
        &self.params
    }

    /// A sync session towards `target_root`, the atomic trie root at `target_height`. The session is not started.
    pub fn syncer<C: LeafClient + 'static>(
        &self,
        client: C,
        target_root: Hash,
        target_height: u64,
    ) -> AtomicSyncer<S, C> {
        AtomicSyncer::new(client, Arc::clone(&self.trie), target_root, target_height, self.params.state_sync_request_size)
    }

    /// A leaf client over `network`, with the configured request timeout.
    pub fn network_client<N: NetworkClient>(&self, network: N) -> NetworkLeafClient<N> {
        NetworkLeafClient::new(network, self.params.request_timeout())
    }

    pub fn leafs_request_handler(&self) -> LeafsRequestHandler<S> {
        LeafsRequestHandler::new(Arc::clone(&self.trie)).with_response_bytes(self.params.state_sync_response_bytes)
    }

    /// The root at `height`, when peers may sync to it: `height` is a committed multiple of the state sync interval.
    pub fn syncable_point(&self, height: u64) -> Result<Option<CommitPoint>, TrieError> {
        let committed = self.trie.last_committed().is_some_and(|last| last.height >= height);
        if !committed || !self.params.is_syncable_height(height) {
            return Ok(None);
        }
        self.trie.root_at(height).map(Some)
    }

    /// The latest root peers may sync to.
    pub fn last_syncable_point(&self) -> Result<Option<CommitPoint>, TrieError> {
        let Some(last) = self.trie.last_committed() else { return Ok(None) };
        self.syncable_point(last.height - last.height % self.params.state_sync_commit_interval)
    }

    /// Every root peers may sync to, at heights `>= from`.
    pub fn syncable_points(&self, from: u64) -> Result<Vec<CommitPoint>, TrieError> {
        let mut points = self.trie.commit_points(from)?;
        points.retain(|point| self.params.is_syncable_height(point.height));
        Ok(points)
    }

    pub fn mark_apply_to_shared_memory_cursor(&self, height: u64) -> Result<(), ApplyError> {
        self.applier.mark_cursor(height)
    }

    pub fn apply_to_shared_memory(&self, target: u64) -> Result<usize, ApplyError> {
        self.applier.apply_up_to(target)
    }
}
