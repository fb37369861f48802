
use crate::{AtomicSyncParams, NetworkType};
use mc_atomic_trie::{AtomicTrie, CommitPoint};
use mc_db::InMemoryStorage;
use mp_atomic::AtomicOps;
use std::sync::Arc;

pub type TestTrie = Arc<AtomicTrie<InMemoryStorage>>;

pub fn new_trie(commit_interval: u64) -> TestTrie {
    Arc::new(AtomicTrie::new(Arc::new(InMemoryStorage::new()), commit_interval).unwrap())
}

pub fn local_params(commit_interval: u64, syncable_interval: u64) -> AtomicSyncParams {
    AtomicSyncParams {
        network: NetworkType::Local,
        atomic_commit_interval: commit_interval,
        state_sync_commit_interval: syncable_interval,
        ..Default::default()
    }
}

/// Grows `trie` up to `height` with `ops`, and returns the root at `height`.
pub fn grow(trie: &AtomicTrie<InMemoryStorage>, height: u64, ops: impl Fn(u64) -> AtomicOps) -> CommitPoint {
    let mut handle = trie.open_last_committed();
    let from = handle.base().map_or(1, |base| base.height + 1);
    for h in from..=height {
        trie.update(&mut handle, h, &ops(h)).unwrap();
    }
    trie.commit(&mut handle).unwrap();
    trie.finalize(&handle).unwrap()
}

/// `client` indexes every commit height up to `height`, with the same roots as `server`.
pub fn assert_same_commits(client: &AtomicTrie<InMemoryStorage>, server: &AtomicTrie<InMemoryStorage>, height: u64) {
    let up_to = |trie: &AtomicTrie<InMemoryStorage>| -> Vec<CommitPoint> {
        trie.commit_points(0).unwrap().into_iter().take_while(|point| point.height <= height).collect()
    };
    let synced = up_to(client);
    assert_eq!(synced.len() as u64, height / client.commit_interval() + 1);
    assert_eq!(synced, up_to(server));
}
