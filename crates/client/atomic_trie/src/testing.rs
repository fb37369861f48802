//! Helpers to build tries in tests.

use crate::{AtomicTrie, CommitPoint};
use mc_db::KvStore;
use mp_atomic::{AtomicOps, AtomicRequests, ChainId, Element};
use std::ops::RangeInclusive;

pub fn chain(n: u8) -> ChainId {
    ChainId([n; 32])
}

/// One put on chain `n` at `height`, with a key unique to that height.
pub fn put_at(height: u64, n: u8) -> AtomicRequests {
    let key = [height.to_be_bytes().as_slice(), &[n]].concat();
    let value = format!("value-{height}-{n}").into_bytes();
    AtomicRequests { remove_requests: vec![], put_requests: vec![Element { key, value, traits: vec![] }] }
}

/// Operations of two chains at `height`.
pub fn ops_for(height: u64) -> AtomicOps {
    AtomicOps::from([(chain(1), put_at(height, 1)), (chain(2), put_at(height, 2))])
}

/// Operations of a single chain at `height`: one leaf per height.
pub fn single_op_for(height: u64) -> AtomicOps {
    AtomicOps::from([(chain(1), put_at(height, 1))])
}

/// Writes `ops(height)` at every height of `heights` on top of the last committed root, committing as it goes.
/// Returns the last commit point.
pub fn populate_with<S: KvStore>(
    trie: &AtomicTrie<S>,
    heights: RangeInclusive<u64>,
    ops: impl Fn(u64) -> AtomicOps,
) -> Option<CommitPoint> {
    let mut handle = trie.open_last_committed();
    for height in heights {
        trie.update(&mut handle, height, &ops(height)).expect("Updating the atomic trie");
        trie.commit(&mut handle).expect("Committing the atomic trie");
    }
    trie.last_committed()
}

pub fn populate<S: KvStore>(trie: &AtomicTrie<S>, heights: RangeInclusive<u64>) -> Option<CommitPoint> {
    populate_with(trie, heights, ops_for)
}
