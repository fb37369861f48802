//! Operations on the binary Merkle trie, keyed by [`AtomicKey`] bits (most significant first).
//!
//! Nodes are content addressed and never mutated: an insertion creates new nodes along the modified paths and
//! leaves every other subtree shared with the previous root.

use crate::{
    node::{internal_hash, leaf_hash, Node, NodeReader, NodeSet},
    TrieError,
};
use mp_atomic::{AtomicKey, Hash, ATOMIC_KEY_BITS};

/// Inserts `entries` (strictly ascending keys) under `root`, returning the new root. Existing values are replaced.
pub fn insert_batch<R: NodeReader>(
    reader: &R,
    root: Hash,
    entries: &[(AtomicKey, &[u8])],
    nodes: &mut NodeSet,
) -> Result<Hash, TrieError> {
    debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0), "entries must be sorted and unique");
    TrieBuilder { reader, nodes }.insert(root, 0, entries)
}

struct TrieBuilder<'a, R> {
    reader: &'a R,
    nodes: &'a mut NodeSet,
}

impl<R: NodeReader> TrieBuilder<'_, R> {
    fn insert(&mut self, hash: Hash, depth: usize, entries: &[(AtomicKey, &[u8])]) -> Result<Hash, TrieError> {
        if entries.is_empty() {
            return Ok(hash);
        }
        if hash.is_zero() {
            return Ok(self.build(depth, entries));
        }
        match self.reader.load(&hash)? {
            Node::Leaf { key, value } => match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                // overwritten
                Ok(_) => Ok(self.build(depth, entries)),
                Err(pos) => {
                    let mut merged = Vec::with_capacity(entries.len() + 1);
                    merged.extend_from_slice(&entries[..pos]);
                    merged.push((key, value.as_slice()));
                    merged.extend_from_slice(&entries[pos..]);
                    Ok(self.build(depth, &merged))
                }
            },
            Node::Internal { left, right } => {
                let (l, r) = entries.split_at(split_point(depth, entries));
                let left = self.insert(left, depth + 1, l)?;
                let right = self.insert(right, depth + 1, r)?;
                Ok(self.nodes.insert(Node::Internal { left, right }))
            }
        }
    }

    fn build(&mut self, depth: usize, entries: &[(AtomicKey, &[u8])]) -> Hash {
        match entries {
            [] => Hash::ZERO,
            [(key, value)] => self.nodes.insert(Node::Leaf { key: *key, value: value.to_vec() }),
            _ => {
                let (l, r) = entries.split_at(split_point(depth, entries));
                let left = self.build(depth + 1, l);
                let right = self.build(depth + 1, r);
                self.nodes.insert(Node::Internal { left, right })
            }
        }
    }
}

/// Index of the first entry going to the right child at `depth`.
fn split_point<T>(depth: usize, entries: &[(AtomicKey, T)]) -> usize {
    entries.partition_point(|(key, _)| !key.bit(depth))
}

/// Root of the trie holding exactly `leaves` (strictly ascending keys, paired with their value hashes), rooted at
/// `depth`. Nothing is stored.
pub fn hash_leaves(depth: usize, leaves: &[(AtomicKey, Hash)]) -> Hash {
    match leaves {
        [] => Hash::ZERO,
        [(key, value_hash)] => leaf_hash(key, value_hash),
        _ => {
            let (l, r) = leaves.split_at(split_point(depth, leaves));
            internal_hash(&hash_leaves(depth + 1, l), &hash_leaves(depth + 1, r))
        }
    }
}

pub fn get<R: NodeReader>(reader: &R, root: Hash, key: &AtomicKey) -> Result<Option<Vec<u8>>, TrieError> {
    let mut hash = root;
    for depth in 0..=ATOMIC_KEY_BITS {
        if hash.is_zero() {
            return Ok(None);
        }
        match reader.load(&hash)? {
            Node::Leaf { key: leaf_key, value } => return Ok((&leaf_key == key).then_some(value)),
            Node::Internal { .. } if depth >= ATOMIC_KEY_BITS => break,
            Node::Internal { left, right } => hash = if key.bit(depth) { right } else { left },
        }
    }
    Err(TrieError::MalformedNode { hash, reason: "trie is deeper than the key length".into() })
}

/// Up to `limit` leaves with keys in `[start, end]`, in ascending key order.
pub fn leaves<R: NodeReader>(
    reader: &R,
    root: Hash,
    start: &AtomicKey,
    end: &AtomicKey,
    limit: usize,
) -> Result<Vec<(AtomicKey, Vec<u8>)>, TrieError> {
    let mut out = Vec::new();
    if start <= end && limit > 0 {
        collect_leaves(reader, root, 0, AtomicKey::MIN, start, end, limit, &mut out)?;
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn collect_leaves<R: NodeReader>(
    reader: &R,
    hash: Hash,
    depth: usize,
    path: AtomicKey,
    start: &AtomicKey,
    end: &AtomicKey,
    limit: usize,
    out: &mut Vec<(AtomicKey, Vec<u8>)>,
) -> Result<(), TrieError> {
    if hash.is_zero() || out.len() >= limit {
        return Ok(());
    }
    let (lo, hi) = path.subtree_bounds(depth);
    if &hi < start || &lo > end {
        return Ok(());
    }
    match reader.load(&hash)? {
        Node::Leaf { key, value } => {
            if start <= &key && &key <= end {
                out.push((key, value));
            }
        }
        Node::Internal { left, right } => {
            if depth >= ATOMIC_KEY_BITS {
                return Err(TrieError::MalformedNode { hash, reason: "trie is deeper than the key length".into() });
            }
            collect_leaves(reader, left, depth + 1, path.with_bit(depth, false), start, end, limit, out)?;
            collect_leaves(reader, right, depth + 1, path.with_bit(depth, true), start, end, limit, out)?;
        }
    }
    Ok(())
}
