//! Range proofs over the atomic trie.
//!
//! A proof for the key range `[start, end]` is the set of nodes whose subtree straddles a bound of the range. With
//! the returned leaves, this is enough to recompute every hash on the path from the root: subtrees entirely outside
//! the range are taken by hash, subtrees entirely inside are rebuilt from the leaves.

use crate::{
    node::{internal_hash, leaf_hash, value_hash, Node, NodeReader},
    trie::hash_leaves,
    TrieError,
};
use mp_atomic::{AtomicKey, Hash, ATOMIC_KEY_BITS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofNode {
    Internal { left: Hash, right: Hash },
    Leaf { key: AtomicKey, value_hash: Hash },
}

impl ProofNode {
    pub fn hash(&self) -> Hash {
        match self {
            ProofNode::Internal { left, right } => internal_hash(left, right),
            ProofNode::Leaf { key, value_hash } => leaf_hash(key, value_hash),
        }
    }
}

impl From<&Node> for ProofNode {
    fn from(node: &Node) -> Self {
        match node {
            Node::Internal { left, right } => ProofNode::Internal { left: *left, right: *right },
            Node::Leaf { key, value } => ProofNode::Leaf { key: *key, value_hash: value_hash(value) },
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("Response has {keys} keys but {values} values")]
    LengthMismatch { keys: usize, values: usize },
    #[error("Response has {got} leaves, more than the limit of {limit}")]
    TooManyLeaves { got: usize, limit: usize },
    #[error("Invalid key in response: {0}")]
    InvalidKey(#[from] mp_atomic::KeyLengthError),
    #[error("Keys are not strictly ascending at {0}")]
    KeysNotAscending(AtomicKey),
    #[error("Key {key} is outside of the requested range [{start}, {end}]")]
    KeyOutOfRange { key: AtomicKey, start: AtomicKey, end: AtomicKey },
    #[error("Proof is missing node {0}")]
    MissingProofNode(Hash),
    #[error("Proof goes deeper than the key length")]
    ProofTooDeep,
    #[error("Leaves do not match proof leaf {0}")]
    LeafMismatch(AtomicKey),
    #[error("Leaves do not hash to {expected} (got {computed})")]
    SubtreeMismatch { expected: Hash, computed: Hash },
}

/// Nodes proving the content of `[start, end]` under `root`.
pub fn prove_range<R: NodeReader>(
    reader: &R,
    root: Hash,
    start: &AtomicKey,
    end: &AtomicKey,
) -> Result<Vec<ProofNode>, TrieError> {
    let mut proof = Vec::new();
    if start <= end {
        collect_proof(reader, root, 0, AtomicKey::MIN, start, end, &mut proof)?;
    }
    Ok(proof)
}

fn collect_proof<R: NodeReader>(
    reader: &R,
    hash: Hash,
    depth: usize,
    path: AtomicKey,
    start: &AtomicKey,
    end: &AtomicKey,
    proof: &mut Vec<ProofNode>,
) -> Result<(), TrieError> {
    if hash.is_zero() {
        return Ok(());
    }
    let (lo, hi) = path.subtree_bounds(depth);
    let outside = &hi < start || &lo > end;
    let inside = start <= &lo && &hi <= end;
    if outside || inside {
        return Ok(());
    }
    let node = reader.load(&hash)?;
    proof.push(ProofNode::from(&node));
    if let Node::Internal { left, right } = node {
        if depth >= ATOMIC_KEY_BITS {
            return Err(TrieError::MalformedNode { hash, reason: "trie is deeper than the key length".into() });
        }
        collect_proof(reader, left, depth + 1, path.with_bit(depth, false), start, end, proof)?;
        collect_proof(reader, right, depth + 1, path.with_bit(depth, true), start, end, proof)?;
    }
    Ok(())
}

/// Upper bound of the range actually proven by a response of `count` leaves: a full response only covers the keys
/// up to its last leaf.
pub fn proven_range_end(count: usize, limit: usize, last: Option<&AtomicKey>, end: &AtomicKey) -> AtomicKey {
    match last {
        Some(last) if limit > 0 && count >= limit => *last,
        _ => *end,
    }
}

/// Checks that `leaves` are exactly the leaves of `root` in `[start, end]`, up to `limit` leaves.
///
/// A full page is proven up to its last leaf. A shorter page is complete when its proof covers the whole range.
/// Otherwise the server truncated it, and it must be proven up to its last leaf.
///
/// Returns whether more leaves may follow the last returned one.
pub fn verify_range(
    root: &Hash,
    start: &AtomicKey,
    end: &AtomicKey,
    limit: usize,
    leaves: &[(AtomicKey, &[u8])],
    proof: &[ProofNode],
) -> Result<bool, ProofError> {
    if leaves.len() > limit {
        return Err(ProofError::TooManyLeaves { got: leaves.len(), limit });
    }
    for pair in leaves.windows(2) {
        if pair[0].0 >= pair[1].0 {
            return Err(ProofError::KeysNotAscending(pair[1].0));
        }
    }
    for (key, _) in leaves.first().into_iter().chain(leaves.last()) {
        if key < start || key > end {
            return Err(ProofError::KeyOutOfRange { key: *key, start: *start, end: *end });
        }
    }

    let hashed: Vec<_> = leaves.iter().map(|(key, value)| (*key, value_hash(value))).collect();
    let nodes: HashMap<_, _> = proof.iter().map(|node| (node.hash(), node)).collect();
    let verify_up_to = |proven_end: AtomicKey| {
        RangeVerifier { start: *start, end: proven_end, nodes: &nodes }.verify(root, 0, AtomicKey::MIN, &hashed)
    };

    match leaves.last() {
        Some((last, _)) if leaves.len() >= limit => verify_up_to(*last).map(|()| last < end),
        Some((last, _)) => match verify_up_to(*end) {
            Ok(()) => Ok(false),
            Err(err) => verify_up_to(*last).map(|()| last < end).map_err(|_| err),
        },
        None => verify_up_to(*end).map(|()| false),
    }
}

struct RangeVerifier<'a> {
    start: AtomicKey,
    end: AtomicKey,
    nodes: &'a HashMap<Hash, &'a ProofNode>,
}

impl RangeVerifier<'_> {
    fn verify(
        &self,
        hash: &Hash,
        depth: usize,
        path: AtomicKey,
        leaves: &[(AtomicKey, Hash)],
    ) -> Result<(), ProofError> {
        let (lo, hi) = path.subtree_bounds(depth);
        if hi < self.start || lo > self.end {
            // leaves are all in range, so none can belong here
            return match leaves.first() {
                None => Ok(()),
                Some((key, _)) => Err(ProofError::LeafMismatch(*key)),
            };
        }
        if self.start <= lo && hi <= self.end {
            let computed = hash_leaves(depth, leaves);
            return if &computed == hash {
                Ok(())
            } else {
                Err(ProofError::SubtreeMismatch { expected: *hash, computed })
            };
        }
        if hash.is_zero() {
            return match leaves.first() {
                None => Ok(()),
                Some((key, _)) => Err(ProofError::LeafMismatch(*key)),
            };
        }

        match self.nodes.get(hash).ok_or(ProofError::MissingProofNode(*hash))? {
            ProofNode::Leaf { key, value_hash } => {
                let in_range = &self.start <= key && key <= &self.end;
                match leaves {
                    [] if !in_range => Ok(()),
                    [(leaf_key, leaf_value)] if in_range && leaf_key == key && leaf_value == value_hash => Ok(()),
                    _ => Err(ProofError::LeafMismatch(*key)),
                }
            }
            ProofNode::Internal { left, right } => {
                if depth >= ATOMIC_KEY_BITS {
                    return Err(ProofError::ProofTooDeep);
                }
                let split = leaves.partition_point(|(key, _)| !key.bit(depth));
                self.verify(left, depth + 1, path.with_bit(depth, false), &leaves[..split])?;
                self.verify(right, depth + 1, path.with_bit(depth, true), &leaves[split..])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeSet;
    use assert_matches::assert_matches;
    use mp_atomic::ChainId;
    use proptest::prelude::*;
    use rstest::{fixture, rstest};
    use std::collections::BTreeMap;

    struct TestTrie {
        nodes: NodeSet,
        root: Hash,
    }

    impl TestTrie {
        fn new(entries: &BTreeMap<AtomicKey, Vec<u8>>) -> Self {
            let entries: Vec<_> = entries.iter().map(|(k, v)| (*k, v.as_slice())).collect();
            let mut nodes = NodeSet::default();
            let root = crate::trie::insert_batch(&NodeSet::default(), Hash::ZERO, &entries, &mut nodes).unwrap();
            Self { nodes, root }
        }

        /// Serves a range the same way the leafs request handler does.
        fn serve(
            &self,
            start: &AtomicKey,
            end: &AtomicKey,
            limit: usize,
        ) -> (Vec<(AtomicKey, Vec<u8>)>, Vec<ProofNode>) {
            self.serve_truncated(start, end, limit, usize::MAX)
        }

        /// Like `serve`, with the page cut after `keep` leaves and proven up to its last leaf.
        fn serve_truncated(
            &self,
            start: &AtomicKey,
            end: &AtomicKey,
            limit: usize,
            keep: usize,
        ) -> (Vec<(AtomicKey, Vec<u8>)>, Vec<ProofNode>) {
            let mut leaves = crate::trie::leaves(&self.nodes, self.root, start, end, limit).unwrap();
            let proven_end = if leaves.len() > keep {
                leaves.truncate(keep);
                leaves[keep - 1].0
            } else {
                proven_range_end(leaves.len(), limit, leaves.last().map(|(k, _)| k), end)
            };
            let proof = prove_range(&self.nodes, self.root, start, &proven_end).unwrap();
            (leaves, proof)
        }
    }

    fn borrowed(leaves: &[(AtomicKey, Vec<u8>)]) -> Vec<(AtomicKey, &[u8])> {
        leaves.iter().map(|(k, v)| (*k, v.as_slice())).collect()
    }

    #[fixture]
    fn trie() -> TestTrie {
        let entries = (1..=100u64)
            .flat_map(|h| [1u8, 2].map(|c| (AtomicKey::new(h, &ChainId([c; 32])), [h.to_be_bytes(), [c; 8]].concat())))
            .collect();
        TestTrie::new(&entries)
    }

    #[rstest]
    #[case::whole_range(AtomicKey::MIN, AtomicKey::MAX, 1000, 200, false)]
    #[case::first_page(AtomicKey::MIN, AtomicKey::MAX, 16, 16, true)]
    #[case::middle(AtomicKey::height_start(10), AtomicKey::height_end(20), 1000, 22, false)]
    #[case::exactly_full(AtomicKey::height_start(10), AtomicKey::height_end(20), 22, 22, true)]
    #[case::empty_range(AtomicKey::height_start(500), AtomicKey::MAX, 16, 0, false)]
    #[case::mid_key_start(AtomicKey::new(50, &ChainId([1; 32])).successor().unwrap(), AtomicKey::MAX, 5, 5, true)]
    fn valid_ranges_verify(
        trie: TestTrie,
        #[case] start: AtomicKey,
        #[case] end: AtomicKey,
        #[case] limit: usize,
        #[case] expected_len: usize,
        #[case] expected_more: bool,
    ) {
        let (leaves, proof) = trie.serve(&start, &end, limit);
        assert_eq!(leaves.len(), expected_len);
        assert_eq!(verify_range(&trie.root, &start, &end, limit, &borrowed(&leaves), &proof), Ok(expected_more));
    }

    #[rstest]
    #[case::first_leaves(AtomicKey::MIN, 1000, 50)]
    #[case::single_leaf(AtomicKey::MIN, 1000, 1)]
    #[case::below_limit(AtomicKey::height_start(30), 100, 99)]
    #[case::mid_key_start(AtomicKey::new(50, &ChainId([1; 32])).successor().unwrap(), 64, 7)]
    fn truncated_page_verifies_up_to_its_last_leaf(
        trie: TestTrie,
        #[case] start: AtomicKey,
        #[case] limit: usize,
        #[case] keep: usize,
    ) {
        let (leaves, proof) = trie.serve_truncated(&start, &AtomicKey::MAX, limit, keep);
        assert_eq!(leaves.len(), keep);
        assert_eq!(verify_range(&trie.root, &start, &AtomicKey::MAX, limit, &borrowed(&leaves), &proof), Ok(true));
    }

    #[rstest]
    fn truncated_page_cannot_hide_leaves(trie: TestTrie) {
        // proven up to the 20th leaf, but the 10th is missing
        let (mut leaves, proof) = trie.serve_truncated(&AtomicKey::MIN, &AtomicKey::MAX, 1000, 20);
        leaves.remove(9);
        assert!(verify_range(&trie.root, &AtomicKey::MIN, &AtomicKey::MAX, 1000, &borrowed(&leaves), &proof).is_err());
    }

    #[rstest]
    fn dropped_leaf_is_rejected(trie: TestTrie) {
        let (mut leaves, proof) = trie.serve(&AtomicKey::MIN, &AtomicKey::MAX, 1000);
        leaves.remove(57);
        assert!(verify_range(&trie.root, &AtomicKey::MIN, &AtomicKey::MAX, 1000, &borrowed(&leaves), &proof).is_err());
    }

    #[rstest]
    fn dropped_last_leaf_of_page_is_rejected(trie: TestTrie) {
        // the page now looks complete, while more leaves exist
        let (mut leaves, proof) = trie.serve(&AtomicKey::MIN, &AtomicKey::MAX, 16);
        leaves.pop();
        assert!(verify_range(&trie.root, &AtomicKey::MIN, &AtomicKey::MAX, 16, &borrowed(&leaves), &proof).is_err());
    }

    #[rstest]
    fn tampered_value_is_rejected(trie: TestTrie) {
        let (mut leaves, proof) = trie.serve(&AtomicKey::MIN, &AtomicKey::MAX, 16);
        leaves[3].1 = b"forged".to_vec();
        assert_matches!(
            verify_range(&trie.root, &AtomicKey::MIN, &AtomicKey::MAX, 16, &borrowed(&leaves), &proof),
            Err(ProofError::SubtreeMismatch { .. } | ProofError::LeafMismatch(_))
        );
    }

    #[rstest]
    fn wrong_root_is_rejected(trie: TestTrie) {
        let (leaves, proof) = trie.serve(&AtomicKey::MIN, &AtomicKey::MAX, 16);
        assert!(verify_range(&Hash([7; 32]), &AtomicKey::MIN, &AtomicKey::MAX, 16, &borrowed(&leaves), &proof).is_err());
    }

    #[rstest]
    fn missing_proof_is_rejected(trie: TestTrie) {
        let (leaves, _) = trie.serve(&AtomicKey::MIN, &AtomicKey::MAX, 16);
        assert_matches!(
            verify_range(&trie.root, &AtomicKey::MIN, &AtomicKey::MAX, 16, &borrowed(&leaves), &[]),
            Err(ProofError::MissingProofNode(_))
        );
    }

    #[rstest]
    fn malformed_responses_are_rejected(trie: TestTrie) {
        let (leaves, proof) = trie.serve(&AtomicKey::height_start(10), &AtomicKey::MAX, 4);
        let mut swapped = leaves.clone();
        swapped.swap(0, 1);
        assert_matches!(
            verify_range(&trie.root, &AtomicKey::height_start(10), &AtomicKey::MAX, 4, &borrowed(&swapped), &proof),
            Err(ProofError::KeysNotAscending(_))
        );
        assert_matches!(
            verify_range(&trie.root, &AtomicKey::height_start(11), &AtomicKey::MAX, 4, &borrowed(&leaves), &proof),
            Err(ProofError::KeyOutOfRange { .. })
        );
        assert_matches!(
            verify_range(&trie.root, &AtomicKey::height_start(10), &AtomicKey::MAX, 3, &borrowed(&leaves), &proof),
            Err(ProofError::TooManyLeaves { got: 4, limit: 3 })
        );
    }

    #[test]
    fn empty_trie_proves_empty_range() {
        let trie = TestTrie::new(&BTreeMap::new());
        let (leaves, proof) = trie.serve(&AtomicKey::MIN, &AtomicKey::MAX, 16);
        assert!(leaves.is_empty() && proof.is_empty());
        assert_eq!(verify_range(&Hash::ZERO, &AtomicKey::MIN, &AtomicKey::MAX, 16, &[], &[]), Ok(false));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Paging through the whole trie with verified ranges yields exactly its content, pages cut short included.
        #[test]
        fn paging_reconstructs_trie(
            entries in proptest::collection::btree_map(
                (0..200u64, 0..3u8).prop_map(|(h, c)| AtomicKey::new(h, &ChainId([c; 32]))),
                proptest::collection::vec(any::<u8>(), 0..4),
                0..150,
            ),
            limit in 1..40usize,
            keep in 1..50usize,
        ) {
            let trie = TestTrie::new(&entries);
            let mut start = AtomicKey::MIN;
            let mut synced = Vec::new();
            loop {
                let (leaves, proof) = trie.serve_truncated(&start, &AtomicKey::MAX, limit, keep);
                let more = verify_range(&trie.root, &start, &AtomicKey::MAX, limit, &borrowed(&leaves), &proof).unwrap();
                synced.extend(leaves.iter().cloned());
                if !more {
                    break;
                }
                match leaves.last().and_then(|(k, _)| k.successor()) {
                    Some(next) => start = next,
                    None => break,
                }
            }
            prop_assert_eq!(synced, entries.into_iter().collect::<Vec<_>>());
        }
    }
}
