use crate::TrieError;
use mc_db::{column::ATOMIC_TRIE_NODES_COLUMN, KvStore, WriteBatch};
use mp_atomic::{AtomicKey, Hash, ATOMIC_KEY_LEN, HASH_LEN};
use std::{collections::BTreeMap, sync::Arc};

const LEAF_TAG: u8 = 0x00;
const INTERNAL_TAG: u8 = 0x01;

/// A node of the binary Merkle trie.
///
/// Empty subtrees are not stored: they are referenced by [`Hash::ZERO`]. A subtree holding a single key is always a
/// [`Node::Leaf`], which makes the shape of the trie, and therefore its root, a function of its content only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal { left: Hash, right: Hash },
    Leaf { key: AtomicKey, value: Vec<u8> },
}

pub fn leaf_hash(key: &AtomicKey, value_hash: &Hash) -> Hash {
    Hash::keccak([[LEAF_TAG].as_slice(), key.as_bytes().as_slice(), value_hash.as_bytes().as_slice()])
}

pub fn internal_hash(left: &Hash, right: &Hash) -> Hash {
    Hash::keccak([[INTERNAL_TAG].as_slice(), left.as_bytes().as_slice(), right.as_bytes().as_slice()])
}

pub fn value_hash(value: &[u8]) -> Hash {
    Hash::keccak([value])
}

impl Node {
    pub fn hash(&self) -> Hash {
        match self {
            Node::Internal { left, right } => internal_hash(left, right),
            Node::Leaf { key, value } => leaf_hash(key, &value_hash(value)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Node::Internal { left, right } => {
                [[INTERNAL_TAG].as_slice(), left.as_bytes().as_slice(), right.as_bytes().as_slice()].concat()
            }
            Node::Leaf { key, value } => [[LEAF_TAG].as_slice(), key.as_bytes().as_slice(), value.as_slice()].concat(),
        }
    }

    pub fn decode(hash: &Hash, bytes: &[u8]) -> Result<Self, TrieError> {
        let malformed = |reason: &'static str| TrieError::MalformedNode { hash: *hash, reason: reason.into() };
        match bytes.split_first() {
            Some((&INTERNAL_TAG, rest)) => {
                if rest.len() != 2 * HASH_LEN {
                    return Err(malformed("internal node must hold two hashes"));
                }
                let (left, right) = rest.split_at(HASH_LEN);
                Ok(Node::Internal {
                    left: Hash::from_slice(left).ok_or_else(|| malformed("invalid left hash"))?,
                    right: Hash::from_slice(right).ok_or_else(|| malformed("invalid right hash"))?,
                })
            }
            Some((&LEAF_TAG, rest)) => {
                if rest.len() < ATOMIC_KEY_LEN {
                    return Err(malformed("leaf node is shorter than its key"));
                }
                let (key, value) = rest.split_at(ATOMIC_KEY_LEN);
                let key = AtomicKey::from_slice(key).map_err(|_| malformed("invalid leaf key"))?;
                Ok(Node::Leaf { key, value: value.to_vec() })
            }
            _ => Err(malformed("unknown node tag")),
        }
    }
}

/// Source of trie nodes, by hash.
pub trait NodeReader {
    fn node(&self, hash: &Hash) -> Result<Option<Node>, TrieError>;

    fn load(&self, hash: &Hash) -> Result<Node, TrieError> {
        self.node(hash)?.ok_or(TrieError::MissingNode(*hash))
    }
}

/// Nodes created by a trie update, not yet persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet(BTreeMap<Hash, Node>);

impl NodeSet {
    pub fn insert(&mut self, node: Node) -> Hash {
        let hash = node.hash();
        self.0.insert(hash, node);
        hash
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.0.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: NodeSet) {
        self.0.extend(other.0)
    }

    pub fn write_to(&self, batch: &mut WriteBatch) {
        for (hash, node) in &self.0 {
            batch.put(ATOMIC_TRIE_NODES_COLUMN, hash.0, node.encode());
        }
    }
}

impl NodeReader for NodeSet {
    fn node(&self, hash: &Hash) -> Result<Option<Node>, TrieError> {
        Ok(self.0.get(hash).cloned())
    }
}

/// Persisted trie nodes.
#[derive(Debug)]
pub struct TrieDb<S> {
    db: Arc<S>,
}

impl<S> Clone for TrieDb<S> {
    fn clone(&self) -> Self {
        Self { db: Arc::clone(&self.db) }
    }
}

impl<S: KvStore> TrieDb<S> {
    pub fn new(db: Arc<S>) -> Self {
        Self { db }
    }

    pub fn contains(&self, hash: &Hash) -> Result<bool, TrieError> {
        Ok(self.db.contains(ATOMIC_TRIE_NODES_COLUMN, hash.as_bytes())?)
    }
}

impl<S: KvStore> NodeReader for TrieDb<S> {
    fn node(&self, hash: &Hash) -> Result<Option<Node>, TrieError> {
        let Some(bytes) = self.db.get(ATOMIC_TRIE_NODES_COLUMN, hash.as_bytes())? else { return Ok(None) };
        Node::decode(hash, &bytes).map(Some)
    }
}
