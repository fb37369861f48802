//! Height indexed Merkle trie of atomic operations.
//!
//! - [`AtomicTrie`]: the trie itself and its commit height index.
//! - [`proof`]: range proofs served to, and verified by, syncing nodes.
//! - [`AtomicApplier`]: replays trie content into [`SharedMemory`].

mod applier;
mod atomic_trie;
mod error;
pub mod node;
pub mod proof;
pub mod trie;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use applier::{ApplyError, AtomicApplier, KvSharedMemory, SharedMemory};
pub use atomic_trie::{AtomicTrie, CommitOutcome, CommitPoint, TrieHandle, WriterGuard, DEFAULT_COMMIT_INTERVAL};
pub use error::TrieError;
pub use node::NodeSet;
pub use proof::{ProofError, ProofNode};
