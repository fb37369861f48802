use mc_db::DbError;
use mp_atomic::{AtomicKey, Hash};
use std::borrow::Cow;

#[derive(thiserror::Error, Debug)]
pub enum TrieError {
    #[error("Storage error: {0}")]
    Db(#[from] DbError),
    #[error("Missing trie node {0}")]
    MissingNode(Hash),
    #[error("Malformed trie node {hash}: {reason}")]
    MalformedNode { hash: Hash, reason: Cow<'static, str> },
    #[error("Malformed atomic requests at key {key}: {source}")]
    MalformedValue { key: AtomicKey, source: bincode::Error },
    #[error("Malformed metadata `{key}`")]
    MalformedMetadata { key: &'static str },
    #[error("No atomic trie root is indexed at or below height {0}")]
    NotFound(u64),
    #[error("Height {height} is not committed yet (last committed height: {last_committed:?})")]
    NotCommitted { height: u64, last_committed: Option<u64> },
    #[error("Out of order write at height {height}, the handle is already at height {handle_height}")]
    OutOfOrder { height: u64, handle_height: u64 },
    #[error("Height {height} belongs to an interval that is already committed (committed height {committed})")]
    AlreadyCommitted { height: u64, committed: u64 },
    #[error("Conflicting root at height {height}: indexed {indexed}, got {got}")]
    ConflictingRoot { height: u64, indexed: Hash, got: Hash },
    #[error("Commit height {0} must be committed first")]
    UncommittedBoundary(u64),
    #[error("Invalid commit interval {0}")]
    InvalidCommitInterval(u64),
}
