use crate::message::CodecError;
use mc_atomic_trie::{ProofError, TrieError};
use mp_atomic::Hash;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0:#}")]
    Network(anyhow::Error),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("Leafs request failed: {0}")]
    Client(#[from] ClientError),
    #[error("Invalid leafs response: {0}")]
    Proof(#[from] ProofError),
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error("Synced atomic trie root {got} does not match the target root {expected}")]
    RootMismatch { expected: Hash, got: Hash },
    #[error("Target height {target} is behind the last committed height {local}")]
    TargetBehindLocal { target: u64, local: u64 },
    #[error("Atomic trie sync was cancelled")]
    Cancelled,
    #[error("Another writer holds the atomic trie")]
    AlreadyRunning,
    #[error("Atomic trie sync was already started")]
    AlreadyStarted,
    #[error("Atomic trie sync was not started, or its result was already taken")]
    NotStarted,
    #[error("Atomic trie sync task stopped without reporting a result")]
    Aborted,
}

impl SyncError {
    /// Transport failures: retrying, possibly with another peer, may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Client(_))
    }

    /// The peer served data that does not match the requested root.
    pub fn is_untrusted_peer(&self) -> bool {
        matches!(self, SyncError::Proof(_))
    }
}
