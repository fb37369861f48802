use crate::message::{self, CodecError, LeafsRequest, LeafsResponse, MAX_LEAVES_LIMIT};
use mc_atomic_trie::{proof, AtomicTrie, TrieError};
use mc_db::KvStore;
use mp_atomic::{AtomicKey, Hash, ATOMIC_KEY_LEN};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("Invalid leafs request: {0}")]
    InvalidRequest(&'static str),
    #[error("Unknown atomic trie root {0}")]
    MissingRoot(Hash),
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Serves leaf ranges of the local atomic trie, with their range proof.
///
/// Responses are cut short once their keys and values exceed the response budget. A cut response is proven up to
/// its last leaf, and the client asks for the rest.
#[derive(Debug)]
pub struct LeafsRequestHandler<S> {
    trie: Arc<AtomicTrie<S>>,
    response_bytes: usize,
}

impl<S> Clone for LeafsRequestHandler<S> {
    fn clone(&self) -> Self {
        Self { trie: Arc::clone(&self.trie), response_bytes: self.response_bytes }
    }
}

impl<S: KvStore> LeafsRequestHandler<S> {
    pub fn new(trie: Arc<AtomicTrie<S>>) -> Self {
        Self { trie, response_bytes: usize::MAX }
    }

    /// At least one leaf is always served.
    pub fn with_response_bytes(mut self, response_bytes: usize) -> Self {
        self.response_bytes = response_bytes;
        self
    }

    #[tracing::instrument(skip(self), fields(root = %request.root, start = %request.start, limit = request.limit))]
    pub fn handle(&self, request: &LeafsRequest) -> Result<LeafsResponse, HandlerError> {
        if request.limit == 0 {
            return Err(HandlerError::InvalidRequest("limit must be positive"));
        }
        if request.start > request.end {
            return Err(HandlerError::InvalidRequest("start key is after the end key"));
        }
        if !self.trie.has_root(&request.root)? {
            return Err(HandlerError::MissingRoot(request.root));
        }

        let limit = usize::from(request.limit.min(MAX_LEAVES_LIMIT));
        let mut leaves = self.trie.leaves(request.root, &request.start, &request.end, limit)?;
        let kept = self.within_budget(&leaves);
        let proven_end = if kept < leaves.len() {
            leaves.truncate(kept);
            leaves[kept - 1].0
        } else {
            proof::proven_range_end(leaves.len(), limit, leaves.last().map(|(k, _)| k), &request.end)
        };
        let proof = self.trie.prove_range(request.root, &request.start, &proven_end)?;

        tracing::debug!("Serving {} atomic trie leaves with {} proof nodes", leaves.len(), proof.len());
        let (keys, vals) = leaves.into_iter().map(|(key, value)| (key.as_bytes().to_vec(), value)).unzip();
        Ok(LeafsResponse { keys, vals, proof })
    }

    fn within_budget(&self, leaves: &[(AtomicKey, Vec<u8>)]) -> usize {
        let mut size = 0usize;
        leaves
            .iter()
            .position(|(_, value)| {
                size = size.saturating_add(ATOMIC_KEY_LEN + value.len());
                size > self.response_bytes
            })
            .map_or(leaves.len(), |over| over.max(1))
    }

    /// Decodes a request, and encodes its response.
    pub fn handle_bytes(&self, request: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let request: LeafsRequest = message::decode(request)?;
        Ok(message::encode(&self.handle(&request)?)?)
    }
}
