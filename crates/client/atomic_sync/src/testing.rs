//! In-process peers for sync tests.

use crate::{
    message::{self, LeafsRequest, LeafsResponse},
    ClientError, LeafClient, LeafsRequestHandler,
};
use async_trait::async_trait;
use mc_atomic_trie::AtomicTrie;
use mc_db::KvStore;
use std::sync::{Arc, Mutex};

type Intercept = Box<dyn FnMut(&LeafsRequest, LeafsResponse) -> Result<LeafsResponse, ClientError> + Send>;

/// A [`LeafClient`] served by a local [`LeafsRequestHandler`], through the wire codec.
///
/// The intercept hook sees every response before the syncer does, and may count, alter or replace it.
pub struct MockLeafClient<S> {
    handler: LeafsRequestHandler<S>,
    intercept: Mutex<Option<Intercept>>,
}

impl<S: KvStore> MockLeafClient<S> {
    pub fn new(trie: Arc<AtomicTrie<S>>) -> Self {
        Self::from_handler(LeafsRequestHandler::new(trie))
    }

    pub fn from_handler(handler: LeafsRequestHandler<S>) -> Self {
        Self { handler, intercept: Mutex::new(None) }
    }

    pub fn with_intercept(
        self,
        intercept: impl FnMut(&LeafsRequest, LeafsResponse) -> Result<LeafsResponse, ClientError> + Send + 'static,
    ) -> Self {
        *self.intercept.lock().expect("Poisoned lock") = Some(Box::new(intercept));
        self
    }
}

#[async_trait]
impl<S: KvStore> LeafClient for MockLeafClient<S> {
    async fn get_leafs(&self, request: LeafsRequest) -> Result<LeafsResponse, ClientError> {
        let bytes = self
            .handler
            .handle_bytes(&message::encode(&request)?)
            .map_err(|err| ClientError::Network(err.into()))?;
        let response: LeafsResponse = message::decode(&bytes)?;
        match self.intercept.lock().expect("Poisoned lock").as_mut() {
            Some(intercept) => intercept(&request, response),
            None => Ok(response),
        }
    }
}
