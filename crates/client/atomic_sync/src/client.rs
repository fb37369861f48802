use crate::{
    message::{self, LeafsRequest, LeafsResponse},
    ClientError,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Request/response transport to a peer. Peer selection is up to the implementation.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn send_request(&self, request: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

/// Fetches leaf ranges of the atomic trie from peers. Responses are not verified.
#[async_trait]
pub trait LeafClient: Send + Sync {
    async fn get_leafs(&self, request: LeafsRequest) -> Result<LeafsResponse, ClientError>;
}

#[async_trait]
impl<T: LeafClient + ?Sized> LeafClient for Arc<T> {
    async fn get_leafs(&self, request: LeafsRequest) -> Result<LeafsResponse, ClientError> {
        (**self).get_leafs(request).await
    }
}

/// [`LeafClient`] over a [`NetworkClient`], with a timeout on every request.
#[derive(Debug, Clone)]
pub struct NetworkLeafClient<N> {
    network: N,
    timeout: Duration,
}

impl<N: NetworkClient> NetworkLeafClient<N> {
    pub fn new(network: N, timeout: Duration) -> Self {
        Self { network, timeout }
    }
}

#[async_trait]
impl<N: NetworkClient> LeafClient for NetworkLeafClient<N> {
    async fn get_leafs(&self, request: LeafsRequest) -> Result<LeafsResponse, ClientError> {
        let request = message::encode(&request)?;
        let response = tokio::time::timeout(self.timeout, self.network.send_request(request))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
            .map_err(ClientError::Network)?;
        Ok(message::decode(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LeafsRequestHandler;
    use assert_matches::assert_matches;
    use mc_atomic_trie::{testing::populate, AtomicTrie};
    use mc_db::InMemoryStorage;
    use mp_atomic::AtomicKey;

    struct SlowNetwork;

    #[async_trait]
    impl NetworkClient for SlowNetwork {
        async fn send_request(&self, request: Vec<u8>) -> anyhow::Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(request)
        }
    }

    fn request(root: mp_atomic::Hash) -> LeafsRequest {
        LeafsRequest { root, start: AtomicKey::MIN, end: AtomicKey::MAX, limit: 16 }
    }

    #[tokio::test]
    async fn goes_through_the_codec() {
        let trie = Arc::new(AtomicTrie::new(Arc::new(InMemoryStorage::new()), 4).unwrap());
        let root = populate(&trie, 1..=8).unwrap().root;
        let handler = LeafsRequestHandler::new(Arc::clone(&trie));

        let mut network = MockNetworkClient::new();
        network
            .expect_send_request()
            .times(1)
            .returning(move |bytes| handler.handle_bytes(&bytes).map_err(anyhow::Error::from));
        let client = NetworkLeafClient::new(network, Duration::from_secs(1));

        let response = client.get_leafs(request(root)).await.unwrap();
        assert_eq!(response.keys.len(), 16);
        assert_eq!(response.keys.len(), response.vals.len());
    }

    #[tokio::test]
    async fn network_and_codec_errors() {
        let mut seq = mockall::Sequence::new();
        let mut network = MockNetworkClient::new();
        network
            .expect_send_request()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(anyhow::anyhow!("peer disconnected")));
        network.expect_send_request().times(1).in_sequence(&mut seq).returning(|_| Ok(vec![0, 9]));
        let client = NetworkLeafClient::new(network, Duration::from_secs(1));

        assert_matches!(client.get_leafs(request(mp_atomic::Hash::ZERO)).await, Err(ClientError::Network(_)));
        assert_matches!(
            client.get_leafs(request(mp_atomic::Hash::ZERO)).await,
            Err(ClientError::Codec(crate::message::CodecError::UnsupportedVersion(9)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let client = NetworkLeafClient::new(SlowNetwork, Duration::from_millis(500));
        assert_matches!(
            client.get_leafs(request(mp_atomic::Hash::ZERO)).await,
            Err(ClientError::Timeout(timeout)) if timeout == Duration::from_millis(500)
        );
    }
}
