//! Leaf range messages exchanged between a syncing node and its peers.
//!
//! Messages are prefixed with a 2-byte big endian codec version, followed by their bincode encoding.

use mc_atomic_trie::ProofNode;
use mp_atomic::{AtomicKey, Hash};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub const CODEC_VERSION: u16 = 0;
/// Most leaves a peer serves in a single response.
pub const MAX_LEAVES_LIMIT: u16 = 1024;

/// Asks for up to `limit` leaves of the trie at `root` in `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafsRequest {
    pub root: Hash,
    pub start: AtomicKey,
    pub end: AtomicKey,
    pub limit: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafsResponse {
    pub keys: Vec<Vec<u8>>,
    pub vals: Vec<Vec<u8>>,
    pub proof: Vec<ProofNode>,
}

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("Message is too short to hold a codec version")]
    Truncated,
    #[error("Unsupported codec version {0}")]
    UnsupportedVersion(u16),
    #[error("Malformed message: {0}")]
    Malformed(#[from] bincode::Error),
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let mut out = CODEC_VERSION.to_be_bytes().to_vec();
    bincode::serialize_into(&mut out, message)?;
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let (version, payload) = bytes.split_first_chunk::<2>().ok_or(CodecError::Truncated)?;
    match u16::from_be_bytes(*version) {
        CODEC_VERSION => Ok(bincode::deserialize(payload)?),
        version => Err(CodecError::UnsupportedVersion(version)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mp_atomic::ChainId;

    fn request() -> LeafsRequest {
        LeafsRequest {
            root: Hash([3; 32]),
            start: AtomicKey::new(7, &ChainId([1; 32])),
            end: AtomicKey::MAX,
            limit: MAX_LEAVES_LIMIT,
        }
    }

    #[test]
    fn versioned_encoding() {
        let bytes = encode(&request()).unwrap();
        assert_eq!(&bytes[..2], &[0, 0]);
        assert_eq!(decode::<LeafsRequest>(&bytes).unwrap(), request());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode(&request()).unwrap();
        bytes[1] = 1;
        assert_matches!(decode::<LeafsRequest>(&bytes), Err(CodecError::UnsupportedVersion(1)));
        assert_matches!(decode::<LeafsRequest>(&[0]), Err(CodecError::Truncated));
        assert_matches!(decode::<LeafsRequest>(&[0, 0, 1]), Err(CodecError::Malformed(_)));
    }

    #[test]
    fn response_keeps_proof() {
        let response = LeafsResponse {
            keys: vec![AtomicKey::MIN.as_bytes().to_vec()],
            vals: vec![b"ops".to_vec()],
            proof: vec![ProofNode::Internal { left: Hash([1; 32]), right: Hash::ZERO }],
        };
        assert_eq!(decode::<LeafsResponse>(&encode(&response).unwrap()).unwrap(), response);
    }
}
