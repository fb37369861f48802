use crate::hash::ChainId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single value written to shared memory. `traits` are indexing tags attached to the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub traits: Vec<Vec<u8>>,
}

/// Shared memory mutations targeting one chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicRequests {
    pub remove_requests: Vec<Vec<u8>>,
    pub put_requests: Vec<Element>,
}

impl AtomicRequests {
    pub fn is_empty(&self) -> bool {
        self.remove_requests.is_empty() && self.put_requests.is_empty()
    }

    /// Appends `other` after the requests already present.
    pub fn merge(&mut self, other: AtomicRequests) {
        self.remove_requests.extend(other.remove_requests);
        self.put_requests.extend(other.put_requests);
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Atomic operations of one height, keyed by source chain.
pub type AtomicOps = BTreeMap<ChainId, AtomicRequests>;

/// Merges `other` into `ops`, chain by chain.
pub fn merge_ops(ops: &mut AtomicOps, other: AtomicOps) {
    for (chain_id, requests) in other {
        ops.entry(chain_id).or_default().merge(requests);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &[u8], value: &[u8]) -> Element {
        Element { key: key.to_vec(), value: value.to_vec(), traits: vec![] }
    }

    #[test]
    fn merge_keeps_order() {
        let mut a = AtomicRequests { remove_requests: vec![b"r1".to_vec()], put_requests: vec![put(b"k1", b"v1")] };
        let b = AtomicRequests { remove_requests: vec![b"r2".to_vec()], put_requests: vec![put(b"k2", b"v2")] };
        a.merge(b);
        assert_eq!(a.remove_requests, vec![b"r1".to_vec(), b"r2".to_vec()]);
        assert_eq!(a.put_requests, vec![put(b"k1", b"v1"), put(b"k2", b"v2")]);
    }

    #[test]
    fn encode_decode() {
        let requests = AtomicRequests {
            remove_requests: vec![b"gone".to_vec()],
            put_requests: vec![Element { key: b"k".to_vec(), value: b"v".to_vec(), traits: vec![b"t".to_vec()] }],
        };
        assert_eq!(AtomicRequests::decode(&requests.encode().unwrap()).unwrap(), requests);
        assert!(AtomicRequests::decode(&[0xFF; 3]).is_err());
    }

    #[test]
    fn merge_ops_by_chain() {
        let (c1, c2) = (ChainId([1; 32]), ChainId([2; 32]));
        let mut ops = AtomicOps::from([(c1, AtomicRequests { put_requests: vec![put(b"a", b"1")], ..Default::default() })]);
        merge_ops(
            &mut ops,
            AtomicOps::from([
                (c1, AtomicRequests { put_requests: vec![put(b"b", b"2")], ..Default::default() }),
                (c2, AtomicRequests { remove_requests: vec![b"c".to_vec()], ..Default::default() }),
            ]),
        );
        assert_eq!(ops[&c1].put_requests.len(), 2);
        assert_eq!(ops[&c2].remove_requests, vec![b"c".to_vec()]);
    }
}
