use crate::hash::{ChainId, HASH_LEN};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const HEIGHT_LEN: usize = 8;
pub const ATOMIC_KEY_LEN: usize = HEIGHT_LEN + HASH_LEN;
pub const ATOMIC_KEY_BITS: usize = ATOMIC_KEY_LEN * 8;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid atomic key length: expected {ATOMIC_KEY_LEN} bytes, got {0}")]
pub struct KeyLengthError(pub usize);

/// Key of the atomic trie: `height (u64, big endian) || source chain id`.
///
/// Keys compare as byte strings, so the natural ordering sorts by height first. Every subtree of the trie covers
/// a contiguous range of keys, see [`AtomicKey::subtree_bounds`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomicKey([u8; ATOMIC_KEY_LEN]);

impl AtomicKey {
    pub const MIN: AtomicKey = AtomicKey([0u8; ATOMIC_KEY_LEN]);
    pub const MAX: AtomicKey = AtomicKey([0xFFu8; ATOMIC_KEY_LEN]);

    pub fn new(height: u64, chain_id: &ChainId) -> Self {
        let mut bytes = [0u8; ATOMIC_KEY_LEN];
        bytes[..HEIGHT_LEN].copy_from_slice(&height.to_be_bytes());
        bytes[HEIGHT_LEN..].copy_from_slice(chain_id.as_bytes());
        Self(bytes)
    }

    /// Smallest key at `height`.
    pub fn height_start(height: u64) -> Self {
        Self::new(height, &ChainId([0u8; HASH_LEN]))
    }

    /// Largest key at `height`.
    pub fn height_end(height: u64) -> Self {
        Self::new(height, &ChainId([0xFFu8; HASH_LEN]))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyLengthError> {
        bytes.try_into().map(Self).map_err(|_| KeyLengthError(bytes.len()))
    }

    pub fn height(&self) -> u64 {
        let mut height = [0u8; HEIGHT_LEN];
        height.copy_from_slice(&self.0[..HEIGHT_LEN]);
        u64::from_be_bytes(height)
    }

    pub fn chain_id(&self) -> ChainId {
        let mut chain_id = [0u8; HASH_LEN];
        chain_id.copy_from_slice(&self.0[HEIGHT_LEN..]);
        ChainId(chain_id)
    }

    pub fn as_bytes(&self) -> &[u8; ATOMIC_KEY_LEN] {
        &self.0
    }

    /// The next key in lexicographic order, `None` for [`AtomicKey::MAX`].
    pub fn successor(&self) -> Option<Self> {
        let mut bytes = self.0;
        for byte in bytes.iter_mut().rev() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                return Some(Self(bytes));
            }
        }
        None
    }

    /// Bit `index` of the key, most significant bit first.
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < ATOMIC_KEY_BITS);
        (self.0[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    pub fn with_bit(mut self, index: usize, value: bool) -> Self {
        let mask = 1u8 << (7 - index % 8);
        if value {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }
        self
    }

    /// Smallest and largest keys sharing the first `depth` bits of this key.
    pub fn subtree_bounds(&self, depth: usize) -> (AtomicKey, AtomicKey) {
        let (mut lo, mut hi) = (self.0, self.0);
        let (full, rem) = (depth / 8, depth % 8);
        if full < ATOMIC_KEY_LEN {
            let mask = 0xFFu8 >> rem;
            lo[full] &= !mask;
            hi[full] |= mask;
            lo[full + 1..].fill(0);
            hi[full + 1..].fill(0xFF);
        }
        (Self(lo), Self(hi))
    }
}

impl fmt::Display for AtomicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:0x{}", self.height(), hex::encode(&self.0[HEIGHT_LEN..]))
    }
}

impl fmt::Debug for AtomicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicKey({self})")
    }
}

impl AsRef<[u8]> for AtomicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Serialized as a length-prefixed byte string, which is the same bincode layout as `Vec<u8>`.
impl Serialize for AtomicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for AtomicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Self::from_slice(&bytes).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn chain(byte: u8) -> ChainId {
        ChainId([byte; HASH_LEN])
    }

    #[test]
    fn layout_is_height_then_chain() {
        let key = AtomicKey::new(0x0102, &chain(7));
        assert_eq!(&key.as_bytes()[..8], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(&key.as_bytes()[8..], &[7u8; 32]);
        assert_eq!(key.height(), 0x0102);
        assert_eq!(key.chain_id(), chain(7));
    }

    #[test]
    fn keys_sort_by_height_first() {
        assert!(AtomicKey::new(1, &chain(0xFF)) < AtomicKey::new(2, &chain(0)));
        assert!(AtomicKey::height_end(1) < AtomicKey::height_start(2));
        assert!(AtomicKey::height_start(3) <= AtomicKey::new(3, &chain(9)));
    }

    #[rstest]
    #[case::zero(AtomicKey::MIN, Some(AtomicKey::MIN.with_bit(ATOMIC_KEY_BITS - 1, true)))]
    #[case::carry(AtomicKey::height_end(4), Some(AtomicKey::height_start(5)))]
    #[case::max(AtomicKey::MAX, None)]
    fn successor(#[case] key: AtomicKey, #[case] expected: Option<AtomicKey>) {
        assert_eq!(key.successor(), expected);
    }

    #[test]
    fn from_slice_rejects_bad_length() {
        assert_eq!(AtomicKey::from_slice(&[0u8; 39]), Err(KeyLengthError(39)));
        assert_eq!(AtomicKey::from_slice(&[0u8; 41]), Err(KeyLengthError(41)));
    }

    #[test]
    fn bincode_layout_matches_bytes() {
        let key = AtomicKey::new(42, &chain(3));
        let encoded = bincode::serialize(&key).unwrap();
        assert_eq!(encoded, bincode::serialize(&key.as_bytes().to_vec()).unwrap());
        assert_eq!(bincode::deserialize::<AtomicKey>(&encoded).unwrap(), key);
        assert!(bincode::deserialize::<AtomicKey>(&bincode::serialize(&vec![1u8; 5]).unwrap()).is_err());
    }

    #[test]
    fn subtree_bounds_at_root_cover_everything() {
        let key = AtomicKey::new(99, &chain(1));
        assert_eq!(key.subtree_bounds(0), (AtomicKey::MIN, AtomicKey::MAX));
        assert_eq!(key.subtree_bounds(ATOMIC_KEY_BITS), (key, key));
        assert_eq!(key.subtree_bounds(64), (AtomicKey::height_start(99), AtomicKey::height_end(99)));
    }

    proptest! {
        #[test]
        fn subtree_bounds_contain_key(bytes in proptest::collection::vec(any::<u8>(), ATOMIC_KEY_LEN), depth in 0..=ATOMIC_KEY_BITS) {
            let key = AtomicKey::from_slice(&bytes).unwrap();
            let (lo, hi) = key.subtree_bounds(depth);
            prop_assert!(lo <= key && key <= hi);
            for i in 0..depth {
                prop_assert_eq!(lo.bit(i), key.bit(i));
                prop_assert_eq!(hi.bit(i), key.bit(i));
            }
            for i in depth..ATOMIC_KEY_BITS {
                prop_assert!(!lo.bit(i));
                prop_assert!(hi.bit(i));
            }
        }

        #[test]
        fn with_bit_sets_single_bit(bytes in proptest::collection::vec(any::<u8>(), ATOMIC_KEY_LEN), index in 0..ATOMIC_KEY_BITS, value: bool) {
            let key = AtomicKey::from_slice(&bytes).unwrap();
            let updated = key.with_bit(index, value);
            prop_assert_eq!(updated.bit(index), value);
            for i in (0..ATOMIC_KEY_BITS).filter(|i| *i != index) {
                prop_assert_eq!(updated.bit(i), key.bit(i));
            }
        }
    }
}
