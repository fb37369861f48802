//! Primitives shared by the atomic trie, its syncer and the shared memory applier.

mod hash;
mod key;
mod requests;

pub use hash::{ChainId, Hash, HASH_LEN};
pub use key::{AtomicKey, KeyLengthError, ATOMIC_KEY_BITS, ATOMIC_KEY_LEN};
pub use requests::{merge_ops, AtomicOps, AtomicRequests, Element};
