//! Syncing the atomic trie from peers.
//!
//! A syncing node asks peers for pages of leaves of a target root ([`LeafsRequest`]), verifies every page with its
//! range proof, and writes the leaves to its own [`mc_atomic_trie::AtomicTrie`]. Serving nodes answer with a
//! [`LeafsRequestHandler`]. Once synced, [`AtomicBackend::apply_to_shared_memory`] replays the operations into
//! shared memory.

mod backend;
mod client;
pub mod config;
mod error;
mod handler;
pub mod message;
mod syncer;
mod util;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
#[cfg(test)]
mod tests;

pub use backend::{AtomicBackend, BackendError};
#[cfg(any(test, feature = "testing"))]
pub use client::MockNetworkClient;
pub use client::{LeafClient, NetworkClient, NetworkLeafClient};
pub use config::{AtomicSyncParams, NetworkType};
pub use error::{ClientError, SyncError};
pub use handler::{HandlerError, LeafsRequestHandler};
pub use message::{LeafsRequest, LeafsResponse, MAX_LEAVES_LIMIT};
pub use syncer::{AtomicSyncer, SyncStatus, SyncSummary};
