//! Resumable download of the atomic trie from peers.
//!
//! A session walks the leaves of the target root in key order, verifying every page against the root before
//! writing it. Leaves are persisted one commit interval at a time, so an interrupted session resumes from the last
//! committed height, whatever root the next session targets.

use crate::{
    message::{LeafsRequest, LeafsResponse, MAX_LEAVES_LIMIT},
    util::AbortOnDrop,
    LeafClient, SyncError,
};
use mc_atomic_trie::{proof, AtomicTrie, ProofError};
use mc_db::KvStore;
use mp_atomic::{AtomicKey, Hash};
use std::{sync::Arc, time::Instant};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub requests: u64,
    pub leaves: u64,
}

/// Syncs the local atomic trie to `target_root`, the root at `target_height`.
///
/// At most one session runs against a given trie: [`AtomicSyncer::start`] takes the trie writer guard until the
/// session ends. Dropping the syncer aborts a running session.
pub struct AtomicSyncer<S, C> {
    session: Option<SyncSession<S, C>>,
    status: Arc<watch::Sender<SyncStatus>>,
    cancel: CancellationToken,
    done: Option<oneshot::Receiver<Result<SyncSummary, SyncError>>>,
    task: Option<AbortOnDrop<()>>,
}

impl<S: KvStore, C: LeafClient + 'static> AtomicSyncer<S, C> {
    pub fn new(client: C, trie: Arc<AtomicTrie<S>>, target_root: Hash, target_height: u64, request_size: u16) -> Self {
        let request_size = request_size.clamp(1, MAX_LEAVES_LIMIT);
        Self {
            session: Some(SyncSession { client, trie, target_root, target_height, request_size }),
            status: Arc::new(watch::channel(SyncStatus::Idle).0),
            cancel: CancellationToken::new(),
            done: None,
            task: None,
        }
    }

    /// Spawns the session on the current tokio runtime.
    pub fn start(&mut self) -> Result<(), SyncError> {
        let session = self.session.take().ok_or(SyncError::AlreadyStarted)?;
        let Some(guard) = session.trie.try_lock_writer() else {
            self.session = Some(session);
            return Err(SyncError::AlreadyRunning);
        };

        let (sender, receiver) = oneshot::channel();
        let status = Arc::clone(&self.status);
        let cancel = self.cancel.clone();
        status.send_replace(SyncStatus::Running);

        self.task = Some(AbortOnDrop::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(SyncError::Cancelled),
                res = session.run() => res,
            };
            drop(guard);
            let new_status = match &result {
                Ok(summary) => {
                    tracing::info!(
                        "⚛️ Atomic trie sync done: {} leaves in {} requests",
                        summary.leaves,
                        summary.requests
                    );
                    SyncStatus::Succeeded
                }
                Err(SyncError::Cancelled) => {
                    tracing::info!("⚛️ Atomic trie sync cancelled");
                    SyncStatus::Cancelled
                }
                Err(err) => {
                    tracing::warn!("❗ Atomic trie sync failed: {err:#}");
                    SyncStatus::Failed(err.to_string())
                }
            };
            status.send_replace(new_status);
            // nobody may be waiting
            let _ = sender.send(result);
        }));
        self.done = Some(receiver);
        Ok(())
    }

    /// Waits for the session to end.
    pub async fn done(&mut self) -> Result<SyncSummary, SyncError> {
        let receiver = self.done.take().ok_or(SyncError::NotStarted)?;
        let result = receiver.await.unwrap_or(Err(SyncError::Aborted));
        self.task = None;
        result
    }

    /// Stops the session between two requests, or during one. Writes that already happened stay.
    pub fn cancel(&self) {
        self.cancel.cancel()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }
}

struct SyncSession<S, C> {
    client: C,
    trie: Arc<AtomicTrie<S>>,
    target_root: Hash,
    target_height: u64,
    request_size: u16,
}

impl<S: KvStore, C: LeafClient> SyncSession<S, C> {
    async fn run(self) -> Result<SyncSummary, SyncError> {
        let trie = &self.trie;
        let started = Instant::now();
        let mut handle = trie.open_last_committed();
        let resume = handle.base();
        if let Some(base) = resume.filter(|base| base.height > self.target_height) {
            return Err(SyncError::TargetBehindLocal { target: self.target_height, local: base.height });
        }
        tracing::info!(
            "⚛️ Syncing the atomic trie to height {} (root {}), resuming after {:?}",
            self.target_height,
            self.target_root,
            resume.map(|base| base.height)
        );

        let end = AtomicKey::height_end(self.target_height);
        let mut next = match resume {
            Some(base) => base.height.checked_add(1).map(AtomicKey::height_start),
            None => Some(AtomicKey::MIN),
        };
        let mut summary = SyncSummary::default();

        while let Some(start) = next.filter(|start| start <= &end) {
            let request = LeafsRequest { root: self.target_root, start, end, limit: self.request_size };
            let response = self.client.get_leafs(request).await?;
            summary.requests += 1;

            let leaves = parse_leaves(&response)?;
            let more = proof::verify_range(
                &self.target_root,
                &start,
                &end,
                usize::from(self.request_size),
                &leaves,
                &response.proof,
            )?;
            tracing::debug!("Received {} verified atomic trie leaves from {start}, more={more}", leaves.len());

            for (key, value) in &leaves {
                // only whole intervals are durable: commit everything below this leaf's height first
                if key.height() > handle.height() {
                    let outcome = trie.commit_to(&mut handle, key.height() - 1)?;
                    if outcome.committed {
                        tracing::info!(
                            "⚛️ Atomic trie synced up to height {:?}",
                            handle.base().map(|base| base.height)
                        );
                    }
                }
                handle.put_leaf(*key, value.to_vec())?;
            }
            summary.leaves += leaves.len() as u64;

            next = match leaves.last() {
                Some((last, _)) if more => last.successor(),
                _ => None,
            };
        }

        trie.commit_to(&mut handle, self.target_height)?;
        let (root, nodes) = trie.hash_pending(&handle)?;
        if root != self.target_root {
            return Err(SyncError::RootMismatch { expected: self.target_root, got: root });
        }
        trie.insert_foreign_trie(nodes, root)?;
        trie.accept_foreign_trie(self.target_height, root)?;
        tracing::debug!("Atomic trie sync to height {} took {:?}", self.target_height, started.elapsed());
        Ok(summary)
    }
}

fn parse_leaves(response: &LeafsResponse) -> Result<Vec<(AtomicKey, &[u8])>, ProofError> {
    if response.keys.len() != response.vals.len() {
        return Err(ProofError::LengthMismatch { keys: response.keys.len(), values: response.vals.len() });
    }
    response
        .keys
        .iter()
        .zip(&response.vals)
        .map(|(key, value)| Ok((AtomicKey::from_slice(key)?, value.as_slice())))
        .collect()
}
