//! Anti-entropy and background synchronization.
//!
//! Broadcast is best-effort, so every replica periodically pulls what it
//! missed from the shared store. For each peer the replica remembers the
//! newest timestamp it has pulled and asks the store for that peer's
//! operations after it, integrating them in timestamp order. Integration is
//! idempotent, so overlap with broadcast deliveries is harmless.
//!
//! Pull positions only advance through ordered pulls. An operation received
//! by broadcast after a missed one does not move the position past the gap.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::replica::{ExternalOutcome, Replica, ReplicaEvent};
use crate::tree::ReplicaId;
use crate::Result;

mod background;
pub mod error;
mod queue;

pub use background::{BackgroundSync, SyncCommand};
pub use error::SyncError;
pub use queue::{PendingWrite, RetryQueue};

/// Outcome of one anti-entropy round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Peers consulted
    pub peers: usize,
    /// Peers whose operations could not be fetched
    pub failed_peers: usize,
    /// Operations returned by the store
    pub fetched: usize,
    pub applied: usize,
    /// Already integrated, usually by broadcast
    pub duplicates: usize,
    /// Operations that could not be integrated; retried next round
    pub failed: usize,
}

impl SyncReport {
    /// Whether the round changed the local tree.
    pub fn has_changes(&self) -> bool {
        self.applied > 0
    }
}

impl Replica {
    /// Every replica this one pulls from: configured peers plus every
    /// replica that has written to the store.
    async fn known_peers(&self) -> Vec<ReplicaId> {
        let mut peers = self.config().peers.clone();
        match self.backend().replica_ids().await {
            Ok(ids) => peers.extend(ids),
            Err(e) => warn!(error = %e, "Could not list replicas in store, using configured peers"),
        }
        peers.retain(|p| p != self.id());
        peers.sort();
        peers.dedup();
        peers
    }

    /// Pull and integrate every operation this replica has missed.
    ///
    /// A peer whose fetch fails is skipped for this round. An operation that
    /// fails to integrate holds that peer's pull position, so it is fetched
    /// again next round.
    #[instrument(skip(self), fields(replica = %self.id()))]
    pub async fn sync_with_replicas(&self) -> Result<SyncReport> {
        let peers = self.known_peers().await;
        self.emit(ReplicaEvent::SyncStarted { peers: peers.len() });

        let mut report = SyncReport {
            peers: peers.len(),
            ..SyncReport::default()
        };

        for peer in &peers {
            let since = self.cursor(peer);
            let ops = match self.backend().fetch_operations(peer, since).await {
                Ok(ops) => ops,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Failed to fetch operations");
                    report.failed_peers += 1;
                    continue;
                }
            };
            report.fetched += ops.len();

            let mut holding = false;
            for op in ops {
                let (id, timestamp) = (op.id, op.timestamp);
                match self.process_external_operation(op).await {
                    Ok(outcome) => {
                        match outcome {
                            ExternalOutcome::Applied => report.applied += 1,
                            ExternalOutcome::Duplicate => report.duplicates += 1,
                            ExternalOutcome::Ignored => {}
                        }
                        if !holding {
                            self.advance_cursor(peer, timestamp);
                        }
                    }
                    Err(e) => {
                        warn!(peer = %peer, op = %id, error = %e, "Failed to integrate operation");
                        report.failed += 1;
                        holding = true;
                    }
                }
            }
            debug!(peer = %peer, since = %since, cursor = %self.cursor(peer), "Pulled from peer");
        }

        if report.has_changes() {
            info!(
                applied = report.applied,
                duplicates = report.duplicates,
                peers = report.peers,
                "Anti-entropy integrated missed operations"
            );
            self.emit(ReplicaEvent::SyncCompleted {
                report: report.clone(),
            });
        }
        Ok(report)
    }

    /// Subscribe to the transport and start the background engine.
    ///
    /// Does nothing if the engine is already running.
    pub async fn start_background_sync(&self) -> Result<()> {
        if self.background().lock().unwrap().is_some() {
            return Ok(());
        }
        let inbound = self.transport().subscribe().await?;

        let mut slot = self.background().lock().unwrap();
        if slot.is_none() {
            *slot = Some(BackgroundSync::start(self, inbound));
        }
        Ok(())
    }

    pub fn is_background_sync_running(&self) -> bool {
        self.background()
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Run an anti-entropy round on the background engine and wait for it.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let (response, rx) = oneshot::channel();
        self.send_command(SyncCommand::SyncNow { response }).await?;
        rx.await
            .map_err(|e| SyncError::CommandSendError(format!("Response channel error: {e}")))?
    }

    /// Have the background engine retry every queued store write.
    pub async fn flush(&self) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.send_command(SyncCommand::Flush { response }).await?;
        rx.await
            .map_err(|e| SyncError::CommandSendError(format!("Response channel error: {e}")))?
    }

    /// Stop the background engine and wait until it has exited its loop.
    pub async fn stop_background_sync(&self) -> Result<()> {
        let sender = self
            .background()
            .lock()
            .unwrap()
            .take()
            .ok_or(SyncError::BackgroundNotRunning)?;

        let (response, rx) = oneshot::channel();
        if sender.send(SyncCommand::Shutdown { response }).await.is_err() {
            // Engine already gone.
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    async fn send_command(&self, command: SyncCommand) -> Result<()> {
        let sender = self
            .background()
            .lock()
            .unwrap()
            .clone()
            .ok_or(SyncError::BackgroundNotRunning)?;
        sender
            .send(command)
            .await
            .map_err(|e| SyncError::CommandSendError(e.to_string()))?;
        Ok(())
    }
}
