//! Background sync engine.
//!
//! One task per replica integrates broadcast deliveries, runs anti-entropy
//! on a fixed interval and retries store writes that failed. The task holds
//! only a [`WeakReplica`] and exits when the replica is dropped or asked to
//! shut down.

use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    time::interval,
};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use super::{SyncError, SyncReport};
use crate::replica::{Replica, WeakReplica};
use crate::transport::Inbound;
use crate::Result;

/// Commands that can be sent to the background sync engine
#[derive(Debug)]
pub enum SyncCommand {
    /// Run an anti-entropy round now
    SyncNow {
        response: oneshot::Sender<Result<SyncReport>>,
    },
    /// Retry every queued store write, ignoring backoff
    Flush {
        response: oneshot::Sender<Result<()>>,
    },
    /// Stop the engine
    Shutdown { response: oneshot::Sender<()> },
}

/// Background sync engine for one replica.
pub struct BackgroundSync {
    replica: WeakReplica,
    inbound: Inbound,
    command_rx: mpsc::Receiver<SyncCommand>,
    sync_interval: Duration,
    retry_interval: Duration,
}

impl BackgroundSync {
    /// Start the engine and return its command sender.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(replica: &Replica, inbound: Inbound) -> mpsc::Sender<SyncCommand> {
        let (tx, rx) = mpsc::channel(100);

        let background = Self {
            replica: replica.downgrade(),
            inbound,
            command_rx: rx,
            sync_interval: replica.config().sync_interval(),
            retry_interval: replica.config().retry_interval(),
        };
        let span = info_span!("background_sync", replica = %replica.id());
        tokio::spawn(background.run().instrument(span));
        tx
    }

    fn replica(&self) -> Result<Replica> {
        self.replica
            .upgrade()
            .ok_or_else(|| SyncError::ReplicaDropped.into())
    }

    /// Main event loop
    async fn run(mut self) {
        info!(
            sync_interval = ?self.sync_interval,
            retry_interval = ?self.retry_interval,
            "Starting background sync engine"
        );
        let mut periodic_sync = interval(self.sync_interval);
        let mut retry_check = interval(self.retry_interval);

        // Skip initial tick to avoid immediate execution
        periodic_sync.tick().await;
        retry_check.tick().await;

        let mut inbound_open = true;
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(SyncCommand::Shutdown { response }) => {
                        info!("Background sync engine shutting down");
                        let _ = response.send(());
                        break;
                    }
                    Some(cmd) => {
                        if let Err(e) = self.handle_command(cmd).await {
                            error!(error = %e, "Background sync command error");
                            if is_replica_dropped(&e) {
                                break;
                            }
                        }
                    }
                    None => {
                        debug!("Command channel closed");
                        break;
                    }
                },

                op = self.inbound.recv(), if inbound_open => match op {
                    Some(op) => {
                        let Ok(replica) = self.replica() else { break };
                        let id = op.id;
                        if let Err(e) = replica.process_external_operation(op).await {
                            warn!(op = %id, error = %e, "Dropping undeliverable operation");
                        }
                    }
                    None => {
                        debug!("Inbound stream closed");
                        inbound_open = false;
                    }
                },

                _ = periodic_sync.tick() => {
                    let Ok(replica) = self.replica() else { break };
                    if let Err(e) = replica.sync_with_replicas().await {
                        error!(error = %e, "Periodic sync failed");
                    }
                }

                _ = retry_check.tick() => {
                    let Ok(replica) = self.replica() else { break };
                    if replica.pending_writes() > 0 {
                        let remaining = replica.retry_pending(false).await;
                        trace!(remaining, "Processed retry queue");
                    }
                }
            }
        }
        info!("Background sync engine stopped");
    }

    /// Handle a single command
    async fn handle_command(&mut self, command: SyncCommand) -> Result<()> {
        let replica = self.replica()?;
        match command {
            SyncCommand::SyncNow { response } => {
                let result = replica.sync_with_replicas().await;
                let _ = response.send(result);
            }
            SyncCommand::Flush { response } => {
                let result = replica.flush_pending().await;
                let _ = response.send(result);
            }
            SyncCommand::Shutdown { response } => {
                let _ = response.send(());
            }
        }
        Ok(())
    }
}

fn is_replica_dropped(err: &crate::Error) -> bool {
    matches!(err, crate::Error::Sync(SyncError::ReplicaDropped))
}
