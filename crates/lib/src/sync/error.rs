//! Error types for the synchronization module.

use thiserror::Error;

/// Errors that can occur during broadcast and anti-entropy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The transport refused to carry a message.
    #[error("Transport '{transport}' unavailable: {reason}")]
    TransportUnavailable {
        transport: &'static str,
        reason: String,
    },

    /// Command channel send error.
    #[error("Failed to send command to background sync: {0}")]
    CommandSendError(String),

    /// No background engine has been started for this replica.
    #[error("Background sync is not running")]
    BackgroundNotRunning,

    /// The replica owning the background engine was dropped.
    #[error("Replica has been dropped")]
    ReplicaDropped,
}

impl SyncError {
    /// Check if this is a network/connection error.
    pub fn is_network_error(&self) -> bool {
        matches!(self, SyncError::TransportUnavailable { .. })
    }

    /// Check if the background engine could not be reached.
    pub fn is_background_error(&self) -> bool {
        matches!(
            self,
            SyncError::CommandSendError(_)
                | SyncError::BackgroundNotRunning
                | SyncError::ReplicaDropped
        )
    }
}

impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        crate::Error::Sync(err)
    }
}
