//! Transport abstractions for operation broadcast.
//!
//! A [`Transport`] ships every locally issued operation to the other
//! replicas on a best-effort basis and hands inbound operations to the
//! replica that subscribed. Lost deliveries are expected; anti-entropy in
//! [`crate::sync`] repairs them.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::tree::Operation;

mod local;

pub use local::{LocalBus, LocalTransport};

/// Stream of operations delivered to a subscriber.
pub type Inbound = mpsc::UnboundedReceiver<Operation>;

/// Pub/sub broadcast of operations between replicas.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport type identifier (e.g. "local", "null").
    fn transport_type(&self) -> &'static str;

    /// Broadcast `op` to every other reachable replica.
    ///
    /// Success only means the transport accepted the message.
    async fn publish(&self, op: &Operation) -> Result<()>;

    /// Start receiving operations published by other replicas.
    async fn subscribe(&self) -> Result<Inbound>;
}

/// Transport for a replica running alone.
///
/// Publishing succeeds and goes nowhere; the inbound stream is already closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    fn transport_type(&self) -> &'static str {
        "null"
    }

    async fn publish(&self, _op: &Operation) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self) -> Result<Inbound> {
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }
}
