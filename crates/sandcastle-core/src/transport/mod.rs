use async_trait::async_trait;
use thiserror::Error;

use crate::wire::WireFrame;

pub mod memory;

pub use memory::{MemoryReceiver, MemoryTransport};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport write failed: {0}")]
    Write(String),
}

/// Outbound push channel to one remote runtime.
///
/// The session guarantees a single in-flight `write` at a time, in commit
/// order; implementations need not serialize writes themselves.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn write(&self, frame: WireFrame) -> Result<(), TransportError>;

    /// Tears the channel down. The default does nothing.
    async fn close(&self, _reason: &str) -> Result<(), TransportError> {
        Ok(())
    }
}
