//! Transport port: moves text messages between named endpoints.
//!
//! The runtime is transport-agnostic. Any implementation that can send a text
//! message to an endpoint and deliver inbound text to a registered receiver
//! satisfies the contract.

use std::sync::Arc;

use async_trait::async_trait;

pub mod memory;

pub use memory::{MemoryBus, MemoryTransport};

/// Callback invoked for every inbound message on a listening endpoint.
///
/// Implementations must return promptly; long work belongs on a worker pool.
pub trait MessageReceiver: Send + Sync {
    fn on_message(&self, message: String);
}

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no listener at endpoint {endpoint}")]
    UnknownEndpoint { endpoint: String },
    #[error("endpoint {endpoint} already has a listener")]
    EndpointInUse { endpoint: String },
    #[error("transport is not listening")]
    NotListening,
    #[error("connection to {endpoint} closed")]
    Closed { endpoint: String },
}

/// One service's handle on a message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `message` to `destination`.
    async fn send(&self, message: &str, destination: &str) -> Result<(), TransportError>;

    /// Starts delivering messages addressed to `endpoint` to `receiver`.
    async fn start_listening(
        &self,
        endpoint: &str,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), TransportError>;

    /// Stops delivering inbound messages.
    async fn stop_listening(&self) -> Result<(), TransportError>;
}
