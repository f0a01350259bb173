//! In-process transport.
//!
//! A [`MemoryBus`] maps endpoint names to per-listener unbounded queues. Each
//! listener gets a pump task that hands queued messages to its receiver in
//! arrival order. Send never blocks and never runs the receiver on the
//! sender's stack.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{MessageReceiver, Transport, TransportError};

/// Shared hub connecting every [`MemoryTransport`] created from it.
#[derive(Debug, Default)]
pub struct MemoryBus {
    endpoints: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a transport handle attached to this bus.
    #[must_use]
    pub fn transport(self: &Arc<Self>) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            bus: Arc::clone(self),
            endpoint: Mutex::new(None),
        })
    }

    /// Returns `true` if something is listening on `endpoint`.
    #[must_use]
    pub fn is_listening(&self, endpoint: &str) -> bool {
        self.endpoints.contains_key(endpoint)
    }

    fn deliver(&self, message: &str, destination: &str) -> Result<(), TransportError> {
        let Some(tx) = self.endpoints.get(destination).map(|e| e.value().clone()) else {
            return Err(TransportError::UnknownEndpoint {
                endpoint: destination.to_string(),
            });
        };
        tx.send(message.to_string())
            .map_err(|_| TransportError::Closed {
                endpoint: destination.to_string(),
            })
    }

    fn attach(
        &self,
        endpoint: &str,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), TransportError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        match self.endpoints.entry(endpoint.to_string()) {
            Entry::Occupied(_) => {
                return Err(TransportError::EndpointInUse {
                    endpoint: endpoint.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        let name = endpoint.to_string();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                receiver.on_message(message);
            }
            debug!(endpoint = %name, "listener pump stopped");
        });
        Ok(())
    }

    fn detach(&self, endpoint: &str) {
        // Dropping the sender closes the channel and ends the pump task.
        self.endpoints.remove(endpoint);
    }
}

/// A single service's attachment to a [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryTransport {
    bus: Arc<MemoryBus>,
    endpoint: Mutex<Option<String>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: &str, destination: &str) -> Result<(), TransportError> {
        self.bus.deliver(message, destination)
    }

    async fn start_listening(
        &self,
        endpoint: &str,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), TransportError> {
        self.bus.attach(endpoint, receiver)?;
        *self.endpoint.lock() = Some(endpoint.to_string());
        Ok(())
    }

    async fn stop_listening(&self) -> Result<(), TransportError> {
        let endpoint = self.endpoint.lock().take();
        match endpoint {
            Some(endpoint) => {
                self.bus.detach(&endpoint);
                Ok(())
            }
            None => Err(TransportError::NotListening),
        }
    }
}
