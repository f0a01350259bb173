//! Lifecycle and registry capability of hosted services, and [`ServiceGroup`]
//! for starting and stopping several of them together.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tessera_core::{RegisterId, ServiceDescription};
use tracing::{info, warn};

use super::config::RegistryLocation;
use crate::registry::RegistryClient;
use crate::rpc::RpcNode;

// ---------------------------------------------------------------------------
// ManagedService trait
// ---------------------------------------------------------------------------

/// Capability shared by every hosted service, atomic or composite.
///
/// Implementors supply their node, registry location and description; the
/// lifecycle and registry interactions come from the default methods.
#[async_trait]
pub trait ManagedService: Send + Sync {
    /// The node that sends and receives this service's messages.
    fn node(&self) -> &RpcNode;

    /// Where this service registers itself.
    fn registry(&self) -> &RegistryLocation;

    /// Snapshot of the current description.
    fn description(&self) -> ServiceDescription;

    /// Records the id assigned by the registry.
    fn set_register_id(&self, id: RegisterId);

    /// Name used in logs and by [`ServiceGroup`].
    fn name(&self) -> String {
        self.description().service_name
    }

    /// Starts listening for requests.
    async fn start(&self) -> anyhow::Result<()> {
        self.node().start().await?;
        Ok(())
    }

    /// Stops listening for requests.
    async fn stop(&self) -> anyhow::Result<()> {
        self.node().stop().await?;
        Ok(())
    }

    /// Publishes the description to the registry and records the returned id.
    ///
    /// An already registered service keeps its id and the registry is not
    /// contacted. Returns `None` if the registry did not answer.
    async fn register(&self) -> Option<RegisterId> {
        let description = self.description();
        if description.register_id.is_registered() {
            warn!(
                service = %description.service_name,
                id = %description.register_id,
                "service is already registered"
            );
            return Some(description.register_id);
        }
        let id = RegistryClient::new(self.node(), self.registry())
            .register(&description)
            .await?;
        self.set_register_id(id);
        info!(service = %description.service_name, %id, "service registered");
        Some(id)
    }

    /// Withdraws the description from the registry.
    async fn unregister(&self) {
        let description = self.description();
        if !description.register_id.is_registered() {
            warn!(service = %description.service_name, "unregister of a service that was never registered");
            return;
        }
        if RegistryClient::new(self.node(), self.registry())
            .unregister(description.register_id)
            .await
        {
            self.set_register_id(RegisterId::UNREGISTERED);
            info!(service = %description.service_name, "service unregistered");
        }
    }

    /// Pushes the current description to the registry.
    ///
    /// A service that was never registered only gets a warning.
    async fn update_description(&self) {
        let description = self.description();
        if !description.register_id.is_registered() {
            warn!(
                service = %description.service_name,
                "service description cannot be updated before the service is registered"
            );
            return;
        }
        RegistryClient::new(self.node(), self.registry())
            .update(&description)
            .await;
    }
}

// ---------------------------------------------------------------------------
// ServiceGroup
// ---------------------------------------------------------------------------

/// A set of services started in insertion order and stopped in reverse.
pub struct ServiceGroup {
    by_name: DashMap<String, Arc<dyn ManagedService>>,
    start_order: RwLock<Vec<String>>,
}

impl ServiceGroup {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            start_order: RwLock::new(Vec::new()),
        }
    }

    /// Adds a service. A later service with the same name replaces the
    /// earlier one but keeps its position.
    pub fn add(&self, service: Arc<dyn ManagedService>) {
        let name = service.name();
        if self.by_name.insert(name.clone(), service).is_none() {
            self.start_order.write().push(name);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.by_name.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Starts every service in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the first service's start error; later services stay stopped.
    pub async fn start_all(&self) -> anyhow::Result<()> {
        let order = self.start_order.read().clone();
        for name in &order {
            if let Some(service) = self.get(name) {
                service.start().await?;
            }
        }
        Ok(())
    }

    /// Registers every service with its registry, in insertion order.
    pub async fn register_all(&self) {
        let order = self.start_order.read().clone();
        for name in &order {
            if let Some(service) = self.get(name) {
                service.register().await;
            }
        }
    }

    /// Stops every service in reverse insertion order.
    ///
    /// # Errors
    ///
    /// Returns the first service's stop error.
    pub async fn stop_all(&self) -> anyhow::Result<()> {
        let order = self.start_order.read().clone();
        for name in order.iter().rev() {
            if let Some(service) = self.get(name) {
                service.stop().await?;
            }
        }
        Ok(())
    }
}

impl Default for ServiceGroup {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
