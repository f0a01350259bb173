//! Atomic services: operations implemented by local handlers.
//!
//! ```ignore
//! let pricer = AtomicService::builder("Pricer", "pricer.a")
//!     .response_time(2)
//!     .operation(Operation::new("quote", vec![ValueKind::String], Some(ValueKind::Float)).with_cost(2.0),
//!         |mut args| async move {
//!             let item: String = args.next()?;
//!             Ok::<_, OperationError>(Reply::value(price_of(&item)))
//!         })
//!     .build(bus.transport());
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tessera_core::{Operation, RegisterId, ServiceDescription, Value};
use tracing::warn;

use super::config::{RegistryLocation, ServiceConfig};
use super::managed::ManagedService;
use super::operation::{Args, OperationError, OperationTable, Reply};
use crate::rpc::RpcNode;
use crate::transport::Transport;

/// A service hosting its own operation handlers on an [`RpcNode`].
#[derive(Debug)]
pub struct AtomicService {
    node: RpcNode,
    config: ServiceConfig,
    description: RwLock<ServiceDescription>,
}

impl AtomicService {
    /// Starts building a service of `service_type` listening at `endpoint`.
    #[must_use]
    pub fn builder(
        service_type: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> AtomicServiceBuilder {
        AtomicServiceBuilder {
            service_type: service_type.into(),
            endpoint: endpoint.into(),
            name: None,
            response_time: 0,
            operations: OperationTable::new(),
            properties: Vec::new(),
            config: ServiceConfig::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Changes the advertised cost of `op_name` locally. Call
    /// [`update_description`](ManagedService::update_description) to publish.
    pub fn set_operation_cost(&self, op_name: &str, cost: f64) -> bool {
        let updated = self.description.write().set_operation_cost(op_name, cost);
        if !updated {
            warn!(op = %op_name, "cannot set cost of an operation this service does not offer");
        }
        updated
    }

    /// Sets a custom property locally.
    pub fn set_custom_property(&self, name: impl Into<String>, value: Value) {
        self.description.write().set_custom_property(name, value);
    }
}

#[async_trait]
impl ManagedService for AtomicService {
    fn node(&self) -> &RpcNode {
        &self.node
    }

    fn registry(&self) -> &RegistryLocation {
        &self.config.registry
    }

    fn description(&self) -> ServiceDescription {
        self.description.read().clone()
    }

    fn set_register_id(&self, id: RegisterId) {
        self.description.write().register_id = id;
    }
}

/// Builder for [`AtomicService`].
pub struct AtomicServiceBuilder {
    service_type: String,
    endpoint: String,
    name: Option<String>,
    response_time: u64,
    operations: OperationTable,
    properties: Vec<(String, Value)>,
    config: ServiceConfig,
}

impl AtomicServiceBuilder {
    /// Service name. Defaults to the endpoint.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Nominal response time in logical units.
    #[must_use]
    pub fn response_time(mut self, units: u64) -> Self {
        self.response_time = units;
        self
    }

    /// Declares an operation and its handler.
    #[must_use]
    pub fn operation<F, Fut>(mut self, signature: Operation, handler: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, OperationError>> + Send + 'static,
    {
        self.operations.register(signature, handler);
        self
    }

    #[must_use]
    pub fn custom_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.push((name.into(), value));
        self
    }

    #[must_use]
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the service on `transport`. The description's operations are
    /// the declared signatures, in declaration order.
    #[must_use]
    pub fn build(self, transport: Arc<dyn Transport>) -> AtomicService {
        let name = self.name.unwrap_or_else(|| self.endpoint.clone());
        let mut description =
            ServiceDescription::new(self.service_type, name, self.endpoint.clone())
                .with_response_time(self.response_time);
        description.operations = self.operations.operations();
        for (key, value) in self.properties {
            description.set_custom_property(key, value);
        }

        let node = RpcNode::new(
            self.endpoint,
            transport,
            self.operations,
            self.config.worker_pool.clone(),
        );
        AtomicService {
            node,
            config: self.config,
            description: RwLock::new(description),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
