//! Service registry: the authoritative directory of providers.
//!
//! [`RegistryDirectory`] is the in-memory data structure, [`ServiceRegistry`]
//! makes it shareable, and [`RegistryService`] hosts it as an ordinary atomic
//! service at a well-known endpoint. Other services reach it only through
//! [`RegistryClient`].

pub mod client;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tessera_core::{Operation, RegisterId, ServiceDescription, Value, ValueKind};
use tracing::{debug, info, warn};

pub use client::RegistryClient;

use crate::service::atomic::{AtomicService, AtomicServiceBuilder};
use crate::service::config::{ServiceConfig, DEFAULT_REGISTRY_ENDPOINT};
use crate::service::operation::{OperationError, Reply};
use crate::transport::Transport;

/// Service type the registry advertises.
pub const REGISTRY_SERVICE_TYPE: &str = "ServiceRegistry";

/// Endpoint the registry listens on unless configured otherwise.
pub const REGISTRY_ENDPOINT: &str = DEFAULT_REGISTRY_ENDPOINT;

// ---------------------------------------------------------------------------
// RegistryDirectory
// ---------------------------------------------------------------------------

/// Id-indexed descriptions plus a per-type index of ids.
///
/// A description is in its type's set exactly when it is in the id map, and
/// a type whose set becomes empty is removed.
#[derive(Debug, Default)]
pub struct RegistryDirectory {
    last_id: u64,
    by_id: HashMap<RegisterId, ServiceDescription>,
    by_type: HashMap<String, BTreeSet<RegisterId>>,
}

impl RegistryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `description` under a fresh id and returns the id.
    ///
    /// Ids start at 1 and are never reused.
    pub fn register(&mut self, mut description: ServiceDescription) -> RegisterId {
        self.last_id += 1;
        let id = RegisterId(self.last_id);
        description.register_id = id;
        self.by_type
            .entry(description.service_type.clone())
            .or_default()
            .insert(id);
        self.by_id.insert(id, description);
        id
    }

    /// Removes the description registered under `id`.
    ///
    /// Returns the removed description, or `None` (with a warning) if the id
    /// is unknown.
    pub fn unregister(&mut self, id: RegisterId) -> Option<ServiceDescription> {
        let Some(description) = self.by_id.remove(&id) else {
            warn!(%id, "unregister of unknown service id");
            return None;
        };
        self.unindex(&description.service_type, id);
        Some(description)
    }

    fn unindex(&mut self, service_type: &str, id: RegisterId) {
        if let Some(ids) = self.by_type.get_mut(service_type) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_type.remove(service_type);
            }
        }
    }

    /// Providers of `service_type` offering `op_name`. Empty when none match.
    #[must_use]
    pub fn lookup(&self, service_type: &str, op_name: &str) -> Vec<ServiceDescription> {
        self.by_type
            .get(service_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .filter(|d| d.contains_operation(op_name))
            .cloned()
            .collect()
    }

    /// Replaces the description stored under `description.register_id`.
    ///
    /// Returns `false` (with a warning) if nothing is registered under that id.
    pub fn update(&mut self, description: ServiceDescription) -> bool {
        let id = description.register_id;
        let Some(old) = self.by_id.get(&id) else {
            warn!(%id, service = %description.service_name, "update of unregistered service ignored");
            return false;
        };
        if old.service_type != description.service_type {
            let old_type = old.service_type.clone();
            self.unindex(&old_type, id);
            self.by_type
                .entry(description.service_type.clone())
                .or_default()
                .insert(id);
        }
        self.by_id.insert(id, description);
        true
    }

    #[must_use]
    pub fn get(&self, id: RegisterId) -> Option<&ServiceDescription> {
        self.by_id.get(&id)
    }

    /// Names of every registered service, sorted.
    #[must_use]
    pub fn all_service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_id
            .values()
            .map(|d| d.service_name.clone())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Returns `true` if the id map and the type index agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.by_type.values().map(BTreeSet::len).sum();
        indexed == self.by_id.len()
            && self.by_type.values().all(|ids| !ids.is_empty())
            && self.by_type.iter().all(|(service_type, ids)| {
                ids.iter().all(|id| {
                    self.by_id
                        .get(id)
                        .is_some_and(|d| &d.service_type == service_type)
                })
            })
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Thread-safe handle on a [`RegistryDirectory`]. Every operation is atomic
/// with respect to the directory.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    directory: Arc<RwLock<RegistryDirectory>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, description: ServiceDescription) -> RegisterId {
        let name = description.service_name.clone();
        let id = self.directory.write().register(description);
        info!(service = %name, %id, "registered");
        id
    }

    pub fn unregister(&self, id: RegisterId) -> Option<ServiceDescription> {
        let removed = self.directory.write().unregister(id);
        if let Some(d) = &removed {
            info!(service = %d.service_name, %id, "unregistered");
        }
        removed
    }

    #[must_use]
    pub fn lookup(&self, service_type: &str, op_name: &str) -> Vec<ServiceDescription> {
        let found = self.directory.read().lookup(service_type, op_name);
        debug!(service_type, op = op_name, found = found.len(), "lookup");
        found
    }

    pub fn update(&self, description: ServiceDescription) -> bool {
        self.directory.write().update(description)
    }

    #[must_use]
    pub fn get(&self, id: RegisterId) -> Option<ServiceDescription> {
        self.directory.read().get(id).cloned()
    }

    #[must_use]
    pub fn all_service_names(&self) -> Vec<String> {
        self.directory.read().all_service_names()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.directory.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directory.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// RegistryService
// ---------------------------------------------------------------------------

/// Builds the atomic service exposing `registry` as remote operations:
/// `register(description) -> int`, `unRegister(int)`,
/// `lookup(string, string) -> array` and `update(description)`.
pub struct RegistryService;

impl RegistryService {
    /// Hosts `registry` at the default endpoint.
    #[must_use]
    pub fn build(registry: ServiceRegistry, transport: Arc<dyn Transport>) -> AtomicService {
        Self::builder(registry, REGISTRY_ENDPOINT).build(transport)
    }

    /// Builder preloaded with the registry operations, for a custom endpoint
    /// or config.
    #[must_use]
    pub fn builder(registry: ServiceRegistry, endpoint: &str) -> AtomicServiceBuilder {
        let on_register = registry.clone();
        let on_unregister = registry.clone();
        let on_lookup = registry.clone();
        let on_update = registry;

        AtomicService::builder(REGISTRY_SERVICE_TYPE, endpoint)
            .name("ServiceRegistry")
            .config(ServiceConfig::default())
            .operation(
                Operation::new("register", vec![ValueKind::Description], Some(ValueKind::Int)),
                move |mut args| {
                    let registry = on_register.clone();
                    async move {
                        let description: ServiceDescription = args.next()?;
                        let id = registry.register(description);
                        Ok::<_, OperationError>(Reply::value(id))
                    }
                },
            )
            .operation(
                Operation::new("unRegister", vec![ValueKind::Int], None),
                move |mut args| {
                    let registry = on_unregister.clone();
                    async move {
                        let id: RegisterId = args.next()?;
                        registry.unregister(id);
                        Ok::<_, OperationError>(Reply::Void)
                    }
                },
            )
            .operation(
                Operation::new(
                    "lookup",
                    vec![ValueKind::String, ValueKind::String],
                    Some(ValueKind::Array),
                ),
                move |mut args| {
                    let registry = on_lookup.clone();
                    async move {
                        let service_type: String = args.next()?;
                        let op_name: String = args.next()?;
                        let found = registry.lookup(&service_type, &op_name);
                        Ok::<_, OperationError>(Reply::Value(Value::from(found)))
                    }
                },
            )
            .operation(
                Operation::new("update", vec![ValueKind::Description], None),
                move |mut args| {
                    let registry = on_update.clone();
                    async move {
                        let description: ServiceDescription = args.next()?;
                        registry.update(description);
                        Ok::<_, OperationError>(Reply::Void)
                    }
                },
            )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
