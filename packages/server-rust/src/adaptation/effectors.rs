//! Write-side controls over a running composite service.

use tessera_core::{RegisterId, ServiceDescription, Value};
use tracing::{info, warn};

use crate::composite::{CompositeService, InvocationId};

/// Cache invalidation and inspection.
#[derive(Debug, Clone)]
pub struct CacheEffector {
    composite: CompositeService,
}

impl CacheEffector {
    #[must_use]
    pub fn new(composite: CompositeService) -> Self {
        Self { composite }
    }

    /// Drops `description` from every cached entry.
    pub fn remove_service(&self, description: &ServiceDescription) -> bool {
        self.composite.cache().remove_description(description)
    }

    /// Drops the provider registered under `id` from every cached entry.
    pub fn remove_service_by_id(&self, id: RegisterId) -> bool {
        self.composite.cache().remove_by_id(id)
    }

    /// Drops `description` from the `op_name` entry only.
    pub fn remove_service_operation(&self, description: &ServiceDescription, op_name: &str) -> bool {
        self.composite
            .cache()
            .remove_for_operation(description, op_name)
    }

    /// Empties the whole cache.
    pub fn refresh_cache(&self) {
        self.composite.cache().refresh();
    }

    /// Drops the `(service_type, op_name)` entry and looks it up again.
    pub async fn refresh_services(&self, service_type: &str, op_name: &str) -> Vec<ServiceDescription> {
        self.composite.cache().remove_entry(service_type, op_name);
        self.composite.lookup_service(service_type, op_name).await
    }

    /// Drops `description` from the `op_name` entry and returns the
    /// providers found by looking that entry up again.
    pub async fn refresh_for(
        &self,
        description: &ServiceDescription,
        op_name: &str,
    ) -> Vec<ServiceDescription> {
        self.remove_service_operation(description, op_name);
        self.composite
            .lookup_service(&description.service_type, op_name)
            .await
    }

    /// Replaces `old` with `new` in the entry of every operation `old`
    /// offers. Ignored unless both carry the same registration id.
    pub fn update_service_description(&self, old: &ServiceDescription, new: &ServiceDescription) {
        if old.register_id != new.register_id {
            warn!(
                old = %old.register_id,
                new = %new.register_id,
                "description update ignored: registration ids differ"
            );
            return;
        }
        for op in &old.operations {
            self.composite.cache().update(old, new.clone(), &op.op_name);
        }
    }

    /// Cached description registered under `id`.
    #[must_use]
    pub fn get_service(&self, id: RegisterId) -> Option<ServiceDescription> {
        self.composite.cache().description(id)
    }
}

/// Workflow-level controls: workflow text, custom properties and retry abort.
#[derive(Debug, Clone)]
pub struct WorkflowEffector {
    composite: CompositeService,
    cache: CacheEffector,
}

impl WorkflowEffector {
    #[must_use]
    pub fn new(composite: CompositeService) -> Self {
        let cache = CacheEffector::new(composite.clone());
        Self { composite, cache }
    }

    #[must_use]
    pub fn cache(&self) -> &CacheEffector {
        &self.cache
    }

    /// Replaces the workflow text for invocations started from now on.
    pub fn update_workflow(&self, workflow: impl Into<String>) {
        self.composite.set_workflow(workflow);
        info!("workflow updated");
    }

    pub fn remove_service(&self, description: &ServiceDescription) -> bool {
        self.cache.remove_service(description)
    }

    pub fn remove_service_by_id(&self, id: RegisterId) -> bool {
        self.cache.remove_service_by_id(id)
    }

    pub fn refresh_all_services(&self) {
        self.cache.refresh_cache();
    }

    pub async fn refresh_services(&self, service_type: &str, op_name: &str) -> Vec<ServiceDescription> {
        self.cache.refresh_services(service_type, op_name).await
    }

    pub fn update_service_description(&self, old: &ServiceDescription, new: &ServiceDescription) {
        self.cache.update_service_description(old, new);
    }

    /// Sets a custom property on the cached description `id`.
    ///
    /// Returns `false` (with a warning) if `id` is not cached.
    pub fn update_service_custom_property(&self, id: RegisterId, name: &str, value: Value) -> bool {
        let updated = self
            .composite
            .cache()
            .update_custom_property(id, name, value);
        if !updated {
            warn!(%id, property = name, "custom property update for uncached service ignored");
        }
        updated
    }

    /// Stops retrying in invocation `id` after its current attempt.
    pub fn stop_retrying(&self, id: InvocationId) -> bool {
        self.composite.stop_retrying(id)
    }

    /// Stops retrying in every running invocation.
    pub fn stop_retrying_all(&self) -> usize {
        self.composite.stop_retrying_all()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tessera_core::{time, Operation, ValueKind};

    use super::*;
    use crate::composite::SequentialEngine;
    use crate::registry::{RegistryService, ServiceRegistry};
    use crate::service::atomic::AtomicService;
    use crate::service::managed::ManagedService;
    use crate::service::operation::{OperationError, Reply};
    use crate::transport::MemoryBus;

    struct Fixture {
        composite: CompositeService,
        registry: ServiceRegistry,
        _services: Vec<AtomicService>,
    }

    async fn fixture() -> Fixture {
        time::set_scale(1);
        let bus = MemoryBus::new();
        let registry = ServiceRegistry::new();
        let host = RegistryService::build(registry.clone(), bus.transport());
        host.start().await.unwrap();

        let pricer = AtomicService::builder("Pricer", "pricer.a")
            .operation(
                Operation::new("quote", vec![], Some(ValueKind::Float)).with_cost(3.0),
                |_| async { Ok::<_, OperationError>(Reply::value(1.0)) },
            )
            .operation(
                Operation::new("sell", vec![], None).with_cost(1.0),
                |_| async { Ok::<_, OperationError>(Reply::Void) },
            )
            .build(bus.transport());
        pricer.start().await.unwrap();
        pricer.register().await.unwrap();

        let composite = CompositeService::builder("Shop", "shop")
            .build(Arc::new(SequentialEngine), bus.transport());
        composite.start().await.unwrap();

        Fixture {
            composite,
            registry,
            _services: vec![host, pricer],
        }
    }

    #[tokio::test]
    async fn remove_and_refresh() {
        let f = fixture().await;
        let effector = f.composite.cache_effector();
        let found = f.composite.lookup_service("Pricer", "quote").await;
        f.composite.lookup_service("Pricer", "sell").await;
        let provider = found[0].clone();

        assert!(effector.remove_service_operation(&provider, "quote"));
        assert!(!f.composite.contains_services("Pricer", "quote"));
        assert!(f.composite.contains_services("Pricer", "sell"));

        let again = effector.refresh_for(&provider, "quote").await;
        assert_eq!(again.len(), 1);
        assert!(f.composite.contains_services("Pricer", "quote"));

        assert!(effector.remove_service(&provider));
        assert!(effector.get_service(provider.register_id).is_none());

        effector.refresh_services("Pricer", "quote").await;
        assert!(effector.get_service(provider.register_id).is_some());
        effector.refresh_cache();
        assert!(f.composite.cache().is_empty());
    }

    #[tokio::test]
    async fn refresh_services_sees_registry_changes() {
        let f = fixture().await;
        let effector = f.composite.workflow_effector();
        let first = f.composite.lookup_service("Pricer", "quote").await;
        assert_eq!(first.len(), 1);

        f.registry.unregister(first[0].register_id);
        // Still served from the cache.
        assert_eq!(f.composite.lookup_service("Pricer", "quote").await.len(), 1);
        assert!(effector.refresh_services("Pricer", "quote").await.is_empty());
        assert!(!f.composite.contains_services("Pricer", "quote"));
    }

    #[tokio::test]
    async fn update_description_across_operations() {
        let f = fixture().await;
        let effector = f.composite.cache_effector();
        let old = f.composite.lookup_service("Pricer", "quote").await[0].clone();
        f.composite.lookup_service("Pricer", "sell").await;

        let mut new = old.clone();
        new.set_operation_cost("quote", 0.5);
        effector.update_service_description(&old, &new);
        assert_eq!(
            effector.get_service(old.register_id).unwrap().operation_cost("quote"),
            Some(0.5)
        );

        let mut other = new.clone();
        other.register_id = RegisterId(999);
        other.set_operation_cost("quote", 9.0);
        effector.update_service_description(&new, &other);
        assert!(effector.get_service(RegisterId(999)).is_none());
    }

    #[tokio::test]
    async fn workflow_controls() {
        let f = fixture().await;
        let effector = f.composite.workflow_effector();
        let id = f.composite.lookup_service("Pricer", "quote").await[0].register_id;

        effector.update_workflow("Pricer.sell");
        assert_eq!(f.composite.workflow().as_str(), "Pricer.sell");

        assert!(effector.update_service_custom_property(id, "tier", Value::from("gold")));
        assert!(!effector.update_service_custom_property(RegisterId(999), "tier", Value::Null));
        assert_eq!(
            f.composite.service_description(id).unwrap().custom_property("tier"),
            Some(&Value::from("gold"))
        );

        assert!(!effector.stop_retrying(InvocationId(12345)));
        assert_eq!(effector.stop_retrying_all(), 0);

        assert!(effector.remove_service_by_id(id));
        effector.refresh_all_services();
        assert!(effector.cache().get_service(id).is_none());
    }
}
