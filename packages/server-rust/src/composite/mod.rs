//! Composite services: operations implemented by orchestrating other services.
//!
//! Each remote step of a workflow runs through
//! [`CompositeService::invoke_service_operation`]:
//!
//! 1. **Lookup**: description cache first, registry on a miss. No candidates
//!    ends the step with [`RemoteResult::Timeout`].
//! 2. **Select**: the [`QosSelector`] picks one candidate.
//! 3. **Invoke**: correlated call with the configured timeout, or three times
//!    the provider's response time when the timeout is 0.
//! 4. **Retry**: on timeout, go back to lookup until the attempt limit is
//!    reached. A raised abort flag ends the step with the last result.

pub mod invocation;
pub mod workflow;

use std::future::Future;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::RwLock;
use tessera_core::{Operation, RegisterId, RemoteResult, ServiceDescription, Value, ValueKind};
use tracing::{debug, info, info_span, Instrument};

pub use invocation::{InvocationContext, InvocationId};
pub use workflow::{SequentialEngine, WorkflowEngine};

use self::invocation::ActiveInvocations;
use crate::adaptation::{CacheEffector, ProbeHub, WorkflowEffector};
use crate::cache::DescriptionCache;
use crate::qos::{QosPolicy, QosSelector};
use crate::registry::RegistryClient;
use crate::rpc::RpcNode;
use crate::service::config::{CompositeConfig, RegistryLocation};
use crate::service::managed::ManagedService;
use crate::service::operation::{Args, OperationError, OperationTable, Reply};
use crate::transport::Transport;

struct CompositeInner {
    node: RpcNode,
    config: CompositeConfig,
    description: RwLock<ServiceDescription>,
    cache: DescriptionCache,
    selector: QosSelector,
    probes: ProbeHub,
    workflow: ArcSwap<String>,
    engine: Arc<dyn WorkflowEngine>,
    local_operations: OperationTable,
    invocations: ActiveInvocations,
}

/// A hosted composite service.
///
/// Cloning is cheap; clones share the node, cache, probes and policies.
#[derive(Clone)]
pub struct CompositeService {
    inner: Arc<CompositeInner>,
}

impl std::fmt::Debug for CompositeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeService")
            .field("node", &self.inner.node)
            .field("selector", &self.inner.selector)
            .field("cached_keys", &self.inner.cache.len())
            .finish_non_exhaustive()
    }
}

impl CompositeService {
    /// Starts building a composite of `service_type` listening at `endpoint`.
    #[must_use]
    pub fn builder(
        service_type: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> CompositeServiceBuilder {
        CompositeServiceBuilder {
            service_type: service_type.into(),
            endpoint: endpoint.into(),
            name: None,
            workflow: String::new(),
            config: CompositeConfig::default(),
            local_operations: OperationTable::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CompositeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn cache(&self) -> &DescriptionCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn probes(&self) -> &ProbeHub {
        &self.inner.probes
    }

    #[must_use]
    pub fn selector(&self) -> &QosSelector {
        &self.inner.selector
    }

    /// Registers a named QoS requirement.
    pub fn add_qos_requirement(&self, name: impl Into<String>, policy: Arc<dyn QosPolicy>) {
        self.inner.selector.add_requirement(name, policy);
    }

    #[must_use]
    pub fn qos_requirement_names(&self) -> Vec<String> {
        self.inner.selector.requirement_names()
    }

    /// Switches the active policy used in
    /// [`SelectionMode::ActivePolicy`](crate::service::config::SelectionMode::ActivePolicy).
    pub fn use_policy(&self, policy: Arc<dyn QosPolicy>) {
        info!(policy = policy.name(), "active QoS policy changed");
        self.inner.selector.use_policy(policy);
    }

    /// Current workflow text.
    #[must_use]
    pub fn workflow(&self) -> Arc<String> {
        self.inner.workflow.load_full()
    }

    /// Replaces the workflow used by invocations started from now on.
    pub fn set_workflow(&self, workflow: impl Into<String>) {
        self.inner.workflow.store(Arc::new(workflow.into()));
    }

    /// Returns `true` if the cache holds an entry for `(service_type, op_name)`.
    #[must_use]
    pub fn contains_services(&self, service_type: &str, op_name: &str) -> bool {
        self.inner.cache.contains(service_type, op_name)
    }

    /// Cached description registered under `id`.
    #[must_use]
    pub fn service_description(&self, id: RegisterId) -> Option<ServiceDescription> {
        self.inner.cache.description(id)
    }

    #[must_use]
    pub fn cache_effector(&self) -> CacheEffector {
        CacheEffector::new(self.clone())
    }

    #[must_use]
    pub fn workflow_effector(&self) -> WorkflowEffector {
        WorkflowEffector::new(self.clone())
    }

    /// Asks invocation `id` to stop retrying. Returns `false` if it is not
    /// running.
    pub fn stop_retrying(&self, id: InvocationId) -> bool {
        self.inner.invocations.request_abort(id)
    }

    /// Asks every running invocation to stop retrying. Returns how many.
    pub fn stop_retrying_all(&self) -> usize {
        self.inner.invocations.request_abort_all()
    }

    #[must_use]
    pub fn running_invocations(&self) -> Vec<InvocationId> {
        self.inner.invocations.running()
    }

    /// Providers of `service_type` offering `op_name`, from the cache or, on
    /// a miss, from the registry. A non-empty registry answer is cached.
    ///
    /// An empty result fires the service-not-found probe.
    pub async fn lookup_service(&self, service_type: &str, op_name: &str) -> Vec<ServiceDescription> {
        let found = match self.inner.cache.get(service_type, op_name) {
            Some(cached) => cached,
            None => {
                let answer = RegistryClient::new(&self.inner.node, &self.inner.config.registry)
                    .lookup(service_type, op_name)
                    .await
                    .unwrap_or_default();
                if !answer.is_empty() {
                    self.inner.cache.add(service_type, op_name, answer.clone());
                }
                answer
            }
        };
        if found.is_empty() {
            self.inner.probes.service_not_found(service_type, op_name);
        }
        found
    }

    /// Runs one remote operation of a workflow, with provider selection and
    /// retry.
    ///
    /// Returns the provider's result, or [`RemoteResult::Timeout`] if no
    /// provider was found or every attempt timed out. If the invocation's
    /// abort flag is raised, the result of the current attempt is returned
    /// without further attempts.
    pub async fn invoke_service_operation(
        &self,
        ctx: &InvocationContext,
        service_type: &str,
        op_name: &str,
        params: Vec<Value>,
    ) -> RemoteResult {
        let config = &self.inner.config;
        let max_attempts = config.attempts();
        let mut attempts = 0;
        ctx.clear_abort();

        loop {
            let candidates = self.lookup_service(service_type, op_name).await;
            let Some(service) = self
                .inner
                .selector
                .select(ctx.qos_requirement(), &candidates, op_name, &params)
                .cloned()
            else {
                info!(invocation = %ctx.id(), service_type, op = op_name, "service not found");
                return RemoteResult::Timeout;
            };
            debug!(
                invocation = %ctx.id(),
                service = %service.service_name,
                op = op_name,
                properties = ?service.custom_properties,
                "provider selected"
            );

            self.inner
                .probes
                .operation_invoked(ctx.id(), &service, op_name, &params);
            let timeout = if config.timeout == 0 {
                service.response_time.saturating_mul(3)
            } else {
                config.timeout
            };
            let result = self
                .inner
                .node
                .call(
                    &service.service_type,
                    &service.service_endpoint,
                    Some(timeout),
                    op_name,
                    params.clone(),
                )
                .await;

            if result.is_timeout() {
                self.inner
                    .probes
                    .operation_timed_out(ctx.id(), &service, op_name, &params);
            } else {
                self.inner
                    .probes
                    .operation_returned(ctx.id(), &service, &result, op_name, &params);
                self.inner.probes.cost_observed(&service, op_name);
            }

            attempts += 1;
            if ctx.take_abort() {
                info!(invocation = %ctx.id(), op = op_name, attempts, "retrying stopped");
                return result;
            }
            if !result.is_timeout() || attempts >= max_attempts {
                return result;
            }
            debug!(invocation = %ctx.id(), op = op_name, attempts, "timed out; retrying");
        }
    }

    /// Runs a locally implemented operation.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::UnknownOperation`] if no local operation of
    /// that name exists, or the handler's error.
    pub async fn invoke_local_operation(
        &self,
        op_name: &str,
        params: Vec<Value>,
    ) -> Result<Reply, OperationError> {
        self.inner.local_operations.invoke(op_name, params).await
    }

    /// Executes the current workflow for a new invocation.
    pub async fn invoke_composite_service(&self, qos: &str, params: Vec<Value>) -> RemoteResult {
        let ctx = self
            .inner
            .invocations
            .begin(qos, params, self.inner.config.ignore_timeout_error);
        let span = info_span!("workflow", invocation = %ctx.id(), qos);
        let workflow = self.workflow();

        self.inner
            .probes
            .workflow_started(ctx.id(), qos, ctx.params());
        let result = self
            .inner
            .engine
            .execute(&workflow, self, &ctx)
            .instrument(span)
            .await;
        self.inner
            .probes
            .workflow_ended(ctx.id(), &result, qos, ctx.params());
        result
    }
}

#[async_trait]
impl ManagedService for CompositeService {
    fn node(&self) -> &RpcNode {
        &self.inner.node
    }

    fn registry(&self) -> &RegistryLocation {
        &self.inner.config.registry
    }

    fn description(&self) -> ServiceDescription {
        self.inner.description.read().clone()
    }

    fn set_register_id(&self, id: RegisterId) {
        self.inner.description.write().register_id = id;
    }
}

fn remote_operations(weak: &Weak<CompositeInner>) -> OperationTable {
    let on_invoke = weak.clone();
    let on_names = weak.clone();

    OperationTable::new()
        .with(
            // The return kind depends on the workflow.
            Operation::new(
                "invokeCompositeService",
                vec![ValueKind::String, ValueKind::Array],
                None,
            ),
            move |mut args| {
                let weak = on_invoke.clone();
                async move {
                    let qos: String = args.next()?;
                    let params: Vec<Value> = args.next()?;
                    let inner = weak.upgrade().ok_or(OperationError::Unavailable)?;
                    let composite = CompositeService { inner };
                    // A timed-out workflow sends no reply, so the caller
                    // observes its own timeout.
                    let reply = match composite.invoke_composite_service(&qos, params).await {
                        RemoteResult::Value(value) => Reply::Value(value),
                        RemoteResult::Void => Reply::Void,
                        RemoteResult::Timeout => Reply::Aborted,
                    };
                    Ok::<_, OperationError>(reply)
                }
            },
        )
        .with(
            Operation::new("getQosRequirementNames", vec![], Some(ValueKind::Array)),
            move |_| {
                let weak = on_names.clone();
                async move {
                    let inner = weak.upgrade().ok_or(OperationError::Unavailable)?;
                    let names = inner.selector.requirement_names();
                    Ok::<_, OperationError>(Reply::value(names))
                }
            },
        )
}

/// Builder for [`CompositeService`].
pub struct CompositeServiceBuilder {
    service_type: String,
    endpoint: String,
    name: Option<String>,
    workflow: String,
    config: CompositeConfig,
    local_operations: OperationTable,
}

impl CompositeServiceBuilder {
    /// Service name. Defaults to the endpoint.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = workflow.into();
        self
    }

    #[must_use]
    pub fn config(mut self, config: CompositeConfig) -> Self {
        self.config = config;
        self
    }

    /// Declares an operation the workflow engine can run in-process through
    /// [`CompositeService::invoke_local_operation`].
    #[must_use]
    pub fn local_operation<F, Fut>(mut self, signature: Operation, handler: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, OperationError>> + Send + 'static,
    {
        self.local_operations.register(signature, handler);
        self
    }

    /// Builds the composite on `transport`, running workflows with `engine`.
    #[must_use]
    pub fn build(
        self,
        engine: Arc<dyn WorkflowEngine>,
        transport: Arc<dyn Transport>,
    ) -> CompositeService {
        self.config.validate();
        let Self {
            service_type,
            endpoint,
            name,
            workflow,
            config,
            local_operations,
        } = self;

        let inner = Arc::new_cyclic(|weak| {
            let operations = remote_operations(weak);
            let name = name.unwrap_or_else(|| endpoint.clone());
            let mut description = ServiceDescription::new(service_type, name, endpoint.clone());
            description.operations = operations.operations();

            CompositeInner {
                node: RpcNode::new(endpoint, transport, operations, config.worker_pool.clone()),
                cache: DescriptionCache::new(&config.cache),
                selector: QosSelector::new(config.selection),
                config,
                description: RwLock::new(description),
                probes: ProbeHub::new(),
                workflow: ArcSwap::from_pointee(workflow),
                engine,
                local_operations,
                invocations: ActiveInvocations::default(),
            }
        });
        CompositeService { inner }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tessera_core::time;

    use super::*;
    use crate::adaptation::WorkflowProbe;
    use crate::qos::MinCostPolicy;
    use crate::registry::{RegistryService, ServiceRegistry};
    use crate::service::atomic::AtomicService;
    use crate::service::config::SelectionMode;
    use crate::transport::MemoryBus;

    fn quote_op(cost: f64) -> Operation {
        Operation::new("quote", vec![ValueKind::String], Some(ValueKind::Float)).with_cost(cost)
    }

    fn pricer(bus: &Arc<MemoryBus>, endpoint: &str, cost: f64, price: f64) -> AtomicService {
        AtomicService::builder("Pricer", endpoint)
            .response_time(5)
            .operation(quote_op(cost), move |_| async move {
                Ok::<_, OperationError>(Reply::value(price))
            })
            .build(bus.transport())
    }

    async fn registry(bus: &Arc<MemoryBus>) -> (ServiceRegistry, AtomicService) {
        time::set_scale(1);
        let registry = ServiceRegistry::new();
        let host = RegistryService::build(registry.clone(), bus.transport());
        host.start().await.unwrap();
        (registry, host)
    }

    fn composite(bus: &Arc<MemoryBus>, config: CompositeConfig) -> CompositeService {
        CompositeService::builder("Shop", "shop")
            .workflow("Pricer.quote")
            .config(config)
            .local_operation(
                Operation::new("double", vec![ValueKind::Float], Some(ValueKind::Float)),
                |mut args| async move {
                    let x: f64 = args.next()?;
                    Ok::<_, OperationError>(Reply::value(x * 2.0))
                },
            )
            .build(Arc::new(SequentialEngine), bus.transport())
    }

    #[derive(Default)]
    struct Counts {
        not_found: AtomicUsize,
        timed_out: AtomicUsize,
        started: AtomicUsize,
        ended: AtomicUsize,
    }

    impl WorkflowProbe for Counts {
        fn workflow_started(&self, _invocation: InvocationId, _qos: &str, _params: &[Value]) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn workflow_ended(
            &self,
            _invocation: InvocationId,
            _result: &RemoteResult,
            _qos: &str,
            _params: &[Value],
        ) {
            self.ended.fetch_add(1, Ordering::SeqCst);
        }
        fn operation_timed_out(
            &self,
            _invocation: InvocationId,
            _service: &ServiceDescription,
            _op_name: &str,
            _params: &[Value],
        ) {
            self.timed_out.fetch_add(1, Ordering::SeqCst);
        }
        fn service_not_found(&self, _service_type: &str, _op_name: &str) {
            self.not_found.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn description_lists_remote_operations() {
        let bus = MemoryBus::new();
        let shop = composite(&bus, CompositeConfig::default());
        let description = shop.description();
        assert_eq!(description.service_type, "Shop");
        assert!(description.contains_operation("invokeCompositeService"));
        assert!(description.contains_operation("getQosRequirementNames"));
        assert!(!description.contains_operation("double"));
    }

    #[tokio::test]
    async fn lookup_populates_cache() {
        let bus = MemoryBus::new();
        let (_registry, _host) = registry(&bus).await;
        let a = pricer(&bus, "pricer.a", 5.0, 10.0);
        a.start().await.unwrap();
        a.register().await.unwrap();

        let shop = composite(&bus, CompositeConfig::default());
        shop.start().await.unwrap();

        assert!(!shop.contains_services("Pricer", "quote"));
        let found = shop.lookup_service("Pricer", "quote").await;
        assert_eq!(found.len(), 1);
        assert!(shop.contains_services("Pricer", "quote"));
        assert_eq!(
            shop.service_description(found[0].register_id).unwrap().service_endpoint,
            "pricer.a"
        );
    }

    #[tokio::test]
    async fn missing_provider_is_not_cached() {
        let bus = MemoryBus::new();
        let (_registry, _host) = registry(&bus).await;
        let shop = composite(&bus, CompositeConfig::default());
        shop.start().await.unwrap();
        let counts = Arc::new(Counts::default());
        shop.probes().subscribe_workflow(counts.clone());

        let result = shop.invoke_composite_service("cheap", vec![]).await;
        assert!(result.is_timeout());
        assert!(!shop.contains_services("Pricer", "quote"));
        assert_eq!(counts.not_found.load(Ordering::SeqCst), 1);
        assert_eq!(counts.started.load(Ordering::SeqCst), 1);
        assert_eq!(counts.ended.load(Ordering::SeqCst), 1);
        assert!(shop.running_invocations().is_empty());
    }

    #[tokio::test]
    async fn selects_by_requirement() {
        let bus = MemoryBus::new();
        let (_registry, _host) = registry(&bus).await;
        let mut providers = Vec::new();
        for (endpoint, cost, price) in [("pricer.a", 5.0, 10.0), ("pricer.b", 2.0, 20.0)] {
            let service = pricer(&bus, endpoint, cost, price);
            service.start().await.unwrap();
            service.register().await.unwrap();
            providers.push(service);
        }

        let shop = composite(&bus, CompositeConfig::default());
        shop.add_qos_requirement("cheap", Arc::new(MinCostPolicy));
        shop.start().await.unwrap();

        let result = shop.invoke_composite_service("cheap", vec![Value::from("x")]).await;
        assert_eq!(result, RemoteResult::Value(Value::Float(20.0)));
        assert_eq!(shop.qos_requirement_names(), vec!["cheap"]);
    }

    #[tokio::test]
    async fn retries_until_limit() {
        let bus = MemoryBus::new();
        let (_registry, _host) = registry(&bus).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let silent = AtomicService::builder("Pricer", "pricer.silent")
            .operation(quote_op(1.0), move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, OperationError>(Reply::Aborted) }
            })
            .build(bus.transport());
        silent.start().await.unwrap();
        silent.register().await.unwrap();

        let shop = composite(
            &bus,
            CompositeConfig {
                timeout: 20,
                max_retry_attempts: 3,
                ..CompositeConfig::default()
            },
        );
        shop.start().await.unwrap();
        let counts = Arc::new(Counts::default());
        shop.probes().subscribe_workflow(counts.clone());

        let result = shop.invoke_composite_service("any", vec![Value::from("x")]).await;
        assert!(result.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(counts.timed_out.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn local_operations() {
        let bus = MemoryBus::new();
        let shop = composite(&bus, CompositeConfig::default());
        let reply = shop
            .invoke_local_operation("double", vec![Value::Float(1.5)])
            .await
            .unwrap();
        assert_eq!(reply, Reply::Value(Value::Float(3.0)));
        assert!(shop.invoke_local_operation("triple", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn active_policy_mode() {
        let bus = MemoryBus::new();
        let (_registry, _host) = registry(&bus).await;
        let a = pricer(&bus, "pricer.a", 5.0, 10.0);
        let b = pricer(&bus, "pricer.b", 2.0, 20.0);
        for service in [&a, &b] {
            service.start().await.unwrap();
            service.register().await.unwrap();
        }

        let shop = composite(
            &bus,
            CompositeConfig {
                selection: SelectionMode::ActivePolicy,
                ..CompositeConfig::default()
            },
        );
        shop.start().await.unwrap();

        // Min cost is active by default; requirement names are ignored.
        let result = shop.invoke_composite_service("unknown", vec![Value::from("x")]).await;
        assert_eq!(result, RemoteResult::Value(Value::Float(20.0)));
    }

    #[tokio::test]
    async fn remote_invocation_and_names() {
        let bus = MemoryBus::new();
        let (_registry, _host) = registry(&bus).await;
        let a = pricer(&bus, "pricer.a", 5.0, 10.0);
        a.start().await.unwrap();
        a.register().await.unwrap();

        let shop = composite(&bus, CompositeConfig::default());
        shop.add_qos_requirement("cheap", Arc::new(MinCostPolicy));
        shop.start().await.unwrap();

        let client = RpcNode::new("client", bus.transport(), OperationTable::new(), Default::default());
        client.start().await.unwrap();

        let names = client
            .call("Shop", "shop", Some(1_000), "getQosRequirementNames", vec![])
            .await;
        assert_eq!(names, RemoteResult::Value(Value::from(vec!["cheap"])));

        let result = client
            .call(
                "Shop",
                "shop",
                Some(1_000),
                "invokeCompositeService",
                vec![Value::from("cheap"), Value::from(vec![Value::from("x")])],
            )
            .await;
        assert_eq!(result, RemoteResult::Value(Value::Float(10.0)));
    }
}
