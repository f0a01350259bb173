//! Read-only lifecycle notifications.
//!
//! Subscribers may be added and removed at any time. Notification iterates a
//! snapshot of the subscriber list, so a subscriber may unsubscribe itself
//! from inside a callback.

use std::sync::Arc;

use parking_lot::RwLock;
use tessera_core::{RemoteResult, ServiceDescription, Value};
use tracing::warn;

use crate::composite::InvocationId;

/// Workflow and operation lifecycle events. Every method defaults to a no-op.
pub trait WorkflowProbe: Send + Sync {
    fn workflow_started(&self, _invocation: InvocationId, _qos: &str, _params: &[Value]) {}

    fn workflow_ended(
        &self,
        _invocation: InvocationId,
        _result: &RemoteResult,
        _qos: &str,
        _params: &[Value],
    ) {
    }

    fn operation_invoked(
        &self,
        _invocation: InvocationId,
        _service: &ServiceDescription,
        _op_name: &str,
        _params: &[Value],
    ) {
    }

    fn operation_returned(
        &self,
        _invocation: InvocationId,
        _service: &ServiceDescription,
        _result: &RemoteResult,
        _op_name: &str,
        _params: &[Value],
    ) {
    }

    fn operation_timed_out(
        &self,
        _invocation: InvocationId,
        _service: &ServiceDescription,
        _op_name: &str,
        _params: &[Value],
    ) {
    }

    fn service_not_found(&self, _service_type: &str, _op_name: &str) {}
}

/// Receives the advertised cost of every successful operation call.
pub trait CostProbe: Send + Sync {
    fn service_cost(&self, service_name: &str, op_name: &str, cost: f64);
}

/// Subscriber lists for one composite service.
#[derive(Default)]
pub struct ProbeHub {
    workflow: RwLock<Vec<Arc<dyn WorkflowProbe>>>,
    cost: RwLock<Vec<Arc<dyn CostProbe>>>,
}

impl std::fmt::Debug for ProbeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeHub")
            .field("workflow", &self.workflow.read().len())
            .field("cost", &self.cost.read().len())
            .finish()
    }
}

impl ProbeHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_workflow(&self, probe: Arc<dyn WorkflowProbe>) {
        self.workflow.write().push(probe);
    }

    /// Removes `probe` (compared by identity). Returns `false` if absent.
    pub fn unsubscribe_workflow(&self, probe: &Arc<dyn WorkflowProbe>) -> bool {
        let mut list = self.workflow.write();
        let before = list.len();
        list.retain(|p| !Arc::ptr_eq(p, probe));
        list.len() != before
    }

    pub fn subscribe_cost(&self, probe: Arc<dyn CostProbe>) {
        self.cost.write().push(probe);
    }

    /// Removes `probe` (compared by identity). Returns `false` if absent.
    pub fn unsubscribe_cost(&self, probe: &Arc<dyn CostProbe>) -> bool {
        let mut list = self.cost.write();
        let before = list.len();
        list.retain(|p| !Arc::ptr_eq(p, probe));
        list.len() != before
    }

    fn each_workflow(&self, f: impl Fn(&dyn WorkflowProbe)) {
        let snapshot = self.workflow.read().clone();
        for probe in &snapshot {
            f(probe.as_ref());
        }
    }

    pub(crate) fn workflow_started(&self, invocation: InvocationId, qos: &str, params: &[Value]) {
        self.each_workflow(|p| p.workflow_started(invocation, qos, params));
    }

    pub(crate) fn workflow_ended(
        &self,
        invocation: InvocationId,
        result: &RemoteResult,
        qos: &str,
        params: &[Value],
    ) {
        self.each_workflow(|p| p.workflow_ended(invocation, result, qos, params));
    }

    pub(crate) fn operation_invoked(
        &self,
        invocation: InvocationId,
        service: &ServiceDescription,
        op_name: &str,
        params: &[Value],
    ) {
        self.each_workflow(|p| p.operation_invoked(invocation, service, op_name, params));
    }

    pub(crate) fn operation_returned(
        &self,
        invocation: InvocationId,
        service: &ServiceDescription,
        result: &RemoteResult,
        op_name: &str,
        params: &[Value],
    ) {
        self.each_workflow(|p| p.operation_returned(invocation, service, result, op_name, params));
    }

    pub(crate) fn operation_timed_out(
        &self,
        invocation: InvocationId,
        service: &ServiceDescription,
        op_name: &str,
        params: &[Value],
    ) {
        self.each_workflow(|p| p.operation_timed_out(invocation, service, op_name, params));
    }

    pub(crate) fn service_not_found(&self, service_type: &str, op_name: &str) {
        self.each_workflow(|p| p.service_not_found(service_type, op_name));
    }

    /// Reports the cost of `op_name` as advertised by `service`.
    pub(crate) fn cost_observed(&self, service: &ServiceDescription, op_name: &str) {
        let cost = service.operation_cost(op_name).unwrap_or_default();
        let snapshot = self.cost.read().clone();
        for probe in &snapshot {
            probe.service_cost(&service.service_name, op_name, cost);
        }
    }
}

/// Logs failed operations and missing providers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureLogProbe;

impl WorkflowProbe for FailureLogProbe {
    fn operation_timed_out(
        &self,
        invocation: InvocationId,
        service: &ServiceDescription,
        op_name: &str,
        _params: &[Value],
    ) {
        warn!(
            %invocation,
            service_type = %service.service_type,
            service = %service.service_name,
            op = op_name,
            "service failed"
        );
    }

    fn service_not_found(&self, service_type: &str, op_name: &str) {
        warn!(service_type, op = op_name, "no provider found");
    }
}
