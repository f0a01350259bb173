//! Workflow engine port.
//!
//! A composite service does not interpret its workflow text itself. An engine
//! receives the text, walks it, and calls back into the composite for every
//! remote or local operation it needs.

use async_trait::async_trait;
use tessera_core::RemoteResult;
use tracing::{debug, warn};

use super::invocation::InvocationContext;
use super::CompositeService;

/// Executes one workflow invocation.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Runs `workflow` for `ctx` and returns its result.
    ///
    /// Remote steps go through
    /// [`CompositeService::invoke_service_operation`]; a
    /// [`RemoteResult::Timeout`] from a step should end the run unless
    /// [`InvocationContext::ignore_timeout_error`] is set.
    async fn execute(
        &self,
        workflow: &str,
        composite: &CompositeService,
        ctx: &InvocationContext,
    ) -> RemoteResult;
}

/// Runs one remote operation per line, in order.
///
/// Each non-empty line not starting with `#` names a step as
/// `ServiceType.opName`. Every step receives the invocation's parameters and
/// the result of the last step is the workflow result. A timed-out step ends
/// the run unless the invocation ignores timeout errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialEngine;

#[async_trait]
impl WorkflowEngine for SequentialEngine {
    async fn execute(
        &self,
        workflow: &str,
        composite: &CompositeService,
        ctx: &InvocationContext,
    ) -> RemoteResult {
        let mut result = RemoteResult::Void;
        for line in workflow.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((service_type, op_name)) = line.rsplit_once('.') else {
                warn!(step = line, "skipping malformed workflow step");
                continue;
            };
            result = composite
                .invoke_service_operation(ctx, service_type, op_name, ctx.params().to_vec())
                .await;
            if result.is_timeout() && !ctx.ignore_timeout_error() {
                debug!(invocation = %ctx.id(), step = line, "workflow stopped at timed-out step");
                break;
            }
        }
        result
    }
}
