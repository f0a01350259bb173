//! Typed calls to a remote [`RegistryService`](super::RegistryService).

use tessera_core::{RegisterId, RemoteResult, ServiceDescription, Value};
use tracing::warn;

use super::REGISTRY_SERVICE_TYPE;
use crate::rpc::RpcNode;
use crate::service::config::RegistryLocation;

/// Borrowed view pairing a node with the registry it should talk to.
#[derive(Debug, Clone, Copy)]
pub struct RegistryClient<'a> {
    node: &'a RpcNode,
    location: &'a RegistryLocation,
}

impl<'a> RegistryClient<'a> {
    #[must_use]
    pub fn new(node: &'a RpcNode, location: &'a RegistryLocation) -> Self {
        Self { node, location }
    }

    async fn call(&self, op_name: &str, params: Vec<Value>) -> RemoteResult {
        self.node
            .call(
                REGISTRY_SERVICE_TYPE,
                &self.location.endpoint,
                self.location.timeout,
                op_name,
                params,
            )
            .await
    }

    /// Registers `description`. Returns `None` if the registry did not answer
    /// with an id.
    pub async fn register(&self, description: &ServiceDescription) -> Option<RegisterId> {
        let result = self
            .call("register", vec![Value::from(description.clone())])
            .await;
        match result.decode::<RegisterId>() {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                warn!(service = %description.service_name, "registry did not answer register");
                None
            }
            Err(e) => {
                warn!(error = %e, "unexpected register reply");
                None
            }
        }
    }

    /// Returns `true` once the registry has acknowledged the removal.
    pub async fn unregister(&self, id: RegisterId) -> bool {
        !self.call("unRegister", vec![Value::from(id)]).await.is_timeout()
    }

    /// Queries providers of `service_type` offering `op_name`.
    ///
    /// `None` means the registry could not be reached; an empty vector means
    /// it answered with no match.
    pub async fn lookup(
        &self,
        service_type: &str,
        op_name: &str,
    ) -> Option<Vec<ServiceDescription>> {
        let result = self
            .call("lookup", vec![Value::from(service_type), Value::from(op_name)])
            .await;
        match result {
            RemoteResult::Timeout => None,
            RemoteResult::Void => Some(Vec::new()),
            RemoteResult::Value(value) => match value.decode() {
                Ok(found) => Some(found),
                Err(e) => {
                    warn!(error = %e, "unexpected lookup reply");
                    None
                }
            },
        }
    }

    /// Returns `true` once the registry has acknowledged the update.
    pub async fn update(&self, description: &ServiceDescription) -> bool {
        !self
            .call("update", vec![Value::from(description.clone())])
            .await
            .is_timeout()
    }
}
