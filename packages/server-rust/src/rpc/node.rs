//! Correlated request/response over a text transport.
//!
//! An [`RpcNode`] listens on one endpoint. Outbound calls get a fresh message
//! id and, when a reply is wanted, a pending slot that is resolved by the
//! matching response or by the timeout, whichever comes first. Inbound
//! requests are dispatched to the node's worker pool; inbound responses are
//! resolved inline on the transport's delivery task and never queue behind
//! requests.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tessera_core::{time, Message, MessageId, RemoteResult, Request, Response, Value};
use tracing::{debug, info_span, warn, Instrument};

use super::pending::PendingCalls;
use crate::service::config::WorkerPoolConfig;
use crate::service::operation::{OperationError, OperationTable, Reply};
use crate::service::worker::{PoolError, WorkerPool};
use crate::transport::{MessageReceiver, Transport, TransportError};

struct NodeInner {
    endpoint: String,
    transport: Arc<dyn Transport>,
    pending: PendingCalls,
    operations: OperationTable,
    pool_config: WorkerPoolConfig,
    pool: Mutex<Option<WorkerPool>>,
}

/// A service's messaging endpoint: outbound correlated calls plus inbound
/// dispatch into an [`OperationTable`].
///
/// Cloning is cheap; clones share the same endpoint and pending-call table.
#[derive(Clone)]
pub struct RpcNode {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for RpcNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcNode")
            .field("endpoint", &self.inner.endpoint)
            .field("operations", &self.inner.operations)
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl RpcNode {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        operations: OperationTable,
        pool_config: WorkerPoolConfig,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                endpoint: endpoint.into(),
                transport,
                pending: PendingCalls::new(),
                operations,
                pool_config,
                pool: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn operations(&self) -> &OperationTable {
        &self.inner.operations
    }

    /// Number of calls still waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Starts the worker pool and begins listening on the node's endpoint.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the endpoint cannot be claimed.
    pub async fn start(&self) -> Result<(), TransportError> {
        {
            let mut pool = self.inner.pool.lock();
            if pool.is_none() {
                *pool = Some(WorkerPool::start(&self.inner.pool_config));
            }
        }
        let receiver = Arc::new(NodeReceiver {
            node: Arc::downgrade(&self.inner),
        });
        if let Err(e) = self
            .inner
            .transport
            .start_listening(&self.inner.endpoint, receiver)
            .await
        {
            self.stop_pool().await;
            return Err(e);
        }
        debug!(endpoint = %self.inner.endpoint, "rpc node listening");
        Ok(())
    }

    /// Stops listening and shuts the worker pool down.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the node was not listening.
    pub async fn stop(&self) -> Result<(), TransportError> {
        let result = self.inner.transport.stop_listening().await;
        self.stop_pool().await;
        debug!(endpoint = %self.inner.endpoint, "rpc node stopped");
        result
    }

    async fn stop_pool(&self) {
        let pool = self.inner.pool.lock().take();
        if let Some(mut pool) = pool {
            pool.stop().await;
        }
    }

    /// Sends `op_name(params)` to the provider of `service_type` listening
    /// at `destination`.
    ///
    /// Without `wants_reply` the request is sent and [`RemoteResult::Void`]
    /// returned at once. Otherwise the caller is suspended until the
    /// correlated response arrives or `timeout` logical units elapse;
    /// `None` waits indefinitely. A send failure resolves to
    /// [`RemoteResult::Timeout`] immediately, and a response arriving after
    /// the deadline is dropped.
    pub async fn send_request(
        &self,
        service_type: &str,
        destination: &str,
        wants_reply: bool,
        timeout: Option<u64>,
        op_name: &str,
        params: Vec<Value>,
    ) -> RemoteResult {
        let id = self.inner.pending.next_id();
        let span = info_span!(
            "rpc_call",
            msg_id = id,
            op = %op_name,
            destination = %destination,
            outcome = tracing::field::Empty
        );
        let request = Message::Request(Request {
            id,
            endpoint: self.inner.endpoint.clone(),
            service_type: service_type.to_string(),
            op_name: op_name.to_string(),
            params,
        });

        let result = self
            .exchange(id, destination, wants_reply, timeout, request)
            .instrument(span.clone())
            .await;
        span.record("outcome", outcome_label(&result));
        result
    }

    /// Calls `op_name` and waits for the reply.
    pub async fn call(
        &self,
        service_type: &str,
        destination: &str,
        timeout: Option<u64>,
        op_name: &str,
        params: Vec<Value>,
    ) -> RemoteResult {
        self.send_request(service_type, destination, true, timeout, op_name, params)
            .await
    }

    async fn exchange(
        &self,
        id: MessageId,
        destination: &str,
        wants_reply: bool,
        timeout: Option<u64>,
        request: Message,
    ) -> RemoteResult {
        let text = match request.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode request");
                return RemoteResult::Timeout;
            }
        };

        if !wants_reply {
            if let Err(e) = self.inner.transport.send(&text, destination).await {
                warn!(error = %e, "send failed");
            }
            return RemoteResult::Void;
        }

        let mut rx = self.inner.pending.register(id);
        if let Err(e) = self.inner.transport.send(&text, destination).await {
            warn!(error = %e, "send failed; reporting timeout");
            self.inner.pending.discard(id);
            return RemoteResult::Timeout;
        }

        let Some(units) = timeout else {
            return rx.await.unwrap_or(RemoteResult::Timeout);
        };

        let started = Instant::now();
        match tokio::time::timeout(time::to_duration(units), &mut rx).await {
            Ok(result) => result.unwrap_or(RemoteResult::Timeout),
            Err(_) => {
                if self.inner.pending.discard(id) {
                    debug!(
                        timeout = units,
                        waited = time::to_units(started.elapsed()),
                        "no response before deadline"
                    );
                    RemoteResult::Timeout
                } else {
                    // The response claimed the slot between the deadline and
                    // the discard; it has already been sent on the channel.
                    rx.await.unwrap_or(RemoteResult::Timeout)
                }
            }
        }
    }
}

fn outcome_label(result: &RemoteResult) -> &'static str {
    match result {
        RemoteResult::Value(_) => "value",
        RemoteResult::Void => "void",
        RemoteResult::Timeout => "timeout",
    }
}

// ---------------------------------------------------------------------------
// Inbound path
// ---------------------------------------------------------------------------

struct NodeReceiver {
    node: Weak<NodeInner>,
}

impl MessageReceiver for NodeReceiver {
    fn on_message(&self, message: String) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        match Message::from_text(&message) {
            Ok(Message::Response(response)) => node.accept_response(response),
            Ok(Message::Request(request)) => node.dispatch(request),
            Err(e) => warn!(endpoint = %node.endpoint, error = %e, "dropping malformed message"),
        }
    }
}

impl NodeInner {
    fn accept_response(&self, response: Response) {
        let request_id = response.request_id;
        if !self.pending.resolve(request_id, response.into_result()) {
            debug!(
                endpoint = %self.endpoint,
                request_id,
                "discarding late or unmatched response"
            );
        }
    }

    fn dispatch(self: Arc<Self>, request: Request) {
        let Request {
            id,
            endpoint: reply_to,
            op_name,
            params,
            ..
        } = request;

        let handler = self.operations.invoke(&op_name, params);
        let node = Arc::clone(&self);
        let job = async move {
            let outcome = handler.await;
            node.reply(id, &reply_to, &op_name, outcome).await;
        };

        let submitted = match self.pool.lock().as_ref() {
            Some(pool) => pool.submit(job),
            None => Err(PoolError::Stopped),
        };
        if let Err(e) = submitted {
            warn!(endpoint = %self.endpoint, request_id = id, error = %e, "request dropped");
        }
    }

    async fn reply(
        &self,
        request_id: MessageId,
        reply_to: &str,
        op_name: &str,
        outcome: Result<Reply, OperationError>,
    ) {
        let value = match outcome {
            Ok(Reply::Value(value)) => Some(value),
            Ok(Reply::Void) => None,
            Ok(Reply::Aborted) => {
                debug!(op = %op_name, request_id, "invocation aborted; no response sent");
                return;
            }
            Err(e) => {
                warn!(op = %op_name, request_id, error = %e, "operation failed; no response sent");
                return;
            }
        };

        let response = Message::Response(Response::new(
            self.pending.next_id(),
            request_id,
            self.endpoint.clone(),
            value,
        ));
        let text = match response.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(op = %op_name, error = %e, "failed to encode response");
                return;
            }
        };
        if let Err(e) = self.transport.send(&text, reply_to).await {
            warn!(op = %op_name, reply_to, error = %e, "failed to send response");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
