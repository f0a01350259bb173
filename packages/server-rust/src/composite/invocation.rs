//! Per-invocation state: identity, QoS requirement and the retry-abort flag.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tessera_core::Value;

/// Identifies one top-level workflow invocation on a composite service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(pub u64);

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inv-{}", self.0)
    }
}

/// Table of running invocations and their abort flags.
#[derive(Debug, Default)]
pub(crate) struct ActiveInvocations {
    last_id: AtomicU64,
    flags: Arc<DashMap<InvocationId, Arc<AtomicBool>>>,
}

impl ActiveInvocations {
    /// Registers a new invocation. It is removed when the returned context is
    /// dropped.
    pub(crate) fn begin(
        &self,
        qos_requirement: &str,
        params: Vec<Value>,
        ignore_timeout_error: bool,
    ) -> InvocationContext {
        let id = InvocationId(self.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        let abort = Arc::new(AtomicBool::new(false));
        self.flags.insert(id, Arc::clone(&abort));
        InvocationContext {
            id,
            qos_requirement: qos_requirement.to_string(),
            params,
            ignore_timeout_error,
            abort,
            table: Arc::clone(&self.flags),
        }
    }

    /// Raises the abort flag of `id`. Returns `false` if `id` is not running.
    pub(crate) fn request_abort(&self, id: InvocationId) -> bool {
        match self.flags.get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Raises the abort flag of every running invocation. Returns how many.
    pub(crate) fn request_abort_all(&self) -> usize {
        let mut count = 0;
        for entry in self.flags.iter() {
            entry.value().store(true, Ordering::SeqCst);
            count += 1;
        }
        count
    }

    pub(crate) fn running(&self) -> Vec<InvocationId> {
        let mut ids: Vec<InvocationId> = self.flags.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}

/// State carried through one workflow invocation.
#[derive(Debug)]
pub struct InvocationContext {
    id: InvocationId,
    qos_requirement: String,
    params: Vec<Value>,
    ignore_timeout_error: bool,
    abort: Arc<AtomicBool>,
    table: Arc<DashMap<InvocationId, Arc<AtomicBool>>>,
}

impl InvocationContext {
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Name of the QoS requirement the invocation was started with.
    #[must_use]
    pub fn qos_requirement(&self) -> &str {
        &self.qos_requirement
    }

    /// Initial workflow arguments.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Whether the engine should continue past a timed-out operation.
    #[must_use]
    pub fn ignore_timeout_error(&self) -> bool {
        self.ignore_timeout_error
    }

    /// Clears the flag and reports whether it was raised.
    pub(crate) fn take_abort(&self) -> bool {
        self.abort.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn clear_abort(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }
}

impl Drop for InvocationContext {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
