//! In-flight call table.
//!
//! Each call expecting a reply owns a oneshot slot keyed by its message id.
//! Whoever removes the slot first (response arrival or timeout) decides the
//! outcome, so a slot resolves at most once.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tessera_core::{MessageId, RemoteResult};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    last_id: AtomicU64,
    slots: DashMap<MessageId, oneshot::Sender<RemoteResult>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates the next message id. Ids start at 1 and never repeat.
    pub(crate) fn next_id(&self) -> MessageId {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Opens a result slot for `id`.
    pub(crate) fn register(&self, id: MessageId) -> oneshot::Receiver<RemoteResult> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id, tx);
        rx
    }

    /// Delivers `result` to the caller waiting on `id`.
    ///
    /// Returns `false` if no slot exists (never opened, already resolved, or
    /// timed out), in which case the result is dropped.
    pub(crate) fn resolve(&self, id: MessageId, result: RemoteResult) -> bool {
        match self.slots.remove(&id) {
            Some((_, tx)) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Closes the slot for `id` without delivering anything.
    ///
    /// Returns `false` if the slot was already gone.
    pub(crate) fn discard(&self, id: MessageId) -> bool {
        self.slots.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;
    use tessera_core::Value;

    use super::*;

    #[tokio::test]
    async fn resolve_wakes_receiver() {
        let pending = PendingCalls::new();
        let id = pending.next_id();
        let rx = pending.register(id);

        assert!(pending.resolve(id, RemoteResult::Value(Value::Int(1))));
        assert_eq!(rx.await.unwrap(), RemoteResult::Value(Value::Int(1)));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn slot_resolves_at_most_once() {
        let pending = PendingCalls::new();
        let id = pending.next_id();
        let _rx = pending.register(id);

        assert!(pending.discard(id));
        assert!(!pending.resolve(id, RemoteResult::Void));
        assert!(!pending.discard(id));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(42, RemoteResult::Void));
    }

    #[test]
    fn concurrent_ids_are_distinct() {
        let pending = Arc::new(PendingCalls::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pending = Arc::clone(&pending);
                std::thread::spawn(move || (0..500).map(|_| pending.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    proptest! {
        #[test]
        fn ids_increase_monotonically(n in 1_usize..200) {
            let pending = PendingCalls::new();
            let ids: Vec<_> = (0..n).map(|_| pending.next_id()).collect();
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(ids[0], 1);
        }
    }
}
