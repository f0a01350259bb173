//! Service description cache.
//!
//! Maps `(service type, operation)` to the providers found for it, with a
//! reverse index from registration id to description. Buckets hold ids only,
//! so a description exists once and every bucket sees updates to it. Ids no
//! longer referenced by any bucket are dropped from the reverse index.
//!
//! Invalidation is command-driven. A bucket emptied by removal is deleted so
//! the next lookup for that key goes back to the registry.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tessera_core::{RegisterId, ServiceDescription, Value};
use tracing::{debug, warn};

use crate::service::config::CacheConfig;

type CacheKey = (String, String);

fn key(service_type: &str, op_name: &str) -> CacheKey {
    (service_type.to_string(), op_name.to_string())
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Vec<RegisterId>>,
    by_id: HashMap<RegisterId, ServiceDescription>,
    /// Keys in insertion order, oldest first.
    order: VecDeque<CacheKey>,
}

impl CacheState {
    fn drop_key(&mut self, key: &CacheKey) -> Option<Vec<RegisterId>> {
        let ids = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        for id in &ids {
            self.prune(*id);
        }
        Some(ids)
    }

    fn prune(&mut self, id: RegisterId) {
        if !self.entries.values().any(|ids| ids.contains(&id)) {
            self.by_id.remove(&id);
        }
    }

    /// Removes `id` from every bucket, deleting buckets that become empty.
    fn remove_id(&mut self, id: RegisterId) -> bool {
        let mut emptied = Vec::new();
        let mut found = false;
        for (key, ids) in &mut self.entries {
            let before = ids.len();
            ids.retain(|i| *i != id);
            if ids.len() != before {
                found = true;
                if ids.is_empty() {
                    emptied.push(key.clone());
                }
            }
        }
        for key in &emptied {
            self.entries.remove(key);
            self.order.retain(|k| k != key);
        }
        self.by_id.remove(&id);
        found
    }
}

/// Per-composite cache of registry lookups.
#[derive(Debug)]
pub struct DescriptionCache {
    state: RwLock<CacheState>,
    max_entries: Option<usize>,
}

impl Default for DescriptionCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl DescriptionCache {
    /// Creates an empty cache. `max_entries` of `Some(0)` is treated as
    /// unbounded.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            max_entries: config.max_entries.filter(|n| *n > 0),
        }
    }

    /// Cached providers for `(service_type, op_name)`.
    ///
    /// `None` is a miss; `Some` with an empty vector is a cached empty answer.
    #[must_use]
    pub fn get(&self, service_type: &str, op_name: &str) -> Option<Vec<ServiceDescription>> {
        let state = self.state.read();
        let ids = state.entries.get(&key(service_type, op_name))?;
        Some(
            ids.iter()
                .filter_map(|id| state.by_id.get(id))
                .cloned()
                .collect(),
        )
    }

    /// Installs `descriptions` as the bucket for `(service_type, op_name)`,
    /// replacing any previous bucket. The reverse index entries are
    /// overwritten with the given descriptions.
    pub fn add(&self, service_type: &str, op_name: &str, descriptions: Vec<ServiceDescription>) {
        let key = key(service_type, op_name);
        let mut state = self.state.write();

        let mut ids = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let id = description.register_id;
            if !ids.contains(&id) {
                ids.push(id);
            }
            state.by_id.insert(id, description);
        }

        match state.entries.insert(key.clone(), ids) {
            Some(previous) => {
                for id in previous {
                    state.prune(id);
                }
            }
            None => state.order.push_back(key),
        }

        if let Some(max) = self.max_entries {
            while state.entries.len() > max {
                let Some(oldest) = state.order.front().cloned() else {
                    break;
                };
                debug!(service_type = %oldest.0, op = %oldest.1, "evicting cache entry");
                state.drop_key(&oldest);
            }
        }
    }

    /// Removes `description` from every bucket mentioning it.
    pub fn remove_description(&self, description: &ServiceDescription) -> bool {
        self.remove_by_id(description.register_id)
    }

    /// Removes the provider registered under `id` from every bucket.
    pub fn remove_by_id(&self, id: RegisterId) -> bool {
        let removed = self.state.write().remove_id(id);
        debug!(%id, removed, "cache remove by id");
        removed
    }

    /// Removes `description` from the `(its type, op_name)` bucket only.
    pub fn remove_for_operation(&self, description: &ServiceDescription, op_name: &str) -> bool {
        let key = key(&description.service_type, op_name);
        let id = description.register_id;
        let mut state = self.state.write();
        let Some(ids) = state.entries.get_mut(&key) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|i| *i != id);
        let removed = ids.len() != before;
        if ids.is_empty() {
            state.entries.remove(&key);
            state.order.retain(|k| k != &key);
        }
        if removed {
            state.prune(id);
        }
        removed
    }

    /// Drops the bucket for `(service_type, op_name)`.
    pub fn remove_entry(&self, service_type: &str, op_name: &str) -> bool {
        self.state
            .write()
            .drop_key(&key(service_type, op_name))
            .is_some()
    }

    /// Drops everything. Every key misses until looked up again.
    pub fn refresh(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.by_id.clear();
        state.order.clear();
        debug!("cache refreshed");
    }

    /// Replaces `old` with `new` in the `(old's type, op_name)` bucket.
    ///
    /// Returns `false` (with a warning) if `old` is not cached for that key.
    pub fn update(
        &self,
        old: &ServiceDescription,
        new: ServiceDescription,
        op_name: &str,
    ) -> bool {
        let key = key(&old.service_type, op_name);
        let old_id = old.register_id;
        let new_id = new.register_id;
        let mut state = self.state.write();

        let Some(ids) = state.entries.get_mut(&key) else {
            warn!(service = %old.service_name, op = op_name, "cache update for uncached key ignored");
            return false;
        };
        let Some(pos) = ids.iter().position(|i| *i == old_id) else {
            warn!(service = %old.service_name, op = op_name, "cache update for uncached service ignored");
            return false;
        };
        if old_id != new_id && ids.contains(&new_id) {
            ids.remove(pos);
        } else {
            ids[pos] = new_id;
        }
        state.by_id.insert(new_id, new);
        if old_id != new_id {
            state.prune(old_id);
        }
        true
    }

    /// Returns `true` if `(service_type, op_name)` is cached, even if empty.
    #[must_use]
    pub fn contains(&self, service_type: &str, op_name: &str) -> bool {
        self.state
            .read()
            .entries
            .contains_key(&key(service_type, op_name))
    }

    /// Cached description registered under `id`.
    #[must_use]
    pub fn description(&self, id: RegisterId) -> Option<ServiceDescription> {
        self.state.read().by_id.get(&id).cloned()
    }

    /// Sets a custom property on the cached description `id`.
    ///
    /// Returns `false` if `id` is not cached.
    pub fn update_custom_property(&self, id: RegisterId, name: &str, value: Value) -> bool {
        match self.state.write().by_id.get_mut(&id) {
            Some(description) => {
                description.set_custom_property(name, value);
                true
            }
            None => false,
        }
    }

    /// Number of cached `(type, op)` keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Returns `true` if the forward and reverse indexes agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let state = self.state.read();
        let forward_ok = state
            .entries
            .values()
            .flatten()
            .all(|id| state.by_id.contains_key(id));
        let reverse_ok = state.by_id.iter().all(|(id, d)| {
            d.register_id == *id && state.entries.values().any(|ids| ids.contains(id))
        });
        let order_ok = state.order.len() == state.entries.len()
            && state.order.iter().all(|k| state.entries.contains_key(k));
        forward_ok && reverse_ok && order_ok
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tessera_core::{Operation, ValueKind};

    use super::*;

    fn provider(id: u64, ops: &[&str]) -> ServiceDescription {
        let mut d = ServiceDescription::new("Pricer", format!("p{id}"), format!("p{id}.ep"));
        for op in ops {
            d = d.with_operation(Operation::new(*op, vec![], Some(ValueKind::Float)));
        }
        d.register_id = RegisterId(id);
        d
    }

    fn cache() -> DescriptionCache {
        DescriptionCache::default()
    }

    #[test]
    fn miss_differs_from_empty() {
        let cache = cache();
        assert_eq!(cache.get("Pricer", "quote"), None);
        cache.add("Pricer", "quote", Vec::new());
        assert_eq!(cache.get("Pricer", "quote"), Some(Vec::new()));
        assert!(cache.contains("Pricer", "quote"));
    }

    #[test]
    fn add_and_get() {
        let cache = cache();
        cache.add("Pricer", "quote", vec![provider(1, &["quote"]), provider(2, &["quote"])]);
        let found = cache.get("Pricer", "quote").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(cache.description(RegisterId(2)).unwrap().service_name, "p2");
        assert!(cache.is_consistent());
    }

    #[test]
    fn add_overwrites_and_prunes() {
        let cache = cache();
        cache.add("Pricer", "quote", vec![provider(1, &["quote"])]);
        cache.add("Pricer", "quote", vec![provider(2, &["quote"])]);
        assert!(cache.description(RegisterId(1)).is_none());
        assert!(cache.is_consistent());
    }

    #[test]
    fn remove_by_id_spans_buckets() {
        let cache = cache();
        let p1 = provider(1, &["quote", "sell"]);
        let p2 = provider(2, &["quote"]);
        cache.add("Pricer", "quote", vec![p1.clone(), p2]);
        cache.add("Pricer", "sell", vec![p1.clone()]);

        assert!(cache.remove_description(&p1));
        assert_eq!(cache.get("Pricer", "quote").unwrap().len(), 1);
        // The emptied bucket is gone so the next lookup misses.
        assert!(!cache.contains("Pricer", "sell"));
        assert!(cache.description(RegisterId(1)).is_none());
        assert!(!cache.remove_by_id(RegisterId(1)));
        assert!(cache.is_consistent());
    }

    #[test]
    fn remove_for_operation_keeps_other_buckets() {
        let cache = cache();
        let p1 = provider(1, &["quote", "sell"]);
        cache.add("Pricer", "quote", vec![p1.clone(), provider(2, &["quote"])]);
        cache.add("Pricer", "sell", vec![p1.clone()]);

        assert!(cache.remove_for_operation(&p1, "quote"));
        assert_eq!(cache.get("Pricer", "quote").unwrap().len(), 1);
        assert_eq!(cache.get("Pricer", "sell").unwrap(), vec![p1]);
        assert!(cache.is_consistent());
    }

    #[test]
    fn remove_entry_and_refresh() {
        let cache = cache();
        cache.add("Pricer", "quote", vec![provider(1, &["quote"])]);
        cache.add("Pricer", "sell", vec![provider(2, &["sell"])]);

        assert!(cache.remove_entry("Pricer", "quote"));
        assert!(!cache.remove_entry("Pricer", "quote"));
        assert!(cache.description(RegisterId(1)).is_none());
        assert_eq!(cache.len(), 1);

        cache.refresh();
        assert!(cache.is_empty());
        assert!(cache.description(RegisterId(2)).is_none());
    }

    #[test]
    fn update_replaces_one_bucket() {
        let cache = cache();
        let old = provider(1, &["quote"]);
        cache.add("Pricer", "quote", vec![old.clone()]);

        let mut new = old.clone();
        new.set_operation_cost("quote", 7.0);
        assert!(cache.update(&old, new, "quote"));
        assert_eq!(
            cache.get("Pricer", "quote").unwrap()[0].operation_cost("quote"),
            Some(7.0)
        );

        assert!(!cache.update(&provider(9, &["quote"]), provider(9, &["quote"]), "quote"));
        assert!(!cache.update(&old, old.clone(), "sell"));
        assert!(cache.is_consistent());
    }

    #[test]
    fn custom_property_update() {
        let cache = cache();
        cache.add("Pricer", "quote", vec![provider(1, &["quote"])]);
        assert!(cache.update_custom_property(RegisterId(1), "tier", Value::from("gold")));
        assert!(!cache.update_custom_property(RegisterId(5), "tier", Value::from("gold")));
        assert_eq!(
            cache.get("Pricer", "quote").unwrap()[0].custom_property("tier"),
            Some(&Value::from("gold"))
        );
    }

    #[test]
    fn bounded_cache_evicts_oldest_key() {
        let cache = DescriptionCache::new(&CacheConfig {
            max_entries: Some(2),
            ..CacheConfig::default()
        });
        cache.add("Pricer", "a", vec![provider(1, &["a"])]);
        cache.add("Pricer", "b", vec![provider(2, &["b"])]);
        cache.add("Pricer", "c", vec![provider(3, &["c"])]);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("Pricer", "a"));
        assert!(cache.description(RegisterId(1)).is_none());
        assert!(cache.is_consistent());
    }

    #[test]
    fn zero_bound_is_unbounded() {
        let cache = DescriptionCache::new(&CacheConfig {
            max_entries: Some(0),
            ..CacheConfig::default()
        });
        for op in ["a", "b", "c"] {
            cache.add("Pricer", op, vec![provider(1, &[op])]);
        }
        assert_eq!(cache.len(), 3);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Add(u8, Vec<u8>),
        RemoveId(u8),
        RemoveForOp(u8, u8),
        RemoveEntry(u8),
        Update(u8, u8, u8),
        Refresh,
    }

    const OPS: [&str; 3] = ["quote", "sell", "buy"];

    fn op(n: u8) -> &'static str {
        OPS[usize::from(n) % OPS.len()]
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (any::<u8>(), prop::collection::vec(0_u8..6, 0..4)).prop_map(|(o, ids)| Step::Add(o, ids)),
            (0_u8..6).prop_map(Step::RemoveId),
            (0_u8..6, any::<u8>()).prop_map(|(id, o)| Step::RemoveForOp(id, o)),
            any::<u8>().prop_map(Step::RemoveEntry),
            (0_u8..6, 0_u8..6, any::<u8>()).prop_map(|(a, b, o)| Step::Update(a, b, o)),
            Just(Step::Refresh),
        ]
    }

    proptest! {
        #[test]
        fn indexes_stay_consistent(steps in prop::collection::vec(step(), 1..50), bound in 0_usize..4) {
            let cache = DescriptionCache::new(&CacheConfig {
                max_entries: Some(bound),
                ..CacheConfig::default()
            });
            for step in steps {
                match step {
                    Step::Add(o, ids) => {
                        let found = ids.iter().map(|id| provider(u64::from(*id) + 1, &OPS)).collect();
                        cache.add("Pricer", op(o), found);
                    }
                    Step::RemoveId(id) => {
                        cache.remove_by_id(RegisterId(u64::from(id) + 1));
                    }
                    Step::RemoveForOp(id, o) => {
                        cache.remove_for_operation(&provider(u64::from(id) + 1, &OPS), op(o));
                    }
                    Step::RemoveEntry(o) => {
                        cache.remove_entry("Pricer", op(o));
                    }
                    Step::Update(a, b, o) => {
                        cache.update(
                            &provider(u64::from(a) + 1, &OPS),
                            provider(u64::from(b) + 1, &OPS),
                            op(o),
                        );
                    }
                    Step::Refresh => cache.refresh(),
                }
                prop_assert!(cache.is_consistent());
            }
        }
    }
}
