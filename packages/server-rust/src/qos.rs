//! Provider selection among functionally equivalent candidates.
//!
//! A [`QosPolicy`] picks one description from a non-empty candidate list.
//! [`QosSelector`] decides which policy applies to a call: the one registered
//! under the invocation's requirement name, or a single active policy that can
//! be switched at runtime, depending on [`SelectionMode`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tessera_core::{ServiceDescription, Value};
use tracing::warn;

use crate::service::config::SelectionMode;

/// Chooses one provider for an operation call.
pub trait QosPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Returns one of `candidates`, or `None` only if `candidates` is empty.
    fn select<'a>(
        &self,
        candidates: &'a [ServiceDescription],
        op_name: &str,
        params: &[Value],
    ) -> Option<&'a ServiceDescription>;
}

/// Lowest advertised cost of the operation wins; the first candidate wins
/// ties. Candidates not offering the operation rank last.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinCostPolicy;

impl QosPolicy for MinCostPolicy {
    fn name(&self) -> &str {
        "MinCost"
    }

    fn select<'a>(
        &self,
        candidates: &'a [ServiceDescription],
        op_name: &str,
        _params: &[Value],
    ) -> Option<&'a ServiceDescription> {
        let cost = |d: &ServiceDescription| d.operation_cost(op_name).unwrap_or(f64::INFINITY);
        candidates
            .iter()
            .reduce(|best, d| if cost(d).total_cmp(&cost(best)).is_lt() { d } else { best })
    }
}

/// Uniformly random choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPolicy;

impl QosPolicy for RandomPolicy {
    fn name(&self) -> &str {
        "Random"
    }

    fn select<'a>(
        &self,
        candidates: &'a [ServiceDescription],
        _op_name: &str,
        _params: &[Value],
    ) -> Option<&'a ServiceDescription> {
        if candidates.is_empty() {
            return None;
        }
        candidates.get(rand::rng().random_range(0..candidates.len()))
    }
}

/// Applies the configured selection mode.
pub struct QosSelector {
    mode: SelectionMode,
    requirements: RwLock<HashMap<String, Arc<dyn QosPolicy>>>,
    active: RwLock<Arc<dyn QosPolicy>>,
}

impl std::fmt::Debug for QosSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosSelector")
            .field("mode", &self.mode)
            .field("requirements", &self.requirement_names())
            .field("active", &self.active.read().name())
            .finish()
    }
}

impl QosSelector {
    /// Creates a selector with no named requirements and [`MinCostPolicy`]
    /// as the active policy.
    #[must_use]
    pub fn new(mode: SelectionMode) -> Self {
        Self {
            mode,
            requirements: RwLock::new(HashMap::new()),
            active: RwLock::new(Arc::new(MinCostPolicy)),
        }
    }

    #[must_use]
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Registers `policy` under `name`, replacing any earlier one.
    pub fn add_requirement(&self, name: impl Into<String>, policy: Arc<dyn QosPolicy>) {
        self.requirements.write().insert(name.into(), policy);
    }

    /// Registered requirement names, sorted.
    #[must_use]
    pub fn requirement_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.requirements.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Replaces the active policy.
    pub fn use_policy(&self, policy: Arc<dyn QosPolicy>) {
        *self.active.write() = policy;
    }

    #[must_use]
    pub fn active_policy_name(&self) -> String {
        self.active.read().name().to_string()
    }

    /// Picks one of `candidates` for `op_name`.
    ///
    /// In [`SelectionMode::ByRequirement`], an unknown `requirement` falls
    /// back to a uniformly random choice with a warning.
    pub fn select<'a>(
        &self,
        requirement: &str,
        candidates: &'a [ServiceDescription],
        op_name: &str,
        params: &[Value],
    ) -> Option<&'a ServiceDescription> {
        let policy = match self.mode {
            SelectionMode::ActivePolicy => Arc::clone(&self.active.read()),
            SelectionMode::ByRequirement => {
                if let Some(policy) = self.requirements.read().get(requirement) {
                    Arc::clone(policy)
                } else {
                    warn!(
                        requirement,
                        op = op_name,
                        "unknown QoS requirement; selecting a provider at random"
                    );
                    Arc::new(RandomPolicy)
                }
            }
        };
        policy.select(candidates, op_name, params)
    }
}
