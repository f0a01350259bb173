//! Adaptation surface of a composite service.
//!
//! Probes report what the orchestration loop does; effectors let an external
//! controller change the cache, the workflow text and retry behavior.

pub mod effectors;
pub mod probes;

pub use effectors::{CacheEffector, WorkflowEffector};
pub use probes::{CostProbe, FailureLogProbe, ProbeHub, WorkflowProbe};
