//! Hosted services.
//!
//! 1. **Configuration** (`config`): worker pool, registry location, cache and
//!    composite settings
//! 2. **Operations** (`operation`): name -> typed handler tables
//! 3. **Worker pool** (`worker`): bounded execution of inbound requests
//! 4. **Lifecycle** (`managed`): start/stop and registry interaction shared by
//!    all services
//! 5. **Atomic services** (`atomic`): services backed by local handlers

pub mod atomic;
pub mod config;
pub mod managed;
pub mod operation;
pub mod worker;

pub use atomic::{AtomicService, AtomicServiceBuilder};
pub use config::{
    CacheConfig, CompositeConfig, RegistryLocation, SelectionMode, ServiceConfig,
    WorkerPoolConfig, WorkerPoolMode,
};
pub use managed::{ManagedService, ServiceGroup};
pub use operation::{Args, OperationError, OperationTable, Reply};
pub use worker::{PoolError, WorkerPool};
