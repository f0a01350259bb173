//! Configuration values for hosted services.
//!
//! Every option is a named field with a documented default and is passed to
//! the service constructor.

use tracing::warn;

/// Default endpoint the service registry listens on.
pub const DEFAULT_REGISTRY_ENDPOINT: &str = "service.registry";

/// Queue capacity used when `max_queue_size` is 0.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Threading mode of the inbound request pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolMode {
    /// Requests are handled one at a time.
    Single,
    /// Up to `n` requests are handled concurrently. `Fixed(0)` uses the
    /// number of available CPUs.
    Fixed(usize),
}

/// Inbound request pool settings.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub mode: WorkerPoolMode,
    /// Maximum number of queued requests. 0 selects [`DEFAULT_QUEUE_CAPACITY`].
    pub max_queue_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            mode: WorkerPoolMode::Single,
            max_queue_size: 0,
        }
    }
}

impl WorkerPoolConfig {
    /// Number of requests allowed to run concurrently.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        match self.mode {
            WorkerPoolMode::Single => 1,
            WorkerPoolMode::Fixed(0) => std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            WorkerPoolMode::Fixed(n) => n,
        }
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        if self.max_queue_size == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            self.max_queue_size
        }
    }
}

/// Where and how patiently to reach the service registry.
#[derive(Debug, Clone)]
pub struct RegistryLocation {
    pub endpoint: String,
    /// Timeout for registry calls in logical units. `None` waits indefinitely.
    pub timeout: Option<u64>,
}

impl Default for RegistryLocation {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_REGISTRY_ENDPOINT.to_string(),
            timeout: None,
        }
    }
}

/// Configuration for an atomic service.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub worker_pool: WorkerPoolConfig,
    pub registry: RegistryLocation,
}

/// Service description cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// The cache cannot be disabled; `false` only produces a warning.
    pub enabled: bool,
    /// The cache is always shared by all invocations; `false` only warns.
    pub shared: bool,
    /// Refresh period in logical units. Accepted but not acted upon:
    /// invalidation is command-driven.
    pub ttl: Option<u64>,
    /// Maximum number of `(service type, operation)` keys. `None` is unbounded.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shared: true,
            ttl: None,
            max_entries: None,
        }
    }
}

/// How the composite chooses among candidate providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Use the policy registered under the invocation's QoS requirement
    /// name; unknown names fall back to a uniformly random choice.
    #[default]
    ByRequirement,
    /// Use the single, runtime-switchable active policy.
    ActivePolicy,
}

/// Configuration for a composite service.
#[derive(Debug, Clone)]
pub struct CompositeConfig {
    pub worker_pool: WorkerPoolConfig,
    pub registry: RegistryLocation,
    /// Per-call timeout in logical units. 0 derives it from the selected
    /// provider: three times its nominal response time.
    pub timeout: u64,
    /// Hint for workflow engines: keep going after an operation times out.
    pub ignore_timeout_error: bool,
    /// Maximum attempts per remote operation, including the first one.
    pub max_retry_attempts: u32,
    pub cache: CacheConfig,
    pub selection: SelectionMode,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            worker_pool: WorkerPoolConfig::default(),
            registry: RegistryLocation::default(),
            timeout: 10,
            ignore_timeout_error: false,
            max_retry_attempts: 1,
            cache: CacheConfig::default(),
            selection: SelectionMode::default(),
        }
    }
}

impl CompositeConfig {
    /// Warns about settings the runtime cannot honour. Never fails.
    pub fn validate(&self) {
        if !self.cache.enabled {
            warn!("cache mode cannot be turned off; the cache stays enabled");
        } else if !self.cache.shared {
            warn!("cache sharing cannot be turned off; the cache stays shared");
        } else if self.cache.max_entries == Some(0) {
            warn!("cache size cannot be zero; the cache is unbounded");
        }
        if self.cache.ttl.is_some() {
            warn!("cache ttl is ignored; invalidation is command-driven");
        }
    }

    /// Attempts per operation, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_retry_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_config_defaults() {
        let config = CompositeConfig::default();
        assert_eq!(config.worker_pool.mode, WorkerPoolMode::Single);
        assert_eq!(config.worker_pool.max_queue_size, 0);
        assert_eq!(config.timeout, 10);
        assert!(!config.ignore_timeout_error);
        assert_eq!(config.max_retry_attempts, 1);
        assert!(config.cache.enabled);
        assert!(config.cache.shared);
        assert!(config.cache.ttl.is_none());
        assert!(config.cache.max_entries.is_none());
        assert_eq!(config.selection, SelectionMode::ByRequirement);
        assert_eq!(config.registry.endpoint, DEFAULT_REGISTRY_ENDPOINT);
        assert!(config.registry.timeout.is_none());
    }

    #[test]
    fn worker_pool_concurrency() {
        let single = WorkerPoolConfig::default();
        assert_eq!(single.concurrency(), 1);

        let fixed = WorkerPoolConfig {
            mode: WorkerPoolMode::Fixed(4),
            max_queue_size: 0,
        };
        assert_eq!(fixed.concurrency(), 4);

        let auto = WorkerPoolConfig {
            mode: WorkerPoolMode::Fixed(0),
            max_queue_size: 0,
        };
        assert!(auto.concurrency() >= 1);
    }

    #[test]
    fn queue_capacity_defaults_when_zero() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.queue_capacity(), DEFAULT_QUEUE_CAPACITY);

        let bounded = WorkerPoolConfig {
            mode: WorkerPoolMode::Single,
            max_queue_size: 8,
        };
        assert_eq!(bounded.queue_capacity(), 8);
    }

    #[test]
    fn attempts_never_zero() {
        let config = CompositeConfig {
            max_retry_attempts: 0,
            ..CompositeConfig::default()
        };
        assert_eq!(config.attempts(), 1);
    }

    #[test]
    fn validate_is_warning_only() {
        let config = CompositeConfig {
            cache: CacheConfig {
                enabled: false,
                shared: false,
                ttl: Some(5),
                max_entries: Some(0),
            },
            ..CompositeConfig::default()
        };
        config.validate();
    }
}
