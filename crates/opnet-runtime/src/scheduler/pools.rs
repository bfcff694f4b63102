//! Worker pools.
//!
//! The scheduler dispatches chains onto [`TaskPool`]s. Pool implementations
//! are created through a process-global factory registry keyed by
//! device-family name; the engine ships a rayon-backed CPU factory and
//! expects the accelerator layer to register its own under `"gpu"`.
//!
//! Shared CPU pools are cached per `(numa_node, pool_size)` key and handed
//! out by shared ownership; a factory called with `per_net = true` returns a
//! private pool instead.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use opnet_core::{NetError, NetResult};

/// A unit of work submitted to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Conforming thread-pool interface.
///
/// Implementations must execute submitted tasks on worker threads distinct
/// from the submitter; the scheduler relies on `run` returning immediately.
pub trait TaskPool: Send + Sync {
    /// Enqueue a task for execution.
    fn run(&self, task: Task);

    /// Number of worker threads.
    fn size(&self) -> usize;
}

/// Factory signature: `(device_id, pool_size, per_net) -> pool`.
///
/// `device_id` is an accelerator device id or a NUMA node id (`-1` for
/// unpinned); `pool_size = 0` asks the factory to pick a default.
pub type PoolFactory = Arc<dyn Fn(i32, usize, bool) -> NetResult<Arc<dyn TaskPool>> + Send + Sync>;

/// Process-global registry of pool factories keyed by device-family name.
pub struct PoolRegistry {
    factories: RwLock<HashMap<String, PoolFactory>>,
}

impl PoolRegistry {
    fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the factory for a device family.
    pub fn register(&self, family: &str, factory: PoolFactory) {
        self.factories.write().insert(family.to_string(), factory);
    }

    /// Create or fetch a pool through the family's factory.
    pub fn create(
        &self,
        family: &str,
        device_id: i32,
        pool_size: usize,
        per_net: bool,
    ) -> NetResult<Arc<dyn TaskPool>> {
        let factory = self
            .factories
            .read()
            .get(family)
            .cloned()
            .ok_or_else(|| NetError::UnknownPoolFamily {
                family: family.to_string(),
            })?;
        factory(device_id, pool_size, per_net)
    }
}

static REGISTRY: Lazy<PoolRegistry> = Lazy::new(|| {
    let registry = PoolRegistry::new();
    registry.register("cpu", Arc::new(cpu_pool_factory));
    registry
});

/// The process-global pool-factory registry.
pub fn pool_registry() -> &'static PoolRegistry {
    &REGISTRY
}

/// Rayon-backed CPU pool.
struct CpuPool {
    pool: rayon::ThreadPool,
    size: usize,
}

impl CpuPool {
    fn build(numa_node_id: i32, size: usize) -> NetResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(move |worker| format!("opnet-cpu-{}-{}", numa_node_id, worker))
            .build()
            .map_err(|err| NetError::PoolCreation {
                message: err.to_string(),
            })?;
        Ok(Self { pool, size })
    }
}

impl TaskPool for CpuPool {
    fn run(&self, task: Task) {
        self.pool.spawn(task);
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// Shared CPU pools, keyed by `(numa_node_id, requested_size)`.
///
/// The requested (unresolved) size is the key so that two nets asking for
/// "the default" share one pool even if the resolved thread count matches an
/// explicitly sized pool.
static SHARED_CPU_POOLS: Lazy<Mutex<HashMap<(i32, usize), Weak<CpuPool>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn cpu_pool_factory(
    numa_node_id: i32,
    pool_size: usize,
    per_net: bool,
) -> NetResult<Arc<dyn TaskPool>> {
    let resolved = if pool_size > 0 {
        pool_size
    } else {
        num_cpus::get().max(1)
    };

    if per_net {
        let pool = CpuPool::build(numa_node_id, resolved)?;
        return Ok(Arc::new(pool));
    }

    let mut pools = SHARED_CPU_POOLS.lock();
    if let Some(pool) = pools.get(&(numa_node_id, pool_size)).and_then(Weak::upgrade) {
        return Ok(pool);
    }
    let pool = Arc::new(CpuPool::build(numa_node_id, resolved)?);
    tracing::debug!(
        numa_node_id,
        size = resolved,
        "created shared cpu worker pool"
    );
    pools.insert((numa_node_id, pool_size), Arc::downgrade(&pool));
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_cpu_pool_runs_tasks() {
        let pool = pool_registry().create("cpu", -1, 2, true).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.run(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 8 {
            assert!(std::time::Instant::now() < deadline, "pool tasks did not run");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_shared_pools_cached_by_key() {
        let first = pool_registry().create("cpu", 0, 3, false).unwrap();
        let second = pool_registry().create("cpu", 0, 3, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other_size = pool_registry().create("cpu", 0, 4, false).unwrap();
        assert!(!Arc::ptr_eq(&first, &other_size));

        let other_node = pool_registry().create("cpu", 1, 3, false).unwrap();
        assert!(!Arc::ptr_eq(&first, &other_node));
    }

    #[test]
    fn test_per_net_pools_are_private() {
        let first = pool_registry().create("cpu", -1, 2, true).unwrap();
        let second = pool_registry().create("cpu", -1, 2, true).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_default_size_resolves_to_cpu_count() {
        let pool = pool_registry().create("cpu", -1, 0, true).unwrap();
        assert!(pool.size() >= 1);
    }

    #[test]
    fn test_unknown_family_fails() {
        let result = pool_registry().create("fpga", 0, 1, false);
        match result {
            Err(NetError::UnknownPoolFamily { .. }) => {}
            _ => panic!("expected UnknownPoolFamily error"),
        }
    }
}
