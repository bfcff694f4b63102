//! Execution-mode options.
//!
//! [`NetOptions`] is the global flag set shared by every net the process
//! builds; [`ExecutionOptions`] is the per-net profile derived from the net
//! definition's type string. The `dag`, `prof_dag`, and `async_dag` presets
//! pin most switches; any other type (including the empty string) falls back
//! to the `simple` profile driven entirely by the globals.

use serde::{Deserialize, Serialize};

/// Net type selecting the fully blocking DAG preset.
pub const NET_TYPE_DAG: &str = "dag";
/// Net type selecting the blocking DAG preset with per-op profiling.
pub const NET_TYPE_PROF_DAG: &str = "prof_dag";
/// Net type selecting the event-mediated asynchronous DAG preset.
pub const NET_TYPE_ASYNC_DAG: &str = "async_dag";

/// Global scheduler flags with their process-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetOptions {
    /// Number of command streams per accelerator device.
    ///
    /// Default: 1
    #[serde(default = "default_streams_per_gpu")]
    pub streams_per_gpu: usize,

    /// Block on each chain's completion event before enqueueing children.
    ///
    /// Default: false
    #[serde(default)]
    pub finish_chain: bool,

    /// Let a parent's completion callback enqueue a child as soon as its
    /// parent counter reaches zero, without consulting the event policy.
    ///
    /// Default: false
    #[serde(default)]
    pub always_schedule_child: bool,

    /// Maximum accelerator devices addressable by the engine.
    ///
    /// Default: 16
    #[serde(default = "default_max_gpus")]
    pub max_gpus: i32,

    /// Maximum NUMA nodes addressable by CPU-pinned pools.
    ///
    /// Default: 8
    #[serde(default = "default_max_numa_nodes")]
    pub max_numa_nodes: i32,

    /// Default CPU pool size when the net does not set `num_workers`.
    /// Zero defers to the machine's logical CPU count.
    ///
    /// Default: 0
    #[serde(default)]
    pub cpu_pool_size: usize,

    /// Skip busy streams when round-robining accelerator streams.
    ///
    /// Default: false
    #[serde(default)]
    pub check_stream_status: bool,

    /// Route every chain to a single CPU pool regardless of device.
    ///
    /// Default: false
    #[serde(default)]
    pub use_single_pool: bool,

    /// Give each net private pools instead of process-shared ones.
    ///
    /// Default: false
    #[serde(default)]
    pub use_per_net_pools: bool,

    /// Collapse the whole net into one chain in topological order.
    ///
    /// Default: false
    #[serde(default)]
    pub inference_mode: bool,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            streams_per_gpu: default_streams_per_gpu(),
            finish_chain: false,
            always_schedule_child: false,
            max_gpus: default_max_gpus(),
            max_numa_nodes: default_max_numa_nodes(),
            cpu_pool_size: 0,
            check_stream_status: false,
            use_single_pool: false,
            use_per_net_pools: false,
            inference_mode: false,
        }
    }
}

impl NetOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of streams per accelerator device.
    pub fn with_streams_per_gpu(mut self, streams_per_gpu: usize) -> Self {
        self.streams_per_gpu = streams_per_gpu;
        self
    }

    /// Set the finish-chain flag.
    pub fn with_finish_chain(mut self, finish_chain: bool) -> Self {
        self.finish_chain = finish_chain;
        self
    }

    /// Set the always-schedule-child flag.
    pub fn with_always_schedule_child(mut self, always: bool) -> Self {
        self.always_schedule_child = always;
        self
    }

    /// Set the default CPU pool size.
    pub fn with_cpu_pool_size(mut self, cpu_pool_size: usize) -> Self {
        self.cpu_pool_size = cpu_pool_size;
        self
    }

    /// Set the single-pool flag.
    pub fn with_single_pool(mut self, use_single_pool: bool) -> Self {
        self.use_single_pool = use_single_pool;
        self
    }

    /// Set the inference-mode flag.
    pub fn with_inference_mode(mut self, inference_mode: bool) -> Self {
        self.inference_mode = inference_mode;
        self
    }

    /// Validate the options.
    ///
    /// Returns an error message if any flag is out of range.
    pub fn validate(&self) -> Result<(), String> {
        if self.streams_per_gpu == 0 {
            return Err("streams_per_gpu must be > 0".to_string());
        }
        if self.max_gpus <= 0 {
            return Err("max_gpus must be > 0".to_string());
        }
        if self.max_numa_nodes <= 0 {
            return Err("max_numa_nodes must be > 0".to_string());
        }
        Ok(())
    }
}

fn default_streams_per_gpu() -> usize {
    1
}

fn default_max_gpus() -> i32 {
    16
}

fn default_max_numa_nodes() -> i32 {
    8
}

/// Per-net execution profile derived from the net type and the globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Streams per accelerator device for this net.
    pub streams_per_gpu: usize,
    /// Parents block until terminal before children are enqueued.
    pub finish_chain: bool,
    /// Completion callbacks enqueue children without consulting the policy.
    pub always_schedule_child: bool,
    /// Skip busy streams during stream selection.
    pub check_stream_status: bool,
    /// Route everything to one CPU pool.
    pub use_single_pool: bool,
    /// Use per-net pools.
    pub use_per_net_pools: bool,
    /// `run_async` blocks until the run is finalized.
    pub is_blocking: bool,
    /// Record per-operator timings.
    pub report_stats: bool,
}

impl ExecutionOptions {
    /// Derive the profile for a net type string.
    ///
    /// `enable_profiling` is the net definition's per-net override of
    /// `report_stats`; it applies after the preset is chosen.
    pub fn for_net_type(
        net_type: &str,
        global: &NetOptions,
        enable_profiling: Option<bool>,
    ) -> Self {
        let mut options = match net_type {
            NET_TYPE_DAG | NET_TYPE_PROF_DAG => Self {
                streams_per_gpu: 1,
                finish_chain: true,
                always_schedule_child: true,
                check_stream_status: false,
                use_single_pool: true,
                use_per_net_pools: true,
                is_blocking: true,
                report_stats: net_type == NET_TYPE_PROF_DAG,
            },
            NET_TYPE_ASYNC_DAG => Self {
                streams_per_gpu: 1,
                finish_chain: false,
                always_schedule_child: true,
                check_stream_status: false,
                use_single_pool: true,
                use_per_net_pools: true,
                is_blocking: true,
                report_stats: false,
            },
            _ => Self {
                streams_per_gpu: global.streams_per_gpu,
                finish_chain: global.finish_chain,
                always_schedule_child: global.always_schedule_child,
                check_stream_status: global.check_stream_status,
                use_single_pool: global.use_single_pool,
                use_per_net_pools: global.use_per_net_pools,
                is_blocking: false,
                report_stats: false,
            },
        };
        if let Some(enabled) = enable_profiling {
            options.report_stats = enabled;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_validate() {
        let options = NetOptions::default();
        assert_eq!(options.streams_per_gpu, 1);
        assert_eq!(options.max_gpus, 16);
        assert_eq!(options.max_numa_nodes, 8);
        assert_eq!(options.cpu_pool_size, 0);
        assert!(!options.inference_mode);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let options = NetOptions::new()
            .with_streams_per_gpu(4)
            .with_finish_chain(true)
            .with_cpu_pool_size(8)
            .with_single_pool(true);
        assert_eq!(options.streams_per_gpu, 4);
        assert!(options.finish_chain);
        assert_eq!(options.cpu_pool_size, 8);
        assert!(options.use_single_pool);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_streams() {
        let options = NetOptions::new().with_streams_per_gpu(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_dag_preset_ignores_globals() {
        let global = NetOptions::new()
            .with_streams_per_gpu(4)
            .with_always_schedule_child(false);
        let options = ExecutionOptions::for_net_type(NET_TYPE_DAG, &global, None);
        assert_eq!(options.streams_per_gpu, 1);
        assert!(options.finish_chain);
        assert!(options.always_schedule_child);
        assert!(options.use_single_pool);
        assert!(options.use_per_net_pools);
        assert!(options.is_blocking);
        assert!(!options.report_stats);
    }

    #[test]
    fn test_prof_dag_preset_reports_stats() {
        let global = NetOptions::new().with_streams_per_gpu(4);
        let options = ExecutionOptions::for_net_type(NET_TYPE_PROF_DAG, &global, None);
        assert!(options.report_stats);
        assert!(options.finish_chain);
        assert_eq!(options.streams_per_gpu, 1);
    }

    #[test]
    fn test_async_dag_preset() {
        let options = ExecutionOptions::for_net_type(NET_TYPE_ASYNC_DAG, &NetOptions::new(), None);
        assert!(!options.finish_chain);
        assert!(options.always_schedule_child);
        assert!(options.is_blocking);
        assert!(!options.report_stats);
    }

    #[test]
    fn test_simple_fallback_follows_globals() {
        let global = NetOptions::new()
            .with_streams_per_gpu(2)
            .with_finish_chain(true);
        for net_type in ["", "simple", "parallel"] {
            let options = ExecutionOptions::for_net_type(net_type, &global, None);
            assert_eq!(options.streams_per_gpu, 2);
            assert!(options.finish_chain);
            assert!(!options.is_blocking);
            assert!(!options.report_stats);
        }
    }

    #[test]
    fn test_enable_profiling_overrides_preset() {
        let global = NetOptions::new();
        let options = ExecutionOptions::for_net_type(NET_TYPE_PROF_DAG, &global, Some(false));
        assert!(!options.report_stats);

        let options = ExecutionOptions::for_net_type(NET_TYPE_DAG, &global, Some(true));
        assert!(options.report_stats);

        let options = ExecutionOptions::for_net_type("simple", &global, Some(true));
        assert!(options.report_stats);
    }
}
