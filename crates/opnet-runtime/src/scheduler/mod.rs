//! Chain scheduler.
//!
//! This module implements the asynchronous chain scheduler:
//! - Chain planning over the operator DAG
//! - Per-net execution-mode profiles and global options
//! - Device worker pools and accelerator stream selection
//! - The callback-driven dispatch engine with failure poisoning
//! - Per-operator profiling counters

pub mod chains;
pub mod net;
pub mod options;
pub mod pools;
pub mod stats;

pub(crate) mod stream;

pub use chains::{ChainNode, ExecutionChains};
pub use net::AsyncNet;
pub use options::{ExecutionOptions, NetOptions};
pub use pools::{pool_registry, PoolFactory, PoolRegistry, Task, TaskPool};
pub use stats::{OpCost, OpTypeStat, OperatorStats, ProfilingCounters};
