//! Opnet Runtime - Asynchronous chain scheduler for operator graphs.
//!
//! The runtime plans an operator DAG into device-affine chains and drives
//! them over per-device worker pools, ordering cross-device work through
//! completion events.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use opnet_core::{DeviceOption, NetDef, OpDef, Operator};
//! use opnet_runtime::{AsyncNet, NetOptions};
//!
//! fn build(operators: Vec<Arc<dyn Operator>>) -> opnet_core::NetResult<()> {
//!     let mut def = NetDef::new("example", "dag");
//!     let a = def.add_op(OpDef::new("Load", DeviceOption::cpu()));
//!     def.add_op(OpDef::new("Transform", DeviceOption::cpu()).with_parents(vec![a]));
//!
//!     let net = AsyncNet::new(&def, operators, NetOptions::default())?;
//!     let success = net.run_async();
//!     net.handle_run_error()?;
//!     assert!(success);
//!     Ok(())
//! }
//! ```

pub mod scheduler;

pub use scheduler::{
    pool_registry, AsyncNet, ChainNode, ExecutionChains, ExecutionOptions, NetOptions, OpCost,
    OpTypeStat, OperatorStats, PoolFactory, PoolRegistry, Task, TaskPool,
};

// Re-export commonly used core types.
pub use opnet_core::{
    DeviceOption, DeviceType, Event, EventStatus, NetDef, NetError, NetResult, OpDef, Operator,
};
