//! Opnet Core - Core types and contracts for the opnet execution engine.
//!
//! This crate provides the pieces shared between the scheduler and the
//! device/operator layers:
//! - **Device model**: device-family tags and per-operator device bindings
//! - **Event**: the cross-device completion signal and its scheduling policy
//! - **Operator**: the contract the scheduler drives operators through
//! - **Net definition**: the consumed description of an operator graph

pub mod error;
pub mod event;
pub mod operator;
pub mod types;

pub use error::{NetError, NetResult};
pub use event::{Event, EventStatus};
pub use operator::{Operator, OperatorNode};
pub use types::{DeviceOption, DeviceType, NetDef, OpDef};
