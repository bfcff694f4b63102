//! Shared data types for the execution engine.

pub mod device;
pub mod net;

pub use device::{DeviceOption, DeviceType};
pub use net::{NetDef, OpDef};
