//! Engine errors.
//!
//! This module defines errors surfaced while building and running nets:
//! device routing failures, pool creation failures, and operator exceptions.

use thiserror::Error;

use crate::types::DeviceType;

/// Result alias used across the engine.
pub type NetResult<T> = std::result::Result<T, NetError>;

/// Errors produced by the execution engine.
///
/// Operator *failures* (an operator returning `false` from `run_async`) are
/// not errors; they are recorded on the chain's completion event. This type
/// covers operator exceptions and structural problems in the net or its
/// device bindings.
#[derive(Debug, Clone, Error)]
pub enum NetError {
    /// No worker pool mapping exists for the device type.
    #[error("Unsupported device type: {device_type}")]
    UnsupportedDevice {
        /// Device type with no pool mapping.
        device_type: DeviceType,
    },

    /// A device id fell outside the configured range.
    #[error("Invalid {device_type} device id {device_id}, expected id in [0, {max})")]
    InvalidDeviceId {
        /// Device family the id belongs to.
        device_type: DeviceType,
        /// The offending id.
        device_id: i32,
        /// Exclusive upper bound from the engine options.
        max: i32,
    },

    /// A worker pool could not be created.
    #[error("Pool creation failed: {message}")]
    PoolCreation {
        /// Description of the factory failure.
        message: String,
    },

    /// No pool factory is registered for a device family.
    #[error("No pool factory registered for device family '{family}'")]
    UnknownPoolFamily {
        /// Device-family name used for the lookup.
        family: String,
    },

    /// An operator raised an error during `run_async`.
    #[error("Operator '{op_type}' failed: {message}")]
    Operator {
        /// Type name of the offending operator.
        op_type: String,
        /// Error message describing the operator failure.
        message: String,
    },

    /// Net definition or engine-level error.
    #[error("Net error: {message}")]
    Net {
        /// Error message describing the failure.
        message: String,
    },
}
