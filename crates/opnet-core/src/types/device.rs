//! Device model.
//!
//! Operators are bound to a device at graph-construction time. The scheduler
//! only cares about two groupings: the CPU family (plain CPU plus its ISA
//! variants, which all share the host worker pools) and the accelerator
//! (`Gpu`), which has per-device pools and per-device command streams.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device-family tag carried by operators and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Host CPU.
    Cpu,
    /// Host CPU with AVX kernels. Pooled together with `Cpu`.
    CpuAvx,
    /// Host CPU with MKL kernels. Pooled together with `Cpu`.
    CpuMkl,
    /// Accelerator with independent command streams.
    Gpu,
    /// Recognized device tag without scheduler pool support.
    Vulkan,
}

impl DeviceType {
    /// Whether this type is routed to the shared host pools.
    pub fn is_cpu_family(self) -> bool {
        matches!(self, DeviceType::Cpu | DeviceType::CpuAvx | DeviceType::CpuMkl)
    }

    /// Whether work on this device may be enqueued behind an unfinished
    /// parent, relying on device-side stream ordering.
    pub fn is_async_capable(self) -> bool {
        self == DeviceType::Gpu
    }

    /// Device-family name used as the pool-factory registry key, or `None`
    /// when the scheduler has no pool mapping for this type.
    pub fn pool_family(self) -> Option<&'static str> {
        if self.is_cpu_family() {
            Some("cpu")
        } else if self == DeviceType::Gpu {
            Some("gpu")
        } else {
            None
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Cpu => "cpu",
            DeviceType::CpuAvx => "cpu_avx",
            DeviceType::CpuMkl => "cpu_mkl",
            DeviceType::Gpu => "gpu",
            DeviceType::Vulkan => "vulkan",
        };
        f.write_str(name)
    }
}

/// Per-operator device binding.
///
/// `device_id` selects an accelerator device or pins a CPU-family operator to
/// a NUMA node; `None` means unpinned (accelerators default to device 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceOption {
    /// Device family of the bound device.
    pub device_type: DeviceType,
    /// Device or NUMA-node id. Omitted when unpinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i32>,
}

impl DeviceOption {
    /// Create a binding with an explicit device id.
    pub fn new(device_type: DeviceType, device_id: Option<i32>) -> Self {
        Self {
            device_type,
            device_id,
        }
    }

    /// Unpinned host CPU binding.
    pub fn cpu() -> Self {
        Self::new(DeviceType::Cpu, None)
    }

    /// Accelerator binding for the given device.
    pub fn gpu(device_id: i32) -> Self {
        Self::new(DeviceType::Gpu, Some(device_id))
    }

    /// Whether two bindings name the same device context.
    ///
    /// Operators may only be chained together when this holds.
    pub fn same_device(&self, other: &DeviceOption) -> bool {
        self.device_type == other.device_type && self.device_id == other.device_id
    }
}

impl Default for DeviceOption {
    fn default() -> Self {
        Self::cpu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_family() {
        assert!(DeviceType::Cpu.is_cpu_family());
        assert!(DeviceType::CpuAvx.is_cpu_family());
        assert!(DeviceType::CpuMkl.is_cpu_family());
        assert!(!DeviceType::Gpu.is_cpu_family());
        assert!(!DeviceType::Vulkan.is_cpu_family());
    }

    #[test]
    fn test_async_capable() {
        assert!(DeviceType::Gpu.is_async_capable());
        assert!(!DeviceType::Cpu.is_async_capable());
        assert!(!DeviceType::Vulkan.is_async_capable());
    }

    #[test]
    fn test_same_device() {
        assert!(DeviceOption::cpu().same_device(&DeviceOption::cpu()));
        assert!(DeviceOption::gpu(1).same_device(&DeviceOption::gpu(1)));
        assert!(!DeviceOption::gpu(0).same_device(&DeviceOption::gpu(1)));
        assert!(!DeviceOption::cpu().same_device(&DeviceOption::gpu(0)));
        assert!(!DeviceOption::cpu()
            .same_device(&DeviceOption::new(DeviceType::Cpu, Some(0))));
    }

    #[test]
    fn test_pool_family() {
        assert_eq!(DeviceType::Cpu.pool_family(), Some("cpu"));
        assert_eq!(DeviceType::CpuMkl.pool_family(), Some("cpu"));
        assert_eq!(DeviceType::Gpu.pool_family(), Some("gpu"));
        assert_eq!(DeviceType::Vulkan.pool_family(), None);
    }
}
