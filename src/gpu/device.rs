// gpu/device.rs — wgpu device context owned by one flow calculator.
//
// Each accelerated calculator creates its own GpuDevice and keeps it for its
// whole lifetime; contexts are never shared between simulator instances.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` may hand out a software rasterizer
// (llvmpipe) even when real hardware exists. We enumerate explicitly and
// prefer hardware adapters, falling back to whatever is left.
//
// WORKGROUP SIZES:
// Shaders carry `{{WG_X}}` / `{{WG_Y}}` placeholder tokens that are
// substituted into the source before module creation.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

/// A workgroup configuration for 2D compute dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub const DEFAULT: WorkgroupSize = WorkgroupSize { x: 16, y: 8 };

    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Substitute the workgroup tokens of a WGSL template.
    ///
    /// ```wgsl
    /// @compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1)
    /// ```
    pub fn specialize(&self, template: &str) -> String {
        template
            .replace("{{WG_X}}", &self.x.to_string())
            .replace("{{WG_Y}}", &self.y.to_string())
    }

    /// Workgroups needed to cover `w × h` (ceiling division).
    ///
    /// Shaders must guard against out-of-range invocation ids.
    pub fn dispatch_size(&self, w: u32, h: u32) -> (u32, u32) {
        (w.div_ceil(self.x), h.div_ceil(self.y))
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Adapter information kept for logging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Errors from device initialization and configuration.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no GPU adapter found")]
    NoSuitableAdapter,

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("workgroup size {total} exceeds the device limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },
}

/// Adapter, device and queue.
///
/// Fields drop top to bottom: `_instance` is last so the instance outlives
/// the device and queue created from it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self, GpuError> {
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags,
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::PRIMARY);
        if adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }
        for a in &adapters {
            let info = a.get_info();
            debug!(name = %info.name, backend = ?info.backend, device_type = ?info.device_type, "gpu adapter");
        }

        // Hardware first, software rasterizers last.
        adapters.sort_by_key(|a| match a.get_info().device_type {
            wgpu::DeviceType::DiscreteGpu => 0,
            wgpu::DeviceType::IntegratedGpu => 1,
            wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => 2,
            wgpu::DeviceType::Cpu => 3,
        });
        let adapter = adapters.into_iter().next().ok_or(GpuError::NoSuitableAdapter)?;

        let raw = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw.name.clone(),
            device_type: raw.device_type,
            backend: raw.backend,
        };

        let limits = wgpu::Limits::default().using_resolution(adapter.limits());
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("event-simulator"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        info!(adapter = %adapter_info, "gpu device ready");
        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: WorkgroupSize::DEFAULT,
            _instance: instance,
        })
    }

    /// Override the default workgroup size, validated against the device.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let total = x * y;
        let max = self.device.limits().max_compute_invocations_per_workgroup;
        if total > max {
            return Err(GpuError::WorkgroupTooLarge { total, max });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    pub fn dispatch_size(&self, w: u32, h: u32) -> (u32, u32) {
        self.workgroup_size.dispatch_size(w, h)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuDevice {{ adapter: {}, workgroup: {} }}", self.adapter_info, self.workgroup_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_specialize() {
        let ws = WorkgroupSize { x: 16, y: 8 };
        assert_eq!(ws.total(), 128);
        let src = ws.specialize("@workgroup_size({{WG_X}}, {{WG_Y}}, 1)");
        assert_eq!(src, "@workgroup_size(16, 8, 1)");
    }

    #[test]
    fn test_dispatch_size_ceiling() {
        let ws = WorkgroupSize::DEFAULT;
        assert_eq!(ws.dispatch_size(640, 480), (40, 60));
        assert_eq!(ws.dispatch_size(100, 100), (7, 13));
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_device_init() {
        let gpu = GpuDevice::new().expect("should initialise a GPU device");
        println!("{gpu}");
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_gpu_device_init() {
        let out = crate::gpu::run_gpu_test_in_subprocess("gpu::device::tests::inner_gpu_device_init");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }
}
