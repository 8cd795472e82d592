// gpu/mod.rs — wgpu accelerator backends for the flow calculators.
//
// Each calculator owns one GpuDevice for its lifetime. Work split:
//
//   CPU: corner detection, Gaussian pyramids, orchestration
//   GPU: the Lucas-Kanade solves (per feature or per pixel), one dispatch
//        per pyramid level and stage
//
// Every kernel uses the same clamped bilinear sampling and central
// differences as the software path, so both backends agree to within
// float rounding. Only the final level's result is read back.

pub mod dense;
pub mod device;
pub mod sparse;

use crate::error::Error;

pub use dense::GpuDenseFlow;
pub use device::{GpuDevice, GpuError, WorkgroupSize};
pub use sparse::GpuSparseFlow;

impl From<GpuError> for Error {
    fn from(e: GpuError) -> Self {
        Error::BackendUnavailable(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Layout and buffer helpers
// ---------------------------------------------------------------------------

pub(crate) fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Storage buffer of `bytes` (at least 4, wgpu rejects empty bindings).
pub(crate) fn storage_buffer(device: &wgpu::Device, label: &str, bytes: u64, extra: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: bytes.max(4),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra,
        mapped_at_creation: false,
    })
}

pub(crate) fn readback_buffer(device: &wgpu::Device, label: &str, bytes: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: bytes.max(4),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Map the first `bytes` of a MAP_READ buffer, copy them out and unmap.
///
/// Blocks until the queue has drained. Map failures and a dropped
/// callback both surface as `Error::Accelerator`.
pub(crate) fn read_back<T: bytemuck::Pod>(device: &wgpu::Device, buffer: &wgpu::Buffer, bytes: u64) -> crate::error::Result<Vec<T>> {
    let slice = buffer.slice(..bytes);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    device.poll(wgpu::Maintain::Wait);

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(Error::Accelerator(format!("buffer map failed: {e}"))),
        Err(_) => return Err(Error::Accelerator("buffer map callback dropped".into())),
    }

    let out = {
        let mapped = slice.get_mapped_range();
        bytemuck::pod_collect_to_vec(&mapped)
    };
    buffer.unmap();
    Ok(out)
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

// Some Vulkan layers (dzn on WSL2) crash during process exit once a device
// has been created. GPU tests therefore run in a child `cargo test` process
// and the parent only checks for the "GPU_TEST_OK" token, not the exit code.

/// Spawn a child `cargo test` running one ignored test with `--nocapture`.
/// Returns the combined stdout and stderr.
#[cfg(test)]
pub(crate) fn run_gpu_test_in_subprocess(test_name: &str) -> String {
    let output = std::process::Command::new("cargo")
        .args([
            "test",
            "--lib",
            "--features",
            "gpu",
            "--",
            test_name,
            "--exact",
            "--ignored",
            "--nocapture",
        ])
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    print!("{stdout}");
    eprint!("{stderr}");
    stdout + &stderr
}
