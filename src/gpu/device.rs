// gpu/device.rs — wgpu execution context.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and prefer real hardware over software
//     rasterizers (llvmpipe shows up as a valid adapter on headless boxes
//     and WSL2 — we only fall back to it when nothing else exists).
//   - Hold device + queue. One `GpuDevice` per application, created by the
//     caller and passed into every kernel — there is no ambient/global
//     queue, so independent extractions can run against independent
//     devices without hidden coupling.
//   - Provide `WorkgroupSize`, validated against the device's actual
//     `max_compute_invocations_per_workgroup` limit, and the ceiling
//     division that maps an image onto a workgroup grid.
//
// The adapter/device request is async in wgpu's API (WebGPU heritage); on
// native Vulkan we just block via pollster.

use std::fmt;

use log::{debug, info};

/// A workgroup configuration for 2D compute dispatches.
///
/// The shader source carries `{{WG_X}}`/`{{WG_Y}}` placeholders that are
/// substituted at pipeline creation, so the dispatch geometry and the
/// shader always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Default for discrete/integrated GPUs: 16×8 = 128 invocations,
    /// 4 NVIDIA warps or 2 AMD waves, with the 16-wide x dimension
    /// matching row-major image layout.
    pub const DEFAULT: WorkgroupSize = WorkgroupSize { x: 16, y: 8 };

    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Cached adapter identification, surfaced to the caller for diagnostics.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// The GPU execution context: adapter, device, queue, workgroup size.
///
/// Expensive to create (Vulkan instance + device init); hold one for the
/// lifetime of the application and pass it by reference into kernels.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    /// Keeps the instance alive until `device` and `queue` drop. Struct
    /// fields drop in declaration order, so this must stay last.
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` on the best available Vulkan adapter.
    ///
    /// # Errors
    /// Returns `Err` if no adapter is found or the device request fails.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self, GpuError> {
        // Validation layer in debug builds for shader error feedback.
        // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER lets wgpu enumerate dzn
        // (D3D12-to-Vulkan on WSL2), which declares itself non-conformant
        // but handles storage buffers and compute dispatches fine.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .collect();

        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let i = a.get_info();
            debug!("vulkan adapter: {} ({:?}, {:?})", i.name, i.backend, i.device_type);
        }

        // Tier 1: real or virtualised hardware. Tier 2: whatever exists,
        // software rasterizers included.
        let adapter = all_adapters
            .into_iter()
            .find(|a| {
                matches!(
                    a.get_info().device_type,
                    wgpu::DeviceType::DiscreteGpu
                        | wgpu::DeviceType::IntegratedGpu
                        | wgpu::DeviceType::VirtualGpu
                        | wgpu::DeviceType::Other
                )
            })
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };
        info!("selected adapter: {adapter_info}");

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("phasor"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: WorkgroupSize::DEFAULT,
            _instance: instance,
        })
    }

    /// Override the default workgroup size.
    ///
    /// Returns `Err` if `x * y` exceeds the device's
    /// `max_compute_invocations_per_workgroup` limit. Kernels pick up the
    /// new size on their next construction (the size is baked into the
    /// pipeline at creation).
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let max = self.device.limits().max_compute_invocations_per_workgroup;
        self.workgroup_size = validate_workgroup(x, y, max)?;
        Ok(())
    }

    /// Workgroup counts covering a `img_w × img_h` grid, by ceiling
    /// division. The shader guards against the out-of-bounds global IDs
    /// in the last partial workgroup.
    pub fn dispatch_size(&self, img_w: u32, img_h: u32) -> (u32, u32) {
        let dx = (img_w + self.workgroup_size.x - 1) / self.workgroup_size.x;
        let dy = (img_h + self.workgroup_size.y - 1) / self.workgroup_size.y;
        (dx, dy)
    }
}

/// Validate a requested workgroup size against the device invocation
/// limit. `x * y` is computed with `checked_mul`: an overflowing request
/// is over any limit by definition, so it reports as too large
/// (saturated total) rather than wrapping past the check.
fn validate_workgroup(x: u32, y: u32, max: u32) -> Result<WorkgroupSize, GpuError> {
    let total = x.checked_mul(y).unwrap_or(u32::MAX);
    if x == 0 || y == 0 || total > max {
        return Err(GpuError::WorkgroupTooLarge { total, max });
    }
    Ok(WorkgroupSize { x, y })
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, workgroup: {} }}",
            self.adapter_info, self.workgroup_size
        )
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU initialisation, configuration and kernel execution.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter enumerated at all. Check that a Vulkan ICD is
    /// installed (`vulkaninfo`).
    NoSuitableAdapter,
    /// wgpu device request failed (driver issue, unsupported limits).
    DeviceRequest(wgpu::RequestDeviceError),
    /// Requested workgroup size exceeds the device invocation limit.
    WorkgroupTooLarge { total: u32, max: u32 },
    /// Mapping a readback buffer failed; the dispatch result never
    /// reached the host.
    Readback(wgpu::BufferAsyncError),
    /// The readback channel closed before the map callback fired,
    /// usually because the device was lost mid-dispatch.
    DeviceLost,
    /// Input buffer lengths disagree (vector add).
    LengthMismatch { a: usize, b: usize },
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoSuitableAdapter => write!(
                f,
                "no Vulkan adapter found; ensure a Vulkan driver is installed"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::WorkgroupTooLarge { total, max } => write!(
                f,
                "workgroup size {total} exceeds device limit of {max} invocations"
            ),
            GpuError::Readback(e) => write!(f, "output readback failed: {e}"),
            GpuError::DeviceLost => write!(f, "device lost before readback completed"),
            GpuError::LengthMismatch { a, b } => {
                write!(f, "input length mismatch: {a} vs {b}")
            }
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            GpuError::Readback(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================
