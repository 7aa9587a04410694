// gpu/vecadd.rs — elementwise f32 vector addition.
//
// A strict subset of the demodulation kernel's buffer lifecycle (two
// staged inputs, one dispatch, one copy-back), kept as the smoke test for
// the GPU path: if this fails, debug the device and transfer plumbing
// before looking at the phase kernel.

use std::sync::mpsc;

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};

// Must match struct Params in vecadd.wgsl exactly.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct VecAddParams {
    len: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

/// GPU elementwise adder: `c[i] = a[i] + b[i]`.
pub struct GpuVectorAdd {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    workgroup_x: u32,
}

impl GpuVectorAdd {
    pub fn new(gpu: &GpuDevice) -> Self {
        // 1D kernel: use the full workgroup budget along x.
        let workgroup_x = gpu.workgroup_size.total();
        let shader_src = include_str!("../shaders/vecadd.wgsl")
            .replace("{{WG_X}}", &workgroup_x.to_string());

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("vecadd.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuVectorAdd BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout =
            gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("GpuVectorAdd pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline =
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("add"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "add",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        GpuVectorAdd { pipeline, bgl, workgroup_x }
    }

    /// Add two equal-length slices on the GPU, blocking until readback.
    ///
    /// # Errors
    /// `LengthMismatch` if `a.len() != b.len()`; readback errors if the
    /// dispatch result never reaches the host.
    pub fn add(&self, gpu: &GpuDevice, a: &[f32], b: &[f32]) -> Result<Vec<f32>, GpuError> {
        if a.len() != b.len() {
            return Err(GpuError::LengthMismatch { a: a.len(), b: b.len() });
        }
        if a.is_empty() {
            return Ok(Vec::new());
        }
        let n = a.len();
        let buf_size = (n * std::mem::size_of::<f32>()) as u64;

        let a_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuVectorAdd a"),
            contents: bytemuck::cast_slice(a),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let b_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuVectorAdd b"),
            contents: bytemuck::cast_slice(b),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let c_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuVectorAdd c"),
            size: buf_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params = VecAddParams { len: n as u32, _pad0: 0, _pad1: 0, _pad2: 0 };
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuVectorAdd params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuVectorAdd BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: a_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: b_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: c_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: params_buf.as_entire_binding() },
            ],
        });

        let groups = (n as u32 + self.workgroup_x - 1) / self.workgroup_x;
        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuVectorAdd dispatch") },
        );
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("add"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }

        let rb = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuVectorAdd readback"),
            size: buf_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&c_buf, 0, &rb, 0, buf_size);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = rb.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| GpuError::DeviceLost)?
            .map_err(GpuError::Readback)?;

        let mapped = slice.get_mapped_range();
        let out: Vec<f32> = bytemuck::cast_slice(&mapped).to_vec();
        drop(mapped);
        rb.unmap();
        Ok(out)
    }
}
