// gpu/phase.rs — GPU four-frame demodulation kernel.
//
// BUFFER LIFECYCLE (invariant, not an optimisation):
//   1. Stage all four input frames host→device (storage buffers).
//   2. Dispatch the kernel exactly once over the pixel grid.
//   3. Copy all three outputs device→host, encoded after the compute pass
//      in the same command stream, then map.
// The caller never observes a partially-written output: on any error the
// whole call fails and the staged buffers are released on drop.
//
// DATA WIDTHS
// WGSL storage buffers hold no 8- or 16-bit scalars, so u16 samples are
// widened to u32 while compacting stride padding out of each row, and the
// mask comes back as u32 0/1 and is narrowed to u8. 4 bytes/pixel/frame of
// extra upload bandwidth, paid once per call.

use std::sync::mpsc;

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::image::Image;
use crate::phase::{FrameSet, PhaseMaps};

// Must match struct Params in phase.wgsl exactly.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PhaseParams {
    width: u32,
    height: u32,
    threshold: f32,
    _pad: u32,
}

/// GPU four-frame demodulator.
///
/// Create once per device (pipeline compilation is the expensive part);
/// call [`extract`](GpuPhaseExtractor::extract) per frame set. Holds no
/// state between calls beyond the compiled pipeline.
pub struct GpuPhaseExtractor {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    /// Mean-intensity cutoff. Values <= 0 disable intensity masking.
    pub threshold: f32,
}

impl GpuPhaseExtractor {
    pub fn new(gpu: &GpuDevice, threshold: f32) -> Self {
        let shader_template = include_str!("../shaders/phase.wgsl");
        let shader_src = shader_template
            .replace("{{WG_X}}", &gpu.workgroup_size.x.to_string())
            .replace("{{WG_Y}}", &gpu.workgroup_size.y.to_string());

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("phase.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let storage_ro = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let storage_rw = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let uniform = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        };

        // 0..3 frames, 4 phase, 5 mask, 6 mean, 7 params.
        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..8)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: match binding {
                    0..=3 => storage_ro,
                    4..=6 => storage_rw,
                    _ => uniform,
                },
                count: None,
            })
            .collect();

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GpuPhase BGL"),
            entries: &entries,
        });

        let pipeline_layout =
            gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("GpuPhase pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline =
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("demodulate"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "demodulate",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        GpuPhaseExtractor { pipeline, bgl, threshold }
    }

    /// Demodulate a validated frame set on the GPU.
    ///
    /// Blocks until the readback completes; the returned maps reflect a
    /// fully finished dispatch. All-or-nothing: any failure leaves no
    /// observable outputs.
    pub fn extract(&self, gpu: &GpuDevice, frames: &FrameSet<'_>) -> Result<PhaseMaps, GpuError> {
        let w = frames.width() as u32;
        let h = frames.height() as u32;
        let n_pixels = frames.total_pixels();
        let buf_size = (n_pixels * std::mem::size_of::<f32>()) as u64;

        // --- 1. Stage inputs -------------------------------------------------
        let frame_bufs: Vec<wgpu::Buffer> = (0..4)
            .map(|i| {
                let widened = widen_frame(frames.frame(i));
                gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("GpuPhase frame"),
                    contents: bytemuck::cast_slice(&widened),
                    usage: wgpu::BufferUsages::STORAGE,
                })
            })
            .collect();

        let make_output = |label: &str| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: buf_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let phase_buf = make_output("GpuPhase phase");
        let mask_buf = make_output("GpuPhase mask");
        let mean_buf = make_output("GpuPhase mean");

        let params = PhaseParams {
            width: w,
            height: h,
            threshold: self.threshold,
            _pad: 0,
        };
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuPhase params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("GpuPhase BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: frame_bufs[0].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: frame_bufs[1].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: frame_bufs[2].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: frame_bufs[3].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: phase_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: mask_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: mean_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: params_buf.as_entire_binding() },
            ],
        });

        // --- 2. Single dispatch ----------------------------------------------
        let (wg_x, wg_y) = gpu.dispatch_size(w, h);
        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("GpuPhase dispatch") },
        );
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("demodulate"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(wg_x, wg_y, 1);
        }

        // --- 3. Copy-back, encoded strictly after the pass -------------------
        let make_readback = |label: &str| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: buf_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let phase_rb = make_readback("GpuPhase phase readback");
        let mask_rb = make_readback("GpuPhase mask readback");
        let mean_rb = make_readback("GpuPhase mean readback");

        encoder.copy_buffer_to_buffer(&phase_buf, 0, &phase_rb, 0, buf_size);
        encoder.copy_buffer_to_buffer(&mask_buf, 0, &mask_rb, 0, buf_size);
        encoder.copy_buffer_to_buffer(&mean_buf, 0, &mean_rb, 0, buf_size);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let phase_slice = phase_rb.slice(..);
        let mask_slice = mask_rb.slice(..);
        let mean_slice = mean_rb.slice(..);
        let phase_rx = request_map(&phase_slice);
        let mask_rx = request_map(&mask_slice);
        let mean_rx = request_map(&mean_slice);

        gpu.device.poll(wgpu::Maintain::Wait);
        for rx in [&phase_rx, &mask_rx, &mean_rx] {
            rx.recv()
                .map_err(|_| GpuError::DeviceLost)?
                .map_err(GpuError::Readback)?;
        }

        let out = {
            let phase_mapped = phase_slice.get_mapped_range();
            let mask_mapped = mask_slice.get_mapped_range();
            let mean_mapped = mean_slice.get_mapped_range();

            let phase: &[f32] = bytemuck::cast_slice(&phase_mapped);
            let mask_u32: &[u32] = bytemuck::cast_slice(&mask_mapped);
            let mean: &[f32] = bytemuck::cast_slice(&mean_mapped);

            PhaseMaps {
                phase: Image::from_vec(w as usize, h as usize, phase.to_vec()),
                mask: Image::from_vec(
                    w as usize,
                    h as usize,
                    mask_u32.iter().map(|&m| m as u8).collect(),
                ),
                mean: Image::from_vec(w as usize, h as usize, mean.to_vec()),
            }
        };

        phase_rb.unmap();
        mask_rb.unmap();
        mean_rb.unmap();
        Ok(out)
    }
}

/// Request an async map and hand back the completion channel. The caller
/// polls the device, then receives exactly one result.
fn request_map(
    slice: &wgpu::BufferSlice<'_>,
) -> mpsc::Receiver<Result<(), wgpu::BufferAsyncError>> {
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    rx
}

/// Widen u16 samples to u32, compacting out any stride padding so the
/// device buffer is exactly `width * height` elements, row-major.
fn widen_frame(img: &Image<u16>) -> Vec<u32> {
    let mut out = Vec::with_capacity(img.total_pixels());
    for y in 0..img.height() {
        out.extend(img.row(y).iter().map(|&v| v as u32));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::tests::run_gpu_test_in_subprocess;
    use crate::phase::PhaseExtractor;

    // ---- widen_frame (pure, no GPU) ----------------------------------------

    #[test]
    fn test_widen_frame_compact() {
        let img = Image::<u16>::from_vec(3, 2, vec![1, 2, 3, 4, 5, 65535]);
        assert_eq!(widen_frame(&img), vec![1, 2, 3, 4, 5, 65535]);
    }

    #[test]
    fn test_widen_frame_strips_stride_padding() {
        let img = Image::<u16>::from_vec_with_stride(
            2, 2, 4,
            vec![1, 2, 999, 999,
                 3, 4, 999, 999],
        );
        assert_eq!(widen_frame(&img), vec![1, 2, 3, 4]);
    }

    // ---- GPU integration (subprocess isolation, see gpu::device) -----------

    fn make_random_frames(w: usize, h: usize, seed: u32) -> [Image<u16>; 4] {
        let mut rng = seed;
        let mut next = move || {
            rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
            (rng >> 16) as u16
        };
        std::array::from_fn(|_| {
            Image::from_vec(w, h, (0..w * h).map(|_| next()).collect())
        })
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_matches_cpu() {
        let frames = make_random_frames(129, 97, 7919);
        let refs = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();

        let threshold = 30000.0;
        let cpu = PhaseExtractor::new(threshold).extract(&refs);

        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let gpu_out = GpuPhaseExtractor::new(&gpu, threshold)
            .extract(&gpu, &refs)
            .expect("gpu extraction failed");

        for ((x, y, cpu_phase), (_, _, gpu_phase)) in
            cpu.phase.pixels().zip(gpu_out.phase.pixels())
        {
            // GPU atan2 may differ from libm in the last ULPs.
            assert!(
                (cpu_phase - gpu_phase).abs() < 1e-5,
                "phase mismatch at ({x},{y}): cpu={cpu_phase} gpu={gpu_phase}"
            );
        }
        for ((x, y, cpu_mask), (_, _, gpu_mask)) in
            cpu.mask.pixels().zip(gpu_out.mask.pixels())
        {
            assert_eq!(cpu_mask, gpu_mask, "mask mismatch at ({x},{y})");
        }
        for ((x, y, cpu_mean), (_, _, gpu_mean)) in
            cpu.mean.pixels().zip(gpu_out.mean.pixels())
        {
            assert_eq!(cpu_mean, gpu_mean, "mean mismatch at ({x},{y})");
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_uniform_scenario() {
        // Uniform (100, 200, 150, 180), threshold 0: every pixel gets
        // mean 157.5, phase atan2(-20, -50), mask 1.
        let a = Image::<u16>::filled(64, 48, 100);
        let b = Image::<u16>::filled(64, 48, 200);
        let c = Image::<u16>::filled(64, 48, 150);
        let d = Image::<u16>::filled(64, 48, 180);
        let set = FrameSet::new([&a, &b, &c, &d]).unwrap();

        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let out = GpuPhaseExtractor::new(&gpu, 0.0)
            .extract(&gpu, &set)
            .expect("gpu extraction failed");

        let expected_phase = (-20.0f32).atan2(-50.0);
        for (_, _, p) in out.phase.pixels() {
            assert!((p - expected_phase).abs() < 1e-5);
        }
        assert!(out.mask.pixels().all(|(_, _, m)| m == 1));
        assert!(out.mean.pixels().all(|(_, _, m)| m == 157.5));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_degenerate_frames() {
        // All four frames identical: phase 0, mask 0 regardless of threshold.
        let frames: Vec<Image<u16>> =
            (0..4).map(|_| Image::filled(32, 32, 100)).collect();
        let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();

        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let out = GpuPhaseExtractor::new(&gpu, 10.0)
            .extract(&gpu, &set)
            .expect("gpu extraction failed");

        assert!(out.phase.pixels().all(|(_, _, p)| p == 0.0));
        assert!(out.mask.pixels().all(|(_, _, m)| m == 0));
        assert!(out.mean.pixels().all(|(_, _, m)| m == 100.0));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::phase::tests::inner_gpu_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_uniform_scenario() {
        let out = run_gpu_test_in_subprocess("gpu::phase::tests::inner_gpu_uniform_scenario");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_degenerate_frames() {
        let out = run_gpu_test_in_subprocess("gpu::phase::tests::inner_gpu_degenerate_frames");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
