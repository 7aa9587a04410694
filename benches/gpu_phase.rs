// benches/gpu_phase.rs — GPU demodulation throughput. Requires a Vulkan GPU.
//
//   cargo bench --bench gpu_phase
//
// Criterion measures wall time including staging uploads, bind group
// creation, submit and readback poll — the whole transfer-compute-transfer
// call, which is what a caller actually pays per frame set.
//
// Warm-up matters: the first iterations pay lazy pipeline compilation on
// some drivers, so warm_up_time is set explicitly.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use phasor::gpu::device::GpuDevice;
use phasor::gpu::phase::GpuPhaseExtractor;
use phasor::gpu::vecadd::GpuVectorAdd;
use phasor::image::Image;
use phasor::phase::{FrameSet, PhaseExtractor};

fn make_fringe_frames(w: usize, h: usize) -> [Image<u16>; 4] {
    std::array::from_fn(|k| {
        let shift = k as f32 * std::f32::consts::FRAC_PI_2;
        let mut img = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let carrier = x as f32 * 0.12 + y as f32 * 0.003;
                let v = 2000.0 + 1500.0 * (carrier + shift).cos();
                img.set(x, y, v as u16);
            }
        }
        img
    })
}

fn bench_gpu_vs_cpu(c: &mut Criterion) {
    let gpu = GpuDevice::new().expect("no Vulkan GPU");
    eprintln!("benching on: {}", gpu.adapter_info);

    let mut group = c.benchmark_group("demodulate");
    group.warm_up_time(Duration::from_secs(2));

    for &(w, h) in &[(640usize, 480usize), (1280, 1024)] {
        let frames = make_fringe_frames(w, h);
        let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]).unwrap();
        let cpu = PhaseExtractor::new(500.0);
        let gpu_ex = GpuPhaseExtractor::new(&gpu, 500.0);

        group.throughput(Throughput::Elements((w * h) as u64));
        group.bench_with_input(
            BenchmarkId::new("cpu", format!("{w}x{h}")),
            &set,
            |b, set| b.iter(|| cpu.extract(set)),
        );
        group.bench_with_input(
            BenchmarkId::new("gpu", format!("{w}x{h}")),
            &set,
            |b, set| b.iter(|| gpu_ex.extract(&gpu, set).expect("gpu extract")),
        );
    }

    group.finish();
}

fn bench_vecadd(c: &mut Criterion) {
    let gpu = GpuDevice::new().expect("no Vulkan GPU");
    let adder = GpuVectorAdd::new(&gpu);

    let mut group = c.benchmark_group("vecadd");
    group.warm_up_time(Duration::from_secs(2));

    for &n in &[1024usize, 1 << 20] {
        let a = vec![1.0f32; n];
        let b_in = vec![2.0f32; n];
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(BenchmarkId::from_parameter(n), |b| {
            b.iter(|| adder.add(&gpu, &a, &b_in).expect("vecadd"))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_gpu_vs_cpu, bench_vecadd);
criterion_main!(benches);
