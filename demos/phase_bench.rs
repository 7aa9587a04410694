// demos/phase_bench.rs — GPU vs CPU demodulation timing harness.
//
// Builds synthetic fringe frames, runs N repeated extractions on each
// path, cross-checks the outputs, and prints wall time, frames/sec and
// Mpixel/sec. Quick sanity numbers without pulling in criterion.
//
// USAGE
//   cargo run --release --example phase_bench
//   cargo run --release --example phase_bench -- 1280 1024 200

use std::time::Instant;

use phasor::gpu::device::GpuDevice;
use phasor::gpu::phase::GpuPhaseExtractor;
use phasor::image::Image;
use phasor::phase::{FrameSet, PhaseExtractor};

const THRESHOLD: f32 = 500.0;

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

fn report(label: &str, elapsed_s: f64, iters: usize, pixels: usize) {
    let fps = iters as f64 / elapsed_s;
    let mpix = fps * pixels as f64 / 1e6;
    println!(
        "  {label}: {:.1} ms/call, {:.1} frame-sets/sec, {:.1} Mpixel/sec",
        elapsed_s * 1000.0 / iters as f64,
        fps,
        mpix,
    );
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let w: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(640);
    let h: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(480);
    let iters: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);

    println!("frames: 4 × {w}×{h}, threshold {THRESHOLD}, {iters} iterations");

    let frames = make_fringe_frames(w, h);
    let set = match FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]]) {
        Ok(set) => set,
        Err(e) => {
            eprintln!("bad frames: {e}");
            std::process::exit(1);
        }
    };
    let pixels = set.total_pixels();

    // CPU path.
    let cpu = PhaseExtractor::new(THRESHOLD);
    let cpu_maps = cpu.extract(&set);
    let t0 = Instant::now();
    for _ in 0..iters {
        let _ = cpu.extract(&set);
    }
    report("cpu (rayon)", t0.elapsed().as_secs_f64(), iters, pixels);

    // GPU path.
    let gpu = match GpuDevice::new() {
        Ok(gpu) => gpu,
        Err(e) => {
            eprintln!("GPU init failed, CPU numbers only: {e}");
            return;
        }
    };
    println!("device: {}", gpu.adapter_info);

    let gpu_ex = GpuPhaseExtractor::new(&gpu, THRESHOLD);
    // Warm-up call pays lazy pipeline compilation before timing.
    let gpu_maps = match gpu_ex.extract(&gpu, &set) {
        Ok(maps) => maps,
        Err(e) => {
            eprintln!("gpu extraction failed: {e}");
            std::process::exit(1);
        }
    };
    let t0 = Instant::now();
    for _ in 0..iters {
        if let Err(e) = gpu_ex.extract(&gpu, &set) {
            eprintln!("gpu extraction failed: {e}");
            std::process::exit(1);
        }
    }
    report("gpu", t0.elapsed().as_secs_f64(), iters, pixels);

    // Cross-check the two paths on this frame set.
    let mut max_phase_err = 0.0f32;
    let mut mask_mismatches = 0usize;
    for ((_, _, cp), (_, _, gp)) in cpu_maps.phase.pixels().zip(gpu_maps.phase.pixels()) {
        max_phase_err = max_phase_err.max((cp - gp).abs());
    }
    for ((_, _, cm), (_, _, gm)) in cpu_maps.mask.pixels().zip(gpu_maps.mask.pixels()) {
        if cm != gm {
            mask_mismatches += 1;
        }
    }
    println!("  agreement: max |Δphase| = {max_phase_err:.2e}, mask mismatches = {mask_mismatches}");
}
