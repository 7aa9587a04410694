// demos/vector_add.rs — GPU plumbing smoke test.
//
// Adds 1024 ones to 1024 twos on the device and verifies every element of
// the result is 3.0. If this passes, the adapter, queue, staging and
// readback paths all work.
//
// USAGE
//   cargo run --example vector_add

use phasor::gpu::device::GpuDevice;
use phasor::gpu::vecadd::GpuVectorAdd;

const N: usize = 1024;

fn main() {
    env_logger::init();

    let gpu = match GpuDevice::new() {
        Ok(gpu) => gpu,
        Err(e) => {
            eprintln!("GPU init failed: {e}");
            std::process::exit(1);
        }
    };
    println!("device: {}", gpu.adapter_info);

    let a = vec![1.0f32; N];
    let b = vec![2.0f32; N];

    let adder = GpuVectorAdd::new(&gpu);
    let c = match adder.add(&gpu, &a, &b) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("vector add failed: {e}");
            std::process::exit(1);
        }
    };

    for (i, &v) in c.iter().enumerate() {
        if v != 3.0 {
            eprintln!("mismatch: c[{i}] = {v}");
            std::process::exit(1);
        }
    }

    println!("ok: {} + {} = {} for all {N} elements", a[0], b[0], c[0]);
}
