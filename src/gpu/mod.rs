// gpu/ — wgpu compute path.
//
// `device` owns the execution context (adapter, device, queue, workgroup
// configuration). `phase` is the demodulation kernel; `vecadd` is the
// minimal elementwise kernel kept as the GPU smoke test. Both follow the
// same buffer lifecycle: stage inputs host→device, dispatch once, copy all
// outputs back only after the dispatch completes.

pub mod device;
pub mod phase;
pub mod vecadd;
