//! Four-frame phase-shifting demodulation.
//!
//! Given four equal-sized 16-bit intensity frames captured at phase shifts
//! 0°/90°/180°/270° and a mean-intensity threshold, produce per pixel a
//! wrapped phase (`atan2(I3 - I1, I0 - I2)`), a validity mask, and the mean
//! intensity.
//!
//! Two execution paths, bit-compatible per pixel:
//! - [`phase::PhaseExtractor`] — CPU, row-parallel via rayon, with a
//!   single-threaded reference for determinism checks;
//! - [`gpu::phase::GpuPhaseExtractor`] — wgpu compute kernel with a strict
//!   stage-inputs / dispatch-once / copy-back lifecycle, driven by a
//!   caller-owned [`gpu::device::GpuDevice`].
//!
//! ```no_run
//! use phasor::image::Image;
//! use phasor::phase::{FrameSet, PhaseExtractor};
//!
//! let frames: Vec<Image<u16>> = (0..4).map(|_| Image::new(640, 480)).collect();
//! let set = FrameSet::new([&frames[0], &frames[1], &frames[2], &frames[3]])?;
//! let maps = PhaseExtractor::new(200.0).extract(&set);
//! assert_eq!(maps.phase.total_pixels(), 640 * 480);
//! # Ok::<(), phasor::error::ExtractError>(())
//! ```

pub mod error;
pub mod gpu;
pub mod image;
pub mod phase;
