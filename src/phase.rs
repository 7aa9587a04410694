// phase.rs — Four-frame phase-shifting demodulation (CPU path).
//
// Reference: the standard four-step algorithm. Four frames captured at
// phase shifts 0°/90°/180°/270° give, per pixel:
//
//   phase = atan2(I3 - I1, I0 - I2)        wrapped to (-π, π]
//   mean  = (I0 + I1 + I2 + I3) / 4
//
// A pixel is invalid when the gradient is degenerate (both atan2 arguments
// within 1e-6 of zero — phase forced to 0.0 instead of evaluating
// atan2(0, 0)) or when a positive threshold exceeds the mean intensity.
// Degeneracy wins: a degenerate pixel stays invalid no matter how bright
// it is, and the threshold test is not evaluated for it.
//
// Every pixel depends only on its own four samples, so the dispatch is a
// plain parallel map over rows. The single-threaded reference and the
// rayon path share the same row kernel and are bit-identical.

use std::fmt;

use rayon::prelude::*;

use crate::error::ExtractError;
use crate::image::Image;

/// Absolute tolerance below which both atan2 arguments count as zero.
/// For u16 inputs this is equivalent to exact equality; the tolerance is
/// kept so [`demodulate_pixel`] behaves the same for arbitrary floats.
pub const DEGENERATE_EPS: f32 = 1e-6;

/// Demodulate one pixel: `(phase, mask, mean)` from the four phase-shifted
/// samples and the intensity threshold.
///
/// Pure and dispatch-agnostic — this is the whole numeric content of the
/// kernel, shared in spirit with the WGSL version in `shaders/phase.wgsl`.
#[inline]
pub fn demodulate_pixel(i0: f32, i1: f32, i2: f32, i3: f32, threshold: f32) -> (f32, u8, f32) {
    let mean = (i0 + i1 + i2 + i3) * 0.25;
    let numerator = i3 - i1;
    let denominator = i0 - i2;

    if numerator.abs() < DEGENERATE_EPS && denominator.abs() < DEGENERATE_EPS {
        // Degenerate gradient: no fringe modulation at this pixel.
        return (0.0, 0, mean);
    }

    let phase = numerator.atan2(denominator);
    let mask = if threshold > 0.0 && mean < threshold { 0 } else { 1 };
    (phase, mask, mean)
}

/// Four phase-shifted frames with validated, identical dimensions.
///
/// Construction is the checked precondition for both the CPU and GPU
/// paths: frames 1..3 must match frame 0, and dimensions must be nonzero.
pub struct FrameSet<'a> {
    frames: [&'a Image<u16>; 4],
}

impl<'a> FrameSet<'a> {
    /// Validate and wrap four frames, ordered by phase shift
    /// (0°, 90°, 180°, 270°).
    pub fn new(frames: [&'a Image<u16>; 4]) -> Result<Self, ExtractError> {
        let expected = (frames[0].width(), frames[0].height());
        if expected.0 == 0 || expected.1 == 0 {
            return Err(ExtractError::EmptyImage);
        }
        for (index, frame) in frames.iter().enumerate().skip(1) {
            let got = (frame.width(), frame.height());
            if got != expected {
                return Err(ExtractError::DimensionMismatch { index, expected, got });
            }
        }
        Ok(FrameSet { frames })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.frames[0].width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.frames[0].height()
    }

    #[inline]
    pub fn total_pixels(&self) -> usize {
        self.width() * self.height()
    }

    /// Frame `i` (by phase-shift order). `i` must be < 4.
    #[inline]
    pub fn frame(&self, i: usize) -> &Image<u16> {
        self.frames[i]
    }
}

impl fmt::Debug for FrameSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameSet {{ 4 × {}×{} }}", self.width(), self.height())
    }
}

/// The three per-pixel outputs of a demodulation call, all `width × height`
/// with stride == width.
pub struct PhaseMaps {
    /// Wrapped phase in radians, (-π, π]; 0.0 at degenerate pixels.
    pub phase: Image<f32>,
    /// 1 = valid, 0 = degenerate or below threshold.
    pub mask: Image<u8>,
    /// Mean of the four input samples.
    pub mean: Image<f32>,
}

impl PhaseMaps {
    fn new(width: usize, height: usize) -> Self {
        PhaseMaps {
            phase: Image::new(width, height),
            mask: Image::new(width, height),
            mean: Image::new(width, height),
        }
    }
}

/// CPU four-frame demodulator.
///
/// Stateless apart from the threshold: every call allocates fresh outputs,
/// reads only the frames it is given, and may run concurrently with other
/// calls.
pub struct PhaseExtractor {
    /// Mean-intensity cutoff. Values <= 0 disable intensity masking.
    pub threshold: f32,
}

impl PhaseExtractor {
    pub fn new(threshold: f32) -> Self {
        PhaseExtractor { threshold }
    }

    /// Demodulate all pixels, parallelised over rows.
    pub fn extract(&self, frames: &FrameSet<'_>) -> PhaseMaps {
        let w = frames.width();
        let h = frames.height();
        let mut out = PhaseMaps::new(w, h);
        let threshold = self.threshold;

        // Outputs are freshly allocated with stride == width, so each
        // par_chunks_mut(w) chunk is exactly one row.
        out.phase
            .as_mut_slice()
            .par_chunks_mut(w)
            .zip(out.mask.as_mut_slice().par_chunks_mut(w))
            .zip(out.mean.as_mut_slice().par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, ((phase_row, mask_row), mean_row))| {
                demodulate_row(frames, y, threshold, phase_row, mask_row, mean_row);
            });

        out
    }

    /// Single-threaded reference path. Bit-identical to [`extract`] for
    /// identical inputs; used to pin down determinism in tests.
    ///
    /// [`extract`]: PhaseExtractor::extract
    pub fn extract_reference(&self, frames: &FrameSet<'_>) -> PhaseMaps {
        let w = frames.width();
        let h = frames.height();
        let mut out = PhaseMaps::new(w, h);

        for y in 0..h {
            demodulate_row(
                frames,
                y,
                self.threshold,
                out.phase.row_mut(y),
                out.mask.row_mut(y),
                out.mean.row_mut(y),
            );
        }

        out
    }
}

/// Row kernel shared by the parallel and reference paths.
fn demodulate_row(
    frames: &FrameSet<'_>,
    y: usize,
    threshold: f32,
    phase_row: &mut [f32],
    mask_row: &mut [u8],
    mean_row: &mut [f32],
) {
    let r0 = frames.frame(0).row(y);
    let r1 = frames.frame(1).row(y);
    let r2 = frames.frame(2).row(y);
    let r3 = frames.frame(3).row(y);

    for x in 0..phase_row.len() {
        let (phase, mask, mean) = demodulate_pixel(
            r0[x] as f32,
            r1[x] as f32,
            r2[x] as f32,
            r3[x] as f32,
            threshold,
        );
        phase_row[x] = phase;
        mask_row[x] = mask;
        mean_row[x] = mean;
    }
}
