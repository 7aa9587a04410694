// error.rs — Error taxonomy for the extraction call boundary.
//
// All validation happens up front: a failed call writes nothing, and the
// caller must not look at any output. Dimension agreement between the four
// frames is a checked precondition here, not an unchecked assumption.

use std::fmt;

use crate::gpu::device::GpuError;

/// Errors surfaced by [`PhaseExtractor`](crate::phase::PhaseExtractor) and
/// [`GpuPhaseExtractor`](crate::gpu::phase::GpuPhaseExtractor).
#[derive(Debug)]
pub enum ExtractError {
    /// Frame `index` does not match frame 0's dimensions.
    DimensionMismatch {
        index: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },
    /// A frame has zero width or height.
    EmptyImage,
    /// The GPU path failed (device, dispatch or readback). All-or-nothing:
    /// no outputs are populated.
    Gpu(GpuError),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { index, expected, got } => write!(
                f,
                "frame {index}: expected {}×{}, got {}×{}",
                expected.0, expected.1, got.0, got.1
            ),
            Self::EmptyImage => write!(f, "frames must have nonzero width and height"),
            Self::Gpu(e) => write!(f, "gpu extraction failed: {e}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GpuError> for ExtractError {
    fn from(e: GpuError) -> Self {
        Self::Gpu(e)
    }
}
