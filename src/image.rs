// image.rs — Runtime-sized 2D sample container, generic over element type.
//
// The demodulator moves between three element types: raw camera frames are
// u16, phase and mean maps are f32, the validity mask is u8. All of them
// share the same row-major layout, so one container covers all seven buffers
// of an extraction call (4 in, 3 out).
//
// Stride may exceed width. Camera SDKs commonly hand out frames with
// per-row alignment padding, and the GPU staging path strips that padding
// when compacting rows into upload buffers — see gpu::phase.

use std::fmt;

/// Trait for types that can serve as samples in an [`Image`].
///
/// `Send + Sync + 'static` let images cross thread boundaries for the
/// rayon row-parallel path.
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Raw cast to f32 (not normalised — demodulation works on raw counts).
    fn to_f32(self) -> f32;

    /// Construct a sample from an f32, clamping and rounding as needed.
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for u16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 65535.0).round() as u16
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

/// A 2D image with runtime dimensions, row-major, generic over sample type.
///
/// Sample `(x, y)` lives at index `y * stride + x`. For images built by
/// this crate `stride == width`; frames arriving from a camera SDK may
/// carry alignment padding (`stride > width`).
pub struct Image<T: Pixel> {
    /// Sample data, length = height * stride.
    data: Vec<T>,
    width: usize,
    height: usize,
    /// Row stride in elements (not bytes), stride >= width.
    stride: usize,
}

// Explicit Clone: this is a deep copy of heap data.
impl<T: Pixel> Clone for Image<T> {
    fn clone(&self) -> Self {
        Image {
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }
}

impl<T: Pixel> Image<T> {
    /// Zero-initialised image, stride == width.
    pub fn new(width: usize, height: usize) -> Self {
        Self::new_with_stride(width, height, width)
    }

    /// Zero-initialised image with explicit row stride.
    ///
    /// # Panics
    /// Panics if `stride < width`.
    pub fn new_with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(
            stride >= width,
            "stride ({stride}) must be >= width ({width})"
        );
        Image {
            data: vec![T::default(); height * stride],
            width,
            height,
            stride,
        }
    }

    /// Image where every sample holds `value`. Handy for the uniform-frame
    /// scenarios in tests and benches.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Image {
            data: vec![value; width * height],
            width,
            height,
            stride: width,
        }
    }

    /// Wrap an existing sample vector (tightly packed, stride == width).
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image {
            data,
            width,
            height,
            stride: width,
        }
    }

    /// Wrap raw data that carries per-row padding.
    ///
    /// # Panics
    /// Panics if `data.len() != height * stride` or `stride < width`.
    pub fn from_vec_with_stride(
        width: usize,
        height: usize,
        stride: usize,
        data: Vec<T>,
    ) -> Self {
        assert!(stride >= width, "stride ({stride}) must be >= width ({width})");
        assert_eq!(
            data.len(),
            height * stride,
            "data length ({}) must equal height * stride ({})",
            data.len(),
            height * stride,
        );
        Image {
            data,
            width,
            height,
            stride,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Logical pixel count (excludes stride padding).
    #[inline]
    pub fn total_pixels(&self) -> usize {
        self.width * self.height
    }

    /// Sample at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.stride + x]
    }

    /// Write the sample at (x, y).
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.bounds_check(x, y);
        let idx = y * self.stride + x;
        self.data[idx] = value;
    }

    /// Borrow one row (without stride padding).
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// Mutable borrow of one row.
    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Underlying buffer, including any stride padding.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the underlying buffer.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Iterate over all samples as `(x, y, value)`, skipping padding.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width).map(move |x| (x, y, self.data[y * self.stride + x]))
        })
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Image<{}> {{ {}×{}, stride={} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
            self.stride,
        )?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(16) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.get(x, y))?;
            }
            if self.width > 16 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

impl<T: Pixel> std::ops::Index<(usize, usize)> for Image<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        self.bounds_check(x, y);
        &self.data[y * self.stride + x]
    }
}

impl<T: Pixel> std::ops::IndexMut<(usize, usize)> for Image<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        self.bounds_check(x, y);
        let idx = y * self.stride + x;
        &mut self.data[idx]
    }
}
