//! # Raster Images
//!
//! [`RasterImage`] is the monochrome bitmap handed over by the label
//! rasterizer. It is immutable once built and read-only to the session.
//!
//! ## Bit Packing
//!
//! Rows are packed as bytes where each bit represents one dot:
//! - Bit 7 (MSB) = leftmost dot
//! - Bit 0 (LSB) = rightmost dot
//! - 1 = black (print), 0 = white (no print)
//!
//! ```text
//! Byte value 0xF0 = 11110000 = ████░░░░
//! Byte value 0x0F = 00001111 = ░░░░████
//! ```
//!
//! ## Row Compression
//!
//! Wireless links are the bottleneck, so identical consecutive rows are sent
//! once with a repeat count (see [`compress_rows`]):
//!
//! ```text
//! rows:  A A A A B B A      →  runs: (0, A×4) (4, B×2) (6, A×1)
//! ```
//!
//! A run never exceeds 255 rows, so an all-blank image of N rows costs
//! `ceil(N / 255)` print commands.

use image::GrayImage;

use crate::error::EtiquetaError;

/// Longest run a single PrintRow command can repeat.
pub const MAX_REPEAT: u8 = u8::MAX;

/// A 1-bit-per-pixel image, rows packed MSB first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl RasterImage {
    /// Wrap packed row data.
    ///
    /// `data` must hold exactly `ceil(width / 8) * height` bytes.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, EtiquetaError> {
        let expected = width.div_ceil(8) * height;
        if data.len() != expected {
            return Err(EtiquetaError::InvalidInput(format!(
                "raster data is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// An all-white image.
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width.div_ceil(8) * height],
        }
    }

    /// Build an image from a per-pixel predicate (`true` = black).
    ///
    /// ```
    /// use etiqueta::raster::RasterImage;
    ///
    /// let img = RasterImage::from_fn(16, 2, |x, _y| x < 4);
    /// assert_eq!(img.row(0), &[0xF0, 0x00]);
    /// ```
    pub fn from_fn<F>(width: usize, height: usize, pixel: F) -> Self
    where
        F: Fn(usize, usize) -> bool,
    {
        let mut data = Vec::with_capacity(width.div_ceil(8) * height);
        let mut row = Vec::with_capacity(width);
        for y in 0..height {
            row.clear();
            row.extend((0..width).map(|x| pixel(x, y)));
            data.extend(pack_row(&row));
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Threshold a grayscale image: pixels darker than `threshold` print.
    pub fn from_luma(img: &GrayImage, threshold: u8) -> Self {
        let (w, h) = img.dimensions();
        Self::from_fn(w as usize, h as usize, |x, y| {
            img.get_pixel(x as u32, y as u32).0[0] < threshold
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Bytes per packed row.
    pub fn width_bytes(&self) -> usize {
        self.width.div_ceil(8)
    }

    /// Packed bytes of row `y`.
    ///
    /// Panics if `y >= height`.
    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.width_bytes();
        &self.data[y * stride..(y + 1) * stride]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        // chunks(0) panics, zero-width images have no row bytes
        let stride = self.width_bytes().max(1);
        self.data.chunks(stride).take(if self.width == 0 { 0 } else { self.height })
    }

    /// Whether the pixel at (x, y) prints.
    pub fn get(&self, x: usize, y: usize) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let byte = self.row(y)[x / 8];
        (byte >> (7 - (x % 8))) & 1 == 1
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Pack a row of pixels into bytes (MSB first).
///
/// If the row length is not a multiple of 8, the last byte is padded
/// with zeros (white) on the right.
///
/// ```
/// use etiqueta::raster::pack_row;
///
/// let row = vec![true, true, true, true, false, false, false, false];
/// assert_eq!(pack_row(&row), vec![0xF0]);
/// ```
pub fn pack_row(pixels: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; pixels.len().div_ceil(8)];
    for (i, &pixel) in pixels.iter().enumerate() {
        if pixel {
            bytes[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    bytes
}

/// Widen packed row bytes to `row_bytes`, padding with white on the right.
pub fn pad_row(row: &[u8], row_bytes: usize) -> Result<Vec<u8>, EtiquetaError> {
    if row.len() > row_bytes {
        return Err(EtiquetaError::InvalidInput(format!(
            "row is {} bytes, printhead takes {}",
            row.len(),
            row_bytes
        )));
    }
    let mut padded = Vec::with_capacity(row_bytes);
    padded.extend_from_slice(row);
    padded.resize(row_bytes, 0);
    Ok(padded)
}

// ============================================================================
// ROW COMPRESSION
// ============================================================================

/// One PrintRow command worth of image: `repeat` copies of `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRun {
    /// Index of the first row covered by this run
    pub start_row: usize,
    /// Number of rows, 1..=255
    pub repeat: u8,
    /// Packed row bytes, padded to the printhead width
    pub data: Vec<u8>,
}

/// Collapse identical consecutive rows into runs of at most 255.
///
/// Rows are padded to `row_bytes` first, so an image narrower than the
/// printhead compresses the same way it prints.
pub fn compress_rows(image: &RasterImage, row_bytes: usize) -> Result<Vec<RowRun>, EtiquetaError> {
    let mut runs: Vec<RowRun> = Vec::new();

    for (y, row) in image.rows().enumerate() {
        let packed = pad_row(row, row_bytes)?;
        match runs.last_mut() {
            Some(run) if run.repeat < MAX_REPEAT && run.data == packed => run.repeat += 1,
            _ => runs.push(RowRun {
                start_row: y,
                repeat: 1,
                data: packed,
            }),
        }
    }

    Ok(runs)
}

// ============================================================================
// TESTS
// ============================================================================
