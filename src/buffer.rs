//! The RGBA image handed to the encoder.

use alloc::vec;
use alloc::vec::Vec;
use core::convert::Infallible;

use derive_more::{Display, Error};
use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::prelude::{OriginDimensions, Point, Size};

use crate::{Color, HEIGHT, WIDTH};

/// Bytes per pixel: red, green, blue and an ignored alpha.
pub const BYTES_PER_PIXEL: usize = 4;

/// Length of a complete frame of pixel data.
pub const FRAME_BYTES: usize = WIDTH * HEIGHT * BYTES_PER_PIXEL;

/// Raw pixel data of the wrong length.
#[derive(Clone, Copy, Debug, Display, Error, PartialEq, Eq)]
#[display("expected {expected} bytes of pixel data, got {actual}")]
pub struct DimensionError {
    /// Required length in bytes.
    pub expected: usize,
    /// Length that was supplied.
    pub actual: usize,
}

/// A `WIDTH` x `HEIGHT` image, stored row-major as RGBA bytes.
///
/// Alpha is carried so frames can be copied in from RGBA sources unchanged,
/// but nothing downstream reads it.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
}

impl PixelBuffer {
    /// An all-black, fully opaque buffer.
    #[must_use]
    pub fn new() -> Self {
        let mut data = vec![0; FRAME_BYTES];
        for pixel in data.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel[3] = u8::MAX;
        }
        Self { data }
    }

    /// Wrap raw RGBA bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DimensionError`] unless `data` holds exactly [`FRAME_BYTES`].
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, DimensionError> {
        check_len(data.len())?;
        Ok(Self { data })
    }

    /// Overwrite the whole image from raw RGBA bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DimensionError`] unless `data` holds exactly [`FRAME_BYTES`];
    /// the buffer is left untouched in that case.
    pub fn copy_from_slice(&mut self, data: &[u8]) -> Result<(), DimensionError> {
        check_len(data.len())?;
        self.data.copy_from_slice(data);
        Ok(())
    }

    /// The raw RGBA bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Red, green and blue at `(x, y)`.
    ///
    /// # Panics
    ///
    /// If `(x, y)` is off the image.
    #[inline]
    #[must_use]
    pub fn rgb(&self, x: usize, y: usize) -> [u8; 3] {
        let offset = Self::offset(x, y);
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ]
    }

    /// The colour at `(x, y)`.
    ///
    /// # Panics
    ///
    /// If `(x, y)` is off the image.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> Color {
        let [r, g, b] = self.rgb(x, y);
        Color::new(r, g, b)
    }

    /// Set the colour at `(x, y)`. Points off the image are ignored.
    pub fn set_pixel(&mut self, p: Point, color: Color) {
        if p.x < 0 || p.y < 0 {
            return;
        }
        let (x, y) = (p.x as usize, p.y as usize);
        if x >= WIDTH || y >= HEIGHT {
            return;
        }
        let offset = Self::offset(x, y);
        self.data[offset] = color.r();
        self.data[offset + 1] = color.g();
        self.data[offset + 2] = color.b();
        self.data[offset + 3] = u8::MAX;
    }

    /// Paint every pixel `color`.
    pub fn fill(&mut self, color: Color) {
        for pixel in self.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel.copy_from_slice(&[color.r(), color.g(), color.b(), u8::MAX]);
        }
    }

    #[inline]
    fn offset(x: usize, y: usize) -> usize {
        assert!(x < WIDTH && y < HEIGHT, "pixel ({x}, {y}) is off the image");
        (y * WIDTH + x) * BYTES_PER_PIXEL
    }
}

fn check_len(actual: usize) -> Result<(), DimensionError> {
    if actual == FRAME_BYTES {
        Ok(())
    } else {
        Err(DimensionError {
            expected: FRAME_BYTES,
            actual,
        })
    }
}

impl Default for PixelBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &WIDTH)
            .field("height", &HEIGHT)
            .finish_non_exhaustive()
    }
}

impl OriginDimensions for PixelBuffer {
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

impl embedded_graphics::draw_target::DrawTarget for PixelBuffer {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = embedded_graphics::Pixel<Self::Color>>,
    {
        for pixel in pixels {
            self.set_pixel(pixel.0, pixel.1);
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.fill(color);
        Ok(())
    }
}
