//! Temporal-dither encoder.
//!
//! Turns a [`PixelBuffer`] into a [`Schedule`]. Each 8-bit channel value is
//! quantised through the gamma table to a 6-bit level `L`, and the dither
//! mask for `L` decides in which of the 64 sub-frames the signal's pin is
//! driven high. Summed over a schedule the pin is on for `L` of 64
//! sub-frames.
//!
//! # Example
//! ```rust
//! use embedded_graphics::prelude::*;
//! use hub75_pru::buffer::PixelBuffer;
//! use hub75_pru::encoder::{Encoder, EncoderConfig};
//! use hub75_pru::schedule::Schedule;
//! use hub75_pru::Color;
//!
//! let encoder = Encoder::new(EncoderConfig::default());
//! let mut buffer = PixelBuffer::new();
//! buffer.set_pixel(Point::new(3, 4), Color::WHITE);
//!
//! let mut schedule = Schedule::new_boxed();
//! encoder.encode(&buffer, &mut schedule);
//! assert_eq!(encoder.decode(&schedule).pixel(3, 4), Color::new(252, 252, 252));
//! ```

use core::marker::PhantomData;

use embedded_graphics::prelude::Point;

use crate::buffer::{DimensionError, PixelBuffer, BYTES_PER_PIXEL, FRAME_BYTES};
use crate::layout::{Octoscroller, ScanLayout, ScanPosition};
use crate::schedule::{ControlWord, DoublePixel, Schedule, CONTROL_BANK};
use crate::tables::{DitherTables, DEVICE_GAMMA};
use crate::wiring::WiringMap;
use crate::{Color, OUTPUTS, SCANS, SCAN_WIDTH, SUBFRAMES, WIDTH};

/// Row-select offset paired with the double-buffered firmware.
///
/// The firmware latches a row while the next one is being shifted, so the
/// value written alongside row `r` addresses row `r - 1`.
pub const DEFAULT_ROW_SELECT_OFFSET: usize = SCANS - 1;

/// Encoder settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EncoderConfig {
    /// Display gamma applied before quantising to 6 bits.
    pub gamma: f64,
    /// Added to the row index (mod 16) to form the row-select control value.
    pub row_select_offset: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            gamma: DEVICE_GAMMA,
            row_select_offset: DEFAULT_ROW_SELECT_OFFSET,
        }
    }
}

/// Encodes pixel buffers into schedules.
///
/// # Type Parameters
///
/// * `L` - The [`ScanLayout`] locating each scan position in the image
#[derive(Clone, Debug)]
pub struct Encoder<L: ScanLayout = Octoscroller> {
    tables: DitherTables,
    wiring: WiringMap,
    row_select_offset: usize,
    _layout: PhantomData<L>,
}

impl Encoder<Octoscroller> {
    /// An encoder for the Octoscroller cape.
    #[must_use]
    pub fn new(config: EncoderConfig) -> Self {
        Self::with_wiring(config, WiringMap::octoscroller())
    }
}

impl Default for Encoder<Octoscroller> {
    fn default() -> Self {
        Self::new(EncoderConfig::default())
    }
}

impl<L: ScanLayout> Encoder<L> {
    /// An encoder for custom wiring.
    #[must_use]
    pub fn with_wiring(config: EncoderConfig, wiring: WiringMap) -> Self {
        Self {
            tables: DitherTables::new(config.gamma),
            wiring,
            row_select_offset: config.row_select_offset % SCANS,
            _layout: PhantomData,
        }
    }

    /// The lookup tables in use.
    #[must_use]
    pub fn tables(&self) -> &DitherTables {
        &self.tables
    }

    /// The wiring in use.
    #[must_use]
    pub fn wiring(&self) -> &WiringMap {
        &self.wiring
    }

    /// The control word emitted with every pixel of row group `row_select`.
    #[must_use]
    pub fn control_word(&self, row_select: usize) -> ControlWord {
        ControlWord::for_row(row_select + self.row_select_offset)
    }

    /// Encode a complete image into `schedule`.
    ///
    /// Every pixel of the schedule is overwritten, so encoding the same image
    /// twice yields the same bytes.
    pub fn encode(&self, buffer: &PixelBuffer, schedule: &mut Schedule) {
        self.encode_with(schedule, |x, y| buffer.rgb(x, y));
    }

    /// Encode raw row-major RGBA bytes into `schedule`.
    ///
    /// # Errors
    ///
    /// Returns [`DimensionError`] if `data` is not exactly one frame long;
    /// `schedule` is not touched in that case.
    pub fn encode_bytes(&self, data: &[u8], schedule: &mut Schedule) -> Result<(), DimensionError> {
        if data.len() != FRAME_BYTES {
            return Err(DimensionError {
                expected: FRAME_BYTES,
                actual: data.len(),
            });
        }
        self.encode_with(schedule, |x, y| {
            let offset = (y * WIDTH + x) * BYTES_PER_PIXEL;
            [data[offset], data[offset + 1], data[offset + 2]]
        });
        Ok(())
    }

    fn encode_with<F>(&self, schedule: &mut Schedule, rgb: F)
    where
        F: Fn(usize, usize) -> [u8; 3],
    {
        let mut planes = [DoublePixel::new(); SUBFRAMES];
        for row_select in 0..SCANS {
            let mut base = DoublePixel::new();
            base.words[CONTROL_BANK.index()] = self.control_word(row_select).bits();

            for column in 0..SCAN_WIDTH {
                planes.fill(base);
                for output in 0..OUTPUTS {
                    let (x, y) = L::locate(ScanPosition::new(output, row_select, column));
                    let values = rgb(x, y);
                    for (value, pin) in values.into_iter().zip(self.wiring.rgb(output)) {
                        // visit set bits only
                        let mut mask = self.tables.mask_for(value);
                        while mask != 0 {
                            planes[mask.trailing_zeros() as usize].set(pin);
                            mask &= mask - 1;
                        }
                    }
                }
                for (subframe, plane) in planes.iter().enumerate() {
                    *schedule.pixel_mut(subframe, row_select, column) = *plane;
                }
            }
        }
    }

    /// Reconstruct an approximate image from a schedule.
    ///
    /// Each channel becomes `4 * on_count`, saturating at 255, so a schedule
    /// produced by [`Encoder::encode`] decodes to the gamma-quantised levels
    /// scaled back to 8 bits.
    #[must_use]
    pub fn decode(&self, schedule: &Schedule) -> PixelBuffer {
        let mut buffer = PixelBuffer::new();
        for output in 0..OUTPUTS {
            let pins = self.wiring.rgb(output);
            for row_select in 0..SCANS {
                for column in 0..SCAN_WIDTH {
                    let mut rgb = [0u8; 3];
                    for (channel, pin) in rgb.iter_mut().zip(pins) {
                        let count = schedule.on_count(row_select, column, pin);
                        *channel = (count * 4).min(u32::from(u8::MAX)) as u8;
                    }
                    let position = ScanPosition::new(output, row_select, column);
                    let (x, y) = L::locate(position);
                    buffer.set_pixel(
                        Point::new(x as i32, y as i32),
                        Color::new(rgb[0], rgb[1], rgb[2]),
                    );
                }
            }
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use embedded_graphics::prelude::*;
    use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

    use super::*;
    use crate::schedule::CONTROL_MASK;
    use crate::wiring::{Channel, OCTOSCROLLER};
    use crate::{GPIO_BANKS, HEIGHT};

    /// Deterministic noise so tests cover every level without a rng crate.
    fn noise_buffer(seed: u32) -> PixelBuffer {
        let mut state = seed;
        let data: Vec<u8> = (0..FRAME_BYTES)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect();
        PixelBuffer::from_bytes(data).unwrap()
    }

    /// One bit at a time, straight from the wiring table.
    fn encode_reference(encoder: &Encoder, buffer: &PixelBuffer) -> std::boxed::Box<Schedule> {
        let mut schedule = Schedule::new_boxed();
        for subframe in 0..SUBFRAMES {
            for row_select in 0..SCANS {
                for column in 0..SCAN_WIDTH {
                    let pixel = schedule.pixel_mut(subframe, row_select, column);
                    pixel.words[1] = ((row_select + 15) % 16) as u32 * 4096;
                    for wire in &OCTOSCROLLER {
                        let position =
                            ScanPosition::new(wire.signal.output(), row_select, column);
                        let (x, y) = Octoscroller::locate(position);
                        let value = buffer.rgb(x, y)[wire.signal.channel.index()];
                        let mask = encoder.tables().mask_for(value);
                        if (mask >> subframe) & 1 == 1 {
                            pixel.words[wire.pin.bank.index()] |= 1 << wire.pin.bit;
                        }
                    }
                }
            }
        }
        schedule
    }

    #[test]
    fn test_encode_matches_reference() {
        let encoder = Encoder::default();
        let buffer = noise_buffer(7);
        let mut schedule = Schedule::new_boxed();
        encoder.encode(&buffer, &mut schedule);
        assert!(*schedule == *encode_reference(&encoder, &buffer));
    }

    #[test]
    fn test_encode_is_idempotent() {
        let encoder = Encoder::default();
        let buffer = noise_buffer(11);

        let mut once = Schedule::new_boxed();
        encoder.encode(&buffer, &mut once);

        // start from a dirty bank: nothing may leak through
        let mut twice = Schedule::new_boxed();
        encoder.encode(&noise_buffer(12), &mut twice);
        encoder.encode(&buffer, &mut twice);
        encoder.encode(&buffer, &mut twice);

        assert!(*once == *twice);
    }

    #[test]
    fn test_black_has_no_color_bits() {
        let encoder = Encoder::default();
        let mut schedule = Schedule::new_boxed();
        encoder.encode(&PixelBuffer::new(), &mut schedule);

        for subframe in 0..SUBFRAMES {
            for row_select in 0..SCANS {
                for column in 0..SCAN_WIDTH {
                    let pixel = schedule.pixel(subframe, row_select, column);
                    assert_eq!(pixel.color_words(), [0; GPIO_BANKS]);
                    assert_eq!(
                        pixel.control().row_select() as usize,
                        (row_select + 15) % 16
                    );
                }
            }
        }
    }

    #[test]
    fn test_single_white_pixel() {
        let encoder = Encoder::default();
        let mut buffer = PixelBuffer::new();
        let point = Point::new(70, 37);
        buffer.set_pixel(point, Color::WHITE);

        let mut schedule = Schedule::new_boxed();
        encoder.encode(&buffer, &mut schedule);

        let lit = Octoscroller::point_position(point).unwrap();
        assert_eq!(lit, ScanPosition::new(10, 5, 6));
        for channel in Channel::ALL {
            let pin = encoder.wiring().pin(lit.output, channel);
            assert_eq!(schedule.on_count(lit.row_select, lit.column, pin), 63);
        }

        let lit_pins = encoder.wiring().rgb(lit.output);
        for row_select in 0..SCANS {
            for column in 0..SCAN_WIDTH {
                for pin in OCTOSCROLLER.iter().map(|wire| wire.pin) {
                    let here = row_select == lit.row_select && column == lit.column;
                    if here && lit_pins.contains(&pin) {
                        continue;
                    }
                    assert_eq!(schedule.on_count(row_select, column, pin), 0);
                }
            }
        }
    }

    #[test]
    fn test_dark_region_is_dark() {
        let encoder = Encoder::default();
        let mut buffer = PixelBuffer::new();
        // light the left column of strips, leave the right one black
        Rectangle::new(Point::zero(), Size::new(64, HEIGHT as u32))
            .into_styled(PrimitiveStyle::with_fill(Color::new(200, 90, 30)))
            .draw(&mut buffer)
            .unwrap();

        let mut schedule = Schedule::new_boxed();
        encoder.encode(&buffer, &mut schedule);

        for output in 8..OUTPUTS {
            for pin in encoder.wiring().rgb(output) {
                for row_select in 0..SCANS {
                    for column in 0..SCAN_WIDTH {
                        assert_eq!(schedule.on_count(row_select, column, pin), 0);
                    }
                }
            }
        }
        let red = encoder.wiring().pin(0, Channel::Red);
        assert_eq!(
            schedule.on_count(4, 4, red),
            u32::from(encoder.tables().level(200))
        );
    }

    #[test]
    fn test_on_count_tracks_level() {
        let encoder = Encoder::default();
        let buffer = noise_buffer(3);
        let mut schedule = Schedule::new_boxed();
        encoder.encode(&buffer, &mut schedule);

        for wire in OCTOSCROLLER.iter().step_by(5) {
            for row_select in [0, 7, 15] {
                for column in [0, 31, 63] {
                    let position = ScanPosition::new(wire.signal.output(), row_select, column);
                    let (x, y) = Octoscroller::locate(position);
                    let value = buffer.rgb(x, y)[wire.signal.channel.index()];
                    let level = encoder.tables().level(value);
                    let count = schedule.on_count(row_select, column, wire.pin);
                    assert_eq!(count, u32::from(level));
                    let error = (f64::from(count) / 64.0 - f64::from(level) / 63.0).abs();
                    assert!(error <= 1.0 / 64.0);
                }
            }
        }
    }

    #[test]
    fn test_row_select_offset_is_configurable() {
        let encoder = Encoder::new(EncoderConfig {
            row_select_offset: 0,
            ..EncoderConfig::default()
        });
        let mut schedule = Schedule::new_boxed();
        encoder.encode(&PixelBuffer::new(), &mut schedule);
        for row_select in 0..SCANS {
            let control = schedule.pixel(9, row_select, 40).control();
            assert_eq!(control.row_select() as usize, row_select);
            assert_eq!(control.bits() & !CONTROL_MASK, 0);
        }
        assert_eq!(Encoder::default().control_word(0).row_select(), 15);
        assert_eq!(Encoder::default().control_word(1).row_select(), 0);
    }

    #[test]
    fn test_encode_bytes() {
        let encoder = Encoder::default();
        let buffer = noise_buffer(5);

        let mut from_bytes = Schedule::new_boxed();
        encoder
            .encode_bytes(buffer.as_bytes(), &mut from_bytes)
            .unwrap();
        let mut from_buffer = Schedule::new_boxed();
        encoder.encode(&buffer, &mut from_buffer);
        assert!(*from_bytes == *from_buffer);

        let mut untouched = Schedule::new_boxed();
        let err = encoder.encode_bytes(&[0; 100], &mut untouched).unwrap_err();
        assert_eq!(
            err,
            DimensionError {
                expected: FRAME_BYTES,
                actual: 100
            }
        );
        assert!(untouched.as_words().iter().all(|&word| word == 0));
    }

    #[test]
    fn test_decode_recovers_levels() {
        let encoder = Encoder::default();
        let buffer = noise_buffer(9);
        let mut schedule = Schedule::new_boxed();
        encoder.encode(&buffer, &mut schedule);

        let decoded = encoder.decode(&schedule);
        for (x, y) in [(0, 0), (5, 100), (64, 17), (127, 127), (90, 3)] {
            let expected = buffer.rgb(x, y).map(|value| encoder.tables().level(value) * 4);
            assert_eq!(decoded.rgb(x, y), expected);
        }
    }

    #[test]
    fn test_decode_full_scale() {
        let encoder = Encoder::new(EncoderConfig {
            gamma: 1.0,
            ..EncoderConfig::default()
        });
        let mut buffer = PixelBuffer::new();
        buffer.fill(Color::WHITE);
        let mut schedule = Schedule::new_boxed();
        encoder.encode(&buffer, &mut schedule);
        assert_eq!(encoder.decode(&schedule).pixel(12, 99), Color::new(252, 252, 252));
    }

    #[test]
    fn test_decode_saturates() {
        let encoder = Encoder::default();
        let mut schedule = Schedule::new_boxed();
        for subframe in 0..SUBFRAMES {
            schedule.pixel_mut(subframe, 0, 0).words = [u32::MAX; GPIO_BANKS];
        }
        // all 64 sub-frames on would be 256
        assert_eq!(encoder.decode(&schedule).pixel(0, 0), Color::WHITE);
    }
}
