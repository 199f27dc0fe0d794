//! Temporal-dither encoder and PRU double-buffer handoff for HUB75 LED panels.
//!
//! ## How the panels are driven
//!
//! HUB75 panels are scanned shift registers. Each connector carries two RGB
//! triples (**R1 G1 B1** for the upper rows, **R2 G2 B2** for the lower), a
//! shift clock, a latch, an output enable and the row-address lines. Only one
//! row group is lit at a time; the controller shifts the next row's colour
//! bits in while the current one is shown, blanks, changes the address,
//! latches, and un-blanks.
//!
//! On the BeagleBone the shifting is done by a PRU running fixed firmware. It
//! owns the clock, latch and output-enable lines and drives every colour pin
//! of all eight connectors of the Octoscroller cape in parallel, writing four
//! GPIO bank words per pixel clock. Its input is a [`schedule::Schedule`]:
//! the exact GPIO words to emit, in order.
//!
//! ## Brightness by temporal dithering
//!
//! A GPIO line is either on or off, so brightness comes from time. A schedule
//! holds 64 sub-frames. The [`encoder`] quantises each 8-bit channel through
//! a gamma curve to a 6-bit level `L` and turns the pin on in `L` of the 64
//! sub-frames, spread as evenly as possible so the eye sees steady light
//! instead of flicker (see [`tables`]). Unlike binary code modulation every
//! sub-frame has the same duration.
//!
//! ## Double buffering
//!
//! The firmware replays one of two schedules, the banks of a
//! [`schedule::Frameset`], continuously. The host fills the other bank and
//! publishes it through two fields of the shared [`control::ControlBlock`];
//! the firmware switches at the next bank boundary. [`sync`] implements the
//! host side of that protocol. No locks, no torn frames, and the firmware
//! never waits for the host.
//!
//! ## Modules
//!
//! - [`tables`]: gamma and dither lookup tables
//! - [`wiring`]: which GPIO pin carries which colour signal
//! - [`layout`]: which image pixel each scan position shows
//! - [`schedule`]: the in-memory output format
//! - [`buffer`]: the RGBA input image, an `embedded-graphics` draw target
//! - [`encoder`]: image to schedule, and back for inspection
//! - [`control`]: the shared control block
//! - [`sync`]: the bank handoff
//! - [`render`]: the draw/encode/publish loop and throughput monitor
//! - `bridge` (`std`): handshake with the firmware and `/dev/mem` mapping
//! - `offline` (`std`): a heap frameset and a simulated coprocessor
//!
//! ## Available Feature Flags
//!
//! ### `std` Feature
//! Enables the shared-memory bridge, the offline simulator, the throughput
//! monitor, and a waiting loop that yields to the scheduler instead of
//! spinning. Without it the crate needs only `alloc`.
//!
//! ### `cli` Feature (enabled by default)
//! Builds the `hub75-pru` binary. Implies `std`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

extern crate alloc;

use embedded_graphics::pixelcolor::Rgb888;

pub mod buffer;
pub mod control;
pub mod encoder;
pub mod layout;
pub mod render;
pub mod schedule;
pub mod sync;
pub mod tables;
pub mod wiring;

#[cfg(feature = "std")]
pub mod bridge;
#[cfg(feature = "std")]
pub mod offline;

/// Color type used in the pixel buffer
pub type Color = Rgb888;

/// Image width in pixels.
pub const WIDTH: usize = 128;

/// Image height in pixels.
pub const HEIGHT: usize = 128;

/// Bits of brightness per colour channel after quantisation.
pub const BITS: u8 = 6;

/// Temporal sub-frames per schedule.
pub const SUBFRAMES: usize = compute_levels(BITS);

/// Row-select values, the panels being 1/16 scan.
pub const SCANS: usize = 16;

/// Columns shifted out per row select.
pub const SCAN_WIDTH: usize = 64;

/// GPIO banks written per pixel clock.
pub const GPIO_BANKS: usize = 4;

/// Banks in a frameset.
pub const BANKS: usize = 2;

/// Outputs: two RGB triples on each of eight connectors.
pub const OUTPUTS: usize = 16;

/// Computes the number of brightness levels for a given bit depth
///
/// # Arguments
///
/// * `bits` - Number of bits per color channel
///
/// # Returns
///
/// Number of levels, which is also the number of equal-length sub-frames
/// needed to show every level by temporal dithering
#[must_use]
pub const fn compute_levels(bits: u8) -> usize {
    1usize << bits
}

/// Computes the size in bytes of one schedule
///
/// # Arguments
///
/// * `subframes` - Temporal sub-frames per schedule
/// * `scans` - Row-select values per sub-frame
/// * `scan_width` - Columns per row select
///
/// # Returns
///
/// Bytes needed when every scan position carries one `u32` per GPIO bank
#[must_use]
pub const fn compute_schedule_size(subframes: usize, scans: usize, scan_width: usize) -> usize {
    subframes * scans * scan_width * GPIO_BANKS * core::mem::size_of::<u32>()
}

const _: () = assert!(OUTPUTS * SCANS * SCAN_WIDTH == WIDTH * HEIGHT);

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embedded_graphics::pixelcolor::RgbColor;

    #[test]
    fn test_compute_levels() {
        assert_eq!(compute_levels(1), 2);
        assert_eq!(compute_levels(4), 16);
        assert_eq!(compute_levels(6), 64);
        assert_eq!(compute_levels(8), 256);
        assert_eq!(SUBFRAMES, 64);
        assert_eq!(SUBFRAMES, tables::LEVELS);
    }

    #[test]
    fn test_compute_schedule_size() {
        assert_eq!(compute_schedule_size(SUBFRAMES, SCANS, SCAN_WIDTH), 1 << 20);
        assert_eq!(compute_schedule_size(1, 1, SCAN_WIDTH), 1 << 10);
        assert_eq!(compute_schedule_size(1, SCANS, SCAN_WIDTH), 1 << 14);
        assert_eq!(
            compute_schedule_size(SUBFRAMES, SCANS, SCAN_WIDTH),
            core::mem::size_of::<schedule::Schedule>()
        );
    }

    #[test]
    fn test_geometry_covers_image() {
        assert_eq!(OUTPUTS * SCANS * SCAN_WIDTH, WIDTH * HEIGHT);
        assert_eq!(OUTPUTS, 2 * wiring::Connector::ALL.len());
    }

    #[test]
    fn test_color_type_alias() {
        let red_color: Color = Color::RED;
        let red_rgb888: Rgb888 = Rgb888::RED;

        assert_eq!(red_color, red_rgb888);
        assert_eq!(red_color.r(), 255);
        assert_eq!(red_color.g(), 0);
        assert_eq!(red_color.b(), 0);
    }

    #[test]
    fn test_helper_functions_const() {
        const LEVELS: usize = compute_levels(BITS);
        const SIZE: usize = compute_schedule_size(LEVELS, SCANS, SCAN_WIDTH);

        assert_eq!(LEVELS, 64);
        assert_eq!(SIZE, 1_048_576);
    }
}
