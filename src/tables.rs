//! Brightness lookup tables used by the temporal-dither encoder.
//!
//! Two tables are built once at start-up and never change:
//!
//! - a 256-entry gamma table quantising an 8-bit channel value to one of
//!   [`LEVELS`] brightness levels, and
//! - a [`LEVELS`]-entry dither table mapping a level `L` to a 64-bit
//!   [`BrightnessMask`] with exactly `L` bits set.
//!
//! Bit `f` of a mask says whether the LED is lit during temporal sub-frame `f`.
//! Spreading the set bits as evenly as possible keeps the "on" sub-frames from
//! clustering, which is what makes the dithering read as steady brightness
//! rather than flicker.

use libm::{pow, round};

use crate::{compute_levels, BITS};

/// Number of brightness levels, one per sub-frame.
pub const LEVELS: usize = compute_levels(BITS);

const _: () = assert!(LEVELS <= BrightnessMask::BITS as usize);

/// Gamma of the panels on the Octoscroller cape.
pub const DEVICE_GAMMA: f64 = 2.3;

/// One bit per temporal sub-frame; set bits are "on".
pub type BrightnessMask = u64;

/// Builds the gamma quantisation table.
///
/// Each input `v` maps to `round(255 * (v / 255)^gamma) >> 2`, a level in
/// `0..LEVELS`.
#[must_use]
pub fn build_gamma_table(gamma: f64) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (value, level) in table.iter_mut().enumerate() {
        let linear = pow(value as f64 / 255.0, gamma);
        *level = (round(255.0 * linear) as u8) >> 2;
    }
    table
}

/// Builds the dither table.
///
/// Level 0 is all-off. Level `L > 0` sets bit `floor(i * 64 / L)` for each
/// `i` in `0..L`; the stride is at least one so the positions are distinct.
#[must_use]
pub const fn build_dither_table() -> [BrightnessMask; LEVELS] {
    let mut table = [0; LEVELS];
    let mut level = 1;
    while level < LEVELS {
        let mut mask = 0u64;
        let mut i = 0;
        while i < level {
            mask |= 1u64 << (i * LEVELS / level);
            i += 1;
        }
        table[level] = mask;
        level += 1;
    }
    table
}

/// The dither table, evaluated at compile time.
pub const DITHER_TABLE: [BrightnessMask; LEVELS] = build_dither_table();

const _: () = {
    let mut level = 0;
    while level < LEVELS {
        assert!(DITHER_TABLE[level].count_ones() as usize == level);
        level += 1;
    }
};

/// Gamma and dither tables bundled for the encoder.
#[derive(Clone, PartialEq, Eq)]
pub struct DitherTables {
    gamma: [u8; 256],
    masks: [BrightnessMask; LEVELS],
}

impl DitherTables {
    /// Builds both tables for the given gamma.
    #[must_use]
    pub fn new(gamma: f64) -> Self {
        Self {
            gamma: build_gamma_table(gamma),
            masks: DITHER_TABLE,
        }
    }

    /// Quantised level for an 8-bit channel value.
    #[inline]
    #[must_use]
    pub fn level(&self, value: u8) -> u8 {
        self.gamma[value as usize]
    }

    /// Mask for a level. Levels are always below [`LEVELS`].
    #[inline]
    #[must_use]
    pub fn mask(&self, level: u8) -> BrightnessMask {
        self.masks[level as usize & (LEVELS - 1)]
    }

    /// Mask for an 8-bit channel value.
    #[inline]
    #[must_use]
    pub fn mask_for(&self, value: u8) -> BrightnessMask {
        self.mask(self.level(value))
    }

    /// The gamma table.
    #[must_use]
    pub fn gamma_table(&self) -> &[u8; 256] {
        &self.gamma
    }
}

impl Default for DitherTables {
    fn default() -> Self {
        Self::new(DEVICE_GAMMA)
    }
}

impl core::fmt::Debug for DitherTables {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DitherTables")
            .field("levels", &LEVELS)
            .field("max_level", &self.gamma[255])
            .finish_non_exhaustive()
    }
}
