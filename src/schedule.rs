//! Bit-plane output model replayed by the PRU.
//!
//! The PRU firmware walks a [`Schedule`] in memory order and writes each
//! [`DoublePixel`]'s four words straight to the four GPIO banks. Nothing is
//! transformed on the way out, so the layout here is the wire format.
//!
//! # Memory Layout
//! - [`DoublePixel`]: four `u32` words, one per GPIO bank (16 bytes)
//! - [`DoubleRow`]: one `DoublePixel` per column of a scan row (1 KiB)
//! - [`Frame`]: one `DoubleRow` per row-select value (16 KiB)
//! - [`Schedule`]: one `Frame` per temporal sub-frame (1 MiB)
//! - [`Frameset`]: two schedules, the double-buffered banks (2 MiB)
//!
//! Every type is `#[repr(C)]` and [`Pod`], and the sizes are checked at compile
//! time against what the firmware expects.
//!
//! # Brightness
//! A colour signal is "on" in sub-frame `f` when its bit is set in
//! `Schedule[f]`. Counting the sub-frames in which a bit is set gives the
//! brightness level the encoder chose for it; see [`Schedule::on_count`].

use alloc::boxed::Box;
use core::mem::size_of;

use bitfield::bitfield;
use bytemuck::{Pod, Zeroable};
use embedded_dma::ReadBuffer;

use crate::wiring::{GpioBank, Pin};
use crate::{compute_schedule_size, BANKS, GPIO_BANKS, SCANS, SCAN_WIDTH, SUBFRAMES};

bitfield! {
    /// GPIO bank 1 word carrying the panel control signals.
    ///
    /// The bit layout is as follows:
    /// - Bit 29: Latch (driven by firmware)
    /// - Bit 28: Output enable (driven by firmware)
    /// - Bit 19: Shift clock (driven by firmware)
    /// - Bits 15-12: Row select
    ///
    /// The remaining bits are free for colour signals.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct ControlWord(u32);
    impl Debug;
    u32;
    pub latch, set_latch: 29;
    pub output_enable, set_output_enable: 28;
    pub clock, set_clock: 19;
    pub row_select, set_row_select: 15, 12;
}

/// The GPIO bank holding the [`ControlWord`].
pub const CONTROL_BANK: GpioBank = GpioBank::Gpio1;

/// Bits of [`CONTROL_BANK`] reserved for control signals.
pub const CONTROL_MASK: u32 = 0x3008_F000;

impl ControlWord {
    /// An all-zero control word.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// A control word selecting `row_select` (taken modulo [`SCANS`]).
    #[must_use]
    pub fn for_row(row_select: usize) -> Self {
        let mut word = Self::new();
        word.set_row_select((row_select % SCANS) as u32);
        word
    }

    /// The raw register value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Output state of every pin for one scan position during one sub-frame.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct DoublePixel {
    /// One word per GPIO bank, indexed by [`GpioBank::index`].
    pub words: [u32; GPIO_BANKS],
}

impl DoublePixel {
    /// A pixel with every pin low.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: [0; GPIO_BANKS],
        }
    }

    /// The word for one GPIO bank.
    #[inline]
    #[must_use]
    pub fn word(&self, bank: GpioBank) -> u32 {
        self.words[bank.index()]
    }

    /// Drives `pin` high.
    #[inline]
    pub fn set(&mut self, pin: Pin) {
        self.words[pin.bank.index()] |= pin.mask();
    }

    /// Whether `pin` is high.
    #[inline]
    #[must_use]
    pub fn is_set(&self, pin: Pin) -> bool {
        self.words[pin.bank.index()] & pin.mask() != 0
    }

    /// The control signals carried in [`CONTROL_BANK`].
    #[must_use]
    pub fn control(&self) -> ControlWord {
        ControlWord(self.word(CONTROL_BANK) & CONTROL_MASK)
    }

    /// The words with control bits cleared, leaving only colour signals.
    #[must_use]
    pub fn color_words(&self) -> [u32; GPIO_BANKS] {
        let mut words = self.words;
        words[CONTROL_BANK.index()] &= !CONTROL_MASK;
        words
    }
}

impl core::fmt::Debug for DoublePixel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "DoublePixel[{:#010x}, {:#010x}, {:#010x}, {:#010x}]",
            self.words[0], self.words[1], self.words[2], self.words[3]
        )
    }
}

/// One row-select group: a [`DoublePixel`] per column.
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DoubleRow {
    pixels: [DoublePixel; SCAN_WIDTH],
}

impl DoubleRow {
    /// The pixel at `column`.
    #[inline]
    #[must_use]
    pub fn pixel(&self, column: usize) -> &DoublePixel {
        &self.pixels[column]
    }

    /// Mutable access to the pixel at `column`.
    #[inline]
    pub fn pixel_mut(&mut self, column: usize) -> &mut DoublePixel {
        &mut self.pixels[column]
    }

    /// All pixels in column order.
    #[must_use]
    pub fn pixels(&self) -> &[DoublePixel; SCAN_WIDTH] {
        &self.pixels
    }
}

/// One temporal sub-frame: a [`DoubleRow`] per row-select value.
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Frame {
    rows: [DoubleRow; SCANS],
}

impl Frame {
    /// The row group for `row_select`.
    #[inline]
    #[must_use]
    pub fn row(&self, row_select: usize) -> &DoubleRow {
        &self.rows[row_select]
    }

    /// Mutable access to the row group for `row_select`.
    #[inline]
    pub fn row_mut(&mut self, row_select: usize) -> &mut DoubleRow {
        &mut self.rows[row_select]
    }
}

/// The 64 sub-frames whose cumulative on-time encodes a 6-bit level per
/// colour signal.
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Schedule {
    frames: [Frame; SUBFRAMES],
}

impl Schedule {
    /// A zeroed schedule allocated directly on the heap.
    #[must_use]
    pub fn new_boxed() -> Box<Self> {
        bytemuck::zeroed_box()
    }

    /// Drive every pin low in every sub-frame.
    pub fn clear(&mut self) {
        bytemuck::bytes_of_mut(self).fill(0);
    }

    /// The sub-frame `subframe`.
    #[inline]
    #[must_use]
    pub fn frame(&self, subframe: usize) -> &Frame {
        &self.frames[subframe]
    }

    /// Mutable access to sub-frame `subframe`.
    #[inline]
    pub fn frame_mut(&mut self, subframe: usize) -> &mut Frame {
        &mut self.frames[subframe]
    }

    /// The pixel at a scan position during one sub-frame.
    #[inline]
    #[must_use]
    pub fn pixel(&self, subframe: usize, row_select: usize, column: usize) -> &DoublePixel {
        self.frames[subframe].rows[row_select].pixel(column)
    }

    /// Mutable access to the pixel at a scan position during one sub-frame.
    #[inline]
    pub fn pixel_mut(
        &mut self,
        subframe: usize,
        row_select: usize,
        column: usize,
    ) -> &mut DoublePixel {
        self.frames[subframe].rows[row_select].pixel_mut(column)
    }

    /// Number of sub-frames in which `pin` is high at a scan position.
    #[must_use]
    pub fn on_count(&self, row_select: usize, column: usize, pin: Pin) -> u32 {
        self.frames
            .iter()
            .filter(|frame| frame.rows[row_select].pixel(column).is_set(pin))
            .count() as u32
    }

    /// The schedule as raw words, in the order the firmware streams them.
    #[must_use]
    pub fn as_words(&self) -> &[u32] {
        bytemuck::cast_slice(core::slice::from_ref(self))
    }
}

impl core::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Schedule")
            .field("size", &size_of::<Self>())
            .field("subframes", &self.frames.len())
            .field("frame_size", &size_of::<Frame>())
            .finish()
    }
}

unsafe impl ReadBuffer for Schedule {
    type Word = u32;

    unsafe fn read_buffer(&self) -> (*const u32, usize) {
        let words = self.as_words();
        (words.as_ptr(), words.len())
    }
}

/// Which of the two [`Frameset`] banks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Bank {
    /// Bank 0.
    Zero = 0,
    /// Bank 1.
    One = 1,
}

impl Bank {
    /// Interpret a control block value. Only the low bit is significant, as
    /// in the firmware.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        if raw % 2 == 0 {
            Bank::Zero
        } else {
            Bank::One
        }
    }

    /// The value stored in the control block.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Index into [`Frameset`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The complementary bank.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Bank::Zero => Bank::One,
            Bank::One => Bank::Zero,
        }
    }
}

/// The two double-buffered schedules, exactly as laid out in the PRU carveout.
#[derive(Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Frameset {
    banks: [Schedule; BANKS],
}

impl Frameset {
    /// A zeroed frameset allocated directly on the heap.
    #[must_use]
    pub fn new_boxed() -> Box<Self> {
        bytemuck::zeroed_box()
    }

    /// One bank.
    #[must_use]
    pub fn bank(&self, bank: Bank) -> &Schedule {
        &self.banks[bank.index()]
    }

    /// Mutable access to one bank.
    pub fn bank_mut(&mut self, bank: Bank) -> &mut Schedule {
        &mut self.banks[bank.index()]
    }
}

impl core::fmt::Debug for Frameset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Frameset")
            .field("size", &size_of::<Self>())
            .field("banks", &self.banks.len())
            .finish()
    }
}

const _: () = assert!(size_of::<DoublePixel>() == 16);
const _: () = assert!(size_of::<DoubleRow>() == 1 << 10);
const _: () = assert!(size_of::<Frame>() == 1 << 14);
const _: () = assert!(size_of::<Schedule>() == compute_schedule_size(SUBFRAMES, SCANS, SCAN_WIDTH));
const _: () = assert!(size_of::<Frameset>() == 1 << 21);
