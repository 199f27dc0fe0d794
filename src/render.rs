//! Render loop and throughput monitor.
//!
//! Each pass draws the next image, waits for the free bank, encodes into it
//! and publishes it. The only blocking point is the wait for the free bank.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use crate::buffer::PixelBuffer;
use crate::encoder::Encoder;
use crate::layout::{Octoscroller, ScanLayout};
use crate::schedule::Bank;
use crate::sync::BankSynchronizer;

/// Something that produces images.
pub trait PatternSource {
    /// Draw the next image into `buffer`.
    ///
    /// The buffer still holds the previous image.
    fn next_frame(&mut self, buffer: &mut PixelBuffer);
}

impl<F> PatternSource for F
where
    F: FnMut(&mut PixelBuffer),
{
    fn next_frame(&mut self, buffer: &mut PixelBuffer) {
        self(buffer);
    }
}

/// Drives a [`PatternSource`] into the free bank, pass after pass.
pub struct RenderLoop<'a, P, L: ScanLayout = Octoscroller> {
    sync: BankSynchronizer<'a>,
    encoder: Encoder<L>,
    source: P,
    buffer: PixelBuffer,
    frames: u64,
}

impl<'a, P: PatternSource, L: ScanLayout> RenderLoop<'a, P, L> {
    /// Start with a black image and nothing published.
    #[must_use]
    pub fn new(sync: BankSynchronizer<'a>, encoder: Encoder<L>, source: P) -> Self {
        Self {
            sync,
            encoder,
            source,
            buffer: PixelBuffer::new(),
            frames: 0,
        }
    }

    /// One pass: draw, wait, encode, publish. Returns the bank published.
    pub fn step(&mut self) -> Bank {
        self.source.next_frame(&mut self.buffer);

        let mut bank = self.sync.acquire();
        self.encoder.encode(&self.buffer, bank.schedule_mut());
        let published = bank.bank();
        bank.publish();

        self.frames += 1;
        published
    }

    /// Step until `stop` is set or `limit` passes have been published.
    ///
    /// `stop` is checked before each pass. On return the firmware keeps
    /// replaying whatever was published last. Returns the total number of
    /// passes published by this loop.
    pub fn run(&mut self, stop: &AtomicBool, limit: Option<u64>) -> u64 {
        while !stop.load(Ordering::Acquire) && limit.is_none_or(|limit| self.frames < limit) {
            self.step();
        }
        self.frames
    }

    /// Passes published so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The most recently drawn image.
    #[must_use]
    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }
}

impl<P, L: ScanLayout> core::fmt::Debug for RenderLoop<'_, P, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

/// Sub-frames per second between two samples of `frame_count`.
///
/// The counter is 32 bits and wraps, so the difference is taken modulo 2^32.
#[must_use]
pub fn frame_rate(before: u32, after: u32, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    f64::from(after.wrapping_sub(before)) / elapsed.as_secs_f64()
}

/// Default interval between throughput reports.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Log frames/sec and the ready bank every `interval` until `stop` is set.
#[cfg(feature = "std")]
pub fn monitor_throughput(
    control: &crate::control::ControlBlock,
    interval: Duration,
    stop: &AtomicBool,
) {
    use std::time::Instant;

    const SLICE: Duration = Duration::from_millis(100);

    let mut before = control.frame_count();
    let mut last = Instant::now();
    while !stop.load(Ordering::Acquire) {
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep((interval - elapsed).min(SLICE));
            continue;
        }

        let now = Instant::now();
        let after = control.frame_count();
        log::info!(
            "frames/sec {:.1} bank {}",
            frame_rate(before, after, now - last),
            control.ready_bank()
        );
        before = after;
        last = now;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use embedded_graphics::prelude::*;

    use super::*;
    use crate::control::ControlBlock;
    use crate::schedule::Frameset;
    use crate::sync::FramesetHandle;
    use crate::Color;

    #[test]
    fn test_frame_rate() {
        assert_eq!(frame_rate(100, 740, Duration::from_secs(10)), 64.0);
        assert_eq!(frame_rate(0, 10, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_frame_rate_wraps() {
        assert_eq!(frame_rate(u32::MAX - 9, 10, Duration::from_secs(2)), 10.0);
    }

    #[test]
    fn test_step_publishes_encoded_bank() {
        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        let sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
        let encoder = Encoder::default();
        let source = |buffer: &mut PixelBuffer| buffer.set_pixel(Point::new(0, 0), Color::WHITE);

        let mut render = RenderLoop::new(sync, encoder, source);
        assert_eq!(render.step(), Bank::One);
        assert_eq!(render.frames(), 1);
        assert_eq!(render.buffer().pixel(0, 0), Color::WHITE);
        drop(render);

        assert_eq!(control.ready_bank(), 1);
        let red = crate::wiring::WiringMap::octoscroller().pin(0, crate::wiring::Channel::Red);
        assert_eq!(frameset.bank(Bank::One).on_count(0, 0, red), 63);
        assert_eq!(frameset.bank(Bank::Zero).on_count(0, 0, red), 0);
    }

    #[test]
    fn test_run_honours_stop_flag() {
        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        let sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
        let mut render = RenderLoop::new(sync, Encoder::default(), |_: &mut PixelBuffer| {});

        let stop = AtomicBool::new(true);
        assert_eq!(render.run(&stop, None), 0);
        assert_eq!(control.ready_bank(), 0);
    }

    #[test]
    fn test_run_honours_limit() {
        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        let sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
        let mut render = RenderLoop::new(sync, Encoder::default(), |_: &mut PixelBuffer| {});

        // no firmware here, so only the first pass can complete
        let stop = AtomicBool::new(false);
        assert_eq!(render.run(&stop, Some(1)), 1);
        assert_eq!(control.ready_bank(), 1);
    }
}
