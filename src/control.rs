//! The control block shared with the PRU firmware.
//!
//! Six little-endian `u32` fields in a fixed order. The firmware fills in the
//! frameset location at start-up and then owns `frame_count`, `dma_wait` and
//! `start_bank`; the host owns `ready_bank`. All fields are atomics because
//! both sides touch the same memory concurrently.

use core::mem::{offset_of, size_of};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::schedule::{Bank, Frameset};

/// Shared control record.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ControlBlock {
    framebufs_addr: AtomicU32,
    framebufs_size: AtomicU32,
    frame_count: AtomicU32,
    dma_wait: AtomicU32,
    ready_bank: AtomicU32,
    start_bank: AtomicU32,
}

const _: () = assert!(size_of::<ControlBlock>() == 24);
const _: () = assert!(offset_of!(ControlBlock, ready_bank) == 16);
const _: () = assert!(offset_of!(ControlBlock, start_bank) == 20);

impl ControlBlock {
    /// A zeroed block: bank 0 ready and being replayed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            framebufs_addr: AtomicU32::new(0),
            framebufs_size: AtomicU32::new(0),
            frame_count: AtomicU32::new(0),
            dma_wait: AtomicU32::new(0),
            ready_bank: AtomicU32::new(0),
            start_bank: AtomicU32::new(0),
        }
    }

    /// A block describing a frameset at physical address `addr`, as the
    /// firmware leaves it after start-up.
    #[must_use]
    pub const fn describing(addr: u32) -> Self {
        Self {
            framebufs_addr: AtomicU32::new(addr),
            framebufs_size: AtomicU32::new(size_of::<Frameset>() as u32),
            frame_count: AtomicU32::new(0),
            dma_wait: AtomicU32::new(0),
            ready_bank: AtomicU32::new(0),
            start_bank: AtomicU32::new(0),
        }
    }

    /// Physical address of the frameset.
    pub fn framebufs_addr(&self) -> u32 {
        self.framebufs_addr.load(Ordering::Acquire)
    }

    /// Size of the frameset in bytes as reported by the firmware.
    pub fn framebufs_size(&self) -> u32 {
        self.framebufs_size.load(Ordering::Acquire)
    }

    /// Sub-frames replayed since start-up. Wraps.
    pub fn frame_count(&self) -> u32 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Firmware cycles spent waiting on DMA, a diagnostic counter.
    pub fn dma_wait(&self) -> u32 {
        self.dma_wait.load(Ordering::Relaxed)
    }

    /// Raw `ready_bank`, the last bank the host published.
    pub fn ready_bank(&self) -> u32 {
        self.ready_bank.load(Ordering::Acquire)
    }

    /// Raw `start_bank`, the bank the firmware is replaying.
    pub fn start_bank(&self) -> u32 {
        self.start_bank.load(Ordering::Acquire)
    }

    /// Publish `bank` as the next one to replay.
    pub(crate) fn store_ready(&self, bank: Bank) {
        self.ready_bank.store(bank.raw(), Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn store_ready_raw(&self, raw: u32) {
        self.ready_bank.store(raw, Ordering::Release);
    }

    /// Firmware side: record the bank about to be replayed.
    pub(crate) fn store_start(&self, bank: Bank) {
        self.start_bank.store(bank.raw(), Ordering::Release);
    }

    /// Firmware side: count one replayed sub-frame.
    pub(crate) fn count_frame(&self) {
        self.frame_count.fetch_add(1, Ordering::Relaxed);
    }
}
