//! Lock-free bank handoff between the host and the PRU.
//!
//! Two fields of the [`ControlBlock`] carry the whole protocol:
//!
//! - `ready_bank` is written only by the host. It names the bank the
//!   firmware should replay next.
//! - `start_bank` is written only by the firmware. At each bank boundary it
//!   reads `ready_bank` and copies it here before replaying that bank.
//!
//! While the two differ a handoff is pending and the host must not touch
//! either bank: the firmware may still be replaying the old one and is about
//! to start the new one. Once they agree, the firmware owns `ready_bank` and
//! the host is free to fill the other bank and publish it.
//!
//! ```text
//!   host                              firmware
//!   wait_ready()  ── start == ready ──  start = ready   (bank boundary)
//!   encode into ready ^ 1
//!   finish(ready ^ 1) ─ ready = b ──▶  start = b       (next boundary)
//! ```
//!
//! Only a [`WritableBank`] can publish, so `ready_bank` never names a bank
//! the host did not just fill.
//!
//! There is no queue. A host that runs ahead blocks in [`BankSynchronizer::wait_ready`]
//! until the firmware catches up.

use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::control::ControlBlock;
use crate::schedule::{Bank, Frameset, Schedule};

/// Exclusive access to a [`Frameset`] the firmware is also reading.
///
/// Holding a handle does not by itself grant access to either bank; it only
/// becomes a `&mut Schedule` through [`WritableBank`].
pub struct FramesetHandle<'a> {
    ptr: NonNull<Frameset>,
    _marker: PhantomData<&'a mut Frameset>,
}

impl<'a> FramesetHandle<'a> {
    /// Wrap a raw frameset pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of a whole [`Frameset`] for
    /// `'a`, and nothing on the host side may access that memory while the
    /// handle lives.
    #[must_use]
    pub unsafe fn new(ptr: NonNull<Frameset>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    /// Borrow an ordinary heap or stack frameset.
    #[must_use]
    pub fn from_mut(frameset: &'a mut Frameset) -> Self {
        Self {
            ptr: NonNull::from(frameset),
            _marker: PhantomData,
        }
    }

    fn schedule(&self, bank: Bank) -> NonNull<Schedule> {
        // banks are the only field of the repr(C) frameset
        unsafe { self.ptr.cast::<Schedule>().add(bank.index()) }
    }
}

unsafe impl Send for FramesetHandle<'_> {}

impl core::fmt::Debug for FramesetHandle<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("FramesetHandle").field(&self.ptr).finish()
    }
}

/// Somewhere a control block and frameset live together.
///
/// Implemented by the mapped PRU memory and by the in-process offline
/// frameset, so the render loop does not care which one it drives.
pub trait FramesetStorage {
    /// The shared control block and an exclusive handle to the frameset.
    fn split(&mut self) -> (&ControlBlock, FramesetHandle<'_>);
}

/// Host side of the handoff protocol.
#[derive(Debug)]
pub struct BankSynchronizer<'a> {
    control: &'a ControlBlock,
    frameset: FramesetHandle<'a>,
}

impl<'a> BankSynchronizer<'a> {
    /// Synchronize `frameset` through `control`.
    #[must_use]
    pub fn new(control: &'a ControlBlock, frameset: FramesetHandle<'a>) -> Self {
        Self { control, frameset }
    }

    /// Synchronize over any [`FramesetStorage`].
    pub fn from_storage<S: FramesetStorage + ?Sized>(storage: &'a mut S) -> Self {
        let (control, frameset) = storage.split();
        Self::new(control, frameset)
    }

    /// The shared control block.
    #[must_use]
    pub fn control(&self) -> &'a ControlBlock {
        self.control
    }

    /// Block until no handoff is pending and return the bank that is free to
    /// write.
    ///
    /// The returned bank is never the one the firmware is replaying.
    pub fn wait_ready(&self) -> Bank {
        let raw = self.control.ready_bank();
        if raw > 1 {
            log::warn!("ready_bank holds {raw}, using bank {}", raw % 2);
        }
        let ready = Bank::from_raw(raw);
        while Bank::from_raw(self.control.start_bank()) != ready {
            relax();
        }
        ready.other()
    }

    /// Publish `bank` for the firmware to pick up at its next bank boundary.
    ///
    /// `bank` must come from [`BankSynchronizer::wait_ready`] and be fully
    /// written; [`WritableBank::publish`] is the public way in.
    pub(crate) fn finish(&self, bank: Bank) {
        self.control.store_ready(bank);
    }

    /// Wait for the free bank and borrow it for writing.
    pub fn acquire(&mut self) -> WritableBank<'_, 'a> {
        let bank = self.wait_ready();
        WritableBank { sync: self, bank }
    }
}

/// The bank the host may write, borrowed until it is published.
///
/// Dropping it without [`WritableBank::publish`] leaves the firmware on the
/// bank it is already replaying.
#[must_use = "a bank that is not published is never displayed"]
#[derive(Debug)]
pub struct WritableBank<'s, 'a> {
    sync: &'s mut BankSynchronizer<'a>,
    bank: Bank,
}

impl WritableBank<'_, '_> {
    /// Which bank this is.
    #[must_use]
    pub fn bank(&self) -> Bank {
        self.bank
    }

    /// The schedule, read-only.
    #[must_use]
    pub fn schedule(&self) -> &Schedule {
        // the firmware is not reading this bank until it is published
        unsafe { self.sync.frameset.schedule(self.bank).as_ref() }
    }

    /// The schedule, for encoding into.
    pub fn schedule_mut(&mut self) -> &mut Schedule {
        unsafe { self.sync.frameset.schedule(self.bank).as_mut() }
    }

    /// Hand the bank to the firmware.
    pub fn publish(self) {
        self.sync.finish(self.bank);
    }
}

#[inline]
fn relax() {
    #[cfg(feature = "std")]
    std::thread::yield_now();
    #[cfg(not(feature = "std"))]
    core::hint::spin_loop();
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_initial_state_offers_bank_one() {
        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        let sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
        assert_eq!(sync.wait_ready(), Bank::One);
    }

    #[test]
    fn test_finish_publishes() {
        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        let sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
        sync.finish(Bank::One);
        assert_eq!(control.ready_bank(), 1);

        // firmware picks it up
        control.store_start(Bank::One);
        assert_eq!(sync.wait_ready(), Bank::Zero);
    }

    #[test]
    fn test_acquire_never_offers_committed_bank() {
        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        let mut sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));

        for _ in 0..4 {
            let bank = sync.acquire();
            let written = bank.bank();
            assert_ne!(written, Bank::from_raw(control.start_bank()));
            bank.publish();

            // firmware commits to the published bank at its next boundary
            assert_eq!(Bank::from_raw(control.ready_bank()), written);
            control.store_start(written);
            assert_eq!(sync.wait_ready(), written.other());
        }
    }

    #[test]
    fn test_out_of_range_ready_bank_uses_low_bit() {
        let control = ControlBlock::new();
        control.store_ready_raw(3);
        control.store_start(Bank::One);
        let mut frameset = Frameset::new_boxed();
        let sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
        assert_eq!(sync.wait_ready(), Bank::Zero);
    }

    #[test]
    fn test_acquire_writes_free_bank_only() {
        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        {
            let mut sync =
                BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
            let mut bank = sync.acquire();
            assert_eq!(bank.bank(), Bank::One);
            bank.schedule_mut().pixel_mut(1, 2, 3).words[0] = 0xabcd;
            assert_eq!(bank.schedule().pixel(1, 2, 3).words[0], 0xabcd);
            bank.publish();
        }
        assert_eq!(control.ready_bank(), 1);
        assert_eq!(frameset.bank(Bank::One).pixel(1, 2, 3).words[0], 0xabcd);
        assert_eq!(frameset.bank(Bank::Zero).pixel(1, 2, 3).words[0], 0);
    }

    #[test]
    fn test_dropped_bank_is_not_published() {
        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        let mut sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
        let bank = sync.acquire();
        drop(bank);
        assert_eq!(control.ready_bank(), 0);
    }

    #[test]
    fn test_wait_ready_blocks_until_firmware_catches_up() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;
        use std::time::Duration;

        let control = ControlBlock::new();
        let mut frameset = Frameset::new_boxed();
        let sync = BankSynchronizer::new(&control, FramesetHandle::from_mut(&mut frameset));
        sync.finish(Bank::One);

        let started = AtomicBool::new(false);
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                started.store(true, Ordering::SeqCst);
                control.store_start(Bank::One);
            });
            let bank = sync.wait_ready();
            assert!(started.load(Ordering::SeqCst));
            assert_eq!(bank, Bank::Zero);
        });
    }
}
