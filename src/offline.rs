//! A frameset on the heap and a stand-in for the PRU that replays it.
//!
//! [`OfflineFrameset`] plays the role of the reserved memory region: a
//! [`ControlBlock`] plus a 2 MiB [`Frameset`]. [`CoprocessorSim`] walks it the
//! way the firmware does, one bank at a time, copying each frame in 4 KiB
//! parts into a pair of local buffers, and follows the same rules for
//! `start_bank` and `ready_bank`. Together they let the render loop and the
//! handoff protocol run without the hardware.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_dma::ReadBuffer;

use crate::control::ControlBlock;
use crate::schedule::{Bank, Frame, Frameset, Schedule};
use crate::sync::{FramesetHandle, FramesetStorage};

/// Bytes moved per firmware transfer.
pub const PART_BYTES: usize = 1 << 12;

/// Words moved per firmware transfer.
pub const PART_WORDS: usize = PART_BYTES / core::mem::size_of::<u32>();

const FRAME_WORDS: usize = core::mem::size_of::<Frame>() / core::mem::size_of::<u32>();

const _: () = assert!(FRAME_WORDS % PART_WORDS == 0);

struct Shared {
    control: ControlBlock,
    frames: NonNull<Frameset>,
}

// The frameset is only written through a `FramesetHandle`, which the handoff
// protocol keeps off the bank the simulator is reading.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    /// One bank, read-only.
    ///
    /// # Safety
    ///
    /// The host must not be writing `bank`.
    unsafe fn bank(&self, bank: Bank) -> &Schedule {
        unsafe { self.frames.cast::<Schedule>().add(bank.index()).as_ref() }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.frames.as_ptr()) });
    }
}

/// A heap-allocated frameset with its own control block.
pub struct OfflineFrameset {
    shared: Arc<Shared>,
}

impl OfflineFrameset {
    /// A zeroed frameset, both banks dark, bank 0 ready and replaying.
    #[must_use]
    pub fn new() -> Self {
        let frames = NonNull::from(Box::leak(Frameset::new_boxed()));
        Self {
            shared: Arc::new(Shared {
                control: ControlBlock::describing(0),
                frames,
            }),
        }
    }

    /// The control block.
    #[must_use]
    pub fn control(&self) -> &ControlBlock {
        &self.shared.control
    }

    /// A bank, read-only.
    ///
    /// The borrow keeps the host from writing while it lives; the simulator
    /// only ever reads.
    #[must_use]
    pub fn bank(&self, bank: Bank) -> &Schedule {
        unsafe { self.shared.bank(bank) }
    }

    /// A simulated coprocessor replaying this frameset.
    #[must_use]
    pub fn coprocessor(&self) -> CoprocessorSim {
        CoprocessorSim::new(Arc::clone(&self.shared))
    }
}

impl Default for OfflineFrameset {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for OfflineFrameset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OfflineFrameset")
            .field("control", &self.shared.control)
            .finish_non_exhaustive()
    }
}

impl FramesetStorage for OfflineFrameset {
    fn split(&mut self) -> (&ControlBlock, FramesetHandle<'_>) {
        let handle = unsafe { FramesetHandle::new(self.shared.frames) };
        (&self.shared.control, handle)
    }
}

/// Counters kept by a [`CoprocessorSim`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Banks replayed from start to end.
    pub banks: u64,
    /// Banks whose contents changed while they were being replayed.
    pub torn: u64,
    /// Bank switches observed at bank boundaries.
    pub switches: u64,
}

/// In-process model of the firmware's replay loop.
pub struct CoprocessorSim {
    shared: Arc<Shared>,
    current: Bank,
    local: Box<[[u32; PART_WORDS]; 2]>,
    pace: Duration,
    stats: SimStats,
}

impl CoprocessorSim {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            current: Bank::Zero,
            local: Box::new([[0; PART_WORDS]; 2]),
            pace: Duration::ZERO,
            stats: SimStats::default(),
        }
    }

    /// Spend at least `pace` replaying each bank.
    #[must_use]
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// The bank the next call to [`CoprocessorSim::replay_bank`] will replay.
    #[must_use]
    pub fn current(&self) -> Bank {
        self.current
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Replay one bank from frame 0 to frame 63, then pick the next bank.
    ///
    /// Returns the bank that was replayed.
    pub fn replay_bank(&mut self) -> Bank {
        let bank = self.current;
        let control = &self.shared.control;
        control.store_start(bank);

        // the handoff protocol keeps the host off the bank named by start_bank
        let schedule = unsafe { self.shared.bank(bank) };
        let (ptr, len) = unsafe { schedule.read_buffer() };
        let words = unsafe { core::slice::from_raw_parts(ptr, len) };

        let mut seen = Fingerprint::default();
        for frame in words.chunks_exact(FRAME_WORDS) {
            for (index, part) in frame.chunks_exact(PART_WORDS).enumerate() {
                let local = &mut self.local[index % 2];
                local.copy_from_slice(part);
                seen.update(local);
            }
            control.count_frame();
        }
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }

        let mut after = Fingerprint::default();
        for part in words.chunks_exact(PART_WORDS) {
            after.update(part);
        }
        if seen != after {
            log::warn!("bank {} changed while it was being replayed", bank.index());
            self.stats.torn += 1;
        }

        self.stats.banks += 1;
        self.current = Bank::from_raw(control.ready_bank());
        if self.current != bank {
            self.stats.switches += 1;
        }
        bank
    }

    /// Replay banks on a new thread until `stop` is set.
    pub fn spawn(mut self, stop: Arc<AtomicBool>) -> JoinHandle<SimStats> {
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                self.replay_bank();
            }
            self.stats
        })
    }
}

impl core::fmt::Debug for CoprocessorSim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoprocessorSim")
            .field("current", &self.current)
            .field("pace", &self.pace)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// FNV-1a over the words of a bank.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Fingerprint(u64);

impl Default for Fingerprint {
    fn default() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }
}

impl Fingerprint {
    fn update(&mut self, words: &[u32]) {
        for &word in words {
            self.0 ^= u64::from(word);
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
}
