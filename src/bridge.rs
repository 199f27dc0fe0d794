//! Shared-memory bridge to the PRU.
//!
//! Start-up is a two-step exchange. The host writes a short wake-up message
//! to the remoteproc messaging device; the firmware answers with the 4-byte
//! little-endian physical address of its [`ControlBlock`]. The host maps the
//! control block from physical memory, reads where the frameset lives and how
//! big the firmware thinks it is, and maps that too once the size matches
//! [`Frameset`].
//!
//! The messaging device is any `Read + Write` and physical memory is a
//! [`PhysicalMemory`], so the exchange can be driven against mocks.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};
use memmap2::{MmapMut, MmapOptions};

use crate::control::ControlBlock;
use crate::schedule::Frameset;
use crate::sync::{FramesetHandle, FramesetStorage};

/// Messaging device exposed by the PRU0 firmware.
pub const DEFAULT_DEVICE: &str = "/dev/rpmsg_pru30";

/// Physical memory device.
pub const DEFAULT_MEMORY: &str = "/dev/mem";

/// Payload that prompts the firmware to report its control block.
pub const DEFAULT_HANDSHAKE: &[u8] = b"wakeup";

/// Largest reply the firmware sends in one message.
const REPLY_CAPACITY: usize = 32;

/// Where to find the firmware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Messaging device path.
    pub device: PathBuf,
    /// Physical memory device path.
    pub memory: PathBuf,
    /// Wake-up payload.
    pub handshake: Vec<u8>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            memory: PathBuf::from(DEFAULT_MEMORY),
            handshake: DEFAULT_HANDSHAKE.to_vec(),
        }
    }
}

/// Failure to establish the bridge. None of these are retried.
#[derive(Debug, Display, Error)]
pub enum BridgeError {
    /// A device could not be opened.
    #[display("cannot open {}: {source}", path.display())]
    Open {
        /// Device path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Writing the wake-up payload failed.
    #[display("handshake write failed: {source}")]
    Write {
        /// Underlying error.
        source: io::Error,
    },
    /// The wake-up payload was only partly written.
    #[display("short handshake write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted.
        written: usize,
        /// Payload length.
        expected: usize,
    },
    /// Reading the reply failed.
    #[display("handshake read failed: {source}")]
    Read {
        /// Underlying error.
        source: io::Error,
    },
    /// The reply was not a 4-byte address.
    #[display("expected a 4-byte control block address, got {read} bytes")]
    ShortRead {
        /// Bytes in the reply.
        read: usize,
    },
    /// Mapping physical memory failed.
    #[display("cannot map {len} bytes at {addr:#010x}: {source}")]
    Map {
        /// Physical address.
        addr: u64,
        /// Length requested.
        len: usize,
        /// Underlying error.
        source: io::Error,
    },
    /// A mapping cannot hold the shared type at its address.
    #[display("mapping at {addr:#010x} is not suitably aligned")]
    Misaligned {
        /// Physical address.
        addr: u64,
    },
    /// The firmware's layout differs from this build's.
    #[display("frameset size mismatch: firmware has {actual} bytes, expected {expected}")]
    LayoutMismatch {
        /// Bytes this build expects.
        expected: usize,
        /// Bytes the firmware reported.
        actual: usize,
    },
}

/// A source of physical memory mappings.
pub trait PhysicalMemory {
    /// The mapping type.
    type Region: MappedRegion;

    /// Map `len` bytes of physical memory starting at `addr`, read/write.
    fn map(&self, addr: u64, len: usize) -> io::Result<Self::Region>;
}

/// A live read/write mapping.
///
/// The pointer must stay valid, and not move, for as long as the region
/// exists, including across moves of the region value itself.
pub trait MappedRegion {
    /// Start of the mapping.
    fn as_mut_ptr(&mut self) -> *mut u8;
    /// Length in bytes.
    fn len(&self) -> usize;
    /// Whether the mapping is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MappedRegion for MmapMut {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        <[u8]>::as_mut_ptr(self)
    }

    fn len(&self) -> usize {
        <[u8]>::len(self)
    }
}

/// `/dev/mem` style physical memory.
#[derive(Debug)]
pub struct DevMem {
    file: File,
}

impl DevMem {
    /// Open a physical memory device read/write.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Open`] if the device cannot be opened.
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        let file = open_rw(path)?;
        Ok(Self { file })
    }
}

impl PhysicalMemory for DevMem {
    type Region = MmapMut;

    fn map(&self, addr: u64, len: usize) -> io::Result<MmapMut> {
        // memmap2 rounds the offset down to a page and adjusts the pointer
        unsafe { MmapOptions::new().offset(addr).len(len).map_mut(&self.file) }
    }
}

fn open_rw(path: &Path) -> Result<File, BridgeError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| BridgeError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Send the wake-up payload and read back the control block address.
///
/// # Errors
///
/// I/O errors on either direction, a short write, or a reply that is not
/// exactly four bytes.
pub fn handshake<C: Read + Write>(channel: &mut C, payload: &[u8]) -> Result<u32, BridgeError> {
    let written = channel
        .write(payload)
        .map_err(|source| BridgeError::Write { source })?;
    if written != payload.len() {
        return Err(BridgeError::ShortWrite {
            written,
            expected: payload.len(),
        });
    }

    let mut reply = [0u8; REPLY_CAPACITY];
    let read = channel
        .read(&mut reply)
        .map_err(|source| BridgeError::Read { source })?;
    if read != 4 {
        return Err(BridgeError::ShortRead { read });
    }
    Ok(u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]))
}

/// Mapped control block and frameset.
pub struct Bridge<R: MappedRegion = MmapMut> {
    control: NonNull<ControlBlock>,
    frames: NonNull<Frameset>,
    control_addr: u32,
    frames_addr: u32,
    _control_region: R,
    _frames_region: R,
}

impl Bridge<MmapMut> {
    /// Open the devices named in `config` and establish the bridge.
    ///
    /// # Errors
    ///
    /// Any [`BridgeError`].
    pub fn connect(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let mut channel = open_rw(&config.device)?;
        let memory = DevMem::open(&config.memory)?;
        Self::establish(&mut channel, &memory, &config.handshake)
    }
}

impl<R: MappedRegion> Bridge<R> {
    /// Run the handshake over `channel` and map both regions from `memory`.
    ///
    /// # Errors
    ///
    /// Any [`BridgeError`]. A frameset size other than
    /// `size_of::<Frameset>()` is [`BridgeError::LayoutMismatch`], checked
    /// before the frameset is mapped.
    pub fn establish<C, M>(channel: &mut C, memory: &M, payload: &[u8]) -> Result<Self, BridgeError>
    where
        C: Read + Write,
        M: PhysicalMemory<Region = R>,
    {
        let control_addr = handshake(channel, payload)?;
        log::debug!("control block at {control_addr:#010x}");

        let mut control_region = map(memory, control_addr, size_of::<ControlBlock>())?;
        let control = typed::<ControlBlock, R>(&mut control_region, control_addr)?;

        // SAFETY: typed() checked size and alignment; all fields are atomics
        let block = unsafe { control.as_ref() };
        let frames_addr = block.framebufs_addr();
        let frames_size = block.framebufs_size() as usize;
        log::debug!("frameset at {frames_addr:#010x}, {frames_size} bytes");

        if frames_size != size_of::<Frameset>() {
            return Err(BridgeError::LayoutMismatch {
                expected: size_of::<Frameset>(),
                actual: frames_size,
            });
        }

        let mut frames_region = map(memory, frames_addr, frames_size)?;
        let frames = typed::<Frameset, R>(&mut frames_region, frames_addr)?;

        Ok(Self {
            control,
            frames,
            control_addr,
            frames_addr,
            _control_region: control_region,
            _frames_region: frames_region,
        })
    }

    /// The shared control block.
    #[must_use]
    pub fn control(&self) -> &ControlBlock {
        unsafe { self.control.as_ref() }
    }

    /// Physical address of the control block.
    #[must_use]
    pub fn control_addr(&self) -> u32 {
        self.control_addr
    }

    /// Physical address of the frameset.
    #[must_use]
    pub fn frames_addr(&self) -> u32 {
        self.frames_addr
    }
}

fn map<M: PhysicalMemory>(memory: &M, addr: u32, len: usize) -> Result<M::Region, BridgeError> {
    let addr = u64::from(addr);
    memory
        .map(addr, len)
        .map_err(|source| BridgeError::Map { addr, len, source })
}

fn typed<T, R: MappedRegion>(region: &mut R, addr: u32) -> Result<NonNull<T>, BridgeError> {
    if region.len() < size_of::<T>() {
        return Err(BridgeError::LayoutMismatch {
            expected: size_of::<T>(),
            actual: region.len(),
        });
    }
    let ptr = region.as_mut_ptr();
    if ptr as usize % align_of::<T>() != 0 {
        return Err(BridgeError::Misaligned {
            addr: u64::from(addr),
        });
    }
    NonNull::new(ptr.cast::<T>()).ok_or(BridgeError::Misaligned {
        addr: u64::from(addr),
    })
}

impl<R: MappedRegion> FramesetStorage for Bridge<R> {
    fn split(&mut self) -> (&ControlBlock, FramesetHandle<'_>) {
        // the regions live as long as self
        let handle = unsafe { FramesetHandle::new(self.frames) };
        (unsafe { self.control.as_ref() }, handle)
    }
}

impl<R: MappedRegion> core::fmt::Debug for Bridge<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bridge")
            .field("control_addr", &format_args!("{:#010x}", self.control_addr))
            .field("frames_addr", &format_args!("{:#010x}", self.frames_addr))
            .field("control", self.control())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Writes go to a sink, reads come from a canned reply.
    struct Channel {
        reply: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Read for Channel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for Channel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn channel(reply: &[u8]) -> Channel {
        Channel {
            reply: Cursor::new(reply.to_vec()),
            sent: Vec::new(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.device, Path::new("/dev/rpmsg_pru30"));
        assert_eq!(config.memory, Path::new("/dev/mem"));
        assert_eq!(config.handshake, b"wakeup");
    }

    #[test]
    fn test_handshake_reads_little_endian_address() {
        let mut channel = channel(&[0x00, 0x10, 0x00, 0x9e]);
        let addr = handshake(&mut channel, DEFAULT_HANDSHAKE).unwrap();
        assert_eq!(addr, 0x9e00_1000);
        assert_eq!(channel.sent, b"wakeup");
    }

    #[test]
    fn test_handshake_rejects_wrong_reply_length() {
        let mut short = channel(&[1, 2, 3]);
        assert!(matches!(
            handshake(&mut short, DEFAULT_HANDSHAKE),
            Err(BridgeError::ShortRead { read: 3 })
        ));

        let mut long = channel(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(matches!(
            handshake(&mut long, DEFAULT_HANDSHAKE),
            Err(BridgeError::ShortRead { read: 8 })
        ));
    }

    #[test]
    fn test_open_missing_device() {
        let err = DevMem::open(Path::new("/nonexistent/hub75-pru/mem")).unwrap_err();
        assert!(matches!(err, BridgeError::Open { .. }));
        assert!(err.to_string().starts_with("cannot open /nonexistent/hub75-pru/mem"));
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::LayoutMismatch {
            expected: 2_097_152,
            actual: 8_388_608,
        };
        assert_eq!(
            err.to_string(),
            "frameset size mismatch: firmware has 8388608 bytes, expected 2097152"
        );
        assert_eq!(
            BridgeError::Misaligned { addr: 0x9e00_0002 }.to_string(),
            "mapping at 0x9e000002 is not suitably aligned"
        );
    }
}
