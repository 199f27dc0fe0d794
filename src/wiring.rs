//! Colour-signal to GPIO pin assignment.
//!
//! Each of the eight connectors on the cape carries two RGB triples, one for
//! the upper and one for the lower half of the panel chain attached to it.
//! That gives 16 outputs and 48 colour signals. A wiring table lists a
//! [`Wire`] for each signal, naming the GPIO bank and bit it is soldered to.
//!
//! The built-in [`OCTOSCROLLER`] table is checked when the crate is compiled.
//! Custom tables go through [`WiringMap::new`], which applies the same rules:
//! every signal exactly once, no pin shared, no pin inside [`CONTROL_MASK`].

use derive_more::{Display, Error};

use crate::schedule::{CONTROL_BANK, CONTROL_MASK};
use crate::{GPIO_BANKS, OUTPUTS};

/// Number of colour signals driven by the cape.
pub const SIGNALS: usize = OUTPUTS * 3;

/// A HUB75 connector on the cape.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Connector {
    #[display("J1")]
    J1 = 0,
    #[display("J2")]
    J2 = 1,
    #[display("J3")]
    J3 = 2,
    #[display("J4")]
    J4 = 3,
    #[display("J5")]
    J5 = 4,
    #[display("J6")]
    J6 = 5,
    #[display("J7")]
    J7 = 6,
    #[display("J8")]
    J8 = 7,
}

impl Connector {
    /// All connectors in order.
    pub const ALL: [Connector; 8] = [
        Connector::J1,
        Connector::J2,
        Connector::J3,
        Connector::J4,
        Connector::J5,
        Connector::J6,
        Connector::J7,
        Connector::J8,
    ];

    /// Zero-based connector index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Which RGB triple of a connector.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RowHalf {
    /// `R1 G1 B1`, the upper rows.
    #[display("1")]
    Upper = 0,
    /// `R2 G2 B2`, the lower rows.
    #[display("2")]
    Lower = 1,
}

/// A colour channel.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Channel {
    #[display("red")]
    Red = 0,
    #[display("green")]
    Green = 1,
    #[display("blue")]
    Blue = 2,
}

impl Channel {
    /// All channels in RGB order.
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    /// Index into an RGB triple.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One colour signal, written like the silkscreen: `J3_2 green`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display("{connector}_{half} {channel}")]
pub struct Signal {
    /// Connector the signal leaves on.
    pub connector: Connector,
    /// Which triple of that connector.
    pub half: RowHalf,
    /// Colour within the triple.
    pub channel: Channel,
}

impl Signal {
    /// Name a signal.
    #[must_use]
    pub const fn new(connector: Connector, half: RowHalf, channel: Channel) -> Self {
        Self {
            connector,
            half,
            channel,
        }
    }

    /// The output (half-connector) index, `0..OUTPUTS`.
    #[must_use]
    pub const fn output(self) -> usize {
        self.connector.index() * 2 + self.half as usize
    }

    /// Dense index, `0..SIGNALS`.
    #[must_use]
    pub const fn index(self) -> usize {
        self.output() * 3 + self.channel.index()
    }

    /// Inverse of [`Signal::index`]. `index` must be below [`SIGNALS`].
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        let output = index / 3;
        let half = if output % 2 == 0 {
            RowHalf::Upper
        } else {
            RowHalf::Lower
        };
        let channel = match index % 3 {
            0 => Channel::Red,
            1 => Channel::Green,
            _ => Channel::Blue,
        };
        Self::new(Connector::ALL[(output / 2) % 8], half, channel)
    }
}

/// A GPIO bank of the AM335x.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum GpioBank {
    #[display("gpio0")]
    Gpio0 = 0,
    #[display("gpio1")]
    Gpio1 = 1,
    #[display("gpio2")]
    Gpio2 = 2,
    #[display("gpio3")]
    Gpio3 = 3,
}

impl GpioBank {
    /// Index into [`DoublePixel::words`](crate::schedule::DoublePixel::words).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A single GPIO line.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display("{bank}[{bit}]")]
pub struct Pin {
    /// GPIO bank.
    pub bank: GpioBank,
    /// Bit within the bank, `0..32`.
    pub bit: u8,
}

impl Pin {
    /// The pin's bit within its bank word.
    #[must_use]
    pub const fn mask(self) -> u32 {
        1 << (self.bit & 31)
    }
}

/// A row of a wiring table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wire {
    /// The colour signal.
    pub signal: Signal,
    /// Where it is soldered.
    pub pin: Pin,
}

const fn wire(
    connector: Connector,
    half: RowHalf,
    channel: Channel,
    bank: GpioBank,
    bit: u8,
) -> Wire {
    Wire {
        signal: Signal::new(connector, half, channel),
        pin: Pin { bank, bit },
    }
}

/// Pin assignment of the Octoscroller cape.
#[rustfmt::skip]
pub const OCTOSCROLLER: [Wire; SIGNALS] = {
    use Channel::{Blue, Green, Red};
    use Connector::*;
    use GpioBank::*;
    use RowHalf::{Lower, Upper};

    [
        wire(J1, Lower, Blue, Gpio0, 26),
        wire(J1, Lower, Red, Gpio0, 23),
        wire(J2, Upper, Red, Gpio0, 27),
        wire(J2, Upper, Blue, Gpio0, 22),
        wire(J3, Upper, Red, Gpio0, 30),
        wire(J3, Upper, Blue, Gpio0, 31),
        wire(J3, Lower, Green, Gpio0, 3),
        wire(J3, Lower, Blue, Gpio0, 5),
        wire(J4, Lower, Blue, Gpio0, 4),
        wire(J4, Upper, Red, Gpio0, 2),
        wire(J4, Upper, Green, Gpio0, 15),
        wire(J5, Upper, Green, Gpio0, 11),
        wire(J5, Upper, Blue, Gpio0, 10),
        wire(J5, Lower, Red, Gpio0, 9),
        wire(J5, Lower, Green, Gpio0, 8),
        wire(J8, Lower, Green, Gpio0, 14),

        wire(J3, Upper, Green, Gpio1, 18),
        wire(J3, Lower, Red, Gpio1, 16),
        wire(J4, Upper, Blue, Gpio1, 17),

        wire(J1, Lower, Green, Gpio2, 4),
        wire(J1, Upper, Red, Gpio2, 2),
        wire(J1, Upper, Green, Gpio2, 3),
        wire(J1, Upper, Blue, Gpio2, 5),
        wire(J2, Upper, Green, Gpio2, 1),
        wire(J2, Lower, Red, Gpio2, 22),
        wire(J2, Lower, Green, Gpio2, 23),
        wire(J2, Lower, Blue, Gpio2, 24),
        wire(J5, Lower, Blue, Gpio2, 17),
        wire(J5, Upper, Red, Gpio2, 25),
        wire(J6, Upper, Red, Gpio2, 16),
        wire(J6, Upper, Green, Gpio2, 15),
        wire(J6, Upper, Blue, Gpio2, 14),
        wire(J6, Lower, Red, Gpio2, 13),
        wire(J6, Lower, Green, Gpio2, 10),
        wire(J6, Lower, Blue, Gpio2, 12),
        wire(J7, Upper, Red, Gpio2, 11),
        wire(J7, Upper, Green, Gpio2, 9),
        wire(J7, Upper, Blue, Gpio2, 8),
        wire(J7, Lower, Red, Gpio2, 6),
        wire(J7, Lower, Blue, Gpio2, 7),

        wire(J4, Lower, Red, Gpio3, 21),
        wire(J4, Lower, Green, Gpio3, 19),
        wire(J7, Lower, Green, Gpio3, 18),
        wire(J8, Lower, Red, Gpio3, 14),
        wire(J8, Lower, Blue, Gpio3, 20),
        wire(J8, Upper, Red, Gpio3, 17),
        wire(J8, Upper, Green, Gpio3, 16),
        wire(J8, Upper, Blue, Gpio3, 15),
    ]
};

const _: () = assert!(validate(&OCTOSCROLLER).is_ok());

/// Why a wiring table was rejected.
#[derive(Clone, Copy, Debug, Display, Error, PartialEq, Eq)]
pub enum WiringError {
    /// Two signals share a pin.
    #[display("{bank} bit {bit} is assigned to more than one signal")]
    DuplicateBit {
        /// Bank of the shared pin.
        bank: GpioBank,
        /// Bit of the shared pin.
        bit: u8,
    },
    /// A signal appears twice.
    #[display("{signal} is wired more than once")]
    DuplicateSignal {
        /// The repeated signal.
        signal: Signal,
    },
    /// A signal has no pin.
    #[display("{signal} is not wired")]
    MissingSignal {
        /// The first signal without a pin.
        signal: Signal,
    },
    /// A signal sits on a control pin.
    #[display("{signal} is wired to reserved control pin {pin}")]
    ReservedBit {
        /// The offending signal.
        signal: Signal,
        /// The control pin it was given.
        pin: Pin,
    },
    /// A bit number past the end of the bank word.
    #[display("{signal} is wired to bit {bit}, beyond a 32-bit bank")]
    BitOutOfRange {
        /// The offending signal.
        signal: Signal,
        /// The bit it was given.
        bit: u8,
    },
}

/// Check a wiring table.
///
/// The table must name every one of the [`SIGNALS`] signals exactly once,
/// use each pin at most once, keep every bit below 32, and stay clear of
/// [`CONTROL_MASK`] on [`CONTROL_BANK`].
pub const fn validate(wires: &[Wire]) -> Result<(), WiringError> {
    let mut seen = [false; SIGNALS];
    let mut used = [0u32; GPIO_BANKS];

    let mut i = 0;
    while i < wires.len() {
        let Wire { signal, pin } = wires[i];
        if pin.bit >= 32 {
            return Err(WiringError::BitOutOfRange {
                signal,
                bit: pin.bit,
            });
        }
        let mask = pin.mask();
        if pin.bank.index() == CONTROL_BANK.index() && mask & CONTROL_MASK != 0 {
            return Err(WiringError::ReservedBit { signal, pin });
        }
        if used[pin.bank.index()] & mask != 0 {
            return Err(WiringError::DuplicateBit {
                bank: pin.bank,
                bit: pin.bit,
            });
        }
        used[pin.bank.index()] |= mask;

        if seen[signal.index()] {
            return Err(WiringError::DuplicateSignal { signal });
        }
        seen[signal.index()] = true;
        i += 1;
    }

    let mut index = 0;
    while index < SIGNALS {
        if !seen[index] {
            return Err(WiringError::MissingSignal {
                signal: Signal::from_index(index),
            });
        }
        index += 1;
    }
    Ok(())
}

/// A validated wiring table, indexed by output and channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WiringMap {
    pins: [[Pin; 3]; OUTPUTS],
}

impl WiringMap {
    /// Build a map from a table, rejecting anything [`validate`] rejects.
    pub fn new(wires: &[Wire]) -> Result<Self, WiringError> {
        validate(wires)?;
        Ok(Self::from_valid(wires))
    }

    /// The Octoscroller cape.
    #[must_use]
    pub const fn octoscroller() -> Self {
        Self::from_valid(&OCTOSCROLLER)
    }

    const fn from_valid(wires: &[Wire]) -> Self {
        let unassigned = Pin {
            bank: GpioBank::Gpio0,
            bit: 0,
        };
        let mut pins = [[unassigned; 3]; OUTPUTS];
        let mut i = 0;
        while i < wires.len() {
            let Wire { signal, pin } = wires[i];
            pins[signal.output()][signal.channel.index()] = pin;
            i += 1;
        }
        Self { pins }
    }

    /// The pin carrying one channel of one output.
    #[inline]
    #[must_use]
    pub fn pin(&self, output: usize, channel: Channel) -> Pin {
        self.pins[output][channel.index()]
    }

    /// The red, green and blue pins of one output.
    #[inline]
    #[must_use]
    pub fn rgb(&self, output: usize) -> [Pin; 3] {
        self.pins[output]
    }

    /// The pin carrying `signal`.
    #[must_use]
    pub fn pin_for(&self, signal: Signal) -> Pin {
        self.pin(signal.output(), signal.channel)
    }

    /// Every colour pin, as a mask per bank.
    #[must_use]
    pub fn color_masks(&self) -> [u32; GPIO_BANKS] {
        let mut masks = [0; GPIO_BANKS];
        for pin in self.pins.iter().flatten() {
            masks[pin.bank.index()] |= pin.mask();
        }
        masks
    }
}

impl Default for WiringMap {
    fn default() -> Self {
        Self::octoscroller()
    }
}
