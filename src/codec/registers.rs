//! VS1053 SCI register map and bitfield definitions.
//!
//! Addresses and bit positions follow the VS1053b datasheet. All SCI
//! registers hold 16-bit values and are transferred big-endian.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

// ── SCI opcodes ────────────────────────────────────────────────────────────

/// SCI write instruction
pub const SCI_WRITE: u8 = 0x02;

/// SCI read instruction
pub const SCI_READ: u8 = 0x03;

/// Maximum bytes per SDI transfer while DREQ is high.
pub const SDI_CHUNK_SIZE: usize = 32;

// ── Defaults ───────────────────────────────────────────────────────────────

/// SC_MULT = 3.5×, SC_ADD = 0
pub const CLOCKF_DEFAULT: u16 = 0x8800;

/// Attenuation per channel in -0.5 dB steps; 0x00 is loudest, 0xFE is mute.
pub const VOLUME_DEFAULT: (u8, u8) = (0x20, 0x20);

/// IMA ADPCM encoder profile for AICTRL0
pub const ADPCM_PROFILE_IMA: u16 = 0;

// ── Registers ──────────────────────────────────────────────────────────────

/// SCI register addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// Mode control, see [`ModeBits`]
    Mode = 0x00,
    Status = 0x01,
    Bass = 0x02,
    /// Clock multiplier / frequency
    ClockF = 0x03,
    DecodeTime = 0x04,
    AuData = 0x05,
    Wram = 0x06,
    WramAddr = 0x07,
    /// Encoded data word while recording
    Hdat0 = 0x08,
    /// Words available while recording
    Hdat1 = 0x09,
    AiAddr = 0x0A,
    /// Volume, left in the high byte, right in the low byte
    Vol = 0x0B,
    /// Recording profile
    AiCtrl0 = 0x0C,
    /// Recording sample rate in kHz (48 for 48000 Hz)
    AiCtrl1 = 0x0D,
    /// Reserved while recording (autogain limit)
    AiCtrl2 = 0x0E,
    /// Channel mode, 1 = stereo
    AiCtrl3 = 0x0F,
}

impl Register {
    pub const fn addr(self) -> u8 {
        self as u8
    }

    pub fn from_addr(addr: u8) -> Option<Self> {
        use Register::*;
        const ALL: [Register; 16] = [
            Mode, Status, Bass, ClockF, DecodeTime, AuData, Wram, WramAddr, Hdat0, Hdat1,
            AiAddr, Vol, AiCtrl0, AiCtrl1, AiCtrl2, AiCtrl3,
        ];
        ALL.get(addr as usize).copied()
    }
}

// ── SCI_MODE bits ──────────────────────────────────────────────────────────

/// Bit set written to [`Register::Mode`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeBits(u16);

impl ModeBits {
    pub const DIFF: Self = Self(0x0001);
    pub const LAYER12: Self = Self(0x0002);
    /// Soft reset, self-clearing
    pub const RESET: Self = Self(0x0004);
    pub const CANCEL: Self = Self(0x0008);
    pub const EARSPEAKER_LO: Self = Self(0x0010);
    pub const TESTS: Self = Self(0x0020);
    pub const STREAM: Self = Self(0x0040);
    pub const EARSPEAKER_HI: Self = Self(0x0080);
    pub const DACT: Self = Self(0x0100);
    pub const SDIORD: Self = Self(0x0200);
    pub const SDISHARE: Self = Self(0x0400);
    /// VS1002 native SPI modes
    pub const SDINEW: Self = Self(0x0800);
    /// ADPCM recording
    pub const ADPCM: Self = Self(0x1000);
    /// Line input instead of microphone
    pub const LINE1: Self = Self(0x4000);
    pub const CLK_RANGE: Self = Self(0x8000);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits_retain(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Baseline streaming mode used for decoding
    pub const fn streaming() -> Self {
        Self::SDINEW
    }

    /// Mode word that starts line-in ADPCM recording
    pub const fn adpcm_record() -> Self {
        Self(Self::SDINEW.0 | Self::ADPCM.0 | Self::LINE1.0)
    }

    pub const fn soft_reset() -> Self {
        Self(Self::SDINEW.0 | Self::RESET.0)
    }
}

impl BitOr for ModeBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModeBits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ModeBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModeBits({:#06x})", self.0)
    }
}

// ── Bootstrap (WAV) header ─────────────────────────────────────────────────

/// WAVE format code for IMA ADPCM
pub const WAV_FORMAT_IMA_ADPCM: u16 = 0x0011;

/// Length marker for a stream of unknown length
pub const WAV_STREAMING_LENGTH: u32 = 0xFFFF_FFFF;
