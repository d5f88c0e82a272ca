//! VS1053 codec driver.
//!
//! Two SPI channels share the chip: SCI (control, 4-byte register
//! transactions) and SDI (data, streamed in 32-byte chunks). Every
//! transaction is gated on the DREQ line, which the chip raises when it can
//! accept the next transfer.
//!
//! The driver is generic over [`embedded_hal::spi::SpiDevice`],
//! [`embedded_hal::digital`] pins and a [`DelayNs`] provider.
//!
//! ```ignore
//! let bus = Vs1053Bus { control, data, data_ready, reset };
//! let mut codec = Vs1053::init(bus, delay, DreqPolicy::default())?;
//! codec.start_adpcm_record(48_000, false)?;
//! let n = codec.read_adpcm_block(&mut block);
//! ```

use std::fmt::Debug;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, InputPin, OutputPin};
use embedded_hal::spi::{self, Error as _, SpiDevice};
use tracing::{debug, info, warn};

use super::header::bootstrap_header;
use super::registers::{
    ModeBits, Register, ADPCM_PROFILE_IMA, CLOCKF_DEFAULT, SCI_READ, SCI_WRITE, SDI_CHUNK_SIZE,
    VOLUME_DEFAULT,
};
use super::{AdpcmDevice, DeviceState};
use crate::error::CodecError;

/// Reset line held low for at least this long
const RESET_LOW_MS: u32 = 20;

/// Settling time after releasing reset
const RESET_SETTLE_MS: u32 = 100;

/// Settling time after a soft reset
const SOFT_RESET_SETTLE_MS: u32 = 10;

/// The hardware lines of one VS1053.
pub struct Vs1053Bus<SCI, SDI, DREQ, RST> {
    /// SCI, chip select XCS
    pub control: SCI,
    /// SDI, chip select XDCS
    pub data: SDI,
    pub data_ready: DREQ,
    /// XRESET, active low
    pub reset: RST,
}

/// Bounded wait on the DREQ line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DreqPolicy {
    pub attempts: u32,
    pub interval_ms: u32,
}

impl Default for DreqPolicy {
    fn default() -> Self {
        Self {
            attempts: 1000,
            interval_ms: 1,
        }
    }
}

/// VS1053 driver.
pub struct Vs1053<SCI, SDI, DREQ, RST, D> {
    bus: Vs1053Bus<SCI, SDI, DREQ, RST>,
    delay: D,
    dreq: DreqPolicy,
    state: DeviceState,
    initialized: bool,
    dreq_timeouts: u64,
    transfer_errors: u64,
}

impl<SCI, SDI, DREQ, RST, D> Vs1053<SCI, SDI, DREQ, RST, D>
where
    SCI: SpiDevice,
    SDI: SpiDevice,
    DREQ: InputPin,
    RST: OutputPin,
    D: DelayNs,
{
    /// Reset the chip and bring it to `Idle` with default clock and volume.
    ///
    /// The clock multiplier is read back after writing; a chip that does not
    /// echo it is reported as not responding.
    pub fn init(
        bus: Vs1053Bus<SCI, SDI, DREQ, RST>,
        delay: D,
        dreq: DreqPolicy,
    ) -> Result<Self, CodecError> {
        let mut codec = Self {
            bus,
            delay,
            dreq,
            state: DeviceState::Uninitialized,
            initialized: false,
            dreq_timeouts: 0,
            transfer_errors: 0,
        };

        codec.hard_reset()?;
        codec.set_clock(CLOCKF_DEFAULT)?;

        let clockf = codec.register_read(Register::ClockF)?;
        if clockf != CLOCKF_DEFAULT {
            return Err(CodecError::HardwareNotResponding(format!(
                "CLOCKF read back {:#06x}, expected {:#06x}",
                clockf, CLOCKF_DEFAULT
            )));
        }

        codec.set_volume(VOLUME_DEFAULT.0, VOLUME_DEFAULT.1)?;
        codec.initialized = true;

        info!("VS1053 initialized");
        Ok(codec)
    }

    // ── Low-level helpers ──────────────────────────────────────────────

    fn fault(&mut self, what: &str, kind: impl Debug) -> CodecError {
        self.state = DeviceState::Faulted;
        CodecError::Bus(format!("{}: {:?}", what, kind))
    }

    pub fn is_data_ready(&mut self) -> bool {
        self.bus.data_ready.is_high().unwrap_or(false)
    }

    /// Poll DREQ within the attempt budget.
    ///
    /// A timeout is logged and counted; the caller proceeds with the transfer.
    fn wait_for_data_ready(&mut self) -> bool {
        for _ in 0..self.dreq.attempts {
            if self.is_data_ready() {
                return true;
            }
            self.delay.delay_ms(self.dreq.interval_ms);
        }
        if self.is_data_ready() {
            return true;
        }

        self.dreq_timeouts += 1;
        warn!("DREQ timeout ({} total)", self.dreq_timeouts);
        false
    }

    /// Write a 16-bit SCI register.
    pub fn register_write(&mut self, register: Register, value: u16) -> Result<(), CodecError> {
        self.wait_for_data_ready();

        let [hi, lo] = value.to_be_bytes();
        let frame = [SCI_WRITE, register.addr(), hi, lo];
        match self.bus.control.write(&frame) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fault("SCI write", e.kind())),
        }
    }

    /// Read a 16-bit SCI register.
    pub fn register_read(&mut self, register: Register) -> Result<u16, CodecError> {
        match self.sci_read(register) {
            Ok(value) => Ok(value),
            Err(kind) => Err(self.fault("SCI read", kind)),
        }
    }

    /// One SCI read transaction, leaving the device state alone on failure
    fn sci_read(&mut self, register: Register) -> Result<u16, spi::ErrorKind> {
        self.wait_for_data_ready();

        let mut frame = [SCI_READ, register.addr(), 0xFF, 0xFF];
        self.bus
            .control
            .transfer_in_place(&mut frame)
            .map(|()| u16::from_be_bytes([frame[2], frame[3]]))
            .map_err(|e| e.kind())
    }

    /// Stream bytes to SDI in 32-byte chunks, waiting for DREQ before each.
    ///
    /// A failed chunk aborts the write and is counted as a transfer error.
    /// The device stays in its current mode so the next write can retry.
    pub fn bulk_write(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if self.state == DeviceState::Faulted {
            return Err(CodecError::InvalidState {
                op: "bulk_write",
                state: self.state,
            });
        }

        for chunk in bytes.chunks(SDI_CHUNK_SIZE) {
            self.wait_for_data_ready();
            if let Err(e) = self.bus.data.write(chunk) {
                self.transfer_errors += 1;
                return Err(CodecError::Bus(format!("SDI write: {:?}", e.kind())));
            }
        }
        Ok(())
    }

    // ── Reset and setup ────────────────────────────────────────────────

    /// Pulse XRESET, then soft reset. The only way out of `Faulted`.
    pub fn hard_reset(&mut self) -> Result<(), CodecError> {
        if let Err(e) = self.bus.reset.set_low() {
            return Err(self.fault("reset low", e.kind()));
        }
        self.delay.delay_ms(RESET_LOW_MS);
        if let Err(e) = self.bus.reset.set_high() {
            return Err(self.fault("reset high", e.kind()));
        }
        self.delay.delay_ms(RESET_SETTLE_MS);

        self.state = DeviceState::Reset;
        self.soft_reset()
    }

    pub fn soft_reset(&mut self) -> Result<(), CodecError> {
        self.register_write(Register::Mode, ModeBits::soft_reset().bits())?;
        self.delay.delay_ms(SOFT_RESET_SETTLE_MS);
        self.state = DeviceState::Idle;
        Ok(())
    }

    pub fn set_clock(&mut self, clockf: u16) -> Result<(), CodecError> {
        self.register_write(Register::ClockF, clockf)
    }

    /// Attenuation in -0.5 dB steps per channel
    pub fn set_volume(&mut self, left: u8, right: u8) -> Result<(), CodecError> {
        self.register_write(Register::Vol, u16::from_be_bytes([left, right]))
    }

    // ── Recording ──────────────────────────────────────────────────────

    pub fn start_adpcm_record(&mut self, sample_rate: u32, stereo: bool) -> Result<(), CodecError> {
        self.require(DeviceState::Idle, "start_adpcm_record")?;

        self.register_write(Register::Mode, ModeBits::adpcm_record().bits())?;
        self.wait_for_data_ready();

        self.register_write(Register::AiCtrl0, ADPCM_PROFILE_IMA)?;
        self.register_write(Register::AiCtrl1, rate_code(sample_rate))?;
        self.register_write(Register::AiCtrl2, 0)?;
        self.register_write(Register::AiCtrl3, u16::from(stereo))?;

        self.state = DeviceState::Recording;
        info!(
            "ADPCM recording started: {}Hz, {}",
            sample_rate,
            if stereo { "stereo" } else { "mono" }
        );
        Ok(())
    }

    /// Drain the words the encoder has ready, packed big-endian.
    ///
    /// Polls HDAT1 once; reads at most `dest.len() / 2` words. A failed
    /// transaction ends the drain and is counted, and the next poll retries.
    pub fn read_adpcm_block(&mut self, dest: &mut [u8]) -> usize {
        if self.state != DeviceState::Recording {
            return 0;
        }

        let available = match self.sci_read(Register::Hdat1) {
            Ok(words) => words as usize,
            Err(kind) => {
                self.transfer_errors += 1;
                warn!("Failed to read HDAT1: {:?}", kind);
                return 0;
            }
        };

        let words = available.min(dest.len() / 2);
        let mut read = 0;
        for slot in dest.chunks_exact_mut(2).take(words) {
            match self.sci_read(Register::Hdat0) {
                Ok(word) => {
                    slot.copy_from_slice(&word.to_be_bytes());
                    read += 2;
                }
                Err(kind) => {
                    self.transfer_errors += 1;
                    warn!("Failed to read HDAT0 after {} bytes: {:?}", read, kind);
                    break;
                }
            }
        }
        read
    }

    // ── Decoding ───────────────────────────────────────────────────────

    pub fn start_adpcm_decode(&mut self) -> Result<(), CodecError> {
        self.require(DeviceState::Idle, "start_adpcm_decode")?;
        self.register_write(Register::Mode, ModeBits::streaming().bits())?;
        self.state = DeviceState::Decoding;
        info!("ADPCM decode started");
        Ok(())
    }

    pub fn emit_bootstrap_header(&mut self, sample_rate: u32, channels: u8) -> Result<(), CodecError> {
        self.require(DeviceState::Decoding, "emit_bootstrap_header")?;
        self.bulk_write(&bootstrap_header(sample_rate, channels))?;
        debug!("Bootstrap header sent: {}Hz, {} ch", sample_rate, channels);
        Ok(())
    }

    /// Soft reset back to `Idle`; ends both recording and decoding.
    pub fn stop(&mut self) -> Result<(), CodecError> {
        if !self.initialized || self.state == DeviceState::Faulted {
            return Err(CodecError::InvalidState {
                op: "stop",
                state: self.state,
            });
        }
        self.soft_reset()
    }

    // ── Accessors ──────────────────────────────────────────────────────

    fn require(&self, expected: DeviceState, op: &'static str) -> Result<(), CodecError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CodecError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// DREQ waits that ran out of attempts
    pub fn dreq_timeouts(&self) -> u64 {
        self.dreq_timeouts
    }

    /// Streaming transfers (HDAT reads, SDI chunks) that failed
    pub fn transfer_errors(&self) -> u64 {
        self.transfer_errors
    }

    /// Give back the bus and delay provider
    pub fn release(self) -> (Vs1053Bus<SCI, SDI, DREQ, RST>, D) {
        (self.bus, self.delay)
    }
}

impl<SCI, SDI, DREQ, RST, D> AdpcmDevice for Vs1053<SCI, SDI, DREQ, RST, D>
where
    SCI: SpiDevice,
    SDI: SpiDevice,
    DREQ: InputPin,
    RST: OutputPin,
    D: DelayNs,
{
    fn start_adpcm_record(&mut self, sample_rate: u32, stereo: bool) -> Result<(), CodecError> {
        Vs1053::start_adpcm_record(self, sample_rate, stereo)
    }

    fn read_adpcm_block(&mut self, dest: &mut [u8]) -> usize {
        Vs1053::read_adpcm_block(self, dest)
    }

    fn start_adpcm_decode(&mut self) -> Result<(), CodecError> {
        Vs1053::start_adpcm_decode(self)
    }

    fn emit_bootstrap_header(&mut self, sample_rate: u32, channels: u8) -> Result<(), CodecError> {
        Vs1053::emit_bootstrap_header(self, sample_rate, channels)
    }

    fn write_block(&mut self, block: &[u8]) -> Result<(), CodecError> {
        self.bulk_write(block)
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        Vs1053::stop(self)
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn transfer_errors(&self) -> u64 {
        self.transfer_errors
    }
}

/// AICTRL1 takes the rate in kHz
fn rate_code(sample_rate: u32) -> u16 {
    (sample_rate / 1000) as u16
}

// ── Tests ──────────────────────────────────────────────────────────────────
