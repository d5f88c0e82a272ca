//! VS1053 codec device support
//!
//! The pipelines only see the [`AdpcmDevice`] trait. [`Vs1053`] drives the
//! real chip over `embedded-hal` SPI and GPIO; [`SimulatedCodec`] stands in
//! for it on hosts without the hardware.

pub mod header;
pub mod registers;
mod simulated;
mod vs1053;

pub use header::{bootstrap_header, BootstrapHeader, BOOTSTRAP_HEADER_LEN};
pub use registers::{ModeBits, Register};
pub use simulated::SimulatedCodec;
pub use vs1053::{DreqPolicy, Vs1053, Vs1053Bus};

use serde::Serialize;

use crate::error::CodecError;

/// Codec device lifecycle.
///
/// `Uninitialized → Reset → Idle → {Recording | Decoding} → Idle`, with a
/// bus error on a control transaction moving to `Faulted`. Switching between recording and decoding
/// always passes through `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceState {
    Uninitialized,
    Reset,
    Idle,
    Recording,
    Decoding,
    Faulted,
}

/// Operations the TX and RX pipelines need from a codec device.
pub trait AdpcmDevice {
    /// Enter ADPCM recording from `Idle`
    fn start_adpcm_record(&mut self, sample_rate: u32, stereo: bool) -> Result<(), CodecError>;

    /// Drain available encoded bytes into `dest`, never more than `dest.len()`.
    ///
    /// Returns 0 when nothing is available or the read failed.
    fn read_adpcm_block(&mut self, dest: &mut [u8]) -> usize;

    /// Enter streaming decode from `Idle`
    fn start_adpcm_decode(&mut self) -> Result<(), CodecError>;

    /// Prime the decoder; must precede the first block of a decode run
    fn emit_bootstrap_header(&mut self, sample_rate: u32, channels: u8) -> Result<(), CodecError>;

    /// Feed one encoded block to the decoder
    fn write_block(&mut self, block: &[u8]) -> Result<(), CodecError>;

    /// Leave recording or decoding, back to `Idle`
    fn stop(&mut self) -> Result<(), CodecError>;

    fn state(&self) -> DeviceState;

    /// Failed streaming transfers so far. Each one cost a read or a write
    /// but left the device usable.
    fn transfer_errors(&self) -> u64 {
        0
    }
}
