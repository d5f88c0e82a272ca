//! In-process stand-in for the VS1053.
//!
//! While recording it yields one silent IMA ADPCM block per block period;
//! while decoding it accepts blocks and only counts them. Used by the node
//! binaries on hosts without the codec chip.

use std::time::{Duration, Instant};

use tracing::debug;

use super::{AdpcmDevice, DeviceState};
use crate::constants::{block_duration_us, ADPCM_BLOCK_SIZE_BYTES};
use crate::error::CodecError;

pub struct SimulatedCodec {
    state: DeviceState,
    block_period: Duration,
    next_block_at: Instant,
    blocks_recorded: u64,
    bytes_decoded: u64,
    headers_emitted: u32,
}

impl SimulatedCodec {
    pub fn new() -> Self {
        Self {
            state: DeviceState::Idle,
            block_period: Duration::ZERO,
            next_block_at: Instant::now(),
            blocks_recorded: 0,
            bytes_decoded: 0,
            headers_emitted: 0,
        }
    }

    pub fn blocks_recorded(&self) -> u64 {
        self.blocks_recorded
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    pub fn headers_emitted(&self) -> u32 {
        self.headers_emitted
    }

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
}

impl Default for SimulatedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl AdpcmDevice for SimulatedCodec {
    fn start_adpcm_record(&mut self, sample_rate: u32, _stereo: bool) -> Result<(), CodecError> {
        self.require(DeviceState::Idle, "start_adpcm_record")?;
        if sample_rate == 0 {
            return Err(CodecError::InvalidProfile("sample rate 0 Hz".into()));
        }

        self.block_period = Duration::from_micros(block_duration_us(sample_rate));
        self.next_block_at = Instant::now() + self.block_period;
        self.state = DeviceState::Recording;
        Ok(())
    }

    fn read_adpcm_block(&mut self, dest: &mut [u8]) -> usize {
        if self.state != DeviceState::Recording || Instant::now() < self.next_block_at {
            return 0;
        }

        self.next_block_at += self.block_period;
        self.blocks_recorded += 1;

        // An all-zero IMA block decodes to silence
        let len = dest.len().min(ADPCM_BLOCK_SIZE_BYTES);
        dest[..len].fill(0);
        len
    }

    fn start_adpcm_decode(&mut self) -> Result<(), CodecError> {
        self.require(DeviceState::Idle, "start_adpcm_decode")?;
        self.state = DeviceState::Decoding;
        Ok(())
    }

    fn emit_bootstrap_header(&mut self, sample_rate: u32, channels: u8) -> Result<(), CodecError> {
        self.require(DeviceState::Decoding, "emit_bootstrap_header")?;
        self.headers_emitted += 1;
        debug!("Simulated header: {}Hz, {} ch", sample_rate, channels);
        Ok(())
    }

    fn write_block(&mut self, block: &[u8]) -> Result<(), CodecError> {
        self.bytes_decoded += block.len() as u64;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        self.state = DeviceState::Idle;
        Ok(())
    }

    fn state(&self) -> DeviceState {
        self.state
    }
}
