//! Test doubles shared by the pipeline tests

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::codec::{AdpcmDevice, DeviceState};
use crate::constants::ADPCM_BLOCK_SIZE_BYTES;
use crate::error::{CodecError, NetworkError};
use crate::network::{PacketSink, PacketSource, RecvStatus};

/// What a [`MockDevice`] was asked to do
#[derive(Debug, Default)]
pub struct DeviceLog {
    pub record_starts: u32,
    pub decode_starts: u32,
    pub stops: u32,
    pub headers: u32,
    pub blocks: Vec<Vec<u8>>,
}

pub struct MockDevice {
    state: DeviceState,
    log: Arc<Mutex<DeviceLog>>,
    blocks_to_record: usize,
    next_fill: u8,
    fail_start: bool,
    header_failures: u32,
    read_failures: u32,
    transfer_errors: u64,
}

impl MockDevice {
    pub fn new() -> (Self, Arc<Mutex<DeviceLog>>) {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let device = Self {
            state: DeviceState::Idle,
            log: log.clone(),
            blocks_to_record: 0,
            next_fill: 0,
            fail_start: false,
            header_failures: 0,
            read_failures: 0,
            transfer_errors: 0,
        };
        (device, log)
    }

    /// Produce `count` full blocks, each filled with its index
    pub fn with_recorded_blocks(mut self, count: usize) -> Self {
        self.blocks_to_record = count;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail the next `count` header emissions
    pub fn failing_headers(mut self, count: u32) -> Self {
        self.header_failures = count;
        self
    }

    /// Fail the next `count` block reads as transfer errors
    pub fn failing_reads(mut self, count: u32) -> Self {
        self.read_failures = count;
        self
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    fn enter(&mut self, next: DeviceState, op: &'static str) -> Result<(), CodecError> {
        if self.fail_start {
            return Err(CodecError::Bus(format!("{} refused", op)));
        }
        if self.state != DeviceState::Idle {
            return Err(CodecError::InvalidState {
                op,
                state: self.state,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl AdpcmDevice for MockDevice {
    fn start_adpcm_record(&mut self, _sample_rate: u32, _stereo: bool) -> Result<(), CodecError> {
        self.enter(DeviceState::Recording, "start_adpcm_record")?;
        self.log.lock().record_starts += 1;
        Ok(())
    }

    fn read_adpcm_block(&mut self, dest: &mut [u8]) -> usize {
        if self.state != DeviceState::Recording {
            return 0;
        }
        if self.read_failures > 0 {
            self.read_failures -= 1;
            self.transfer_errors += 1;
            return 0;
        }
        if self.blocks_to_record == 0 {
            return 0;
        }
        self.blocks_to_record -= 1;

        let len = dest.len().min(ADPCM_BLOCK_SIZE_BYTES);
        dest[..len].fill(self.next_fill);
        self.next_fill = self.next_fill.wrapping_add(1);
        len
    }

    fn start_adpcm_decode(&mut self) -> Result<(), CodecError> {
        self.enter(DeviceState::Decoding, "start_adpcm_decode")?;
        self.log.lock().decode_starts += 1;
        Ok(())
    }

    fn emit_bootstrap_header(&mut self, _sample_rate: u32, _channels: u8) -> Result<(), CodecError> {
        if self.header_failures > 0 {
            self.header_failures -= 1;
            return Err(CodecError::Bus("header write failed".into()));
        }
        self.log.lock().headers += 1;
        Ok(())
    }

    fn write_block(&mut self, block: &[u8]) -> Result<(), CodecError> {
        self.log.lock().blocks.push(block.to_vec());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CodecError> {
        self.state = DeviceState::Idle;
        self.log.lock().stops += 1;
        Ok(())
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn transfer_errors(&self) -> u64 {
        self.transfer_errors
    }
}

/// Sink that keeps every datagram
#[derive(Clone, Default)]
pub struct CollectSink {
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PacketSink for CollectSink {
    fn send(&mut self, datagram: &[u8]) -> Result<(), NetworkError> {
        self.sent.lock().push(datagram.to_vec());
        Ok(())
    }
}

/// Source replaying queued datagrams, then timing out
#[derive(Default)]
pub struct ScriptedSource {
    pub datagrams: VecDeque<Vec<u8>>,
}

impl ScriptedSource {
    pub fn push(&mut self, datagram: impl Into<Vec<u8>>) {
        self.datagrams.push_back(datagram.into());
    }
}

impl PacketSource for ScriptedSource {
    fn recv(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<RecvStatus, NetworkError> {
        match self.datagrams.pop_front() {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(RecvStatus::Received(len))
            }
            None => Ok(RecvStatus::TimedOut),
        }
    }
}

/// Poll `cond` for up to two seconds
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
