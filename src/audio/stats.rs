//! Pipeline counters
//!
//! Each counter has one writer (a worker thread or the network receive path)
//! and any number of readers. Readers may see slightly stale values, which
//! is fine for display.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of a pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub running: bool,
    /// Full blocks read from the codec and queued for sending
    pub blocks_produced: u64,
    /// Blocks refused by a full ring buffer
    pub blocks_dropped: u64,
    /// Codec reads that returned less than a block
    pub short_reads: u64,
    pub packets_sent: u64,
    /// Partially assembled packets thrown away
    pub packets_discarded: u64,
    pub packets_received: u64,
    /// Packets refused by a full jitter queue
    pub packets_dropped: u64,
    /// Malformed frames and rejected session configs
    pub packets_rejected: u64,
    pub underruns: u64,
    pub device_errors: u64,
    pub send_errors: u64,
    /// Blocks (TX) or packets (RX) currently buffered
    pub buffer_fill: usize,
    pub buffer_capacity: usize,
}

impl PipelineStats {
    pub fn fill_level(&self) -> f32 {
        if self.buffer_capacity == 0 {
            0.0
        } else {
            self.buffer_fill as f32 / self.buffer_capacity as f32
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub blocks_produced: AtomicU64,
    pub short_reads: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_discarded: AtomicU64,
    pub packets_received: AtomicU64,
    pub packets_rejected: AtomicU64,
    pub underruns: AtomicU64,
    pub device_errors: AtomicU64,
    pub send_errors: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into a snapshot; buffer fields are left to the caller
    pub fn snapshot(&self, running: bool) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            running,
            blocks_produced: load(&self.blocks_produced),
            short_reads: load(&self.short_reads),
            packets_sent: load(&self.packets_sent),
            packets_discarded: load(&self.packets_discarded),
            packets_received: load(&self.packets_received),
            packets_rejected: load(&self.packets_rejected),
            underruns: load(&self.underruns),
            device_errors: load(&self.device_errors),
            send_errors: load(&self.send_errors),
            ..PipelineStats::default()
        }
    }
}
