//! Bounded buffers between the real-time tasks
//!
//! [`BlockRing`] sits between the codec read loop and the packet assembler on
//! the transmit side; [`JitterQueue`] sits between the network receive path
//! and the playback task. Producers only ever use the non-blocking push and
//! count a drop when full. Consumers wait at most a caller-supplied timeout.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::protocol::AudioPacket;

/// Byte ring holding a whole number of fixed-size encoded blocks
pub struct BlockRing {
    state: Mutex<RingState>,
    not_empty: Condvar,
    block_size: usize,
    capacity: usize,
    overflow_count: AtomicU64,
}

struct RingState {
    bytes: Vec<u8>,
    /// Index of the oldest block
    head: usize,
    /// Blocks currently stored
    len: usize,
}

impl BlockRing {
    /// Allocate storage for `capacity` blocks of `block_size` bytes
    pub fn new(capacity: usize, block_size: usize) -> Result<Self, PipelineError> {
        if capacity == 0 || block_size == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "ring of {} blocks x {} bytes",
                capacity, block_size
            )));
        }

        let total = capacity.checked_mul(block_size).ok_or_else(|| {
            PipelineError::OutOfResources(format!("{} blocks x {} bytes", capacity, block_size))
        })?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(total)
            .map_err(|e| PipelineError::OutOfResources(format!("ring buffer: {}", e)))?;
        bytes.resize(total, 0);

        Ok(Self {
            state: Mutex::new(RingState {
                bytes,
                head: 0,
                len: 0,
            }),
            not_empty: Condvar::new(),
            block_size,
            capacity,
            overflow_count: AtomicU64::new(0),
        })
    }

    /// Copy one block in without blocking.
    ///
    /// Returns false when the ring is full; the block is dropped and counted.
    /// A slice of the wrong length is refused without being counted.
    pub fn try_push(&self, block: &[u8]) -> bool {
        if block.len() != self.block_size {
            return false;
        }

        let mut state = self.state.lock();
        if state.len == self.capacity {
            drop(state);
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let slot = (state.head + state.len) % self.capacity;
        let offset = slot * self.block_size;
        state.bytes[offset..offset + self.block_size].copy_from_slice(block);
        state.len += 1;
        drop(state);

        self.not_empty.notify_one();
        true
    }

    /// Take the oldest block into `dest` without waiting
    pub fn try_pop(&self, dest: &mut [u8]) -> bool {
        let mut state = self.state.lock();
        self.take_front(&mut state, dest)
    }

    /// Take the oldest block into `dest`, waiting up to `timeout` for one
    pub fn pop_timeout(&self, dest: &mut [u8], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while state.len == 0 {
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        self.take_front(&mut state, dest)
    }

    fn take_front(&self, state: &mut RingState, dest: &mut [u8]) -> bool {
        if state.len == 0 || dest.len() < self.block_size {
            return false;
        }

        let offset = state.head * self.block_size;
        dest[..self.block_size].copy_from_slice(&state.bytes[offset..offset + self.block_size]);
        state.head = (state.head + 1) % self.capacity;
        state.len -= 1;
        true
    }

    /// Discard all stored blocks
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.head = 0;
        state.len = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Blocks refused because the ring was full
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Bounded FIFO of whole packets awaiting playback
pub struct JitterQueue {
    tx: Sender<AudioPacket>,
    rx: Receiver<AudioPacket>,
    capacity: usize,
    dropped: AtomicU64,
}

impl JitterQueue {
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "jitter queue capacity must be non-zero".into(),
            ));
        }

        // The channel allocates its slots up front and aborts on failure;
        // reserve the same amount of memory first so we can report it.
        let mut reserved: Vec<AudioPacket> = Vec::new();
        reserved
            .try_reserve_exact(capacity)
            .map_err(|e| PipelineError::OutOfResources(format!("jitter queue: {}", e)))?;
        drop(reserved);

        let (tx, rx) = bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity,
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue without blocking; a full queue drops the packet and counts it
    pub fn try_push(&self, packet: AudioPacket) -> bool {
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait up to `timeout` for the oldest packet
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioPacket> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Some(packet),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<AudioPacket> {
        self.rx.try_recv().ok()
    }

    /// Discard everything queued
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets refused because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn block(fill: u8) -> [u8; 4] {
        [fill; 4]
    }

    #[test]
    fn test_ring_fifo_order() {
        let ring = BlockRing::new(4, 4).unwrap();

        assert!(ring.try_push(&block(1)));
        assert!(ring.try_push(&block(2)));
        assert!(ring.try_push(&block(3)));
        assert_eq!(ring.len(), 3);

        let mut out = [0u8; 4];
        for expected in 1..=3u8 {
            assert!(ring.try_pop(&mut out));
            assert_eq!(out, [expected; 4]);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_wraps_around() {
        let ring = BlockRing::new(2, 4).unwrap();
        let mut out = [0u8; 4];

        for fill in 0..10u8 {
            assert!(ring.try_push(&block(fill)));
            assert!(ring.try_pop(&mut out));
            assert_eq!(out, [fill; 4]);
        }
    }

    #[test]
    fn test_ring_full_drops_and_counts() {
        let ring = BlockRing::new(2, 4).unwrap();

        assert!(ring.try_push(&block(1)));
        assert!(ring.try_push(&block(2)));
        assert!(!ring.try_push(&block(3)));
        assert!(!ring.try_push(&block(4)));

        assert_eq!(ring.overflow_count(), 2);
        assert_eq!(ring.len(), 2);

        // Oldest data survives
        let mut out = [0u8; 4];
        assert!(ring.try_pop(&mut out));
        assert_eq!(out, [1u8; 4]);
    }

    #[test]
    fn test_ring_rejects_wrong_size_block() {
        let ring = BlockRing::new(2, 4).unwrap();
        assert!(!ring.try_push(&[0u8; 3]));
        assert_eq!(ring.overflow_count(), 0);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_pop_timeout_expires() {
        let ring = BlockRing::new(2, 4).unwrap();
        let mut out = [0u8; 4];

        let started = Instant::now();
        assert!(!ring.pop_timeout(&mut out, Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_ring_pop_wakes_on_push() {
        let ring = Arc::new(BlockRing::new(2, 4).unwrap());
        let producer = ring.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.try_push(&block(7))
        });

        let mut out = [0u8; 4];
        assert!(ring.pop_timeout(&mut out, Duration::from_secs(2)));
        assert_eq!(out, [7u8; 4]);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_ring_rejects_zero_capacity() {
        assert!(matches!(
            BlockRing::new(0, 4),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            BlockRing::new(usize::MAX, 2),
            Err(PipelineError::OutOfResources(_))
        ));
    }

    #[test]
    fn test_jitter_queue_fifo_and_drop() {
        let queue = JitterQueue::new(2).unwrap();

        assert!(queue.try_push(AudioPacket::new(1, 0)));
        assert!(queue.try_push(AudioPacket::new(2, 0)));
        assert!(!queue.try_push(AudioPacket::new(3, 0)));
        assert_eq!(queue.dropped_count(), 1);

        assert_eq!(queue.try_pop().unwrap().sequence, 1);
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(5)).unwrap().sequence,
            2
        );
        assert!(queue.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_jitter_queue_clear() {
        let queue = JitterQueue::new(4).unwrap();
        queue.try_push(AudioPacket::new(1, 0));
        queue.try_push(AudioPacket::new(2, 0));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 4);
    }
}
