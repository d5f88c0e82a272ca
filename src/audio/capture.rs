//! Transmit pipeline
//!
//! Two worker threads per run. The block reader polls the codec and pushes
//! every full encoded block into a [`BlockRing`]; the packet sender pulls
//! blocks back out, assembles fixed-size packets and hands them to the
//! network sink. The codec device and the sink are owned by their thread
//! while running and come back to the pipeline on stop.

use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::buffer::BlockRing;
use crate::audio::join_worker;
use crate::audio::stats::{Counters, PipelineStats};
use crate::codec::AdpcmDevice;
use crate::config::{AudioConfig, TxConfig};
use crate::constants::{ADPCM_BLOCK_SIZE_BYTES, AUDIO_PACKET_SIZE, BLOCKS_PER_PACKET};
use crate::error::PipelineError;
use crate::network::PacketSink;
use crate::protocol::{AudioPacket, SessionConfig};

/// Outcome of one assembly attempt
#[derive(Debug)]
pub enum Assembly {
    Complete(AudioPacket),
    /// The ring ran dry after this many blocks; the packet was thrown away
    Partial(usize),
    /// No block arrived within the wait
    Idle,
}

/// Builds packets out of ring buffer blocks
///
/// Only complete packets consume a sequence number, so the receiver sees a
/// gap-free sequence unless the network loses something.
pub struct PacketAssembler {
    sequence: u32,
    epoch: Instant,
    block_wait: Duration,
}

impl PacketAssembler {
    pub fn new(initial_sequence: u32, block_wait: Duration) -> Self {
        Self {
            sequence: initial_sequence,
            epoch: Instant::now(),
            block_wait,
        }
    }

    /// Sequence number the next complete packet will carry
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    /// Microseconds since the assembler was created, wrapping
    pub fn timestamp_us(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }

    /// Pull exactly [`BLOCKS_PER_PACKET`] blocks, waiting up to the block
    /// wait for each one
    pub fn assemble(&mut self, ring: &BlockRing, running: &AtomicBool) -> Assembly {
        let mut packet = AudioPacket::new(self.sequence, self.timestamp_us());

        for index in 0..BLOCKS_PER_PACKET {
            let received = running.load(Ordering::Relaxed)
                && ring.pop_timeout(packet.block_mut(index), self.block_wait);

            if !received {
                return if index == 0 {
                    Assembly::Idle
                } else {
                    Assembly::Partial(index)
                };
            }
        }

        self.sequence = self.sequence.wrapping_add(1);
        Assembly::Complete(packet)
    }
}

/// Codec to network pipeline
pub struct TxPipeline<D, S>
where
    D: AdpcmDevice + Send + 'static,
    S: PacketSink + Send + 'static,
{
    audio: AudioConfig,
    config: TxConfig,
    ring: Arc<BlockRing>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    device: Option<D>,
    sink: Option<S>,
    reader: Option<JoinHandle<D>>,
    sender: Option<JoinHandle<S>>,
}

impl<D, S> TxPipeline<D, S>
where
    D: AdpcmDevice + Send + 'static,
    S: PacketSink + Send + 'static,
{
    /// Take ownership of the codec and sink and allocate the ring buffer
    pub fn init(
        device: D,
        sink: S,
        audio: AudioConfig,
        config: TxConfig,
    ) -> Result<Self, PipelineError> {
        let ring = BlockRing::new(config.ring_blocks, ADPCM_BLOCK_SIZE_BYTES)?;

        info!(
            "TX pipeline initialized: {}Hz, {} ch, ring {} blocks",
            audio.sample_rate, audio.channels, config.ring_blocks
        );

        Ok(Self {
            audio,
            config,
            ring: Arc::new(ring),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(false)),
            device: Some(device),
            sink: Some(sink),
            reader: None,
            sender: None,
        })
    }

    /// Reallocate the ring buffer
    pub fn reset_buffers(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        self.ring = Arc::new(BlockRing::new(
            self.config.ring_blocks,
            ADPCM_BLOCK_SIZE_BYTES,
        )?);
        Ok(())
    }

    /// Put the codec into recording and launch both worker threads
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }

        let (mut device, sink) = match (self.device.take(), self.sink.take()) {
            (Some(device), Some(sink)) => (device, sink),
            (device, sink) => {
                self.device = device;
                self.sink = sink;
                return Err(PipelineError::DeviceUnavailable);
            }
        };

        if let Err(e) = device.start_adpcm_record(self.audio.sample_rate, self.audio.stereo()) {
            error!("Failed to start recording: {}", e);
            Counters::bump(&self.counters.device_errors);
            self.device = Some(device);
            self.sink = Some(sink);
            return Err(e.into());
        }

        self.ring.clear();
        self.running.store(true, Ordering::SeqCst);

        let reader = {
            let ring = self.ring.clone();
            let counters = self.counters.clone();
            let running = self.running.clone();
            let poll = self.config.poll_interval();
            thread::Builder::new()
                .name("tx-block-reader".into())
                .spawn(move || read_blocks(device, &ring, &counters, &running, poll))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.sink = Some(sink);
                return Err(PipelineError::OutOfResources(e.to_string()));
            }
        };

        let sender = {
            let ring = self.ring.clone();
            let counters = self.counters.clone();
            let running = self.running.clone();
            let assembler =
                PacketAssembler::new(self.config.initial_sequence, self.config.block_wait());
            let session = self
                .config
                .announce_session
                .then(|| SessionConfig::for_profile(self.audio.sample_rate, self.audio.channels));
            thread::Builder::new()
                .name("tx-packet-sender".into())
                .spawn(move || send_packets(sink, assembler, session, &ring, &counters, &running))
        };
        match sender {
            Ok(handle) => {
                self.reader = Some(reader);
                self.sender = Some(handle);
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                if let Some(mut device) = join_worker(reader, "tx-block-reader") {
                    let _ = device.stop();
                    self.device = Some(device);
                }
                return Err(PipelineError::OutOfResources(e.to_string()));
            }
        }

        info!("TX pipeline started");
        Ok(())
    }

    /// Signal both threads, let in-flight transfers finish, then stop the codec
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::NotRunning);
        }

        thread::sleep(self.config.stop_grace());

        let device = self
            .reader
            .take()
            .and_then(|handle| join_worker(handle, "tx-block-reader"));
        self.sink = self
            .sender
            .take()
            .and_then(|handle| join_worker(handle, "tx-packet-sender"));

        let mut device = device.ok_or(PipelineError::DeviceUnavailable)?;
        let result = device.stop();
        self.device = Some(device);

        if let Err(e) = result {
            error!("Failed to stop recording: {}", e);
            Counters::bump(&self.counters.device_errors);
            return Err(e.into());
        }

        info!("TX pipeline stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> PipelineStats {
        let mut stats = self.counters.snapshot(self.is_running());
        stats.blocks_dropped = self.ring.overflow_count();
        stats.buffer_fill = self.ring.len();
        stats.buffer_capacity = self.ring.capacity();
        stats
    }

    /// The codec, while stopped
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Stop if needed and give back the codec and sink
    pub fn into_parts(mut self) -> Result<(D, S), PipelineError> {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("TX pipeline did not stop cleanly: {}", e);
            }
        }
        match (self.device.take(), self.sink.take()) {
            (Some(device), Some(sink)) => Ok((device, sink)),
            _ => Err(PipelineError::DeviceUnavailable),
        }
    }
}

impl<D, S> Drop for TxPipeline<D, S>
where
    D: AdpcmDevice + Send + 'static,
    S: PacketSink + Send + 'static,
{
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn read_blocks<D: AdpcmDevice>(
    mut device: D,
    ring: &BlockRing,
    counters: &Counters,
    running: &AtomicBool,
    poll: Duration,
) -> D {
    let mut block = [0u8; ADPCM_BLOCK_SIZE_BYTES];
    let mut seen_errors = device.transfer_errors();
    debug!("Block reader started");

    while running.load(Ordering::Relaxed) {
        let len = device.read_adpcm_block(&mut block);

        let errors = device.transfer_errors();
        if errors > seen_errors {
            counters
                .device_errors
                .fetch_add(errors - seen_errors, Ordering::Relaxed);
            seen_errors = errors;
        }

        if len == ADPCM_BLOCK_SIZE_BYTES {
            // Dropped blocks are counted by the ring, not here
            if ring.try_push(&block) {
                Counters::bump(&counters.blocks_produced);
            } else {
                warn!("Ring buffer full, dropping block");
            }
        } else if len > 0 {
            Counters::bump(&counters.short_reads);
        }

        thread::sleep(poll);
    }

    debug!("Block reader exiting");
    device
}

fn send_packets<S: PacketSink>(
    mut sink: S,
    mut assembler: PacketAssembler,
    session: Option<SessionConfig>,
    ring: &BlockRing,
    counters: &Counters,
    running: &AtomicBool,
) -> S {
    let mut buf = BytesMut::with_capacity(AUDIO_PACKET_SIZE);
    debug!("Packet sender started");

    if let Some(config) = session {
        let packet =
            AudioPacket::session(&config, assembler.next_sequence(), assembler.timestamp_us());
        packet.encode(&mut buf);
        match sink.send(&buf) {
            Ok(()) => info!(
                "Session announced: {}Hz, {} ch",
                config.sample_rate, config.channels
            ),
            Err(e) => {
                Counters::bump(&counters.send_errors);
                warn!("Failed to announce session: {}", e);
            }
        }
    }

    while running.load(Ordering::Relaxed) {
        match assembler.assemble(ring, running) {
            Assembly::Complete(packet) => {
                buf.clear();
                packet.encode(&mut buf);
                match sink.send(&buf) {
                    Ok(()) => Counters::bump(&counters.packets_sent),
                    Err(e) => {
                        Counters::bump(&counters.send_errors);
                        debug!("Send failed for packet {}: {}", packet.sequence, e);
                    }
                }
            }
            Assembly::Partial(blocks) => {
                Counters::bump(&counters.packets_discarded);
                debug!(
                    "Discarding partial packet ({} of {} blocks)",
                    blocks, BLOCKS_PER_PACKET
                );
            }
            Assembly::Idle => {}
        }
    }

    debug!("Packet sender exiting");
    sink
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{wait_for, CollectSink, MockDevice};
    use crate::codec::DeviceState;
    use crate::protocol::Frame;

    fn tx_config() -> TxConfig {
        TxConfig {
            block_wait_ms: 50,
            poll_interval_us: 200,
            stop_grace_ms: 5,
            initial_sequence: 5,
            ..TxConfig::default()
        }
    }

    fn fill_ring(ring: &BlockRing, count: u8) {
        for fill in 0..count {
            assert!(ring.try_push(&[fill; ADPCM_BLOCK_SIZE_BYTES]));
        }
    }

    #[test]
    fn test_assembler_emits_only_whole_packets() {
        let ring = BlockRing::new(16, ADPCM_BLOCK_SIZE_BYTES).unwrap();
        let running = AtomicBool::new(true);
        let mut assembler = PacketAssembler::new(10, Duration::from_millis(5));

        fill_ring(&ring, 7);

        let mut packets = Vec::new();
        loop {
            match assembler.assemble(&ring, &running) {
                Assembly::Complete(packet) => packets.push(packet),
                Assembly::Partial(blocks) => {
                    assert_eq!(blocks, 1);
                    break;
                }
                Assembly::Idle => panic!("ring drained without a partial packet"),
            }
        }

        assert_eq!(packets.len(), 7 / BLOCKS_PER_PACKET);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.sequence, 10 + i as u32);
            assert_eq!(packet.block(0)[0], (2 * i) as u8);
            assert_eq!(packet.block(1)[0], (2 * i + 1) as u8);
        }

        // The discarded remainder did not use up a sequence number
        assert_eq!(assembler.next_sequence(), 13);
        assert!(matches!(assembler.assemble(&ring, &running), Assembly::Idle));
    }

    #[test]
    fn test_assembler_sequence_wraps() {
        let ring = BlockRing::new(8, ADPCM_BLOCK_SIZE_BYTES).unwrap();
        let running = AtomicBool::new(true);
        let mut assembler = PacketAssembler::new(u32::MAX, Duration::from_millis(5));

        fill_ring(&ring, 4);

        let first = assembler.assemble(&ring, &running);
        let second = assembler.assemble(&ring, &running);
        assert!(matches!(first, Assembly::Complete(p) if p.sequence == u32::MAX));
        assert!(matches!(second, Assembly::Complete(p) if p.sequence == 0));
    }

    #[test]
    fn test_assembler_stops_when_not_running() {
        let ring = BlockRing::new(8, ADPCM_BLOCK_SIZE_BYTES).unwrap();
        let running = AtomicBool::new(false);
        let mut assembler = PacketAssembler::new(0, Duration::from_millis(5));

        fill_ring(&ring, 2);
        assert!(matches!(assembler.assemble(&ring, &running), Assembly::Idle));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_pipeline_streams_recorded_blocks() {
        let (device, log) = MockDevice::new();
        let device = device.with_recorded_blocks(7);
        let sink = CollectSink::default();
        let sent = sink.sent.clone();

        let mut tx = TxPipeline::init(device, sink, AudioConfig::default(), tx_config()).unwrap();
        tx.start().unwrap();
        assert!(tx.is_running());

        assert!(wait_for(|| tx.get_stats().packets_sent == 3));
        assert!(wait_for(|| tx.get_stats().packets_discarded == 1));
        tx.stop().unwrap();

        let stats = tx.get_stats();
        assert!(!stats.running);
        assert_eq!(stats.blocks_produced, 7);
        assert_eq!(stats.blocks_dropped, 0);
        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.buffer_capacity, 32);

        let sent = sent.lock();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|d| d.len() == AUDIO_PACKET_SIZE));

        // Session announcement first, without consuming a sequence number
        match Frame::parse(&sent[0]).unwrap() {
            Frame::Session(config) => assert_eq!(config.sample_rate, 48_000),
            other => panic!("expected session frame, got {:?}", other),
        }
        let sequences: Vec<u32> = sent[1..]
            .iter()
            .map(|d| AudioPacket::decode(d).unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![5, 6, 7]);

        let log = log.lock();
        assert_eq!(log.record_starts, 1);
        assert_eq!(log.stops, 1);
        drop(log);
        assert_eq!(tx.device().map(|d| d.state()), Some(DeviceState::Idle));
    }

    #[test]
    fn test_read_errors_counted_and_recording_resumes() {
        let (device, _log) = MockDevice::new();
        let device = device.failing_reads(3).with_recorded_blocks(2);
        let config = TxConfig {
            announce_session: false,
            ..tx_config()
        };

        let mut tx =
            TxPipeline::init(device, CollectSink::default(), AudioConfig::default(), config)
                .unwrap();
        tx.start().unwrap();
        assert!(wait_for(|| tx.get_stats().packets_sent == 1));
        tx.stop().unwrap();

        let stats = tx.get_stats();
        assert_eq!(stats.device_errors, 3);
        assert_eq!(stats.blocks_produced, 2);
    }

    #[test]
    fn test_dropped_blocks_not_counted_as_produced() {
        let (device, _log) = MockDevice::new();
        let mut device = device.with_recorded_blocks(5);
        device.start_adpcm_record(48_000, false).unwrap();

        let ring = Arc::new(BlockRing::new(2, ADPCM_BLOCK_SIZE_BYTES).unwrap());
        let counters = Arc::new(Counters::default());
        let running = Arc::new(AtomicBool::new(true));

        let reader = {
            let (ring, counters, running) = (ring.clone(), counters.clone(), running.clone());
            thread::spawn(move || {
                read_blocks(device, &ring, &counters, &running, Duration::from_micros(100))
            })
        };
        assert!(wait_for(|| ring.overflow_count() == 3));
        running.store(false, Ordering::SeqCst);
        reader.join().unwrap();

        let stats = counters.snapshot(false);
        assert_eq!(stats.blocks_produced, 2);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_session_announcement_can_be_disabled() {
        let (device, _log) = MockDevice::new();
        let sink = CollectSink::default();
        let sent = sink.sent.clone();
        let config = TxConfig {
            announce_session: false,
            ..tx_config()
        };

        let mut tx = TxPipeline::init(
            device.with_recorded_blocks(2),
            sink,
            AudioConfig::default(),
            config,
        )
        .unwrap();
        tx.start().unwrap();
        assert!(wait_for(|| tx.get_stats().packets_sent == 1));
        tx.stop().unwrap();

        let sent = sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(matches!(Frame::parse(&sent[0]), Ok(Frame::Audio(_))));
    }

    #[test]
    fn test_start_and_stop_are_not_repeatable() {
        let (device, _log) = MockDevice::new();
        let mut tx = TxPipeline::init(
            device,
            CollectSink::default(),
            AudioConfig::default(),
            tx_config(),
        )
        .unwrap();

        assert!(matches!(tx.stop(), Err(PipelineError::NotRunning)));

        tx.start().unwrap();
        assert!(matches!(tx.start(), Err(PipelineError::AlreadyRunning)));
        assert!(tx.is_running());

        tx.stop().unwrap();
        assert!(matches!(tx.stop(), Err(PipelineError::NotRunning)));

        // Restartable once stopped
        tx.start().unwrap();
        tx.stop().unwrap();
    }

    #[test]
    fn test_failed_start_leaves_pipeline_stopped() {
        let (device, log) = MockDevice::new();
        let mut tx = TxPipeline::init(
            device.failing_start(),
            CollectSink::default(),
            AudioConfig::default(),
            tx_config(),
        )
        .unwrap();

        assert!(matches!(tx.start(), Err(PipelineError::Device(_))));
        assert!(!tx.is_running());
        assert_eq!(tx.get_stats().device_errors, 1);
        assert_eq!(log.lock().record_starts, 0);

        let (device, _sink) = tx.into_parts().unwrap();
        assert_eq!(device.state(), DeviceState::Idle);
    }

    #[test]
    fn test_reset_buffers_refused_while_running() {
        let (device, _log) = MockDevice::new();
        let mut tx = TxPipeline::init(
            device,
            CollectSink::default(),
            AudioConfig::default(),
            tx_config(),
        )
        .unwrap();

        tx.reset_buffers().unwrap();
        tx.start().unwrap();
        assert!(matches!(
            tx.reset_buffers(),
            Err(PipelineError::AlreadyRunning)
        ));
        tx.stop().unwrap();
    }

    #[test]
    fn test_init_rejects_empty_ring() {
        let (device, _log) = MockDevice::new();
        let config = TxConfig {
            ring_blocks: 0,
            ..tx_config()
        };
        assert!(matches!(
            TxPipeline::init(device, CollectSink::default(), AudioConfig::default(), config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
