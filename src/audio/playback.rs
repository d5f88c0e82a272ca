//! Receive pipeline
//!
//! Inbound packets enter through [`PacketInbox::on_packet`] (or
//! [`RxPipeline::poll_network`], which classifies raw datagrams first) and
//! wait in a bounded [`JitterQueue`]. A single playback thread feeds them to
//! the codec in arrival order, priming the decoder with the bootstrap header
//! once per run.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::buffer::JitterQueue;
use crate::audio::join_worker;
use crate::audio::stats::{Counters, PipelineStats};
use crate::codec::AdpcmDevice;
use crate::config::{AudioConfig, RxConfig, UnderrunPolicy};
use crate::error::{NetworkError, PipelineError, ProtocolError};
use crate::network::{PacketSource, RecvStatus};
use crate::protocol::{AudioPacket, Frame, SessionConfig};

/// Datagrams longer than a packet must still be seen in full to be rejected
const RECV_BUFFER_SIZE: usize = 2048;

struct RxShared {
    running: AtomicBool,
    queue: RwLock<Arc<JitterQueue>>,
    counters: Counters,
}

/// Cloneable entry point for inbound packets, usable from any thread
#[derive(Clone)]
pub struct PacketInbox {
    shared: Arc<RxShared>,
}

impl PacketInbox {
    /// Queue a packet for playback without blocking.
    ///
    /// Does nothing while the pipeline is stopped. A full jitter queue drops
    /// the packet and counts it.
    pub fn on_packet(&self, packet: AudioPacket) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }

        Counters::bump(&self.shared.counters.packets_received);
        let sequence = packet.sequence;
        if !self.shared.queue.read().try_push(packet) {
            warn!("Jitter queue full, dropping packet {}", sequence);
        }
    }
}

/// Network to codec pipeline
pub struct RxPipeline<D, R>
where
    D: AdpcmDevice + Send + 'static,
    R: PacketSource,
{
    audio: AudioConfig,
    config: RxConfig,
    shared: Arc<RxShared>,
    device: Option<D>,
    source: Option<R>,
    player: Option<JoinHandle<D>>,
    recv_buf: Vec<u8>,
    legacy_sequence: u32,
    epoch: Instant,
    peer_session: Option<SessionConfig>,
}

impl<D, R> RxPipeline<D, R>
where
    D: AdpcmDevice + Send + 'static,
    R: PacketSource,
{
    /// Take ownership of the codec and source and allocate the jitter queue
    pub fn init(
        device: D,
        source: R,
        audio: AudioConfig,
        config: RxConfig,
    ) -> Result<Self, PipelineError> {
        let queue = JitterQueue::new(config.jitter_packets)?;

        info!(
            "RX pipeline initialized: {}Hz, {} ch, jitter queue {} packets, underrun {:?}",
            audio.sample_rate, audio.channels, config.jitter_packets, config.underrun
        );

        Ok(Self {
            audio,
            config,
            shared: Arc::new(RxShared {
                running: AtomicBool::new(false),
                queue: RwLock::new(Arc::new(queue)),
                counters: Counters::default(),
            }),
            device: Some(device),
            source: Some(source),
            player: None,
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
            legacy_sequence: 0,
            epoch: Instant::now(),
            peer_session: None,
        })
    }

    /// Reallocate the jitter queue
    pub fn reset_buffers(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        let queue = JitterQueue::new(self.config.jitter_packets)?;
        *self.shared.queue.write() = Arc::new(queue);
        Ok(())
    }

    /// Put the codec into decoding and launch the playback thread
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }

        let mut device = self.device.take().ok_or(PipelineError::DeviceUnavailable)?;
        if let Err(e) = device.start_adpcm_decode() {
            error!("Failed to start decode: {}", e);
            Counters::bump(&self.shared.counters.device_errors);
            self.device = Some(device);
            return Err(e.into());
        }

        let queue = self.shared.queue.read().clone();
        queue.clear();
        self.shared.running.store(true, Ordering::Release);

        let player = Player {
            device,
            queue,
            shared: self.shared.clone(),
            audio: self.audio,
            config: self.config,
            header_sent: false,
            pending: None,
            buffering: self.config.prefill_packets > 0,
        };

        match thread::Builder::new()
            .name("rx-playback".into())
            .spawn(move || player.run())
        {
            Ok(handle) => self.player = Some(handle),
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(PipelineError::OutOfResources(e.to_string()));
            }
        }

        info!("RX pipeline started");
        Ok(())
    }

    /// Signal the playback thread, let it finish its write, then stop the codec
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return Err(PipelineError::NotRunning);
        }

        thread::sleep(self.config.stop_grace());

        let mut device = self
            .player
            .take()
            .and_then(|handle| join_worker(handle, "rx-playback"))
            .ok_or(PipelineError::DeviceUnavailable)?;
        let result = device.stop();
        self.device = Some(device);

        if let Err(e) = result {
            error!("Failed to stop playback: {}", e);
            Counters::bump(&self.shared.counters.device_errors);
            return Err(e.into());
        }

        info!("RX pipeline stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Handle for delivering packets from another thread
    pub fn inbox(&self) -> PacketInbox {
        PacketInbox {
            shared: self.shared.clone(),
        }
    }

    pub fn on_packet(&self, packet: AudioPacket) {
        self.inbox().on_packet(packet);
    }

    /// Receive and dispatch at most one datagram from the source.
    ///
    /// Audio frames go to [`on_packet`](Self::on_packet); payload-only frames
    /// are wrapped with a locally assigned sequence number first. Session
    /// frames are recorded, never applied. Malformed frames and bad session
    /// configs are counted as rejected and do not affect later packets.
    pub fn poll_network(&mut self, timeout: Duration) -> Result<RecvStatus, NetworkError> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| NetworkError::ReceiveFailed("source released".into()))?;
        let status = source.recv(&mut self.recv_buf, timeout)?;
        let RecvStatus::Received(len) = status else {
            return Ok(status);
        };

        match Frame::parse(&self.recv_buf[..len]) {
            Ok(Frame::Audio(packet)) => self.on_packet(packet),
            Ok(Frame::Legacy(payload)) => {
                let timestamp_us = self.epoch.elapsed().as_micros() as u32;
                match AudioPacket::from_payload(self.legacy_sequence, timestamp_us, &payload[..]) {
                    Ok(packet) => {
                        self.legacy_sequence = self.legacy_sequence.wrapping_add(1);
                        self.on_packet(packet);
                    }
                    Err(e) => self.reject(e),
                }
            }
            Ok(Frame::Session(config)) => self.record_session(config),
            Err(e) => self.reject(e),
        }

        Ok(status)
    }

    fn reject(&self, e: ProtocolError) {
        Counters::bump(&self.shared.counters.packets_rejected);
        warn!("Rejected inbound frame: {}", e);
    }

    fn record_session(&mut self, config: SessionConfig) {
        if config.sample_rate != self.audio.sample_rate || config.channels != self.audio.channels {
            warn!(
                "Peer announced {}Hz/{} ch, playing as {}Hz/{} ch",
                config.sample_rate, config.channels, self.audio.sample_rate, self.audio.channels
            );
        } else {
            info!(
                "Peer session: {}Hz, {} ch",
                config.sample_rate, config.channels
            );
        }
        self.peer_session = Some(config);
    }

    /// Last valid session config announced by the peer
    pub fn peer_session(&self) -> Option<&SessionConfig> {
        self.peer_session.as_ref()
    }

    pub fn get_stats(&self) -> PipelineStats {
        let queue = self.shared.queue.read();
        let mut stats = self.shared.counters.snapshot(self.is_running());
        stats.packets_dropped = queue.dropped_count();
        stats.buffer_fill = queue.len();
        stats.buffer_capacity = queue.capacity();
        stats
    }

    /// The codec, while stopped
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Stop if needed and give back the codec and source
    pub fn into_parts(mut self) -> Result<(D, R), PipelineError> {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("RX pipeline did not stop cleanly: {}", e);
            }
        }
        match (self.device.take(), self.source.take()) {
            (Some(device), Some(source)) => Ok((device, source)),
            _ => Err(PipelineError::DeviceUnavailable),
        }
    }
}

impl<D, R> Drop for RxPipeline<D, R>
where
    D: AdpcmDevice + Send + 'static,
    R: PacketSource,
{
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

/// State owned by the playback thread for one run
struct Player<D> {
    device: D,
    queue: Arc<JitterQueue>,
    shared: Arc<RxShared>,
    audio: AudioConfig,
    config: RxConfig,
    header_sent: bool,
    /// Packet held back while the bootstrap header could not be written
    pending: Option<AudioPacket>,
    /// Holding playback until the queue reaches the prefill target
    buffering: bool,
}

impl<D: AdpcmDevice> Player<D> {
    fn run(mut self) -> D {
        let silence = AudioPacket::new(0, 0);
        debug!("Playback thread started");

        while self.shared.running.load(Ordering::Acquire) {
            if self.buffering && self.pending.is_none() {
                let buffered = self.queue.len();
                if buffered < self.config.prefill_packets {
                    thread::sleep(self.audio.block_duration());
                    continue;
                }
                self.buffering = false;
                debug!("Jitter queue prefilled with {} packets", buffered);
            }

            let next = match self.pending.take() {
                Some(packet) => Some(packet),
                None => self.queue.pop_timeout(self.config.packet_wait()),
            };

            match next {
                Some(packet) => {
                    if !self.ensure_header() {
                        self.pending = Some(packet);
                        thread::sleep(self.audio.block_duration());
                        continue;
                    }
                    self.write_blocks(&packet);
                }
                None => {
                    Counters::bump(&self.shared.counters.underruns);
                    debug!("Jitter queue underrun");

                    if self.config.underrun == UnderrunPolicy::Silence && self.header_sent {
                        self.write_blocks(&silence);
                    }
                    self.buffering = self.config.prefill_packets > 0;
                }
            }
        }

        debug!("Playback thread exiting");
        self.device
    }

    /// Emit the bootstrap header if this run has not done so yet
    fn ensure_header(&mut self) -> bool {
        if self.header_sent {
            return true;
        }

        match self
            .device
            .emit_bootstrap_header(self.audio.sample_rate, self.audio.channels)
        {
            Ok(()) => {
                self.header_sent = true;
                info!("Bootstrap header sent");
                true
            }
            Err(e) => {
                Counters::bump(&self.shared.counters.device_errors);
                warn!("Failed to send bootstrap header: {}", e);
                false
            }
        }
    }

    fn write_blocks(&mut self, packet: &AudioPacket) {
        for block in packet.blocks() {
            if let Err(e) = self.device.write_block(block) {
                Counters::bump(&self.shared.counters.device_errors);
                warn!("Failed to write block to codec: {}", e);
            }
        }
    }
}
