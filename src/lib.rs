//! # Meshnet Audio
//!
//! Compressed (IMA ADPCM) audio streaming between two nodes, encoded and
//! decoded by an external VS1053 codec chip.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── TX NODE ─────────────────────────────────┐
//! │  ┌──────────────┐  SCI/SDI + DREQ   ┌──────────────────────────────────┐  │
//! │  │  VS1053      │◄─────────────────►│  Vs1053 driver (codec::vs1053)   │  │
//! │  │  (recording) │                   └───────────────┬──────────────────┘  │
//! │  └──────────────┘                                   │ read_adpcm_block    │
//! │                                                     ▼                     │
//! │                                     ┌──────────────────────────────────┐  │
//! │                                     │ Block-read thread                │  │
//! │                                     └───────────────┬──────────────────┘  │
//! │                                                     ▼ try_push            │
//! │                                     ┌──────────────────────────────────┐  │
//! │                                     │ BlockRing (audio::buffer)        │  │
//! │                                     └───────────────┬──────────────────┘  │
//! │                                                     ▼ pop (bounded wait)  │
//! │                                     ┌──────────────────────────────────┐  │
//! │                                     │ Packet-assembly thread           │  │
//! │                                     │ [Seq|Timestamp|Flags|N blocks]   │  │
//! │                                     └───────────────┬──────────────────┘  │
//! └─────────────────────────────────────────────────────┼─────────────────────┘
//!                                                       │ PacketSink (UDP)
//!                                                       ▼
//! ┌──────────────────────────────── RX NODE ─────────────┼────────────────────┐
//! │                                     ┌────────────────┴─────────────────┐  │
//! │                                     │ poll_network / on_packet         │  │
//! │                                     │ (caller context, never blocks)   │  │
//! │                                     └───────────────┬──────────────────┘  │
//! │                                                     ▼ try_push            │
//! │                                     ┌──────────────────────────────────┐  │
//! │                                     │ JitterQueue (audio::buffer)      │  │
//! │                                     └───────────────┬──────────────────┘  │
//! │                                                     ▼ pop (bounded wait)  │
//! │  ┌──────────────┐                   ┌──────────────────────────────────┐  │
//! │  │  VS1053      │◄──────────────────│ Playback thread                  │  │
//! │  │  (decoding)  │  header + blocks  │ (bootstrap header once per run)  │  │
//! │  └──────────────┘                   └──────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;

pub use error::{Error, Result};

/// Protocol and profile constants
///
/// Everything that shapes the wire layout is fixed at compile time: packets
/// carry no length field.
pub mod constants {
    /// Default sample rate for the ADPCM profile
    pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

    /// Default channel count (mono line input)
    pub const DEFAULT_CHANNELS: u8 = 1;

    /// Samples encoded in one ADPCM block
    pub const ADPCM_SAMPLES_PER_BLOCK: u16 = 256;

    /// Compressed size of one ADPCM block
    pub const ADPCM_BLOCK_SIZE_BYTES: usize = 132;

    /// Encoded blocks carried by one audio packet
    pub const BLOCKS_PER_PACKET: usize = 2;

    /// seq(4) + timestamp(4) + flags(2) + reserved(2)
    pub const PACKET_HEADER_SIZE: usize = 12;

    /// Payload bytes in every audio packet
    pub const PACKET_PAYLOAD_SIZE: usize = BLOCKS_PER_PACKET * ADPCM_BLOCK_SIZE_BYTES;

    /// Total size of an audio packet on the wire
    pub const AUDIO_PACKET_SIZE: usize = PACKET_HEADER_SIZE + PACKET_PAYLOAD_SIZE;

    /// "MASD"
    pub const SESSION_MAGIC: u32 = 0x4D41_5344;

    /// Session config layout version
    pub const SESSION_VERSION: u16 = 1;

    /// Codec identifier for IMA ADPCM
    pub const CODEC_ADPCM_IMA: u16 = 1;

    /// Size of an encoded SessionConfig
    pub const SESSION_CONFIG_SIZE: usize = 20;

    /// Default TX ring capacity in blocks (~170 ms at 48 kHz)
    pub const TX_RING_BUFFER_BLOCKS: usize = 32;

    /// Default RX jitter queue capacity in packets (~85 ms at 48 kHz)
    pub const RX_JITTER_BUFFER_PKTS: usize = 8;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 3333;

    /// Duration of one ADPCM block in microseconds
    pub const fn block_duration_us(sample_rate: u32) -> u64 {
        ADPCM_SAMPLES_PER_BLOCK as u64 * 1_000_000 / sample_rate as u64
    }
}
