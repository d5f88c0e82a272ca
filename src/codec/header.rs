//! Streaming RIFF/WAVE header that primes the VS1053 IMA ADPCM decoder.
//!
//! The decoder needs a container header before the first block or it
//! mis-parses the block stream. Both RIFF and data lengths carry the
//! "unknown length" marker since the stream never ends.

use bytes::BufMut;

use super::registers::{WAV_FORMAT_IMA_ADPCM, WAV_STREAMING_LENGTH};

/// Bytes sent to the data channel
pub const BOOTSTRAP_HEADER_LEN: usize = 48;

/// IMA ADPCM sample resolution
pub const BITS_PER_SAMPLE: u16 = 4;

/// `nBlockAlign` advertised to the decoder
pub const HEADER_BLOCK_ALIGN: u16 = 256;

/// `wSamplesPerBlock` advertised to the decoder
pub const HEADER_SAMPLES_PER_BLOCK: u16 = 256;

/// Size of the IMA ADPCM `fmt ` chunk body (16 + cbSize field + 2 extra bytes)
const FMT_CHUNK_LEN: u32 = 20;

/// Fields of the `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub samples_per_block: u16,
}

impl BootstrapHeader {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        let byte_rate =
            u64::from(sample_rate) * u64::from(channels) * u64::from(BITS_PER_SAMPLE) / 8;

        Self {
            channels: u16::from(channels),
            sample_rate,
            byte_rate: u32::try_from(byte_rate).unwrap_or(u32::MAX),
            block_align: HEADER_BLOCK_ALIGN,
            bits_per_sample: BITS_PER_SAMPLE,
            samples_per_block: HEADER_SAMPLES_PER_BLOCK,
        }
    }

    pub fn to_bytes(&self) -> [u8; BOOTSTRAP_HEADER_LEN] {
        let mut out = [0u8; BOOTSTRAP_HEADER_LEN];
        let mut buf = &mut out[..];

        buf.put_slice(b"RIFF");
        buf.put_u32_le(WAV_STREAMING_LENGTH);
        buf.put_slice(b"WAVE");

        buf.put_slice(b"fmt ");
        buf.put_u32_le(FMT_CHUNK_LEN);
        buf.put_u16_le(WAV_FORMAT_IMA_ADPCM);
        buf.put_u16_le(self.channels);
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(self.byte_rate);
        buf.put_u16_le(self.block_align);
        buf.put_u16_le(self.bits_per_sample);
        // cbSize, then the one extra field it announces
        buf.put_u16_le(2);
        buf.put_u16_le(self.samples_per_block);

        buf.put_slice(b"data");
        buf.put_u32_le(WAV_STREAMING_LENGTH);

        out
    }

    /// Read back the `fmt ` fields of an emitted header
    pub fn parse(bytes: &[u8; BOOTSTRAP_HEADER_LEN]) -> Option<Self> {
        if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" || &bytes[12..16] != b"fmt " {
            return None;
        }
        if &bytes[40..44] != b"data" {
            return None;
        }

        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        if u16_at(20) != WAV_FORMAT_IMA_ADPCM {
            return None;
        }

        Some(Self {
            channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            samples_per_block: u16_at(38),
        })
    }
}

/// Header bytes for the given stream profile
pub fn bootstrap_header(sample_rate: u32, channels: u8) -> [u8; BOOTSTRAP_HEADER_LEN] {
    BootstrapHeader::new(sample_rate, channels).to_bytes()
}
