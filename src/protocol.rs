//! Wire protocol for node-to-node audio
//!
//! Every audio packet has the same size: a 12-byte little-endian header
//! followed by exactly [`BLOCKS_PER_PACKET`] ADPCM blocks. There is no length
//! field; a datagram of any other size is malformed.
//!
//! ```text
//! 0        4            8        10         12                      12 + N*B
//! ┌────────┬────────────┬────────┬──────────┬───────────────────────┐
//! │  seq   │timestamp_us│ flags  │ reserved │ block 0 | ... | N - 1 │
//! └────────┴────────────┴────────┴──────────┴───────────────────────┘
//! ```
//!
//! A packet with [`PacketFlags::CONFIG`] set carries a [`SessionConfig`] at the
//! start of its payload instead of audio. Receivers also accept the legacy
//! payload-only framing (a datagram of exactly [`PACKET_PAYLOAD_SIZE`] bytes).

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ADPCM_BLOCK_SIZE_BYTES, ADPCM_SAMPLES_PER_BLOCK, AUDIO_PACKET_SIZE, BLOCKS_PER_PACKET,
    CODEC_ADPCM_IMA, PACKET_PAYLOAD_SIZE, SESSION_CONFIG_SIZE, SESSION_MAGIC, SESSION_VERSION,
};
use crate::error::ProtocolError;

/// Packet header flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PacketFlags(u16);

impl PacketFlags {
    /// Payload carries a [`SessionConfig`]
    pub const CONFIG: Self = Self(0x0001);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keep unknown bits so they survive a decode/encode pass
    pub const fn from_bits_retain(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// One-time session description sent ahead of the audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub magic: u32,
    pub version: u16,
    pub codec: u16,
    pub sample_rate: u32,
    pub channels: u8,
    pub samples_per_block: u16,
    pub block_align: u16,
}

impl SessionConfig {
    /// Session description for the compiled-in ADPCM profile
    pub fn for_profile(sample_rate: u32, channels: u8) -> Self {
        Self {
            magic: SESSION_MAGIC,
            version: SESSION_VERSION,
            codec: CODEC_ADPCM_IMA,
            sample_rate,
            channels,
            samples_per_block: ADPCM_SAMPLES_PER_BLOCK,
            block_align: ADPCM_BLOCK_SIZE_BYTES as u16,
        }
    }

    /// Write the 20-byte wire form. Reserved fields are always zero.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.magic);
        buf.put_u16_le(self.version);
        buf.put_u16_le(self.codec);
        buf.put_u32_le(self.sample_rate);
        buf.put_u8(self.channels);
        buf.put_u8(0);
        buf.put_u16_le(self.samples_per_block);
        buf.put_u16_le(self.block_align);
        buf.put_u16_le(0);
    }

    /// Read the wire form without validating it
    pub fn decode(mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < SESSION_CONFIG_SIZE {
            return Err(ProtocolError::Malformed(bytes.len()));
        }

        let magic = bytes.get_u32_le();
        let version = bytes.get_u16_le();
        let codec = bytes.get_u16_le();
        let sample_rate = bytes.get_u32_le();
        let channels = bytes.get_u8();
        let _reserved1 = bytes.get_u8();
        let samples_per_block = bytes.get_u16_le();
        let block_align = bytes.get_u16_le();
        let _reserved2 = bytes.get_u16_le();

        Ok(Self {
            magic,
            version,
            codec,
            sample_rate,
            channels,
            samples_per_block,
            block_align,
        })
    }

    /// Check the fields a receiver was compiled to expect
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != SESSION_MAGIC {
            return Err(ProtocolError::BadMagic(self.magic));
        }
        if self.version != SESSION_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        if self.codec != CODEC_ADPCM_IMA {
            return Err(ProtocolError::UnsupportedCodec(self.codec));
        }
        Ok(())
    }
}

/// Fixed-size audio packet
#[derive(Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Monotonic per sender, wraps
    pub sequence: u32,
    /// Capture time in microseconds, wraps
    pub timestamp_us: u32,
    pub flags: PacketFlags,
    /// Exactly `BLOCKS_PER_PACKET` encoded blocks
    pub payload: [u8; PACKET_PAYLOAD_SIZE],
}

impl AudioPacket {
    /// Packet with a zeroed (silent) payload
    pub fn new(sequence: u32, timestamp_us: u32) -> Self {
        Self {
            sequence,
            timestamp_us,
            flags: PacketFlags::empty(),
            payload: [0u8; PACKET_PAYLOAD_SIZE],
        }
    }

    /// Wrap a payload-only (legacy) frame
    pub fn from_payload(
        sequence: u32,
        timestamp_us: u32,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        let payload: [u8; PACKET_PAYLOAD_SIZE] = payload
            .try_into()
            .map_err(|_| ProtocolError::Malformed(payload.len()))?;

        Ok(Self {
            sequence,
            timestamp_us,
            flags: PacketFlags::empty(),
            payload,
        })
    }

    /// Config-carrying packet
    pub fn session(config: &SessionConfig, sequence: u32, timestamp_us: u32) -> Self {
        let mut packet = Self::new(sequence, timestamp_us);
        packet.flags.insert(PacketFlags::CONFIG);
        config.encode(&mut &mut packet.payload[..]);
        packet
    }

    pub fn is_session(&self) -> bool {
        self.flags.contains(PacketFlags::CONFIG)
    }

    /// Block `index` of the payload
    pub fn block(&self, index: usize) -> &[u8] {
        let start = index * ADPCM_BLOCK_SIZE_BYTES;
        &self.payload[start..start + ADPCM_BLOCK_SIZE_BYTES]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * ADPCM_BLOCK_SIZE_BYTES;
        &mut self.payload[start..start + ADPCM_BLOCK_SIZE_BYTES]
    }

    /// Payload blocks in order
    pub fn blocks(&self) -> impl Iterator<Item = &[u8]> {
        self.payload.chunks_exact(ADPCM_BLOCK_SIZE_BYTES)
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.timestamp_us);
        buf.put_u16_le(self.flags.bits());
        buf.put_u16_le(0);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(AUDIO_PACKET_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a full packet; any length other than [`AUDIO_PACKET_SIZE`] is malformed
    pub fn decode(mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != AUDIO_PACKET_SIZE {
            return Err(ProtocolError::Malformed(bytes.len()));
        }

        let sequence = bytes.get_u32_le();
        let timestamp_us = bytes.get_u32_le();
        let flags = PacketFlags::from_bits_retain(bytes.get_u16_le());
        let _reserved = bytes.get_u16_le();

        let mut payload = [0u8; PACKET_PAYLOAD_SIZE];
        bytes.copy_to_slice(&mut payload);

        Ok(Self {
            sequence,
            timestamp_us,
            flags,
            payload,
        })
    }

    /// Session config carried in the payload, validated
    pub fn session_config(&self) -> Result<SessionConfig, ProtocolError> {
        let config = SessionConfig::decode(&self.payload)?;
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for AudioPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioPacket")
            .field("sequence", &self.sequence)
            .field("timestamp_us", &self.timestamp_us)
            .field("flags", &self.flags)
            .field("blocks", &BLOCKS_PER_PACKET)
            .finish()
    }
}

/// A classified inbound datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Headered audio packet
    Audio(AudioPacket),
    /// Valid session description
    Session(SessionConfig),
    /// Payload-only framing, no header
    Legacy(Box<[u8; PACKET_PAYLOAD_SIZE]>),
}

impl Frame {
    /// Classify a datagram by its length and header flags
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match bytes.len() {
            AUDIO_PACKET_SIZE => {
                let packet = AudioPacket::decode(bytes)?;
                if packet.is_session() {
                    packet.session_config().map(Frame::Session)
                } else {
                    Ok(Frame::Audio(packet))
                }
            }
            PACKET_PAYLOAD_SIZE => {
                let mut payload = Box::new([0u8; PACKET_PAYLOAD_SIZE]);
                payload.copy_from_slice(bytes);
                Ok(Frame::Legacy(payload))
            }
            len => Err(ProtocolError::Malformed(len)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packet_header_layout() {
        let mut packet = AudioPacket::new(0x0403_0201, 0x0807_0605);
        packet.payload[0] = 0xAA;
        packet.payload[PACKET_PAYLOAD_SIZE - 1] = 0xBB;

        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), AUDIO_PACKET_SIZE);
        assert_eq!(&bytes[..12], &[1u8, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0]);
        assert_eq!(bytes[12], 0xAA);
        assert_eq!(bytes[AUDIO_PACKET_SIZE - 1], 0xBB);
    }

    #[test]
    fn test_packet_decode() {
        let mut packet = AudioPacket::new(42, 1_000);
        packet.block_mut(1).fill(7);

        let decoded = AudioPacket::decode(&packet.to_bytes()).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.block(0).iter().all(|&b| b == 0));
        assert!(decoded.block(1).iter().all(|&b| b == 7));
        assert_eq!(decoded.blocks().count(), BLOCKS_PER_PACKET);
    }

    #[test]
    fn test_reserved_ignored_on_receive() {
        let mut bytes = AudioPacket::new(9, 9).to_bytes().to_vec();
        bytes[10] = 0xFF;
        bytes[11] = 0xFF;

        let decoded = AudioPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.sequence, 9);

        // reserved is zeroed again on the way out
        assert_eq!(&decoded.to_bytes()[10..12], &[0, 0]);
    }

    #[test]
    fn test_short_packet_is_malformed() {
        let bytes = AudioPacket::new(1, 1).to_bytes();
        assert_eq!(
            AudioPacket::decode(&bytes[..AUDIO_PACKET_SIZE - 1]),
            Err(ProtocolError::Malformed(AUDIO_PACKET_SIZE - 1))
        );
    }

    #[test]
    fn test_session_frame() {
        let config = SessionConfig::for_profile(48_000, 1);
        let packet = AudioPacket::session(&config, 0, 0);

        let bytes = packet.to_bytes();
        assert_eq!(&bytes[8..10], &[1u8, 0]);
        assert_eq!(&bytes[12..16], &SESSION_MAGIC.to_le_bytes());

        assert_eq!(Frame::parse(&bytes), Ok(Frame::Session(config)));
    }

    #[test]
    fn test_session_magic_bit_flip_rejected() {
        let mut config = SessionConfig::for_profile(48_000, 1);
        config.magic ^= 0x0000_0100;
        let bytes = AudioPacket::session(&config, 0, 0).to_bytes();

        assert_eq!(
            Frame::parse(&bytes),
            Err(ProtocolError::BadMagic(SESSION_MAGIC ^ 0x0000_0100))
        );
    }

    #[test]
    fn test_session_version_mismatch_rejected() {
        let mut config = SessionConfig::for_profile(48_000, 1);
        config.version = SESSION_VERSION + 1;
        let bytes = AudioPacket::session(&config, 0, 0).to_bytes();

        assert_eq!(
            Frame::parse(&bytes),
            Err(ProtocolError::UnsupportedVersion(SESSION_VERSION + 1))
        );
    }

    #[test]
    fn test_legacy_frame() {
        let payload = [3u8; PACKET_PAYLOAD_SIZE];
        match Frame::parse(&payload).unwrap() {
            Frame::Legacy(p) => assert_eq!(*p, payload),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn unexpected_lengths_are_malformed(len in 0usize..600) {
            prop_assume!(len != AUDIO_PACKET_SIZE && len != PACKET_PAYLOAD_SIZE);
            let bytes = vec![0u8; len];
            prop_assert_eq!(Frame::parse(&bytes), Err(ProtocolError::Malformed(len)));
        }

        #[test]
        fn audio_packets_parse_as_audio(seq: u32, ts: u32, fill: u8, flags in 0u16..u16::MAX) {
            let mut packet = AudioPacket::new(seq, ts);
            packet.flags = PacketFlags::from_bits_retain(flags & !PacketFlags::CONFIG.bits());
            packet.payload.fill(fill);

            prop_assert_eq!(Frame::parse(&packet.to_bytes()), Ok(Frame::Audio(packet)));
        }
    }
}
