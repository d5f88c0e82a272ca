//! Network boundary
//!
//! The pipelines only need to send a datagram and to receive one with a
//! timeout. [`UdpLink`] provides both over UDP.

pub mod udp;

pub use udp::UdpLink;

use std::time::Duration;

use crate::error::NetworkError;

/// Outcome of one bounded receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    /// A datagram of this many bytes was copied into the buffer
    Received(usize),
    TimedOut,
}

/// Outbound datagram transport
pub trait PacketSink {
    fn send(&mut self, datagram: &[u8]) -> Result<(), NetworkError>;
}

/// Inbound datagram transport
pub trait PacketSource {
    /// Wait up to `timeout` for one datagram
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<RecvStatus, NetworkError>;
}
