//! Error types for the audio streaming nodes

use thiserror::Error;

use crate::codec::DeviceState;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec device (VS1053) errors
///
/// Data-ready timeouts are not represented here: they are logged and counted
/// by the driver, and the transfer goes ahead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Hardware not responding: {0}")]
    HardwareNotResponding(String),

    #[error("Operation {op} not allowed in state {state:?}")]
    InvalidState { op: &'static str, state: DeviceState },

    #[error("Unsupported stream profile: {0}")]
    InvalidProfile(String),
}

/// Pipeline lifecycle errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline already running")]
    AlreadyRunning,

    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Out of resources: {0}")]
    OutOfResources(String),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Device error: {0}")]
    Device(#[from] CodecError),

    #[error("Codec device or network endpoint lost by a failed worker thread")]
    DeviceUnavailable,
}

/// Network boundary errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Wire format errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed packet: {0} bytes")]
    Malformed(usize),

    #[error("Bad session magic: {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported session version: {0}")]
    UnsupportedVersion(u16),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(u16),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
