use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("Bluetooth is unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Radio operation failed: {reason}")]
    OperationFailed { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Packet size must be at least 1, got {packet_size}")]
    InvalidPacketSize { packet_size: usize },

    #[error("Document must be a JSON object")]
    NotAnObject,

    #[error("Failed to serialize document: {error}")]
    Serialization { error: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Received an empty frame")]
    EmptyFrame,

    #[error("Invalid frame header: {header:#04x}")]
    InvalidFrameHeader { header: u8 },

    #[error("Received a frame after the final frame")]
    FrameAfterEnd,

    #[error("Payload is incomplete after {frames} frame(s)")]
    Incomplete { frames: usize },

    #[error("Failed to parse document ({error}): {raw}")]
    InvalidDocument { raw: String, error: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("Expected event did not arrive within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Event source was closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Failed to read characteristic: {0}")]
    Radio(#[from] RadioError),

    #[error("Timed out reading packet {index}")]
    Timeout { index: usize },

    #[error("Peer exceeded the limit of {limit} packet(s)")]
    TooManyPackets { limit: usize },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Discovery must only be set up once")]
    AlreadyConfigured,

    #[error("Missing required parameter '{name}'")]
    MissingParameter { name: String },

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Discovery must be set up first")]
    NotConfigured,

    #[error("Document needs {packets} packet(s), peers read at most {limit}")]
    DocumentTooLarge { packets: usize, limit: usize },

    #[error("No async runtime available to read discovered devices")]
    NoRuntime,

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}
