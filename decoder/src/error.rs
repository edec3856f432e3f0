use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open device \"{}\": {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("memory map failed for device \"{}\": {source}", path.display())]
    DeviceMap {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("HEVC decoder failed to complete phase {phase} within {waited:?}")]
    Timeout { phase: u8, waited: Duration },

    #[error("invalid data in the scaling list: {0}")]
    InvalidScalingList(String),

    #[error("{codec} decoder failed: {message}")]
    Native { codec: &'static str, message: String },

    #[error("invalid {codec} stream: {message}")]
    Sync { codec: &'static str, message: String },

    #[error("{codec} audio stream sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch {
        codec: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("no blocks left in the frame")]
    NoBlocksLeft,

    #[error("the device does not support {0}")]
    FormatNotSupported(String),
}

pub type Result<T> = std::result::Result<T, DecoderError>;
