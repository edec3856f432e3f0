//! Demuxing of MKV and MP4 files into elementary H.264, AC-3 and DTS
//! streams for hardware and software decoders.

pub mod avc;
pub mod bits;
pub mod codec;
pub mod color;
pub mod detect;
pub mod ebml;
pub mod error;
pub mod file;
pub mod mkv;
pub mod mp4;
pub mod queue;
pub mod reader;
pub mod source;
pub mod track;
pub mod version;

pub use error::{MediaError, Result};
pub use file::{MediaFile, open_media, parse_media};
