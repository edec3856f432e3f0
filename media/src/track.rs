use std::time::Duration;

use crate::avc::H264Params;
use crate::codec::{AudioCodec, VideoCodec};
use crate::color::ColorAttributes;

/// Chroma subsampling of the decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum ChromaFormat {
    Monochrome,
    C420,
    C422,
    C444,
}

impl ChromaFormat {
    pub fn from_idc(idc: u32) -> Option<Self> {
        Some(match idc {
            0 => ChromaFormat::Monochrome,
            1 => ChromaFormat::C420,
            2 => ChromaFormat::C422,
            3 => ChromaFormat::C444,
            _ => return None,
        })
    }

    /// Horizontal and vertical chroma subsampling factors.
    pub fn subsampling(self) -> (u32, u32) {
        match self {
            ChromaFormat::C420 => (2, 2),
            ChromaFormat::C422 => (2, 1),
            ChromaFormat::Monochrome | ChromaFormat::C444 => (1, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Rectangle given by its edges, right/bottom exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Output frame geometry handed to the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct DecodedVideoSize {
    /// Full decoded size, in whole macroblocks.
    pub size: Size,
    /// Visible area.
    pub crop: Rect,
    pub chroma_format: ChromaFormat,
}

/// The selected video track of a media file.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct VideoTrack {
    pub track_number: u64,
    pub codec: VideoCodec,
    pub codec_id: String,
    pub decoded_size: DecodedVideoSize,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    /// Upper estimate for one compressed frame, in bytes.
    pub max_bytes_in_frame: usize,
    pub color: ColorAttributes,
    #[serde(skip)]
    #[cfg_attr(feature = "jsonschema", schemars(skip))]
    pub params: H264Params,
}

impl VideoTrack {
    pub fn chroma_format(&self) -> ChromaFormat {
        self.decoded_size.chroma_format
    }
}

/// The selected audio track of a media file.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct AudioTrack {
    pub track_number: u64,
    pub codec: AudioCodec,
    pub codec_id: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u16,
    /// Bytes removed from every frame by header-stripping compression.
    pub stripped_header: Option<Vec<u8>>,
    /// Upper estimate for one compressed frame, in bytes (0 when unknown).
    pub max_bytes_in_frame: usize,
    /// Nominal frame duration, when the container declares it.
    #[serde(skip)]
    #[cfg_attr(feature = "jsonschema", schemars(skip))]
    pub frame_duration: Option<Duration>,
}

/// Upper estimate of a compressed frame for the picture size, 3/8 of a byte
/// per pixel. MKV carries no such metadata.
pub fn max_bytes_in_frame(size: Size) -> usize {
    (size.width as usize * size.height as usize * 3) / 8
}
