use crate::error::{MediaError, Result};

/// Codec category classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecCategory {
    Video,
    Audio,
}

/// Information about a supported codec.
#[derive(Debug, Clone, Copy)]
pub struct CodecInfo {
    /// Human-readable codec name (e.g. "h264", "ac3").
    pub codec_name: &'static str,
    /// Extension used for raw elementary stream output.
    pub extension: &'static str,
    /// Category of the codec.
    pub category: CodecCategory,
}

#[rustfmt::skip]
pub const H264: CodecInfo = CodecInfo { codec_name: "h264", extension: "h264", category: CodecCategory::Video };
#[rustfmt::skip]
pub const AC3: CodecInfo = CodecInfo { codec_name: "ac3", extension: "ac3", category: CodecCategory::Audio };
#[rustfmt::skip]
pub const DTS: CodecInfo = CodecInfo { codec_name: "dts", extension: "dts", category: CodecCategory::Audio };

/// Video codecs that can be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum VideoCodec {
    H264,
}

/// Audio codecs that can be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum AudioCodec {
    Ac3,
    Dts,
}

impl VideoCodec {
    pub fn info(self) -> &'static CodecInfo {
        match self {
            VideoCodec::H264 => &H264,
        }
    }
}

impl AudioCodec {
    pub fn info(self) -> &'static CodecInfo {
        match self {
            AudioCodec::Ac3 => &AC3,
            AudioCodec::Dts => &DTS,
        }
    }
}

/// Map a Matroska video `CodecID`.
pub fn mkv_video_codec(codec_id: &str) -> Result<VideoCodec> {
    match codec_id {
        "V_MPEG4/ISO/AVC" => Ok(VideoCodec::H264),
        "V_MPEGH/ISO/HEVC" => Err(MediaError::UnimplementedCodec {
            codec: codec_id.to_string(),
        }),
        _ => Err(MediaError::UnsupportedCodec {
            codec: codec_id.to_string(),
        }),
    }
}

/// Map a Matroska audio `CodecID`.
pub fn mkv_audio_codec(codec_id: &str) -> Result<AudioCodec> {
    match codec_id {
        "A_AC3" | "A_AC3/BSID9" | "A_AC3/BSID10" => Ok(AudioCodec::Ac3),
        "A_DTS" => Ok(AudioCodec::Dts),
        "A_EAC3" => Err(MediaError::UnimplementedCodec {
            codec: codec_id.to_string(),
        }),
        _ => Err(MediaError::UnsupportedCodec {
            codec: codec_id.to_string(),
        }),
    }
}

/// Map an ISO-BMFF video sample entry type.
pub fn mp4_video_codec(fourcc: &[u8; 4]) -> Result<VideoCodec> {
    match fourcc {
        b"avc1" | b"avc3" => Ok(VideoCodec::H264),
        b"hvc1" | b"hev1" => Err(MediaError::UnimplementedCodec {
            codec: String::from_utf8_lossy(fourcc).into_owned(),
        }),
        _ => Err(MediaError::UnsupportedCodec {
            codec: String::from_utf8_lossy(fourcc).into_owned(),
        }),
    }
}

/// Map an ISO-BMFF audio sample entry type.
pub fn mp4_audio_codec(fourcc: &[u8; 4]) -> Result<AudioCodec> {
    match fourcc {
        b"ac-3" => Ok(AudioCodec::Ac3),
        b"dtsc" | b"dtsh" | b"dtsl" | b"dtse" => Ok(AudioCodec::Dts),
        b"ec-3" => Err(MediaError::UnimplementedCodec {
            codec: String::from_utf8_lossy(fourcc).into_owned(),
        }),
        _ => Err(MediaError::UnsupportedCodec {
            codec: String::from_utf8_lossy(fourcc).into_owned(),
        }),
    }
}
