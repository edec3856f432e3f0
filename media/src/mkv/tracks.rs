use std::io::{Read, Seek};

use crate::ebml::{self, ElementHeader, ids};
use crate::error::{MediaError, Result};

/// Header-stripping content compression.
pub const COMPRESSION_HEADER_STRIPPING: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum TrackType {
    Video,
    Audio,
    Complex,
    Logo,
    Subtitle,
    Buttons,
    Control,
    Metadata,
    Other(u64),
}

impl TrackType {
    pub fn from_value(value: u64) -> Self {
        match value {
            1 => TrackType::Video,
            2 => TrackType::Audio,
            3 => TrackType::Complex,
            0x10 => TrackType::Logo,
            0x11 => TrackType::Subtitle,
            0x12 => TrackType::Buttons,
            0x20 => TrackType::Control,
            0x21 => TrackType::Metadata,
            other => TrackType::Other(other),
        }
    }
}

/// `Colour` element, raw ISO/IEC 23001-8 code points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Colour {
    pub matrix_coefficients: Option<u64>,
    pub transfer_characteristics: Option<u64>,
    pub primaries: Option<u64>,
    /// 1 = broadcast range, 2 = full range.
    pub range: Option<u64>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct VideoSettings {
    pub pixel_width: u64,
    pub pixel_height: u64,
    pub display_width: Option<u64>,
    pub display_height: Option<u64>,
    pub colour: Option<Colour>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct AudioSettings {
    pub sampling_frequency: f64,
    pub output_sampling_frequency: Option<f64>,
    pub channels: u64,
    pub bit_depth: Option<u64>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sampling_frequency: 8000.0,
            output_sampling_frequency: None,
            channels: 1,
            bit_depth: None,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct ContentEncoding {
    /// 0 = compression, 1 = encryption.
    pub encoding_type: u64,
    pub compression_algorithm: Option<u64>,
    #[serde(skip)]
    #[cfg_attr(feature = "jsonschema", schemars(skip))]
    pub compression_settings: Option<Vec<u8>>,
    pub encrypted: bool,
}

/// One `TrackEntry` of the `Tracks` element.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct TrackEntry {
    pub number: u64,
    pub uid: Option<u64>,
    pub track_type: TrackType,
    pub codec_id: String,
    #[serde(skip)]
    #[cfg_attr(feature = "jsonschema", schemars(skip))]
    pub codec_private: Option<Vec<u8>>,
    /// Nanoseconds per frame.
    pub default_duration: Option<u64>,
    pub name: Option<String>,
    pub language: Option<String>,
    pub video: Option<VideoSettings>,
    pub audio: Option<AudioSettings>,
    pub encodings: Vec<ContentEncoding>,
}

impl TrackEntry {
    /// Bytes to prepend to every frame, when the track uses header stripping.
    ///
    /// Encrypted tracks and any other content compression are rejected.
    pub fn stripped_header(&self) -> Result<Option<Vec<u8>>> {
        let mut header = None;
        for encoding in &self.encodings {
            if encoding.encrypted || encoding.encoding_type == 1 {
                return Err(MediaError::UnsupportedFeature(format!(
                    "track {} is encrypted",
                    self.number
                )));
            }
            match encoding.compression_algorithm {
                Some(COMPRESSION_HEADER_STRIPPING) => {
                    header = encoding.compression_settings.clone();
                }
                Some(algo) => {
                    return Err(MediaError::UnsupportedFeature(format!(
                        "track {} uses content compression algorithm {algo}",
                        self.number
                    )));
                }
                None => {}
            }
        }
        Ok(header)
    }
}

pub(crate) fn parse_tracks<R: Read + Seek>(
    reader: &mut R,
    parent: &ElementHeader,
) -> Result<Vec<TrackEntry>> {
    let mut tracks = Vec::new();
    while let Some(child) = ebml::next_child(reader, parent.end())? {
        if child.id == ids::TRACK_ENTRY {
            tracks.push(parse_track_entry(reader, &child)?);
        } else {
            ebml::skip(reader, &child)?;
        }
    }
    Ok(tracks)
}

fn parse_track_entry<R: Read + Seek>(reader: &mut R, parent: &ElementHeader) -> Result<TrackEntry> {
    let mut number = None;
    let mut uid = None;
    let mut track_type = None;
    let mut codec_id = None;
    let mut codec_private = None;
    let mut default_duration = None;
    let mut name = None;
    let mut language = None;
    let mut video = None;
    let mut audio = None;
    let mut encodings = Vec::new();

    while let Some(child) = ebml::next_child(reader, parent.end())? {
        match child.id {
            ids::TRACK_NUMBER => number = Some(ebml::read_uint(reader, &child)?),
            ids::TRACK_UID => uid = Some(ebml::read_uint(reader, &child)?),
            ids::TRACK_TYPE => track_type = Some(ebml::read_uint(reader, &child)?),
            ids::CODEC_ID => codec_id = Some(ebml::read_string(reader, &child)?),
            ids::CODEC_PRIVATE => codec_private = Some(ebml::read_binary(reader, &child)?),
            ids::DEFAULT_DURATION => default_duration = Some(ebml::read_uint(reader, &child)?),
            ids::NAME => name = Some(ebml::read_string(reader, &child)?),
            ids::LANGUAGE => language = Some(ebml::read_string(reader, &child)?),
            ids::VIDEO => video = Some(parse_video(reader, &child)?),
            ids::AUDIO => audio = Some(parse_audio(reader, &child)?),
            ids::CONTENT_ENCODINGS => encodings = parse_encodings(reader, &child)?,
            _ => ebml::skip(reader, &child)?,
        }
    }

    Ok(TrackEntry {
        number: number.ok_or(MediaError::MissingElement {
            element: "TrackNumber",
        })?,
        uid,
        track_type: TrackType::from_value(track_type.ok_or(MediaError::MissingElement {
            element: "TrackType",
        })?),
        codec_id: codec_id.ok_or(MediaError::MissingElement { element: "CodecID" })?,
        codec_private,
        default_duration: default_duration.filter(|d| *d > 0),
        name,
        language,
        video,
        audio,
        encodings,
    })
}

fn parse_video<R: Read + Seek>(reader: &mut R, parent: &ElementHeader) -> Result<VideoSettings> {
    let mut video = VideoSettings::default();
    while let Some(child) = ebml::next_child(reader, parent.end())? {
        match child.id {
            ids::PIXEL_WIDTH => video.pixel_width = ebml::read_uint(reader, &child)?,
            ids::PIXEL_HEIGHT => video.pixel_height = ebml::read_uint(reader, &child)?,
            ids::DISPLAY_WIDTH => video.display_width = Some(ebml::read_uint(reader, &child)?),
            ids::DISPLAY_HEIGHT => video.display_height = Some(ebml::read_uint(reader, &child)?),
            ids::COLOUR => video.colour = Some(parse_colour(reader, &child)?),
            _ => ebml::skip(reader, &child)?,
        }
    }
    Ok(video)
}

fn parse_colour<R: Read + Seek>(reader: &mut R, parent: &ElementHeader) -> Result<Colour> {
    let mut colour = Colour::default();
    while let Some(child) = ebml::next_child(reader, parent.end())? {
        match child.id {
            ids::MATRIX_COEFFICIENTS => {
                colour.matrix_coefficients = Some(ebml::read_uint(reader, &child)?)
            }
            ids::TRANSFER_CHARACTERISTICS => {
                colour.transfer_characteristics = Some(ebml::read_uint(reader, &child)?)
            }
            ids::PRIMARIES => colour.primaries = Some(ebml::read_uint(reader, &child)?),
            ids::RANGE => colour.range = Some(ebml::read_uint(reader, &child)?),
            _ => ebml::skip(reader, &child)?,
        }
    }
    Ok(colour)
}

fn parse_audio<R: Read + Seek>(reader: &mut R, parent: &ElementHeader) -> Result<AudioSettings> {
    let mut audio = AudioSettings::default();
    while let Some(child) = ebml::next_child(reader, parent.end())? {
        match child.id {
            ids::SAMPLING_FREQUENCY => audio.sampling_frequency = ebml::read_float(reader, &child)?,
            ids::OUTPUT_SAMPLING_FREQUENCY => {
                audio.output_sampling_frequency = Some(ebml::read_float(reader, &child)?)
            }
            ids::CHANNELS => audio.channels = ebml::read_uint(reader, &child)?,
            ids::BIT_DEPTH => audio.bit_depth = Some(ebml::read_uint(reader, &child)?),
            _ => ebml::skip(reader, &child)?,
        }
    }
    Ok(audio)
}

fn parse_encodings<R: Read + Seek>(
    reader: &mut R,
    parent: &ElementHeader,
) -> Result<Vec<ContentEncoding>> {
    let mut encodings = Vec::new();
    while let Some(child) = ebml::next_child(reader, parent.end())? {
        if child.id != ids::CONTENT_ENCODING {
            ebml::skip(reader, &child)?;
            continue;
        }
        let mut encoding = ContentEncoding::default();
        while let Some(item) = ebml::next_child(reader, child.end())? {
            match item.id {
                ids::CONTENT_ENCODING_TYPE => encoding.encoding_type = ebml::read_uint(reader, &item)?,
                ids::CONTENT_COMPRESSION => {
                    // ContentCompAlgo defaults to zlib.
                    encoding.compression_algorithm = Some(0);
                    while let Some(comp) = ebml::next_child(reader, item.end())? {
                        match comp.id {
                            ids::CONTENT_COMP_ALGO => {
                                encoding.compression_algorithm = Some(ebml::read_uint(reader, &comp)?)
                            }
                            ids::CONTENT_COMP_SETTINGS => {
                                encoding.compression_settings = Some(ebml::read_binary(reader, &comp)?)
                            }
                            _ => ebml::skip(reader, &comp)?,
                        }
                    }
                }
                ids::CONTENT_ENCRYPTION => {
                    encoding.encrypted = true;
                    ebml::skip(reader, &item)?;
                }
                _ => ebml::skip(reader, &item)?,
            }
        }
        encodings.push(encoding);
    }
    Ok(encodings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(encodings: Vec<ContentEncoding>) -> TrackEntry {
        TrackEntry {
            number: 2,
            uid: None,
            track_type: TrackType::Audio,
            codec_id: "A_AC3".to_string(),
            codec_private: None,
            default_duration: None,
            name: None,
            language: None,
            video: None,
            audio: Some(AudioSettings::default()),
            encodings,
        }
    }

    #[test]
    fn test_track_type_values() {
        assert_eq!(TrackType::from_value(1), TrackType::Video);
        assert_eq!(TrackType::from_value(2), TrackType::Audio);
        assert_eq!(TrackType::from_value(0x11), TrackType::Subtitle);
        assert_eq!(TrackType::from_value(7), TrackType::Other(7));
    }

    #[test]
    fn test_header_stripping_accepted() {
        let t = track(vec![ContentEncoding {
            compression_algorithm: Some(COMPRESSION_HEADER_STRIPPING),
            compression_settings: Some(vec![0x0B, 0x77]),
            ..Default::default()
        }]);
        assert_eq!(t.stripped_header().unwrap(), Some(vec![0x0B, 0x77]));
        assert_eq!(track(Vec::new()).stripped_header().unwrap(), None);
    }

    #[test]
    fn test_other_encodings_rejected() {
        let zlib = track(vec![ContentEncoding {
            compression_algorithm: Some(0),
            ..Default::default()
        }]);
        assert!(matches!(zlib.stripped_header(), Err(MediaError::UnsupportedFeature(_))));

        let encrypted = track(vec![ContentEncoding {
            encoding_type: 1,
            encrypted: true,
            ..Default::default()
        }]);
        assert!(matches!(encrypted.stripped_header(), Err(MediaError::UnsupportedFeature(_))));
    }
}
