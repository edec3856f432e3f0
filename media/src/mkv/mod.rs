//! Matroska demuxing: segment structure, cluster index and track readers.

pub mod blob;
pub mod cluster;
pub mod cues;
pub mod lacing;
pub mod reader;
pub mod seek;
pub mod tracks;

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use crate::avc::H264Params;
use crate::codec::{self, VideoCodec};
use crate::color::ColorAttributes;
use crate::ebml::{self, ElementHeader, ids};
use crate::error::{MediaError, Result};
use crate::track::{AudioTrack, VideoTrack, max_bytes_in_frame};

use cluster::ClusterPlaceholder;
use cues::CuePoint;
use seek::SeekIndex;
use tracks::{TrackEntry, TrackType};

pub const DOC_TYPE_MATROSKA: &str = "matroska";
pub const DEFAULT_TIMESTAMP_SCALE: u64 = 1_000_000;

/// The segment `Info` element.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct SegmentInfo {
    /// Nanoseconds per tick.
    pub timestamp_scale: u64,
    /// Duration in ticks.
    pub duration: Option<f64>,
    pub title: Option<String>,
    pub muxing_app: Option<String>,
    pub writing_app: Option<String>,
}

impl Default for SegmentInfo {
    fn default() -> Self {
        Self {
            timestamp_scale: DEFAULT_TIMESTAMP_SCALE,
            duration: None,
            title: None,
            muxing_app: None,
            writing_app: None,
        }
    }
}

/// Parsed structure of a Matroska file. Block data stays on disk.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct MkvFile {
    pub doc_type: String,
    /// Absolute offset of the segment payload. Cluster and cue positions are
    /// relative to it.
    pub segment_data_offset: u64,
    pub info: SegmentInfo,
    pub tracks: Vec<TrackEntry>,
    pub cues: Vec<CuePoint>,
    pub clusters: Vec<ClusterPlaceholder>,
    pub seek_index: SeekIndex,
}

impl MkvFile {
    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        Duration::from_nanos(ticks.saturating_mul(self.info.timestamp_scale))
    }

    pub fn duration_to_ticks(&self, time: Duration) -> u64 {
        (time.as_nanos() / self.info.timestamp_scale.max(1) as u128) as u64
    }

    pub fn duration(&self) -> Option<Duration> {
        self.info
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| Duration::from_nanos((d * self.info.timestamp_scale as f64) as u64))
    }

    fn first_track(&self, track_type: TrackType) -> Option<&TrackEntry> {
        let mut matching = self.tracks.iter().filter(|t| t.track_type == track_type);
        let first = matching.next()?;
        let extra = matching.count();
        if extra > 0 {
            log::warn!(
                "Multiple {} tracks, using the first one (track {})",
                if track_type == TrackType::Video { "video" } else { "audio" },
                first.number
            );
        }
        Some(first)
    }

    /// Select the first video track and parse its decoder configuration.
    pub fn find_video_track(&self) -> Result<VideoTrack> {
        let entry = self
            .first_track(TrackType::Video)
            .ok_or(MediaError::NoVideoTrack)?;
        let codec = codec::mkv_video_codec(&entry.codec_id)?;
        if entry.stripped_header()?.is_some() {
            return Err(MediaError::UnsupportedFeature(
                "header stripping on a video track".to_string(),
            ));
        }

        let private = entry
            .codec_private
            .as_deref()
            .ok_or(MediaError::MissingCodecPrivate {
                codec: codec.info().codec_name,
            })?;
        let params = match codec {
            VideoCodec::H264 => H264Params::from_codec_private(private)?,
        };

        let colour = entry
            .video
            .as_ref()
            .and_then(|v| v.colour)
            .map(|c| {
                ColorAttributes::from_codes(
                    c.primaries,
                    c.transfer_characteristics,
                    c.matrix_coefficients,
                    c.range.and_then(|r| match r {
                        1 => Some(false),
                        2 => Some(true),
                        _ => None,
                    }),
                )
            })
            .unwrap_or_default();

        let decoded_size = params.decoded_size();
        Ok(VideoTrack {
            track_number: entry.number,
            codec,
            codec_id: entry.codec_id.clone(),
            decoded_size,
            bit_depth_luma: params.sps.bit_depth_luma,
            bit_depth_chroma: params.sps.bit_depth_chroma,
            max_bytes_in_frame: max_bytes_in_frame(decoded_size.size),
            color: colour.or(params.sps.color),
            params,
        })
    }

    /// Select the first audio track.
    pub fn find_audio_track(&self) -> Result<AudioTrack> {
        let entry = self
            .first_track(TrackType::Audio)
            .ok_or(MediaError::NoAudioTrack)?;
        let codec = codec::mkv_audio_codec(&entry.codec_id)?;
        let stripped_header = entry.stripped_header()?;
        let audio = entry.audio.clone().unwrap_or_default();
        let sample_rate = audio
            .output_sampling_frequency
            .unwrap_or(audio.sampling_frequency);

        Ok(AudioTrack {
            track_number: entry.number,
            codec,
            codec_id: entry.codec_id.clone(),
            sample_rate: sample_rate as u32,
            channels: audio.channels.min(u8::MAX as u64) as u8,
            bits_per_sample: audio.bit_depth.unwrap_or(16) as u16,
            stripped_header,
            max_bytes_in_frame: 0,
            frame_duration: entry.default_duration.map(Duration::from_nanos),
        })
    }

    pub(crate) fn track_entry(&self, number: u64) -> Option<&TrackEntry> {
        self.tracks.iter().find(|t| t.number == number)
    }
}

fn parse_ebml_header<R: Read + Seek>(reader: &mut R) -> Result<String> {
    reader.seek(SeekFrom::Start(0))?;
    let header = ebml::read_header(reader)?.ok_or(MediaError::Truncated {
        offset: 0,
        needed: 4,
    })?;
    if header.id != ids::EBML {
        return Err(MediaError::BadMagic {
            offset: 0,
            expected: ids::EBML,
            got: header.id,
        });
    }

    let mut doc_type = None;
    while let Some(child) = ebml::next_child(reader, header.end())? {
        if child.id == ids::DOC_TYPE {
            doc_type = Some(ebml::read_string(reader, &child)?);
        } else {
            ebml::skip(reader, &child)?;
        }
    }
    doc_type.ok_or(MediaError::MissingElement { element: "DocType" })
}

fn parse_info<R: Read + Seek>(reader: &mut R, parent: &ElementHeader) -> Result<SegmentInfo> {
    let mut info = SegmentInfo::default();
    while let Some(child) = ebml::next_child(reader, parent.end())? {
        match child.id {
            ids::TIMESTAMP_SCALE => {
                info.timestamp_scale = match ebml::read_uint(reader, &child)? {
                    0 => DEFAULT_TIMESTAMP_SCALE,
                    scale => scale,
                }
            }
            ids::DURATION => info.duration = Some(ebml::read_float(reader, &child)?),
            ids::TITLE => info.title = Some(ebml::read_string(reader, &child)?),
            ids::MUXING_APP => info.muxing_app = Some(ebml::read_string(reader, &child)?),
            ids::WRITING_APP => info.writing_app = Some(ebml::read_string(reader, &child)?),
            _ => ebml::skip(reader, &child)?,
        }
    }
    Ok(info)
}

/// Parse the EBML header and the segment structure.
///
/// Only cluster timestamps are read, so the cost grows with the number of
/// clusters rather than the file size.
pub fn parse_mkv<R: Read + Seek>(reader: &mut R) -> Result<MkvFile> {
    let doc_type = parse_ebml_header(reader)?;
    if doc_type != DOC_TYPE_MATROSKA {
        return Err(MediaError::NotMatroska { doc_type });
    }

    let segment = loop {
        let header = ebml::read_header(reader)?.ok_or(MediaError::MissingElement {
            element: "Segment",
        })?;
        match header.id {
            ids::SEGMENT => break header,
            ids::VOID | ids::CRC32 => ebml::skip(reader, &header)?,
            other => {
                return Err(MediaError::UnexpectedElement {
                    offset: header.offset,
                    id: other,
                    expected: "Segment",
                });
            }
        }
    };

    let mut info = None;
    let mut tracks = None;
    let mut cues = Vec::new();
    let mut clusters: Vec<ClusterPlaceholder> = Vec::new();

    while let Some(child) = ebml::next_child(reader, segment.end())? {
        match child.id {
            ids::INFO => info = Some(parse_info(reader, &child)?),
            ids::TRACKS => tracks = Some(tracks::parse_tracks(reader, &child)?),
            ids::CUES => cues = cues::parse_cues(reader, &child)?,
            ids::CLUSTER => {
                let placeholder = cluster::scan_cluster(reader, &child, segment.data_offset)?;
                if let Some(prev) = clusters.last() {
                    if placeholder.timestamp < prev.timestamp {
                        log::warn!(
                            "cluster at segment offset 0x{:X} goes back in time ({} < {})",
                            placeholder.position,
                            placeholder.timestamp,
                            prev.timestamp
                        );
                    }
                }
                clusters.push(placeholder);
            }
            ids::SEGMENT => {
                return Err(MediaError::UnsupportedFeature(
                    "files with more than one segment".to_string(),
                ));
            }
            _ => ebml::skip(reader, &child)?,
        }
    }

    let tracks = tracks.ok_or(MediaError::MissingElement { element: "Tracks" })?;
    let seek_index = seek::build_seek_index(&cues, &clusters)?;
    log::debug!(
        "parsed segment: {} tracks, {} clusters, {} cue points",
        tracks.len(),
        clusters.len(),
        cues.len()
    );

    Ok(MkvFile {
        doc_type,
        segment_data_offset: segment.data_offset,
        info: info.unwrap_or_default(),
        tracks,
        cues,
        clusters,
        seek_index,
    })
}
