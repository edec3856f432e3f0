use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::detect::{ContainerKind, detect_container};
use crate::error::Result;
use crate::mkv::reader::{MkvAudioReader, MkvVideoReader};
use crate::mkv::{MkvFile, parse_mkv};
use crate::mp4::reader::{Mp4AudioReader, Mp4VideoReader};
use crate::mp4::{Mp4File, parse_mp4};
use crate::queue::EncodedProducer;
use crate::reader::{AudioTrackReader, VideoTrackReader};
use crate::source::open_source;
use crate::track::{AudioTrack, VideoTrack};

/// A parsed media file of either container.
///
/// The parsed structure is shared by every reader created from it; each
/// reader owns its own byte source.
#[derive(Debug, Clone)]
pub enum MediaFile {
    Mkv(Arc<MkvFile>),
    Mp4(Arc<Mp4File>),
}

/// Detect the container of `reader` and parse its structure.
pub fn parse_media<R: Read + Seek>(reader: &mut R) -> Result<MediaFile> {
    let kind = detect_container(reader)?;
    log::debug!("detected {kind:?} container");
    Ok(match kind {
        ContainerKind::Mkv => MediaFile::Mkv(Arc::new(parse_mkv(reader)?)),
        ContainerKind::Mp4 => MediaFile::Mp4(Arc::new(parse_mp4(reader)?)),
    })
}

/// Open and parse a media file. `.gz` files are decompressed into memory.
pub fn open_media(path: &Path) -> Result<MediaFile> {
    let mut source = open_source(path)?;
    parse_media(&mut source)
}

impl MediaFile {
    pub fn kind(&self) -> ContainerKind {
        match self {
            MediaFile::Mkv(_) => ContainerKind::Mkv,
            MediaFile::Mp4(_) => ContainerKind::Mp4,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            MediaFile::Mkv(f) => f.duration(),
            MediaFile::Mp4(f) => f.duration(),
        }
    }

    pub fn video_track(&self) -> Result<VideoTrack> {
        match self {
            MediaFile::Mkv(f) => f.find_video_track(),
            MediaFile::Mp4(f) => f.find_video_track(),
        }
    }

    pub fn audio_track(&self) -> Result<AudioTrack> {
        match self {
            MediaFile::Mkv(f) => f.find_audio_track(),
            MediaFile::Mp4(f) => f.find_audio_track(),
        }
    }

    /// Create a reader over `track`, queueing its SPS and PPS first.
    pub fn video_reader<R: Read + Seek>(
        &self,
        source: R,
        track: &VideoTrack,
        queue: &mut EncodedProducer,
    ) -> Result<VideoTrackReader<R>> {
        Ok(match self {
            MediaFile::Mkv(f) => {
                VideoTrackReader::Mkv(MkvVideoReader::new(source, f.clone(), track, queue)?)
            }
            MediaFile::Mp4(f) => {
                VideoTrackReader::Mp4(Mp4VideoReader::new(source, f.clone(), track, queue)?)
            }
        })
    }

    pub fn audio_reader<R: Read + Seek>(
        &self,
        source: R,
        track: &AudioTrack,
    ) -> Result<AudioTrackReader<R>> {
        Ok(match self {
            MediaFile::Mkv(f) => AudioTrackReader::Mkv(MkvAudioReader::new(source, f.clone(), track)),
            MediaFile::Mp4(f) => AudioTrackReader::Mp4(Mp4AudioReader::new(source, f.clone(), track)?),
        })
    }
}
