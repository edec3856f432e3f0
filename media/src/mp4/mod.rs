//! ISO-BMFF (MP4) demuxing: movie header, tracks and sample tables.

pub mod atoms;
pub mod reader;
pub mod sample_table;

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use crate::avc::H264Params;
use crate::codec::{self, VideoCodec};
use crate::color::ColorAttributes;
use crate::error::{MediaError, Result};
use crate::track::{AudioTrack, VideoTrack};

use atoms::{Atom, AtomType, HandlerType, be_u16, be_u32, be_u64, inner_boxes};
use sample_table::{SampleTable, SampleTableBuilder};

/// Offset of the child boxes of a visual sample entry within `stsd`.
const VISUAL_ENTRY_CHILDREN: usize = 94;

/// The `ftyp` box.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct FileType {
    pub major_brand: String,
    pub minor_version: u32,
    pub compatible_brands: Vec<String>,
}

/// One `trak` with its resolved samples.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Mp4Track {
    pub track_id: u32,
    pub handler: HandlerType,
    /// Media timescale, ticks per second.
    pub timescale: u32,
    /// Duration in media ticks.
    pub duration: u64,
    /// Presentation size from `tkhd`.
    pub width: u32,
    pub height: u32,
    /// Type of the first sample description, e.g. `avc1`.
    pub sample_entry: Option<String>,
    pub channels: Option<u16>,
    pub sample_size: Option<u16>,
    pub sample_rate: Option<u32>,
    pub color: Option<ColorAttributes>,
    pub sample_count: usize,
    #[serde(skip)]
    #[cfg_attr(feature = "jsonschema", schemars(skip))]
    pub avc_config: Option<Vec<u8>>,
    #[serde(skip)]
    #[cfg_attr(feature = "jsonschema", schemars(skip))]
    pub samples: SampleTable,
}

impl Mp4Track {
    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let nanos = ticks as u128 * 1_000_000_000 / self.timescale.max(1) as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    pub fn duration_to_ticks(&self, time: Duration) -> u64 {
        (time.as_nanos() * self.timescale as u128 / 1_000_000_000) as u64
    }

    fn entry_fourcc(&self) -> Result<[u8; 4]> {
        self.sample_entry
            .as_deref()
            .and_then(|s| s.as_bytes().try_into().ok())
            .ok_or(MediaError::MissingElement {
                element: "stsd sample entry",
            })
    }
}

/// Parsed structure of an MP4 file. Sample data stays on disk.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Mp4File {
    pub file_type: FileType,
    pub timescale: u32,
    /// Duration in movie ticks.
    pub duration: u64,
    pub tracks: Vec<Mp4Track>,
}

/// A position inside an MP4 track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Mp4Position {
    /// Decode time of the sample.
    pub time: Duration,
    pub sample: usize,
}

impl Mp4Position {
    pub const START: Mp4Position = Mp4Position {
        time: Duration::ZERO,
        sample: 0,
    };
}

impl Mp4File {
    pub fn duration(&self) -> Option<Duration> {
        if self.timescale == 0 {
            return None;
        }
        let nanos = self.duration as u128 * 1_000_000_000 / self.timescale as u128;
        Some(Duration::from_nanos(nanos.min(u64::MAX as u128) as u64))
    }

    fn first_track(&self, handler: HandlerType) -> Option<&Mp4Track> {
        let mut matching = self.tracks.iter().filter(|t| t.handler == handler);
        let first = matching.next()?;
        if matching.count() > 0 {
            log::warn!(
                "Multiple {} tracks, using the first one (track {})",
                if handler == HandlerType::Video { "video" } else { "audio" },
                first.track_id
            );
        }
        Some(first)
    }

    pub(crate) fn track_index(&self, track_id: u64) -> Option<usize> {
        self.tracks.iter().position(|t| t.track_id as u64 == track_id)
    }

    /// Select the first video track and parse its `avcC`.
    pub fn find_video_track(&self) -> Result<VideoTrack> {
        let track = self
            .first_track(HandlerType::Video)
            .ok_or(MediaError::NoVideoTrack)?;
        let fourcc = track.entry_fourcc()?;
        let codec = codec::mp4_video_codec(&fourcc)?;
        let private = track
            .avc_config
            .as_deref()
            .ok_or(MediaError::MissingCodecPrivate {
                codec: codec.info().codec_name,
            })?;
        let params = match codec {
            VideoCodec::H264 => H264Params::from_codec_private(private)?,
        };

        Ok(VideoTrack {
            track_number: track.track_id as u64,
            codec,
            codec_id: String::from_utf8_lossy(&fourcc).into_owned(),
            decoded_size: params.decoded_size(),
            bit_depth_luma: params.sps.bit_depth_luma,
            bit_depth_chroma: params.sps.bit_depth_chroma,
            max_bytes_in_frame: track.samples.max_size() as usize,
            color: track.color.unwrap_or_default().or(params.sps.color),
            params,
        })
    }

    /// Select the first audio track.
    pub fn find_audio_track(&self) -> Result<AudioTrack> {
        let track = self
            .first_track(HandlerType::Audio)
            .ok_or(MediaError::NoAudioTrack)?;
        let fourcc = track.entry_fourcc()?;
        let codec = codec::mp4_audio_codec(&fourcc)?;

        let frame_duration = match (track.samples.get(0), track.samples.get(1)) {
            (Some(a), Some(b)) => Some(track.ticks_to_duration(b.dts - a.dts)),
            _ => None,
        };

        Ok(AudioTrack {
            track_number: track.track_id as u64,
            codec,
            codec_id: String::from_utf8_lossy(&fourcc).into_owned(),
            sample_rate: track.sample_rate.unwrap_or(track.timescale),
            channels: track.channels.unwrap_or(2).min(u8::MAX as u16) as u8,
            bits_per_sample: track.sample_size.unwrap_or(16),
            stripped_header: None,
            max_bytes_in_frame: track.samples.max_size() as usize,
            frame_duration,
        })
    }
}

fn truncated(atom: &Atom, needed: usize) -> MediaError {
    MediaError::Truncated {
        offset: atom.data_offset,
        needed: needed as u64,
    }
}

fn fourcc_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse the box tree of an MP4 file.
pub fn parse_mp4<R: Read + Seek>(reader: &mut R) -> Result<Mp4File> {
    let end = reader.seek(SeekFrom::End(0))?;
    let top = atoms::read_atoms(reader, 0, end)?;

    let file_type = match top.iter().find(|a| a.atom_type == AtomType::FTYP) {
        Some(atom) => parse_ftyp(&atoms::read_atom_data(reader, atom)?, atom)?,
        None => return Err(MediaError::MissingElement { element: "ftyp" }),
    };
    let moov = top
        .iter()
        .find(|a| a.atom_type == AtomType::MOOV)
        .ok_or(MediaError::MissingElement { element: "moov" })?;

    let mut timescale = 0;
    let mut duration = 0;
    let mut tracks = Vec::new();
    for child in atoms::read_children(reader, moov)? {
        match child.atom_type {
            AtomType::MVHD => {
                let data = atoms::read_atom_data(reader, &child)?;
                (timescale, duration) = parse_media_header(&data, &child)?;
            }
            AtomType::TRAK => {
                if let Some(track) = parse_trak(reader, &child)? {
                    tracks.push(track);
                }
            }
            _ => {}
        }
    }

    log::debug!(
        "mp4: brand {}, {} tracks, timescale {timescale}",
        file_type.major_brand,
        tracks.len()
    );
    Ok(Mp4File {
        file_type,
        timescale,
        duration,
        tracks,
    })
}

fn parse_ftyp(data: &[u8], atom: &Atom) -> Result<FileType> {
    if data.len() < 8 {
        return Err(truncated(atom, 8));
    }
    Ok(FileType {
        major_brand: fourcc_string(&data[0..4]),
        minor_version: be_u32(data, 4).unwrap_or(0),
        compatible_brands: data[8..].chunks_exact(4).map(fourcc_string).collect(),
    })
}

/// `(timescale, duration)` of an `mvhd` or `mdhd` payload.
fn parse_media_header(data: &[u8], atom: &Atom) -> Result<(u32, u64)> {
    let parsed = match data.first().copied() {
        Some(1) => be_u32(data, 20).zip(be_u64(data, 24)),
        Some(_) => be_u32(data, 12).zip(be_u32(data, 16).map(u64::from)),
        None => None,
    };
    parsed.ok_or_else(|| truncated(atom, 32))
}

/// Parse one `trak`. Tracks without a media box are skipped.
fn parse_trak<R: Read + Seek>(reader: &mut R, trak: &Atom) -> Result<Option<Mp4Track>> {
    let mut track = Mp4Track {
        track_id: 0,
        handler: HandlerType::Unknown,
        timescale: 0,
        duration: 0,
        width: 0,
        height: 0,
        sample_entry: None,
        channels: None,
        sample_size: None,
        sample_rate: None,
        color: None,
        sample_count: 0,
        avc_config: None,
        samples: SampleTable::default(),
    };
    let mut has_media = false;

    for child in atoms::read_children(reader, trak)? {
        match child.atom_type {
            AtomType::TKHD => parse_tkhd(&atoms::read_atom_data(reader, &child)?, &child, &mut track)?,
            AtomType::MDIA => {
                parse_mdia(reader, &child, &mut track)?;
                has_media = true;
            }
            _ => {}
        }
    }

    if !has_media {
        log::warn!("track {} has no media box, ignoring it", track.track_id);
        return Ok(None);
    }
    track.sample_count = track.samples.len();
    Ok(Some(track))
}

fn parse_tkhd(data: &[u8], atom: &Atom, track: &mut Mp4Track) -> Result<()> {
    let (id_at, size_at) = if data.first() == Some(&1) { (20, 88) } else { (12, 76) };
    track.track_id = be_u32(data, id_at).ok_or_else(|| truncated(atom, id_at + 4))?;
    // 16.16 fixed point
    track.width = be_u32(data, size_at).map(|w| w >> 16).unwrap_or(0);
    track.height = be_u32(data, size_at + 4).map(|h| h >> 16).unwrap_or(0);
    Ok(())
}

fn parse_mdia<R: Read + Seek>(reader: &mut R, mdia: &Atom, track: &mut Mp4Track) -> Result<()> {
    for child in atoms::read_children(reader, mdia)? {
        match child.atom_type {
            AtomType::MDHD => {
                let data = atoms::read_atom_data(reader, &child)?;
                (track.timescale, track.duration) = parse_media_header(&data, &child)?;
            }
            AtomType::HDLR => {
                let data = atoms::read_atom_data(reader, &child)?;
                let kind = data.get(8..12).ok_or_else(|| truncated(&child, 12))?;
                track.handler = HandlerType::from_bytes(kind);
            }
            AtomType::MINF => {
                for minf_child in atoms::read_children(reader, &child)? {
                    if minf_child.atom_type == AtomType::STBL {
                        parse_stbl(reader, &minf_child, track)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_stbl<R: Read + Seek>(reader: &mut R, stbl: &Atom, track: &mut Mp4Track) -> Result<()> {
    let mut builder = SampleTableBuilder::new();
    builder.set_data_end(reader.seek(SeekFrom::End(0))?);
    for child in atoms::read_children(reader, stbl)? {
        let data = match child.atom_type {
            AtomType::STSD
            | AtomType::STTS
            | AtomType::CTTS
            | AtomType::STSS
            | AtomType::STSC
            | AtomType::STSZ
            | AtomType::STCO
            | AtomType::CO64 => atoms::read_atom_data(reader, &child)?,
            _ => continue,
        };
        match child.atom_type {
            AtomType::STSD => parse_stsd(&data, &child, track)?,
            AtomType::STTS => {
                builder.set_stts(table(&data, &child, 8, |e| be_u32(e, 0).zip(be_u32(e, 4)))?)
            }
            AtomType::CTTS => {
                let signed = data.first() == Some(&1);
                builder.set_ctts(table(&data, &child, 8, |e| {
                    let offset = be_u32(e, 4)?;
                    // version 0 offsets are unsigned, negative values are clamped
                    let offset = if signed { offset as i32 } else { offset.min(i32::MAX as u32) as i32 };
                    Some((be_u32(e, 0)?, offset))
                })?)
            }
            AtomType::STSS => builder.set_sync_samples(table(&data, &child, 4, |e| be_u32(e, 0))?),
            AtomType::STSC => {
                builder.set_stsc(table(&data, &child, 12, |e| be_u32(e, 0).zip(be_u32(e, 4)))?)
            }
            AtomType::STSZ => {
                let uniform = be_u32(&data, 4).ok_or_else(|| truncated(&child, 8))?;
                let count = be_u32(&data, 8).ok_or_else(|| truncated(&child, 12))?;
                let sizes = if uniform == 0 {
                    entries(&data[12..], &child, count, 4, |e| be_u32(e, 0))?
                } else {
                    Vec::new()
                };
                builder.set_stsz(uniform, count, sizes);
            }
            AtomType::STCO => builder.set_chunk_offsets(table(&data, &child, 4, |e| {
                be_u32(e, 0).map(u64::from)
            })?),
            AtomType::CO64 => builder.set_chunk_offsets(table(&data, &child, 8, |e| be_u64(e, 0))?),
            _ => {}
        }
    }
    track.samples = builder.build();
    Ok(())
}

/// Decode a full-box table: version/flags, entry count, fixed-size entries.
fn table<T>(
    data: &[u8],
    atom: &Atom,
    entry_size: usize,
    parse: impl Fn(&[u8]) -> Option<T>,
) -> Result<Vec<T>> {
    let count = be_u32(data, 4).ok_or_else(|| truncated(atom, 8))?;
    entries(&data[8..], atom, count, entry_size, parse)
}

fn entries<T>(
    data: &[u8],
    atom: &Atom,
    count: u32,
    entry_size: usize,
    parse: impl Fn(&[u8]) -> Option<T>,
) -> Result<Vec<T>> {
    let needed = count as usize * entry_size;
    if needed > data.len() {
        return Err(MediaError::InvalidData {
            offset: atom.offset(),
            message: format!(
                "'{}' declares {count} entries but holds {} bytes",
                atom.atom_type,
                data.len()
            ),
        });
    }
    data[..needed]
        .chunks_exact(entry_size)
        .map(|e| parse(e).ok_or_else(|| truncated(atom, needed)))
        .collect()
}

/// Read the first sample description of `stsd`.
fn parse_stsd(data: &[u8], atom: &Atom, track: &mut Mp4Track) -> Result<()> {
    let entry_size = be_u32(data, 8).ok_or_else(|| truncated(atom, 12))? as usize;
    let fourcc = data.get(12..16).ok_or_else(|| truncated(atom, 16))?;
    let entry_end = (8 + entry_size).min(data.len());
    track.sample_entry = Some(fourcc_string(fourcc));

    match track.handler {
        HandlerType::Video => {
            track.width = be_u16(data, 40).map(u32::from).unwrap_or(track.width);
            track.height = be_u16(data, 42).map(u32::from).unwrap_or(track.height);
            if let Some(children) = data.get(VISUAL_ENTRY_CHILDREN..entry_end) {
                for (kind, payload) in inner_boxes(children) {
                    match kind {
                        AtomType::AVCC => track.avc_config = Some(payload.to_vec()),
                        AtomType::COLR => track.color = parse_colr(payload),
                        _ => {}
                    }
                }
            }
        }
        HandlerType::Audio => {
            track.channels = be_u16(data, 32);
            track.sample_size = be_u16(data, 34);
            track.sample_rate = be_u32(data, 40).map(|r| r >> 16);
        }
        _ => {}
    }
    Ok(())
}

/// Colour description from an `nclx` `colr` box.
fn parse_colr(payload: &[u8]) -> Option<ColorAttributes> {
    if payload.get(0..4)? != b"nclx" {
        return None;
    }
    Some(ColorAttributes::from_codes(
        be_u16(payload, 4).map(u64::from),
        be_u16(payload, 6).map(u64::from),
        be_u16(payload, 8).map(u64::from),
        payload.get(10).map(|f| f & 0x80 != 0),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::avc::tests::{avcc, high_1080p_sps};
    use crate::codec::AudioCodec;
    use crate::color::ColorSpace;
    use std::io::Cursor;

    pub(crate) fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend(kind);
        out.extend(payload);
        out
    }

    fn full_box(kind: &[u8; 4], version: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![version, 0, 0, 0];
        body.extend(payload);
        mp4_box(kind, &body)
    }

    fn u32s(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    pub(crate) struct TrackSpec<'a> {
        pub track_id: u32,
        pub handler: &'a [u8; 4],
        pub timescale: u32,
        pub sample_entry: Vec<u8>,
        /// Sizes of the samples, stored in one chunk at `chunk_offset`.
        pub sizes: Vec<u32>,
        pub delta: u32,
        pub sync: Option<Vec<u32>>,
        pub chunk_offset: u32,
    }

    /// `avc1` entry with an `avcC` and a BT.709 full-range `colr`.
    pub(crate) fn avc1_entry(avcc_payload: &[u8], width: u16, height: u16) -> Vec<u8> {
        let mut entry = vec![0u8; 8];
        entry[6..8].copy_from_slice(&1u16.to_be_bytes());
        entry.extend([0u8; 16]);
        entry.extend(width.to_be_bytes());
        entry.extend(height.to_be_bytes());
        entry.extend([0u8; 50]);
        entry.extend(mp4_box(b"avcC", avcc_payload));
        let mut colr = b"nclx".to_vec();
        for code in [1u16, 1, 1] {
            colr.extend(code.to_be_bytes());
        }
        colr.push(0x80);
        entry.extend(mp4_box(b"colr", &colr));
        mp4_box(b"avc1", &entry)
    }

    pub(crate) fn ac3_entry(channels: u16, rate: u32) -> Vec<u8> {
        let mut entry = vec![0u8; 8];
        entry[6..8].copy_from_slice(&1u16.to_be_bytes());
        entry.extend([0u8; 8]);
        entry.extend(channels.to_be_bytes());
        entry.extend(16u16.to_be_bytes());
        entry.extend([0u8; 4]);
        entry.extend((rate << 16).to_be_bytes());
        mp4_box(b"ac-3", &entry)
    }

    pub(crate) fn trak(spec: &TrackSpec) -> Vec<u8> {
        let mut tkhd = vec![0u8; 80];
        tkhd[8..12].copy_from_slice(&spec.track_id.to_be_bytes());

        let mut mdhd = vec![0u8; 20];
        mdhd[8..12].copy_from_slice(&spec.timescale.to_be_bytes());
        mdhd[12..16].copy_from_slice(&(spec.sizes.len() as u32 * spec.delta).to_be_bytes());

        let mut hdlr = vec![0u8; 4];
        hdlr.extend(spec.handler);
        hdlr.extend([0u8; 13]);

        let mut stsd = u32s(&[1]);
        stsd.extend(&spec.sample_entry);

        let n = spec.sizes.len() as u32;
        let mut stbl = full_box(b"stsd", 0, &stsd);
        stbl.extend(full_box(b"stts", 0, &u32s(&[1, n, spec.delta])));
        if let Some(sync) = &spec.sync {
            let mut body = u32s(&[sync.len() as u32]);
            body.extend(u32s(sync));
            stbl.extend(full_box(b"stss", 0, &body));
        }
        stbl.extend(full_box(b"stsc", 0, &u32s(&[1, 1, n, 1])));
        let mut stsz = u32s(&[0, n]);
        stsz.extend(u32s(&spec.sizes));
        stbl.extend(full_box(b"stsz", 0, &stsz));
        stbl.extend(full_box(b"stco", 0, &u32s(&[1, spec.chunk_offset])));

        let minf = mp4_box(b"minf", &mp4_box(b"stbl", &stbl));
        let mut mdia = full_box(b"mdhd", 0, &mdhd);
        mdia.extend(full_box(b"hdlr", 0, &hdlr));
        mdia.extend(minf);

        let mut body = full_box(b"tkhd", 0, &tkhd);
        body.extend(mp4_box(b"mdia", &mdia));
        mp4_box(b"trak", &body)
    }

    pub(crate) fn ftyp() -> Vec<u8> {
        let mut body = b"isom".to_vec();
        body.extend(512u32.to_be_bytes());
        body.extend(b"isomiso2avc1mp41");
        mp4_box(b"ftyp", &body)
    }

    pub(crate) fn moov(timescale: u32, duration: u32, traks: &[Vec<u8>]) -> Vec<u8> {
        let mut mvhd = vec![0u8; 96];
        mvhd[8..12].copy_from_slice(&timescale.to_be_bytes());
        mvhd[12..16].copy_from_slice(&duration.to_be_bytes());
        let mut body = full_box(b"mvhd", 0, &mvhd);
        for t in traks {
            body.extend(t);
        }
        mp4_box(b"moov", &body)
    }

    /// Stands in for the `mdat` payload the sample tables point into.
    fn payload() -> Vec<u8> {
        mp4_box(b"free", &[0u8; 2048])
    }

    fn video_spec(chunk_offset: u32) -> TrackSpec<'static> {
        let sps = high_1080p_sps();
        TrackSpec {
            track_id: 1,
            handler: b"vide",
            timescale: 90_000,
            sample_entry: avc1_entry(&avcc(&sps, &[0x68, 0xCE, 0x38, 0x80]), 1920, 1080),
            sizes: vec![100, 40, 40, 120],
            delta: 3000,
            sync: Some(vec![1, 4]),
            chunk_offset,
        }
    }

    #[test]
    fn test_parse_structure() {
        let audio = TrackSpec {
            track_id: 2,
            handler: b"soun",
            timescale: 48_000,
            sample_entry: ac3_entry(6, 48_000),
            sizes: vec![768, 768],
            delta: 1536,
            sync: None,
            chunk_offset: 0,
        };
        let mut data = ftyp();
        data.extend(moov(1000, 2000, &[trak(&video_spec(0)), trak(&audio)]));
        data.extend(payload());

        let file = parse_mp4(&mut Cursor::new(data)).unwrap();
        assert_eq!(file.file_type.major_brand, "isom");
        assert_eq!(file.file_type.compatible_brands, vec!["isom", "iso2", "avc1", "mp41"]);
        assert_eq!(file.duration(), Some(Duration::from_secs(2)));
        assert_eq!(file.tracks.len(), 2);

        let video = &file.tracks[0];
        assert_eq!(video.handler, HandlerType::Video);
        assert_eq!(video.sample_entry.as_deref(), Some("avc1"));
        assert_eq!((video.width, video.height), (1920, 1080));
        assert_eq!(video.sample_count, 4);
        assert!(video.samples.samples[3].keyframe);
        assert!(!video.samples.samples[1].keyframe);
        assert_eq!(video.ticks_to_duration(3000), Duration::from_millis(33) + Duration::from_nanos(333_333));

        let audio = &file.tracks[1];
        assert_eq!(audio.channels, Some(6));
        assert_eq!(audio.sample_rate, Some(48_000));
        assert_eq!(audio.samples.samples[1].offset, 768);
    }

    #[test]
    fn test_find_tracks() {
        let audio = TrackSpec {
            track_id: 7,
            handler: b"soun",
            timescale: 48_000,
            sample_entry: ac3_entry(2, 48_000),
            sizes: vec![512, 512],
            delta: 1536,
            sync: None,
            chunk_offset: 0,
        };
        let mut data = ftyp();
        data.extend(moov(1000, 0, &[trak(&video_spec(0)), trak(&audio)]));
        data.extend(payload());
        let file = parse_mp4(&mut Cursor::new(data)).unwrap();

        let video = file.find_video_track().unwrap();
        assert_eq!(video.track_number, 1);
        assert_eq!(video.codec_id, "avc1");
        assert_eq!(video.max_bytes_in_frame, 120);
        assert_eq!(video.decoded_size.crop.bottom, 1080);
        assert_eq!(video.color.color_space, Some(ColorSpace::Bt709));
        assert_eq!(video.color.full_range, Some(true));

        let audio = file.find_audio_track().unwrap();
        assert_eq!(audio.codec, AudioCodec::Ac3);
        assert_eq!(audio.track_number, 7);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.frame_duration, Some(Duration::from_millis(32)));
    }

    #[test]
    fn test_missing_moov() {
        assert!(matches!(
            parse_mp4(&mut Cursor::new(ftyp())),
            Err(MediaError::MissingElement { element: "moov" })
        ));
    }

    #[test]
    fn test_no_audio_track() {
        let mut data = ftyp();
        data.extend(moov(1000, 0, &[trak(&video_spec(0))]));
        data.extend(payload());
        let file = parse_mp4(&mut Cursor::new(data)).unwrap();
        assert!(matches!(file.find_audio_track(), Err(MediaError::NoAudioTrack)));
    }

    #[test]
    fn test_table_count_overrun() {
        let atom = Atom {
            atom_type: AtomType::STSZ,
            size: 20,
            data_offset: 8,
            header_size: 8,
        };
        let data = u32s(&[0, 1000, 1]);
        assert!(matches!(
            table(&data, &atom, 4, |e| be_u32(e, 0)),
            Err(MediaError::InvalidData { .. })
        ));
    }
}
