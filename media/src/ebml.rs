//! EBML primitives: variable-length integers, element headers and typed
//! payload readers.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{MediaError, Result};

/// Element IDs, with their length marker bits kept.
pub mod ids {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const VOID: u32 = 0xEC;
    pub const CRC32: u32 = 0xBF;

    pub const SEGMENT: u32 = 0x1853_8067;
    pub const SEEK_HEAD: u32 = 0x114D_9B74;
    pub const INFO: u32 = 0x1549_A966;
    pub const TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const TITLE: u32 = 0x7BA9;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const DEFAULT_DURATION: u32 = 0x23_E383;
    pub const NAME: u32 = 0x536E;
    pub const LANGUAGE: u32 = 0x22_B59C;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63A2;

    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const DISPLAY_WIDTH: u32 = 0x54B0;
    pub const DISPLAY_HEIGHT: u32 = 0x54BA;
    pub const COLOUR: u32 = 0x55B0;
    pub const MATRIX_COEFFICIENTS: u32 = 0x55B1;
    pub const RANGE: u32 = 0x55B9;
    pub const TRANSFER_CHARACTERISTICS: u32 = 0x55BA;
    pub const PRIMARIES: u32 = 0x55BB;

    pub const AUDIO: u32 = 0xE1;
    pub const SAMPLING_FREQUENCY: u32 = 0xB5;
    pub const OUTPUT_SAMPLING_FREQUENCY: u32 = 0x78B5;
    pub const CHANNELS: u32 = 0x9F;
    pub const BIT_DEPTH: u32 = 0x6264;

    pub const CONTENT_ENCODINGS: u32 = 0x6D80;
    pub const CONTENT_ENCODING: u32 = 0x6240;
    pub const CONTENT_ENCODING_TYPE: u32 = 0x5033;
    pub const CONTENT_COMPRESSION: u32 = 0x5034;
    pub const CONTENT_COMP_ALGO: u32 = 0x4254;
    pub const CONTENT_COMP_SETTINGS: u32 = 0x4255;
    pub const CONTENT_ENCRYPTION: u32 = 0x5035;

    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
    pub const CUE_RELATIVE_POSITION: u32 = 0xF0;
    pub const CUE_DURATION: u32 = 0xB2;
    pub const CUE_BLOCK_NUMBER: u32 = 0x5378;

    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMESTAMP: u32 = 0xE7;
    pub const POSITION: u32 = 0xA7;
    pub const PREV_SIZE: u32 = 0xAB;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
    pub const BLOCK_GROUP: u32 = 0xA0;
    pub const BLOCK: u32 = 0xA1;
    pub const BLOCK_DURATION: u32 = 0x9B;
    pub const REFERENCE_BLOCK: u32 = 0xFB;

    pub const CHAPTERS: u32 = 0x1043_A770;
    pub const TAGS: u32 = 0x1254_C367;
    pub const ATTACHMENTS: u32 = 0x1941_A469;

    /// Children of a Segment. Any of these ends an unknown-size Cluster.
    pub const SEGMENT_CHILDREN: [u32; 8] = [
        SEEK_HEAD,
        INFO,
        TRACKS,
        CUES,
        CLUSTER,
        CHAPTERS,
        TAGS,
        ATTACHMENTS,
    ];
}

/// Upper bound on binary and string payloads read into memory.
pub const MAX_BINARY_SIZE: u64 = 16 * 1024 * 1024;

/// Header of one EBML element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    /// Absolute offset of the first ID byte.
    pub offset: u64,
    /// Absolute offset of the payload.
    pub data_offset: u64,
    /// Payload size, `None` for the "unknown size" marker.
    pub size: Option<u64>,
}

impl ElementHeader {
    pub fn header_len(&self) -> u64 {
        self.data_offset - self.offset
    }

    /// Absolute end offset, when the size is known.
    pub fn end(&self) -> Option<u64> {
        self.size.map(|s| self.data_offset + s)
    }

    fn require_size(&self) -> Result<u64> {
        self.size.ok_or_else(|| MediaError::InvalidData {
            offset: self.offset,
            message: format!("element 0x{:X} must have a known size", self.id),
        })
    }
}

/// Total byte length of a varint, from its first byte. `None` for 0x00.
pub fn varint_len(first: u8) -> Option<usize> {
    if first == 0 {
        None
    } else {
        Some(first.leading_zeros() as usize + 1)
    }
}

/// Decode a size-style varint (marker bit stripped) from the start of `buf`.
///
/// Returns the value and the number of bytes consumed. The all-ones value is
/// returned as-is; use [`is_unknown_size`] to detect it.
pub fn parse_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let len = varint_len(first)?;
    let bytes = buf.get(..len)?;
    let mut value = (first as u64) & (0xFF >> len);
    for &b in &bytes[1..] {
        value = (value << 8) | b as u64;
    }
    Some((value, len))
}

/// Decode a signed varint as used by EBML lacing deltas.
pub fn parse_signed_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (raw, len) = parse_varint(buf)?;
    let bias = (1i64 << (7 * len - 1)) - 1;
    Some((raw as i64 - bias, len))
}

/// True when `value` is the all-ones marker for a varint of `len` bytes.
pub fn is_unknown_size(value: u64, len: usize) -> bool {
    value == (1u64 << (7 * len)) - 1
}

fn read_exact_at<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => MediaError::Truncated {
            offset,
            needed: buf.len() as u64,
        },
        _ => MediaError::IoAtOffset {
            offset,
            context: "reading element",
            source: e,
        },
    })
}

/// Read a varint. Returns the raw bytes packed into a u64 (marker kept) and
/// the length, or `None` at a clean end of stream.
fn read_raw_varint<R: Read>(reader: &mut R, offset: u64) -> Result<Option<(u64, usize)>> {
    let mut first = [0u8; 1];
    match reader.read_exact(&mut first) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(MediaError::Io(e)),
    }
    let len = varint_len(first[0]).ok_or(MediaError::InvalidVarint {
        offset,
        first: first[0],
    })?;
    let mut rest = [0u8; 7];
    read_exact_at(reader, &mut rest[..len - 1], offset)?;
    let mut raw = first[0] as u64;
    for &b in &rest[..len - 1] {
        raw = (raw << 8) | b as u64;
    }
    Ok(Some((raw, len)))
}

/// Read an element header at the current position. `None` at end of stream.
pub fn read_header<R: Read + Seek>(reader: &mut R) -> Result<Option<ElementHeader>> {
    let offset = reader.stream_position()?;
    let (id, id_len) = match read_raw_varint(reader, offset)? {
        Some(v) => v,
        None => return Ok(None),
    };
    if id_len > 4 {
        return Err(MediaError::InvalidVarint {
            offset,
            first: (id >> (8 * (id_len - 1))) as u8,
        });
    }

    let size_offset = offset + id_len as u64;
    let (raw, size_len) =
        read_raw_varint(reader, size_offset)?.ok_or(MediaError::Truncated {
            offset: size_offset,
            needed: 1,
        })?;
    let value = raw & ((1u64 << (7 * size_len)) - 1);
    let size = if is_unknown_size(value, size_len) {
        None
    } else {
        Some(value)
    };

    Ok(Some(ElementHeader {
        id: id as u32,
        offset,
        data_offset: size_offset + size_len as u64,
        size,
    }))
}

/// Read the next child of a parent ending at `end` (`None` = unknown size,
/// bounded by end of stream). Returns `None` when the parent is exhausted.
pub fn next_child<R: Read + Seek>(
    reader: &mut R,
    end: Option<u64>,
) -> Result<Option<ElementHeader>> {
    if let Some(end) = end {
        if reader.stream_position()? >= end {
            return Ok(None);
        }
    }
    let header = match read_header(reader)? {
        Some(h) => h,
        None => return Ok(None),
    };
    if let (Some(limit), Some(child_end)) = (end, header.end()) {
        if child_end > limit {
            return Err(MediaError::SizeOverrun {
                offset: header.offset,
                size: header.size.unwrap_or(0),
                limit,
            });
        }
    }
    Ok(Some(header))
}

/// Position the reader after the element's payload.
pub fn skip<R: Seek>(reader: &mut R, header: &ElementHeader) -> Result<()> {
    let end = header.require_size()?;
    reader.seek(SeekFrom::Start(header.data_offset + end))?;
    Ok(())
}

/// Read an unsigned big-endian integer payload (0-8 bytes).
pub fn read_uint<R: Read>(reader: &mut R, header: &ElementHeader) -> Result<u64> {
    let size = header.require_size()?;
    if size > 8 {
        return Err(MediaError::InvalidData {
            offset: header.offset,
            message: format!("unsigned integer of {size} bytes"),
        });
    }
    let mut buf = [0u8; 8];
    read_exact_at(reader, &mut buf[8 - size as usize..], header.data_offset)?;
    Ok(u64::from_be_bytes(buf))
}

/// Read a signed big-endian integer payload (0-8 bytes).
pub fn read_int<R: Read>(reader: &mut R, header: &ElementHeader) -> Result<i64> {
    let size = header.require_size()?;
    let raw = read_uint(reader, header)?;
    if size == 0 || size == 8 {
        return Ok(raw as i64);
    }
    let shift = 64 - 8 * size as u32;
    Ok(((raw << shift) as i64) >> shift)
}

/// Read a float payload (0, 4 or 8 bytes).
pub fn read_float<R: Read>(reader: &mut R, header: &ElementHeader) -> Result<f64> {
    match header.require_size()? {
        0 => Ok(0.0),
        4 => {
            let mut buf = [0u8; 4];
            read_exact_at(reader, &mut buf, header.data_offset)?;
            Ok(f32::from_be_bytes(buf) as f64)
        }
        8 => {
            let mut buf = [0u8; 8];
            read_exact_at(reader, &mut buf, header.data_offset)?;
            Ok(f64::from_be_bytes(buf))
        }
        other => Err(MediaError::InvalidData {
            offset: header.offset,
            message: format!("float of {other} bytes"),
        }),
    }
}

/// Read a binary payload.
pub fn read_binary<R: Read>(reader: &mut R, header: &ElementHeader) -> Result<Vec<u8>> {
    let size = header.require_size()?;
    if size > MAX_BINARY_SIZE {
        return Err(MediaError::InvalidData {
            offset: header.offset,
            message: format!("binary payload of {size} bytes exceeds the {MAX_BINARY_SIZE} byte limit"),
        });
    }
    let mut buf = vec![0u8; size as usize];
    read_exact_at(reader, &mut buf, header.data_offset)?;
    Ok(buf)
}

/// Read a string payload, dropping trailing NUL padding.
pub fn read_string<R: Read>(reader: &mut R, header: &ElementHeader) -> Result<String> {
    let mut buf = read_binary(reader, header)?;
    while buf.last() == Some(&0) {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
