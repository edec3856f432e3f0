use std::io::Read;

use crate::ebml::{ElementHeader, parse_varint};
use crate::error::{MediaError, Result};

pub const FLAG_KEYFRAME: u8 = 0x80;
pub const FLAG_INVISIBLE: u8 = 0x08;
pub const FLAG_LACING: u8 = 0x06;
pub const FLAG_DISCARDABLE: u8 = 0x01;

/// Longest block header: 8-byte track varint, timestamp and flags.
const MAX_BLOCK_HEADER: usize = 11;

/// Lacing mode from bits 1-2 of the block flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum Lacing {
    None,
    Xiph,
    Fixed,
    Ebml,
}

impl Lacing {
    pub fn from_flags(flags: u8) -> Self {
        match (flags & FLAG_LACING) >> 1 {
            0 => Lacing::None,
            1 => Lacing::Xiph,
            2 => Lacing::Fixed,
            _ => Lacing::Ebml,
        }
    }
}

/// One `SimpleBlock` or `Block` of a cluster. The payload itself is not read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct Blob {
    /// Absolute file offset of the payload, past the block header.
    pub position: u64,
    /// Payload length, block header excluded. Includes the lacing header.
    pub length: u64,
    pub track: u64,
    /// Timestamp relative to the cluster, in ticks.
    pub timestamp: i16,
    pub flags: u8,
    pub keyframe: bool,
}

impl Blob {
    /// Decode a block header from the leading bytes of a block payload.
    ///
    /// `SimpleBlock` carries the keyframe flag itself; for a `Block` the
    /// caller decides from the enclosing `BlockGroup`.
    pub fn parse(header: &ElementHeader, bytes: &[u8], simple: bool) -> Result<Blob> {
        let truncated = || MediaError::Truncated {
            offset: header.data_offset,
            needed: MAX_BLOCK_HEADER as u64,
        };
        let (track, len) = parse_varint(bytes).ok_or_else(truncated)?;
        let rest = bytes.get(len..len + 3).ok_or_else(truncated)?;
        let timestamp = i16::from_be_bytes([rest[0], rest[1]]);
        let flags = rest[2];

        let header_len = (len + 3) as u64;
        let size = header.size.ok_or_else(|| MediaError::InvalidData {
            offset: header.offset,
            message: "block of unknown size".to_string(),
        })?;
        if size < header_len {
            return Err(truncated());
        }

        Ok(Blob {
            position: header.data_offset + header_len,
            length: size - header_len,
            track,
            timestamp,
            flags,
            keyframe: simple && flags & FLAG_KEYFRAME != 0,
        })
    }

    /// Read and decode the header of the block element at the current position.
    pub fn read<R: Read>(reader: &mut R, header: &ElementHeader, simple: bool) -> Result<Blob> {
        let size = header.size.unwrap_or(0).min(MAX_BLOCK_HEADER as u64) as usize;
        let mut buf = [0u8; MAX_BLOCK_HEADER];
        reader.read_exact(&mut buf[..size]).map_err(|e| MediaError::IoAtOffset {
            offset: header.data_offset,
            context: "reading block header",
            source: e,
        })?;
        Blob::parse(header, &buf[..size], simple)
    }

    pub fn lacing(&self) -> Lacing {
        Lacing::from_flags(self.flags)
    }

    pub fn is_invisible(&self) -> bool {
        self.flags & FLAG_INVISIBLE != 0
    }

    pub fn is_discardable(&self) -> bool {
        self.flags & FLAG_DISCARDABLE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebml::ids;

    fn header(size: u64) -> ElementHeader {
        ElementHeader {
            id: ids::SIMPLE_BLOCK,
            offset: 100,
            data_offset: 102,
            size: Some(size),
        }
    }

    #[test]
    fn test_blob_length_excludes_header() {
        // track 1, timestamp -2, keyframe + EBML lacing, then payload
        let bytes = [0x81, 0xFF, 0xFE, 0x86, 0xAA, 0xBB, 0xCC];
        let blob = Blob::parse(&header(bytes.len() as u64), &bytes, true).unwrap();
        assert_eq!(blob.track, 1);
        assert_eq!(blob.timestamp, -2);
        assert_eq!(blob.length, 7 - 4);
        assert_eq!(blob.position, 106);
        assert!(blob.keyframe);
        assert_eq!(blob.lacing(), Lacing::Ebml);
    }

    #[test]
    fn test_block_keyframe_left_to_caller() {
        let bytes = [0x82, 0x00, 0x10, 0x80, 0x00];
        let blob = Blob::parse(&header(5), &bytes, false).unwrap();
        assert_eq!(blob.track, 2);
        assert_eq!(blob.timestamp, 16);
        assert!(!blob.keyframe);
        assert_eq!(blob.lacing(), Lacing::None);
    }

    #[test]
    fn test_two_byte_track_number() {
        let bytes = [0x40, 0x81, 0x00, 0x00, 0x09, 0x01];
        let blob = Blob::parse(&header(6), &bytes, true).unwrap();
        assert_eq!(blob.track, 0x81);
        assert_eq!(blob.length, 1);
        assert!(blob.is_invisible());
        assert!(blob.is_discardable());
    }

    #[test]
    fn test_truncated_block() {
        let bytes = [0x81, 0x00];
        assert!(matches!(
            Blob::parse(&header(2), &bytes, true),
            Err(MediaError::Truncated { .. })
        ));
    }
}
