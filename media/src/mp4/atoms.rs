//! ISO-BMFF box headers and raw payload access.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{MediaError, Result};

/// Upper bound on a box payload read into memory.
pub const MAX_ATOM_DATA_SIZE: u64 = 64 * 1024 * 1024;

/// Four-character box type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const CTTS: Self = Self(*b"ctts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const AVCC: Self = Self(*b"avcC");
    pub const COLR: Self = Self(*b"colr");

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Box header.
#[derive(Debug, Clone, Copy)]
pub struct Atom {
    pub atom_type: AtomType,
    /// Box size, header included.
    pub size: u64,
    /// Absolute offset of the payload.
    pub data_offset: u64,
    /// 8, or 16 with a 64-bit size.
    pub header_size: u8,
}

impl Atom {
    pub fn offset(&self) -> u64 {
        self.data_offset - self.header_size as u64
    }

    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    pub fn end(&self) -> u64 {
        self.offset() + self.size
    }
}

/// Handler of a `trak`, from its `hdlr` box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Meta,
    Text,
    Unknown,
}

impl HandlerType {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"text" => Self::Text,
            _ => Self::Unknown,
        }
    }
}

/// Read the box headers between `start` and `end`. A size of 0 extends the
/// box to `end`.
pub fn read_atoms<R: Read + Seek>(reader: &mut R, start: u64, end: u64) -> Result<Vec<Atom>> {
    let mut atoms = Vec::new();
    let mut pos = start;

    while pos + 8 <= end {
        reader.seek(SeekFrom::Start(pos))?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header).map_err(|e| MediaError::IoAtOffset {
            offset: pos,
            context: "reading box header",
            source: e,
        })?;

        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let atom_type = AtomType([header[4], header[5], header[6], header[7]]);

        let (size, header_size) = match size {
            1 => {
                let mut ext = [0u8; 8];
                reader.read_exact(&mut ext).map_err(|e| MediaError::IoAtOffset {
                    offset: pos + 8,
                    context: "reading 64-bit box size",
                    source: e,
                })?;
                (u64::from_be_bytes(ext), 16u8)
            }
            0 => (end - pos, 8u8),
            _ => (size, 8u8),
        };

        if size < header_size as u64 {
            return Err(MediaError::InvalidData {
                offset: pos,
                message: format!("box '{atom_type}' declares {size} bytes"),
            });
        }
        if pos + size > end {
            return Err(MediaError::SizeOverrun {
                offset: pos,
                size,
                limit: end,
            });
        }

        atoms.push(Atom {
            atom_type,
            size,
            data_offset: pos + header_size as u64,
            header_size,
        });
        pos += size;
    }

    Ok(atoms)
}

/// Read the children of a container box.
pub fn read_children<R: Read + Seek>(reader: &mut R, parent: &Atom) -> Result<Vec<Atom>> {
    read_atoms(reader, parent.data_offset, parent.end())
}

/// Read a box payload, rejecting oversized boxes.
pub fn read_atom_data<R: Read + Seek>(reader: &mut R, atom: &Atom) -> Result<Vec<u8>> {
    let size = atom.data_size();
    if size > MAX_ATOM_DATA_SIZE {
        return Err(MediaError::InvalidData {
            offset: atom.offset(),
            message: format!(
                "box '{}' of {size} bytes exceeds the {MAX_ATOM_DATA_SIZE} byte limit",
                atom.atom_type
            ),
        });
    }
    reader.seek(SeekFrom::Start(atom.data_offset))?;
    let mut data = vec![0u8; size as usize];
    reader.read_exact(&mut data).map_err(|e| MediaError::IoAtOffset {
        offset: atom.data_offset,
        context: "reading box payload",
        source: e,
    })?;
    Ok(data)
}

pub(crate) fn be_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

pub(crate) fn be_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn be_u64(data: &[u8], offset: usize) -> Option<u64> {
    let hi = be_u32(data, offset)? as u64;
    let lo = be_u32(data, offset + 4)? as u64;
    Some((hi << 32) | lo)
}

/// Iterate the boxes packed in a payload slice, as `(type, payload)`.
pub(crate) fn inner_boxes(data: &[u8]) -> impl Iterator<Item = (AtomType, &[u8])> {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        let size = be_u32(data, pos)? as usize;
        let kind = data.get(pos + 4..pos + 8)?;
        if size < 8 || pos + size > data.len() {
            return None;
        }
        let item = (AtomType([kind[0], kind[1], kind[2], kind[3]]), &data[pos + 8..pos + size]);
        pos += size;
        Some(item)
    })
}
