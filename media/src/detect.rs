use std::io::{Read, Seek, SeekFrom};

use crate::ebml::ids;
use crate::error::{MediaError, Result};

/// ISO-BMFF brands accepted in the `ftyp` box.
pub const MP4_BRANDS: [&[u8; 4]; 2] = [b"isom", b"iso2"];

/// Container formats understood by this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub enum ContainerKind {
    Mkv,
    Mp4,
}

/// Classify the leading 12 bytes of a file.
pub fn classify(header: &[u8]) -> Result<ContainerKind> {
    if header.len() < 12 {
        return Err(MediaError::UnsupportedFormat {
            magic: header.to_vec(),
        });
    }

    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic == ids::EBML {
        return Ok(ContainerKind::Mkv);
    }

    let brand = &header[8..12];
    if MP4_BRANDS.iter().any(|b| b.as_slice() == brand) {
        return Ok(ContainerKind::Mp4);
    }

    Err(MediaError::UnsupportedFormat {
        magic: header[..12].to_vec(),
    })
}

/// Sniff the container format of a seekable source.
///
/// The source is rewound to offset 0 afterwards. Sources that can't seek are
/// rejected before any data is consumed.
pub fn detect_container<R: Read + Seek>(reader: &mut R) -> Result<ContainerKind> {
    reader
        .seek(SeekFrom::Start(0))
        .map_err(MediaError::NotSeekable)?;

    let mut header = [0u8; 12];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    reader.seek(SeekFrom::Start(0))?;

    classify(&header[..filled])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_detect_mkv() {
        let data = vec![
            0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01, 0x42, 0xF7, 0x81, 0x01,
        ];
        let mut cursor = Cursor::new(data);
        cursor.set_position(5);
        assert_eq!(detect_container(&mut cursor).unwrap(), ContainerKind::Mkv);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_detect_mp4_isom_and_iso2() {
        for brand in [b"isom", b"iso2"] {
            let mut data = vec![0x00, 0x00, 0x00, 0x18];
            data.extend_from_slice(b"ftyp");
            data.extend_from_slice(brand);
            data.extend_from_slice(&[0, 0, 0, 0]);
            let mut cursor = Cursor::new(data);
            assert_eq!(detect_container(&mut cursor).unwrap(), ContainerKind::Mp4);
            assert_eq!(cursor.position(), 0);
        }
    }

    #[test]
    fn test_detect_unsupported() {
        let mut cursor = Cursor::new(b"RIFF\x00\x00\x00\x00WAVEfmt ".to_vec());
        let err = detect_container(&mut cursor).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat { .. }));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_detect_short_input() {
        let mut cursor = Cursor::new(vec![0x1A, 0x45, 0xDF]);
        assert!(matches!(
            detect_container(&mut cursor),
            Err(MediaError::UnsupportedFormat { .. })
        ));
    }

    struct Pipe(Cursor<Vec<u8>>);

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Seek for Pipe {
        fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "pipe"))
        }
    }

    #[test]
    fn test_detect_rejects_non_seekable() {
        let mut pipe = Pipe(Cursor::new(vec![0x1A, 0x45, 0xDF, 0xA3, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert!(matches!(
            detect_container(&mut pipe),
            Err(MediaError::NotSeekable(_))
        ));
        assert_eq!(pipe.0.position(), 0);
    }
}
