use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;

/// A seekable byte source over either a plain media file or an in-memory copy.
pub enum MediaSource {
    File(BufReader<File>),
    Memory(Cursor<Vec<u8>>),
}

impl Read for MediaSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            MediaSource::File(r) => r.read(buf),
            MediaSource::Memory(r) => r.read(buf),
        }
    }
}

impl Seek for MediaSource {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            MediaSource::File(r) => r.seek(pos),
            MediaSource::Memory(r) => r.seek(pos),
        }
    }
}

impl MediaSource {
    /// Wrap an in-memory buffer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        MediaSource::Memory(Cursor::new(data))
    }
}

/// Open a media file and return a seekable source.
///
/// Files ending in `.gz` are fully decompressed into memory, which keeps test
/// fixtures small while still giving the parsers random access.
pub fn open_source(path: &Path) -> std::io::Result<MediaSource> {
    let is_gz = path
        .to_str()
        .map(|s| s.ends_with(".gz"))
        .unwrap_or(false);

    let file = File::open(path)?;
    if is_gz {
        let mut decoder = GzDecoder::new(file);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        Ok(MediaSource::Memory(Cursor::new(buf)))
    } else {
        Ok(MediaSource::File(BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    #[test]
    fn test_open_gz_source_is_decompressed() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("media-source-{}.bin.gz", std::process::id()));
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello media").unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();

        let mut src = open_source(&path).unwrap();
        assert!(matches!(src, MediaSource::Memory(_)));
        let mut out = String::new();
        src.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello media");

        src.seek(SeekFrom::Start(6)).unwrap();
        out.clear();
        src.read_to_string(&mut out).unwrap();
        assert_eq!(out, "media");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(open_source(Path::new("/nonexistent/file.mkv")).is_err());
    }
}
