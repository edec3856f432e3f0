use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error at offset 0x{offset:X} ({context}): {source}")]
    IoAtOffset {
        offset: u64,
        context: &'static str,
        source: std::io::Error,
    },

    #[error("unsupported container format (leading bytes {magic:02X?})")]
    UnsupportedFormat { magic: Vec<u8> },

    #[error("the input source is not seekable: {0}")]
    NotSeekable(std::io::Error),

    #[error("bad magic at offset 0x{offset:X}: expected 0x{expected:X}, got 0x{got:X}")]
    BadMagic { offset: u64, expected: u32, got: u32 },

    #[error("the EBML document type is \"{doc_type}\", expected \"matroska\"")]
    NotMatroska { doc_type: String },

    #[error("required element {element} is missing")]
    MissingElement { element: &'static str },

    #[error("unexpected element 0x{id:X} at offset 0x{offset:X}, expected {expected}")]
    UnexpectedElement {
        offset: u64,
        id: u32,
        expected: &'static str,
    },

    #[error("invalid variable-length integer at offset 0x{offset:X}: first byte 0x{first:02X}")]
    InvalidVarint { offset: u64, first: u8 },

    #[error("truncated data at offset 0x{offset:X}: needed {needed} bytes")]
    Truncated { offset: u64, needed: u64 },

    #[error("element at offset 0x{offset:X} declares {size} bytes, exceeding its parent (ends at 0x{limit:X})")]
    SizeOverrun { offset: u64, size: u64, limit: u64 },

    #[error("invalid data at offset 0x{offset:X}: {message}")]
    InvalidData { offset: u64, message: String },

    #[error("the codec \"{codec}\" is not supported by the library")]
    UnsupportedCodec { codec: String },

    #[error("the codec \"{codec}\" is recognized but not implemented")]
    UnimplementedCodec { codec: String },

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("No video tracks found")]
    NoVideoTrack,

    #[error("No audio tracks found")]
    NoAudioTrack,

    #[error("the {codec} track is lacking codec private data")]
    MissingCodecPrivate { codec: &'static str },

    #[error("invalid codec configuration: {0}")]
    InvalidCodecConfig(String),

    #[error("cue point references a cluster at segment position 0x{position:X} which was not found")]
    ClusterNotFound { position: u64 },

    #[error("seek failed: {0}")]
    SeekFailed(String),

    #[error("the reader hit a parse error earlier and must be re-seeked before further reads")]
    StaleReader,

    #[error("encoded queue capacity must be at least {min}, got {got}")]
    QueueCapacity { min: usize, got: usize },

    #[error("encoded queue is full")]
    QueueFull,

    #[error("sample of {needed} bytes does not fit the {capacity}-byte encoded buffer")]
    BufferTooSmall { needed: usize, capacity: usize },
}

pub type Result<T> = std::result::Result<T, MediaError>;

impl MediaError {
    /// Structural errors leave a reader at an unknown position.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            MediaError::Io(_)
                | MediaError::IoAtOffset { .. }
                | MediaError::InvalidVarint { .. }
                | MediaError::Truncated { .. }
                | MediaError::SizeOverrun { .. }
                | MediaError::InvalidData { .. }
                | MediaError::UnexpectedElement { .. }
        )
    }
}
