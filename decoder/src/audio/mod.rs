//! Audio decoder adapters.
//!
//! The adapters validate the compressed frames themselves and hand the
//! actual decoding to a [`FrameDecoder`]. Decoded samples are delivered in
//! fixed-size blocks of interleaved stereo 16-bit PCM.

pub mod ac3;
pub mod dts;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use media::codec::AudioCodec;

use crate::error::{DecoderError, Result};

pub use ac3::Ac3Decoder;
pub use dts::DtsDecoder;

/// Output channel count of every adapter.
pub const CHANNELS: u8 = 2;

pub trait AudioDecoder {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u8 {
        CHANNELS
    }

    /// Samples per channel in one block returned by `decode_block`.
    fn block_size(&self) -> usize;

    /// False when the compressed frame must stay untouched until all of its
    /// blocks have been decoded.
    fn copies_compressed_data(&self) -> bool;

    /// Validate the frame header at the start of `data` and return the frame
    /// length in bytes.
    fn sync(&mut self, data: &[u8]) -> Result<usize>;

    /// Decode a complete frame. `volume` scales the output, 255 being unity.
    fn decode_frame(&mut self, data: &[u8], volume: u8) -> Result<()>;

    fn blocks_left(&self) -> usize;

    /// Write the next block into `pcm`, which holds `block_size() * channels()`
    /// interleaved samples.
    fn decode_block(&mut self, pcm: &mut [i16]) -> Result<()>;
}

/// One decoded frame, as stereo float samples in `[-1, 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    pub sample_rate: u32,
    pub samples: Vec<[f32; 2]>,
}

/// Failure reported by a native decoder: a status code and, when the
/// decoder printed one, its own message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: i32,
    pub message: Option<String>,
}

impl NativeError {
    pub fn new(code: i32) -> Self {
        Self { code, message: None }
    }

    pub fn with_message(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

/// Decodes whole compressed frames.
pub trait FrameDecoder {
    fn decode(&mut self, frame: &[u8]) -> std::result::Result<DecodedFrame, NativeError>;
}

const FACILITY_MASK: u32 = 0xFFFF_0000;
pub const FACILITY_LINUX: u32 = 0xA001_0000;
pub const FACILITY_DECODER_DTS: u32 = 0xA004_0000;

fn dts_message(code: u32) -> Option<&'static str> {
    Some(match code {
        1 => "Invalid argument",
        2 => "Invalid bitstream format",
        3 => "CRC check failed",
        4 => "Bitstream navigation error",
        5 => "Synchronization error",
        6 => "Unsupported feature",
        7 => "Memory allocation error",
        8 => "PCM output overflow",
        9 => "I/O error",
        10 => "PCM output parameters changed",
        11 => "Unspecified error",
        _ => return None,
    })
}

/// Human-readable text of a native failure.
pub fn describe_native_error(error: &NativeError) -> String {
    if let Some(message) = error.message.as_deref().map(str::trim) {
        if !message.is_empty() {
            return message.to_string();
        }
    }

    let hr = error.code as u32;
    let code = hr & 0xFFFF;
    match hr & FACILITY_MASK {
        FACILITY_DECODER_DTS => {
            if let Some(message) = dts_message(code) {
                return message.to_string();
            }
        }
        FACILITY_LINUX => {
            let os = std::io::Error::from_raw_os_error(code as i32);
            return format!("Linux error code {code}, {os}");
        }
        _ => {}
    }
    format!("unknown error 0x{hr:08X}")
}

pub(crate) fn native_error(codec: &'static str, error: NativeError) -> DecoderError {
    DecoderError::Native {
        codec,
        message: describe_native_error(&error),
    }
}

const BIAS: f32 = 384.0;
const BIAS_BITS: i32 = 0x43C0_0000;

/// Convert a float sample to 16-bit PCM.
///
/// Between 256.0 and 512.0 one unit in the last place of an f32 is 2^-15,
/// so the bit pattern of `384 + level * s` minus that of 384 is the sample
/// scaled to 16 bits.
pub fn biased_sample(sample: f32, level: f32) -> i16 {
    let biased = BIAS + level * sample;
    let scaled = (biased.to_bits() as i32).wrapping_sub(BIAS_BITS);
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Decoded samples of the current frame, handed out block by block.
#[derive(Debug)]
pub(crate) struct PcmBlocks {
    samples: Vec<[f32; 2]>,
    position: usize,
    block_size: usize,
    level: f32,
}

impl PcmBlocks {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            samples: Vec::new(),
            position: 0,
            block_size,
            level: 1.0,
        }
    }

    pub(crate) fn load(&mut self, frame: DecodedFrame, volume: u8) {
        if frame.samples.len() % self.block_size != 0 {
            log::debug!(
                "decoded {} samples, not a multiple of the {} sample block",
                frame.samples.len(),
                self.block_size
            );
        }
        self.samples = frame.samples;
        self.position = 0;
        self.level = volume as f32 / 255.0;
    }

    pub(crate) fn blocks_left(&self) -> usize {
        (self.samples.len() - self.position) / self.block_size
    }

    pub(crate) fn next_block(&mut self, pcm: &mut [i16]) -> Result<()> {
        if self.blocks_left() == 0 {
            return Err(DecoderError::NoBlocksLeft);
        }
        let block = &self.samples[self.position..self.position + self.block_size];
        for (out, [left, right]) in pcm.chunks_exact_mut(2).zip(block) {
            out[0] = biased_sample(*left, self.level);
            out[1] = biased_sample(*right, self.level);
        }
        self.position += self.block_size;
        Ok(())
    }
}

/// Create the adapter for `codec`.
pub fn create_audio_decoder<F: FrameDecoder + 'static>(
    codec: AudioCodec,
    sample_rate: u32,
    frame_decoder: F,
) -> Box<dyn AudioDecoder> {
    match codec {
        AudioCodec::Ac3 => Box::new(Ac3Decoder::new(sample_rate, frame_decoder)),
        AudioCodec::Dts => Box::new(DtsDecoder::new(sample_rate, frame_decoder)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns a fixed number of samples per frame, or a scripted error.
    pub(crate) struct FakeFrameDecoder {
        pub(crate) samples: usize,
        pub(crate) sample_rate: u32,
        pub(crate) fail: Option<NativeError>,
        pub(crate) frames: Vec<usize>,
    }

    impl FakeFrameDecoder {
        pub(crate) fn new(samples: usize, sample_rate: u32) -> Self {
            Self {
                samples,
                sample_rate,
                fail: None,
                frames: Vec::new(),
            }
        }
    }

    impl FrameDecoder for FakeFrameDecoder {
        fn decode(&mut self, frame: &[u8]) -> std::result::Result<DecodedFrame, NativeError> {
            if let Some(err) = self.fail.clone() {
                return Err(err);
            }
            self.frames.push(frame.len());
            Ok(DecodedFrame {
                sample_rate: self.sample_rate,
                samples: (0..self.samples)
                    .map(|i| if i % 2 == 0 { [0.5, -0.5] } else { [1.0, -1.0] })
                    .collect(),
            })
        }
    }

    #[test]
    fn test_biased_sample() {
        assert_eq!(biased_sample(0.0, 1.0), 0);
        assert_eq!(biased_sample(0.5, 1.0), 16384);
        assert_eq!(biased_sample(-0.5, 1.0), -16384);
        assert_eq!(biased_sample(1.0, 1.0), i16::MAX);
        assert_eq!(biased_sample(-1.0, 1.0), i16::MIN);
        assert_eq!(biased_sample(0.75, 0.0), 0);
        assert_eq!(biased_sample(4.0, 1.0), i16::MAX);
    }

    #[test]
    fn test_half_volume() {
        let level = 128.0 / 255.0;
        let expected = (0.5 * level * 32768.0) as i16;
        assert!((biased_sample(0.5, level) - expected).abs() <= 1);
    }

    #[test]
    fn test_own_message_first() {
        let err = NativeError::with_message(0xA004_0002u32 as i32, "  frame too short \n");
        assert_eq!(describe_native_error(&err), "frame too short");
    }

    #[test]
    fn test_dts_facility_message() {
        let err = NativeError::new(0xA004_0003u32 as i32);
        assert_eq!(describe_native_error(&err), "CRC check failed");

        let blank = NativeError::with_message(0xA004_0005u32 as i32, "");
        assert_eq!(describe_native_error(&blank), "Synchronization error");
    }

    #[test]
    fn test_linux_errno_message() {
        let err = NativeError::new((FACILITY_LINUX | libc::ENOENT as u32) as i32);
        let text = describe_native_error(&err);
        assert!(text.starts_with("Linux error code 2, "), "{text}");
    }

    #[test]
    fn test_unknown_code() {
        let err = NativeError::new(0xA004_00FFu32 as i32);
        assert_eq!(describe_native_error(&err), "unknown error 0xA00400FF");
        let err = NativeError::new(-22);
        assert_eq!(describe_native_error(&err), "unknown error 0xFFFFFFEA");
    }

    #[test]
    fn test_blocks_are_interleaved() {
        let mut blocks = PcmBlocks::new(4);
        blocks.load(
            DecodedFrame {
                sample_rate: 48000,
                samples: vec![[0.5, -0.5], [0.0, 0.25], [1.0, -1.0], [0.0, 0.0]],
            },
            255,
        );
        assert_eq!(blocks.blocks_left(), 1);
        let mut pcm = [0i16; 8];
        blocks.next_block(&mut pcm).unwrap();
        assert_eq!(pcm, [16384, -16384, 0, 8192, i16::MAX, i16::MIN, 0, 0]);
        assert_eq!(blocks.blocks_left(), 0);
        assert!(matches!(
            blocks.next_block(&mut pcm),
            Err(DecoderError::NoBlocksLeft)
        ));
    }

    #[test]
    fn test_factory_picks_adapter() {
        let ac3 = create_audio_decoder(AudioCodec::Ac3, 48000, FakeFrameDecoder::new(1536, 48000));
        assert_eq!(ac3.block_size(), 0x200);
        assert!(!ac3.copies_compressed_data());
        let dts = create_audio_decoder(AudioCodec::Dts, 48000, FakeFrameDecoder::new(512, 48000));
        assert_eq!(dts.block_size(), 512);
        assert_eq!(dts.channels(), 2);
    }
}
