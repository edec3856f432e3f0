//! DTS Coherent Acoustics adapter.
//!
//! Frames are synchronised on the core header (ETSI TS 102 114, 5.3.1) in
//! any of its four bitstream packings, or on an extension substream header.

use media::bits::BitReader;

use super::{AudioDecoder, FrameDecoder, PcmBlocks, native_error};
use crate::error::{DecoderError, Result};

const CODEC: &str = "DTS";

pub const BLOCK_SIZE: usize = 512;

/// Valid range of `FSIZE + 1`.
pub const MIN_BYTES_PER_FRAME: usize = 96;
pub const MAX_BYTES_PER_FRAME: usize = 16384;

const SYNC_CORE_BE: u32 = 0x7FFE_8001;
const SYNC_CORE_LE: u32 = 0xFE7F_0180;
const SYNC_CORE_14_BE: u32 = 0x1FFF_E800;
const SYNC_CORE_14_LE: u32 = 0xFF1F_00E8;
const SYNC_SUBSTREAM: u32 = 0x6458_2025;

/// Minimum bytes needed to read a header.
const HEADER_BYTES: usize = 16;

/// Core sample rates by `SFREQ`; zero marks invalid codes.
const CORE_SAMPLE_RATES: [u32; 16] = [
    0, 8000, 16000, 32000, 0, 0, 11025, 22050, 44100, 0, 0, 12000, 24000, 48000, 0, 0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    Be16,
    Le16,
    Be14,
    Le14,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Core {
        packing: Packing,
        /// `FSIZE + 1`: bytes of the frame in 16-bit packing.
        frame_size: usize,
        /// Bytes the frame occupies in this packing.
        stream_size: usize,
        samples: usize,
        sample_rate: u32,
    },
    Substream {
        header_size: usize,
        frame_size: usize,
    },
}

impl FrameHeader {
    pub fn stream_size(&self) -> usize {
        match self {
            FrameHeader::Core { stream_size, .. } => *stream_size,
            FrameHeader::Substream { frame_size, .. } => *frame_size,
        }
    }
}

/// Repack the start of a frame into big-endian 16-bit words.
fn normalize(data: &[u8], packing: Packing) -> Vec<u8> {
    let words = data
        .chunks_exact(2)
        .take(HEADER_BYTES / 2 + 2)
        .map(|pair| match packing {
            Packing::Be16 | Packing::Be14 => u16::from_be_bytes([pair[0], pair[1]]),
            Packing::Le16 | Packing::Le14 => u16::from_le_bytes([pair[0], pair[1]]),
        });

    match packing {
        Packing::Be16 | Packing::Le16 => words.flat_map(u16::to_be_bytes).collect(),
        Packing::Be14 | Packing::Le14 => {
            // 14 payload bits per word.
            let mut out = Vec::new();
            let mut acc: u32 = 0;
            let mut bits = 0;
            for word in words {
                acc = (acc << 14) | (word as u32 & 0x3FFF);
                bits += 14;
                while bits >= 8 {
                    bits -= 8;
                    out.push((acc >> bits) as u8);
                }
                acc &= (1 << bits) - 1;
            }
            out
        }
    }
}

pub fn parse_frame_header(data: &[u8]) -> Result<FrameHeader> {
    if data.len() < HEADER_BYTES {
        return Err(sync_error(format!("the buffer is too small, {} bytes", data.len())));
    }
    let sync = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let packing = match sync {
        SYNC_CORE_BE => Packing::Be16,
        SYNC_CORE_LE => Packing::Le16,
        SYNC_CORE_14_BE if data[4] & 0xF0 == 0x00 && data[5] & 0xF0 == 0xF0 => Packing::Be14,
        SYNC_CORE_14_LE if data[5] & 0xF0 == 0x00 && data[4] & 0xF0 == 0xF0 => Packing::Le14,
        SYNC_SUBSTREAM => return parse_substream(data),
        _ => return Err(sync_error(format!("no sync word, found 0x{sync:08X}"))),
    };

    let header = normalize(data, packing);
    let mut r = BitReader::new(&header);
    let short = || sync_error("truncated core header".to_string());
    r.skip_bits(32).ok_or_else(short)?;
    let _frame_type = r.read_bits(1).ok_or_else(short)?;
    let _deficit = r.read_bits(5).ok_or_else(short)?;
    let _crc_present = r.read_bits(1).ok_or_else(short)?;
    let nblks = r.read_bits(7).ok_or_else(short)?;
    let fsize = r.read_bits(14).ok_or_else(short)?;
    let _amode = r.read_bits(6).ok_or_else(short)?;
    let sfreq = r.read_bits(4).ok_or_else(short)?;

    if nblks < 5 {
        return Err(sync_error(format!("invalid block count {}", nblks + 1)));
    }
    let frame_size = fsize as usize + 1;
    if !(MIN_BYTES_PER_FRAME..=MAX_BYTES_PER_FRAME).contains(&frame_size) {
        return Err(sync_error(format!("invalid frame size {frame_size}")));
    }
    let sample_rate = CORE_SAMPLE_RATES[sfreq as usize];
    if sample_rate == 0 {
        return Err(sync_error(format!("invalid sample rate code {sfreq}")));
    }
    let stream_size = match packing {
        Packing::Be16 | Packing::Le16 => frame_size,
        Packing::Be14 | Packing::Le14 => frame_size * 8 / 7,
    };

    Ok(FrameHeader::Core {
        packing,
        frame_size,
        stream_size,
        samples: (nblks as usize + 1) * 32,
        sample_rate,
    })
}

fn parse_substream(data: &[u8]) -> Result<FrameHeader> {
    let mut r = BitReader::new(data);
    let short = || sync_error("truncated substream header".to_string());
    r.skip_bits(32).ok_or_else(short)?;
    let _user_defined = r.read_bits(8).ok_or_else(short)?;
    let _index = r.read_bits(2).ok_or_else(short)?;
    let wide = r.read_flag().ok_or_else(short)?;
    let (header_bits, size_bits) = if wide { (12, 20) } else { (8, 16) };
    let header_size = r.read_bits(header_bits).ok_or_else(short)? as usize + 1;
    let frame_size = r.read_bits(size_bits).ok_or_else(short)? as usize + 1;
    if frame_size < header_size {
        return Err(sync_error(format!(
            "substream size {frame_size} is smaller than its header ({header_size})"
        )));
    }
    Ok(FrameHeader::Substream {
        header_size,
        frame_size,
    })
}

fn sync_error(message: String) -> DecoderError {
    DecoderError::Sync {
        codec: CODEC,
        message,
    }
}

pub struct DtsDecoder<F> {
    sample_rate: u32,
    decoder: F,
    blocks: PcmBlocks,
}

impl<F: FrameDecoder> DtsDecoder<F> {
    pub fn new(sample_rate: u32, decoder: F) -> Self {
        Self {
            sample_rate,
            decoder,
            blocks: PcmBlocks::new(BLOCK_SIZE),
        }
    }
}

impl<F: FrameDecoder> AudioDecoder for DtsDecoder<F> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn copies_compressed_data(&self) -> bool {
        true
    }

    fn sync(&mut self, data: &[u8]) -> Result<usize> {
        let header = parse_frame_header(data)?;
        if let FrameHeader::Core { sample_rate, .. } = header {
            if sample_rate != self.sample_rate {
                return Err(DecoderError::SampleRateMismatch {
                    codec: CODEC,
                    expected: self.sample_rate,
                    actual: sample_rate,
                });
            }
        }
        Ok(header.stream_size())
    }

    fn decode_frame(&mut self, data: &[u8], volume: u8) -> Result<()> {
        self.sync(data)?;
        let frame = self
            .decoder
            .decode(data)
            .map_err(|e| native_error(CODEC, e))?;
        self.blocks.load(frame, volume);
        Ok(())
    }

    fn blocks_left(&self) -> usize {
        self.blocks.blocks_left()
    }

    fn decode_block(&mut self, pcm: &mut [i16]) -> Result<()> {
        self.blocks.next_block(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::FakeFrameDecoder;
    use crate::audio::{FACILITY_DECODER_DTS, NativeError};
    use crate::scaling_list::tests::BitWriter;

    /// Core header, 16-bit big-endian: 16 blocks of 32 samples.
    fn core_frame(fsize_plus_one: u32, sfreq: u32) -> Vec<u8> {
        let mut w = BitWriter::default();
        w.bits(SYNC_CORE_BE, 32)
            .bits(1, 1) // normal frame
            .bits(31, 5)
            .bits(0, 1)
            .bits(15, 7)
            .bits(fsize_plus_one - 1, 14)
            .bits(2, 6) // stereo
            .bits(sfreq, 4)
            .bits(0, 32);
        let mut frame = w.finish();
        frame.resize(fsize_plus_one as usize, 0);
        frame
    }

    fn byte_swap(data: &[u8]) -> Vec<u8> {
        data.chunks_exact(2).flat_map(|p| [p[1], p[0]]).collect()
    }

    /// Spread 16-bit words into 14-bit packing, big-endian.
    fn to_14bit(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut acc: u64 = 0;
        let mut bits = 0;
        for byte in data {
            acc = (acc << 8) | *byte as u64;
            bits += 8;
            while bits >= 14 {
                bits -= 14;
                let word = ((acc >> bits) & 0x3FFF) as u16;
                // Sign-extend the 14-bit payload into the spare bits.
                let word = if word & 0x2000 != 0 { word | 0xC000 } else { word };
                out.extend_from_slice(&word.to_be_bytes());
            }
        }
        out
    }

    #[test]
    fn test_core_header() {
        let header = parse_frame_header(&core_frame(1006, 13)).unwrap();
        assert_eq!(
            header,
            FrameHeader::Core {
                packing: Packing::Be16,
                frame_size: 1006,
                stream_size: 1006,
                samples: 512,
                sample_rate: 48000,
            }
        );
    }

    #[test]
    fn test_little_endian_core() {
        let frame = byte_swap(&core_frame(2012, 8));
        assert_eq!(&frame[..4], &[0xFE, 0x7F, 0x01, 0x80]);
        match parse_frame_header(&frame).unwrap() {
            FrameHeader::Core {
                packing,
                frame_size,
                sample_rate,
                ..
            } => {
                assert_eq!(packing, Packing::Le16);
                assert_eq!(frame_size, 2012);
                assert_eq!(sample_rate, 44100);
            }
            other => panic!("unexpected header {other:?}"),
        }
    }

    #[test]
    fn test_14bit_core() {
        let frame = to_14bit(&core_frame(1008, 13));
        assert_eq!(&frame[..6], &[0x1F, 0xFF, 0xE8, 0x00, 0x07, 0xF0]);
        let header = parse_frame_header(&frame).unwrap();
        assert_eq!(header.stream_size(), 1152);
        assert!(matches!(header, FrameHeader::Core { packing: Packing::Be14, frame_size: 1008, .. }));

        let le = byte_swap(&frame);
        assert!(matches!(
            parse_frame_header(&le).unwrap(),
            FrameHeader::Core { packing: Packing::Le14, frame_size: 1008, .. }
        ));
    }

    #[test]
    fn test_frame_size_range() {
        assert!(parse_frame_header(&core_frame(96, 13)).is_ok());
        assert!(parse_frame_header(&core_frame(16384, 13)).is_ok());
        assert!(matches!(
            parse_frame_header(&core_frame(95, 13)),
            Err(DecoderError::Sync { .. })
        ));
    }

    #[test]
    fn test_substream_header() {
        let mut w = BitWriter::default();
        w.bits(SYNC_SUBSTREAM, 32)
            .bits(0, 8)
            .bits(0, 2)
            .bits(0, 1)
            .bits(15, 8)
            .bits(2047, 16);
        let mut frame = w.finish();
        frame.resize(2048, 0);
        let header = parse_frame_header(&frame).unwrap();
        assert_eq!(
            header,
            FrameHeader::Substream {
                header_size: 16,
                frame_size: 2048
            }
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            parse_frame_header(&[0u8; 32]),
            Err(DecoderError::Sync { .. })
        ));
        assert!(matches!(
            parse_frame_header(&[0x7F, 0xFE, 0x80, 0x01]),
            Err(DecoderError::Sync { .. })
        ));
        assert!(matches!(
            parse_frame_header(&core_frame(1006, 4)),
            Err(DecoderError::Sync { .. })
        ));
    }

    #[test]
    fn test_decode_one_block_per_frame() {
        let mut decoder = DtsDecoder::new(48000, FakeFrameDecoder::new(512, 48000));
        let frame = core_frame(1006, 13);
        assert_eq!(decoder.sync(&frame).unwrap(), 1006);
        decoder.decode_frame(&frame, 0).unwrap();
        assert_eq!(decoder.blocks_left(), 1);
        let mut pcm = vec![1i16; BLOCK_SIZE * 2];
        decoder.decode_block(&mut pcm).unwrap();
        assert!(pcm.iter().all(|s| *s == 0));
        assert!(decoder.decode_block(&mut pcm).is_err());
    }

    #[test]
    fn test_sample_rate_mismatch() {
        let mut decoder = DtsDecoder::new(48000, FakeFrameDecoder::new(512, 48000));
        assert!(matches!(
            decoder.sync(&core_frame(1006, 8)),
            Err(DecoderError::SampleRateMismatch { actual: 44100, .. })
        ));
    }

    #[test]
    fn test_native_failure_uses_dts_table() {
        let mut fake = FakeFrameDecoder::new(512, 48000);
        fake.fail = Some(NativeError::new((FACILITY_DECODER_DTS | 3) as i32));
        let mut decoder = DtsDecoder::new(48000, fake);
        let err = decoder.decode_frame(&core_frame(1006, 13), 255).unwrap_err();
        assert_eq!(err.to_string(), "DTS decoder failed: CRC check failed");
    }
}
