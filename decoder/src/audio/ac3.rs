//! Dolby AC-3 adapter.

use super::{AudioDecoder, FrameDecoder, PcmBlocks, native_error};
use crate::error::{DecoderError, Result};

const CODEC: &str = "AC-3";
const SYNC_WORD: u16 = 0x0B77;
const HEADER_SIZE: usize = 7;

/// Two 256-sample blocks of the underlying decoder per block.
pub const BLOCK_SIZE: usize = 0x200;

const SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];

/// Frame sizes in 16-bit words, by `frmsizecod` and `fscod` (A/52 Table 5.18).
const FRAME_SIZE_WORDS: [[u16; 3]; 38] = [
    [64, 69, 96],
    [64, 70, 96],
    [80, 87, 120],
    [80, 88, 120],
    [96, 104, 144],
    [96, 105, 144],
    [112, 121, 168],
    [112, 122, 168],
    [128, 139, 192],
    [128, 140, 192],
    [160, 174, 240],
    [160, 175, 240],
    [192, 208, 288],
    [192, 209, 288],
    [224, 243, 336],
    [224, 244, 336],
    [256, 278, 384],
    [256, 279, 384],
    [320, 348, 480],
    [320, 349, 480],
    [384, 417, 576],
    [384, 418, 576],
    [448, 487, 672],
    [448, 488, 672],
    [512, 557, 768],
    [512, 558, 768],
    [640, 696, 960],
    [640, 697, 960],
    [768, 835, 1152],
    [768, 836, 1152],
    [896, 975, 1344],
    [896, 976, 1344],
    [1024, 1114, 1536],
    [1024, 1115, 1536],
    [1152, 1253, 1728],
    [1152, 1254, 1728],
    [1280, 1393, 1920],
    [1280, 1394, 1920],
];

/// Fields of an AC-3 `syncinfo()` and the start of `bsi()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInfo {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub bsid: u8,
}

pub fn parse_sync_info(data: &[u8]) -> Result<SyncInfo> {
    if data.len() < HEADER_SIZE {
        return Err(sync_error(format!("the buffer is too small, {} bytes", data.len())));
    }
    let sync = u16::from_be_bytes([data[0], data[1]]);
    if sync != SYNC_WORD {
        return Err(sync_error(format!("bad sync word 0x{sync:04X}")));
    }
    let fscod = (data[4] >> 6) as usize;
    let frmsizecod = (data[4] & 0x3F) as usize;
    let bsid = data[5] >> 3;

    // bsid 9..11 are the half, quarter and eighth rate variants.
    let rate_shift = match bsid {
        0..=8 => 0,
        9..=11 => bsid - 8,
        _ => return Err(sync_error(format!("unsupported bsid {bsid}"))),
    };
    let base_rate = *SAMPLE_RATES
        .get(fscod)
        .ok_or_else(|| sync_error("reserved sample rate code".to_string()))?;
    let words = FRAME_SIZE_WORDS
        .get(frmsizecod)
        .ok_or_else(|| sync_error(format!("invalid frame size code {frmsizecod}")))?[fscod];

    Ok(SyncInfo {
        sample_rate: base_rate >> rate_shift,
        frame_size: words as usize * 2,
        bsid,
    })
}

fn sync_error(message: String) -> DecoderError {
    DecoderError::Sync {
        codec: CODEC,
        message,
    }
}

/// AC-3 adapter: six 256-sample blocks per frame, exposed as three blocks
/// of 512.
pub struct Ac3Decoder<F> {
    sample_rate: u32,
    decoder: F,
    blocks: PcmBlocks,
}

impl<F: FrameDecoder> Ac3Decoder<F> {
    pub fn new(sample_rate: u32, decoder: F) -> Self {
        Self {
            sample_rate,
            decoder,
            blocks: PcmBlocks::new(BLOCK_SIZE),
        }
    }
}

impl<F: FrameDecoder> AudioDecoder for Ac3Decoder<F> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn copies_compressed_data(&self) -> bool {
        false
    }

    fn sync(&mut self, data: &[u8]) -> Result<usize> {
        let info = parse_sync_info(data)?;
        if info.sample_rate != self.sample_rate {
            return Err(DecoderError::SampleRateMismatch {
                codec: CODEC,
                expected: self.sample_rate,
                actual: info.sample_rate,
            });
        }
        Ok(info.frame_size)
    }

    fn decode_frame(&mut self, data: &[u8], volume: u8) -> Result<()> {
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
