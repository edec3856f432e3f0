//! H.264 codec configuration: the `avcC` record stored as codec private data,
//! and the sequence parameter set fields the decoder needs.

use crate::bits::{BitReader, remove_emulation_prevention};
use crate::color::ColorAttributes;
use crate::error::{MediaError, Result};
use crate::queue::EncodedProducer;
use crate::track::{ChromaFormat, DecodedVideoSize, Rect, Size};

/// 4-byte Annex B NAL start code.
pub const NAL_START_CODE: [u8; 4] = [0, 0, 0, 1];

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;

pub fn nal_type(header: u8) -> u8 {
    header & 0x1F
}

/// Parsed `AVCDecoderConfigurationRecord`.
#[derive(Debug, Clone)]
pub struct AvcConfig {
    pub profile: u8,
    pub profile_compatibility: u8,
    /// Level multiplied by 10, e.g. 41 for level 4.1.
    pub level: u8,
    /// Size of the big-endian length prefix in front of every NALU (1, 2 or 4).
    pub nalu_length_size: u8,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

fn config_error(message: &str) -> MediaError {
    MediaError::InvalidCodecConfig(message.to_string())
}

fn read_blobs(data: &[u8], offset: &mut usize, count: usize) -> Result<Vec<Vec<u8>>> {
    let mut blobs = Vec::with_capacity(count);
    for _ in 0..count {
        let len = data
            .get(*offset..*offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or_else(|| config_error("avcC truncated in parameter set length"))?;
        *offset += 2;
        let blob = data
            .get(*offset..*offset + len)
            .ok_or_else(|| config_error("avcC truncated in parameter set payload"))?;
        blobs.push(blob.to_vec());
        *offset += len;
    }
    Ok(blobs)
}

impl AvcConfig {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(config_error("avcC record is too short"));
        }
        if data[0] != 1 {
            return Err(MediaError::InvalidCodecConfig(format!(
                "unexpected avcC configuration version {}",
                data[0]
            )));
        }

        let mut offset = 6;
        let sps = read_blobs(data, &mut offset, (data[5] & 0x1F) as usize)?;
        let pps_count = *data
            .get(offset)
            .ok_or_else(|| config_error("avcC truncated before PPS count"))?;
        offset += 1;
        let pps = read_blobs(data, &mut offset, pps_count as usize)?;

        if sps.is_empty() || pps.is_empty() {
            return Err(config_error("avcC must carry at least one SPS and one PPS"));
        }

        Ok(Self {
            profile: data[1],
            profile_compatibility: data[2],
            level: data[3],
            nalu_length_size: (data[4] & 3) + 1,
            sps,
            pps,
        })
    }
}

/// Fields of an H.264 sequence parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub chroma_format: ChromaFormat,
    pub separate_colour_plane: bool,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub width_in_mbs: u32,
    pub height_in_map_units: u32,
    pub frame_mbs_only: bool,
    /// Frame cropping offsets: left, right, top, bottom (in crop units).
    pub crop_offsets: Option<[u32; 4]>,
    pub color: ColorAttributes,
}

/// Largest bit depth of High 4:4:4 Predictive (`bit_depth_*_minus8` ≤ 6).
const MAX_BIT_DEPTH: u8 = 14;
/// Picture width and height limit in macroblocks / map units (16384 pixels).
const MAX_SIZE_IN_MBS: u32 = 1024;

const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// `8 + bit_depth_*_minus8`, saturated so oversized values fail validation.
fn read_bit_depth(r: &mut BitReader) -> Option<u8> {
    let minus8 = r.read_ue()?;
    Some(u8::try_from(minus8).unwrap_or(u8::MAX).saturating_add(8))
}

fn skip_scaling_list(r: &mut BitReader, size: usize) -> Option<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Some(())
}

impl Sps {
    /// Parse an SPS NAL unit, header byte included.
    pub fn parse(nal: &[u8]) -> Result<Self> {
        let header = *nal.first().ok_or_else(|| config_error("empty SPS"))?;
        if nal_type(header) != NAL_SPS {
            return Err(config_error("the SPS is invalid, wrong NALU type"));
        }
        let rbsp = remove_emulation_prevention(&nal[1..]);
        let sps = Self::parse_rbsp(&rbsp).ok_or_else(|| config_error("truncated SPS"))?;
        sps.validate()?;
        Ok(sps)
    }

    fn validate(&self) -> Result<()> {
        if self.bit_depth_luma > MAX_BIT_DEPTH || self.bit_depth_chroma > MAX_BIT_DEPTH {
            return Err(MediaError::InvalidCodecConfig(format!(
                "unsupported SPS bit depth, luma {} chroma {}",
                self.bit_depth_luma, self.bit_depth_chroma
            )));
        }
        if self.width_in_mbs > MAX_SIZE_IN_MBS || self.height_in_map_units > MAX_SIZE_IN_MBS {
            return Err(MediaError::InvalidCodecConfig(format!(
                "SPS picture size of {}x{} macroblocks is too large",
                self.width_in_mbs, self.height_in_map_units
            )));
        }
        Ok(())
    }

    fn parse_rbsp(rbsp: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(rbsp);
        let profile_idc = r.read_bits(8)? as u8;
        r.read_bits(8)?; // constraint flags
        let level_idc = r.read_bits(8)? as u8;
        r.read_ue()?; // seq_parameter_set_id

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        let mut bit_depth_luma = 8;
        let mut bit_depth_chroma = 8;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_flag()?;
            }
            bit_depth_luma = read_bit_depth(&mut r)?;
            bit_depth_chroma = read_bit_depth(&mut r)?;
            r.read_flag()?; // qpprime_y_zero_transform_bypass_flag
            if r.read_flag()? {
                let lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..lists {
                    if r.read_flag()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }
        let chroma_format = ChromaFormat::from_idc(chroma_format_idc)?;

        r.read_ue()?; // log2_max_frame_num_minus4
        match r.read_ue()? {
            0 => {
                r.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
            }
            1 => {
                r.read_flag()?;
                r.read_se()?;
                r.read_se()?;
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    r.read_se()?;
                }
            }
            _ => {}
        }
        r.read_ue()?; // max_num_ref_frames
        r.read_flag()?; // gaps_in_frame_num_value_allowed_flag

        let width_in_mbs = r.read_ue()?.saturating_add(1);
        let height_in_map_units = r.read_ue()?.saturating_add(1);
        let frame_mbs_only = r.read_flag()?;
        if !frame_mbs_only {
            r.read_flag()?; // mb_adaptive_frame_field_flag
        }
        r.read_flag()?; // direct_8x8_inference_flag

        let crop_offsets = if r.read_flag()? {
            Some([r.read_ue()?, r.read_ue()?, r.read_ue()?, r.read_ue()?])
        } else {
            None
        };

        let mut color = ColorAttributes::default();
        if r.read_flag()? {
            if r.read_flag()? {
                let aspect_ratio_idc = r.read_bits(8)?;
                if aspect_ratio_idc == 255 {
                    r.read_bits(16)?;
                    r.read_bits(16)?;
                }
            }
            if r.read_flag()? {
                r.read_flag()?; // overscan_appropriate_flag
            }
            if r.read_flag()? {
                r.read_bits(3)?; // video_format
                let full_range = r.read_flag()?;
                let (mut primaries, mut transfer, mut matrix) = (None, None, None);
                if r.read_flag()? {
                    primaries = Some(r.read_bits(8)? as u64);
                    transfer = Some(r.read_bits(8)? as u64);
                    matrix = Some(r.read_bits(8)? as u64);
                }
                color = ColorAttributes::from_codes(primaries, transfer, matrix, Some(full_range));
            }
        }

        Some(Self {
            profile_idc,
            level_idc,
            chroma_format,
            separate_colour_plane,
            bit_depth_luma,
            bit_depth_chroma,
            width_in_mbs,
            height_in_map_units,
            frame_mbs_only,
            crop_offsets,
            color,
        })
    }

    /// Full size and crop rectangle of the decoded picture.
    pub fn decoded_size(&self) -> DecodedVideoSize {
        let field_mul = if self.frame_mbs_only { 1 } else { 2 };
        let width = self.width_in_mbs.saturating_mul(16);
        let height = self.height_in_map_units.saturating_mul(16 * field_mul);

        let (crop_x, crop_y) = if self.separate_colour_plane
            || self.chroma_format == ChromaFormat::Monochrome
        {
            (1, field_mul)
        } else {
            let (sub_w, sub_h) = self.chroma_format.subsampling();
            (sub_w, sub_h * field_mul)
        };

        let crop = match self.crop_offsets {
            Some([left, right, top, bottom]) => Rect {
                left: crop_x.saturating_mul(left).min(width),
                top: crop_y.saturating_mul(top).min(height),
                right: width.saturating_sub(crop_x.saturating_mul(right)),
                bottom: height.saturating_sub(crop_y.saturating_mul(bottom)),
            },
            None => Rect {
                left: 0,
                top: 0,
                right: width,
                bottom: height,
            },
        };

        DecodedVideoSize {
            size: Size { width, height },
            crop,
            chroma_format: self.chroma_format,
        }
    }
}

/// Slice type of a coded slice NALU (header byte included).
pub fn slice_type(nal: &[u8]) -> Result<u32> {
    let rbsp = remove_emulation_prevention(nal.get(1..).unwrap_or(&[]));
    let mut r = BitReader::new(&rbsp);
    let parsed = r.read_ue().and_then(|_first_mb| r.read_ue());
    match parsed {
        Some(t) if t <= 9 => Ok(t),
        Some(t) => Err(MediaError::InvalidData {
            offset: 0,
            message: format!("malformed H.264 stream, slice_type {t} is outside [0..9]"),
        }),
        None => Err(MediaError::InvalidData {
            offset: 0,
            message: "truncated slice header".to_string(),
        }),
    }
}

/// True for I and SI slices.
pub fn is_intra_slice(slice_type: u32) -> bool {
    matches!(slice_type % 5, 2 | 4)
}

/// Decoder configuration of an H.264 track.
#[derive(Debug, Clone)]
pub struct H264Params {
    pub config: AvcConfig,
    pub sps: Sps,
}

impl H264Params {
    pub fn from_codec_private(data: &[u8]) -> Result<Self> {
        let config = AvcConfig::parse(data)?;
        let sps = Sps::parse(&config.sps[0])?;
        Ok(Self { config, sps })
    }

    pub fn decoded_size(&self) -> DecodedVideoSize {
        self.sps.decoded_size()
    }

    /// Enqueue the first SPS and PPS, each as one Annex B NALU.
    pub fn enqueue_parameters(&self, queue: &mut EncodedProducer) -> Result<()> {
        for nal in [&self.config.sps[0], &self.config.pps[0]] {
            let mut buffer = queue.next_buffer().ok_or(MediaError::QueueFull)?;
            buffer.clear();
            buffer.extend(&NAL_START_CODE)?;
            buffer.extend(nal)?;
            queue.enqueue(buffer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MSB-first bit writer for building parameter sets in tests.
    #[derive(Default)]
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bits: u32,
    }

    impl BitWriter {
        pub(crate) fn bits(&mut self, value: u32, n: u8) -> &mut Self {
            for i in (0..n).rev() {
                if self.bits % 8 == 0 {
                    self.bytes.push(0);
                }
                let bit = ((value >> i) & 1) as u8;
                let last = self.bytes.len() - 1;
                self.bytes[last] |= bit << (7 - (self.bits % 8));
                self.bits += 1;
            }
            self
        }

        pub(crate) fn flag(&mut self, v: bool) -> &mut Self {
            self.bits(v as u32, 1)
        }

        pub(crate) fn ue(&mut self, v: u32) -> &mut Self {
            let code = v as u64 + 1;
            let len = 64 - code.leading_zeros() as u8;
            self.bits(0, len - 1);
            self.bits(code as u32, len)
        }

        pub(crate) fn se(&mut self, v: i32) -> &mut Self {
            let k = if v > 0 { 2 * v as u32 - 1 } else { (-2 * v) as u32 };
            self.ue(k)
        }

        /// Append the RBSP stop bit and return the bytes.
        pub(crate) fn finish(&mut self) -> Vec<u8> {
            self.bits(1, 1);
            self.bytes.clone()
        }
    }

    /// Baseline 1280x720 SPS NALU.
    pub(crate) fn baseline_720p_sps() -> Vec<u8> {
        let mut w = BitWriter::default();
        w.bits(66, 8).bits(0, 8).bits(31, 8).ue(0);
        w.ue(0).ue(2); // frame num, poc type 2
        w.ue(1).flag(false);
        w.ue(79).ue(44).flag(true).flag(true).flag(false).flag(false);
        let mut nal = vec![0x67];
        nal.extend(w.finish());
        nal
    }

    /// High profile 1920x1080 SPS with cropping and a VUI colour description.
    pub(crate) fn high_1080p_sps() -> Vec<u8> {
        let mut w = BitWriter::default();
        w.bits(100, 8).bits(0, 8).bits(40, 8).ue(0);
        w.ue(1).ue(0).ue(0).flag(false).flag(false); // 4:2:0, 8 bit, no scaling matrix
        w.ue(0).ue(0).ue(4); // frame num, poc type 0, lsb
        w.ue(4).flag(false);
        w.ue(119).ue(67).flag(true).flag(true);
        w.flag(true).ue(0).ue(0).ue(0).ue(4); // crop bottom 4 * 2 rows
        w.flag(true); // vui
        w.flag(false).flag(false); // aspect ratio, overscan
        w.flag(true).bits(5, 3).flag(false).flag(true).bits(1, 8).bits(1, 8).bits(1, 8);
        let mut nal = vec![0x67];
        nal.extend(w.finish());
        nal
    }

    pub(crate) fn avcc(sps: &[u8], pps: &[u8]) -> Vec<u8> {
        let mut data = vec![1, sps[1], sps[2], sps[3], 0xFF, 0xE1];
        data.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        data.extend_from_slice(sps);
        data.push(1);
        data.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        data.extend_from_slice(pps);
        data
    }

    #[test]
    fn test_parse_avcc() {
        let sps = baseline_720p_sps();
        let pps = vec![0x68, 0xCE, 0x38, 0x80];
        let config = AvcConfig::parse(&avcc(&sps, &pps)).unwrap();
        assert_eq!(config.profile, 66);
        assert_eq!(config.level, 31);
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!(config.sps, vec![sps]);
        assert_eq!(config.pps, vec![pps]);
    }

    #[test]
    fn test_parse_avcc_truncated() {
        let sps = baseline_720p_sps();
        let data = avcc(&sps, &[0x68, 0xCE]);
        assert!(matches!(
            AvcConfig::parse(&data[..data.len() - 1]),
            Err(MediaError::InvalidCodecConfig(_))
        ));
        assert!(AvcConfig::parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_baseline_sps_size() {
        let sps = Sps::parse(&baseline_720p_sps()).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.chroma_format, ChromaFormat::C420);
        assert_eq!(sps.bit_depth_luma, 8);
        let size = sps.decoded_size();
        assert_eq!(size.size, Size { width: 1280, height: 720 });
        assert_eq!(size.crop, Rect { left: 0, top: 0, right: 1280, bottom: 720 });
        assert!(sps.color.is_empty());
    }

    #[test]
    fn test_high_sps_crop_and_colour() {
        let sps = Sps::parse(&high_1080p_sps()).unwrap();
        let size = sps.decoded_size();
        assert_eq!(size.size, Size { width: 1920, height: 1088 });
        assert_eq!(size.crop, Rect { left: 0, top: 0, right: 1920, bottom: 1080 });
        assert_eq!(
            sps.color.color_space,
            Some(crate::color::ColorSpace::Bt709)
        );
        assert_eq!(sps.color.full_range, Some(false));
    }

    /// Baseline SPS with the given size in macroblocks and crop offsets.
    fn baseline_sps(width_mbs: u32, height_mbs: u32, crop: Option<[u32; 4]>) -> Vec<u8> {
        let mut w = BitWriter::default();
        w.bits(66, 8).bits(0, 8).bits(31, 8).ue(0);
        w.ue(0).ue(2).ue(1).flag(false);
        w.ue(width_mbs - 1).ue(height_mbs - 1).flag(true).flag(true);
        match crop {
            Some([l, r, t, b]) => {
                w.flag(true).ue(l).ue(r).ue(t).ue(b);
            }
            None => {
                w.flag(false);
            }
        }
        w.flag(false);
        let mut nal = vec![0x67];
        nal.extend(w.finish());
        nal
    }

    #[test]
    fn test_sps_rejects_oversized_dimensions() {
        assert!(matches!(
            Sps::parse(&baseline_sps(0x1000_0000, 45, None)),
            Err(MediaError::InvalidCodecConfig(_))
        ));
        assert!(matches!(
            Sps::parse(&baseline_sps(80, 1025, None)),
            Err(MediaError::InvalidCodecConfig(_))
        ));
        let sps = Sps::parse(&baseline_sps(1024, 1024, None)).unwrap();
        assert_eq!(sps.decoded_size().size, Size { width: 16384, height: 16384 });
    }

    #[test]
    fn test_sps_crop_offsets_clamped() {
        let huge = u32::MAX - 1;
        let sps = Sps::parse(&baseline_sps(80, 45, Some([huge, huge, huge, huge]))).unwrap();
        let crop = sps.decoded_size().crop;
        assert_eq!(crop, Rect { left: 1280, top: 720, right: 0, bottom: 0 });
        assert_eq!(crop.width(), 0);
        assert_eq!(crop.height(), 0);
    }

    #[test]
    fn test_sps_rejects_bit_depth() {
        for minus8 in [7, 250, 0x1000] {
            let mut w = BitWriter::default();
            w.bits(100, 8).bits(0, 8).bits(40, 8).ue(0);
            w.ue(1).ue(minus8).ue(0).flag(false).flag(false);
            w.ue(0).ue(2).ue(1).flag(false);
            w.ue(79).ue(44).flag(true).flag(true).flag(false).flag(false);
            let mut nal = vec![0x67];
            nal.extend(w.finish());
            assert!(
                matches!(Sps::parse(&nal), Err(MediaError::InvalidCodecConfig(_))),
                "bit_depth_luma_minus8 = {minus8}"
            );
        }
    }

    #[test]
    fn test_sps_wrong_nal_type() {
        let mut nal = baseline_720p_sps();
        nal[0] = 0x68;
        assert!(Sps::parse(&nal).is_err());
    }

    #[test]
    fn test_slice_type() {
        // first_mb_in_slice = 0, slice_type = 7 (I, all slices)
        let mut w = BitWriter::default();
        w.ue(0).ue(7).ue(0);
        let mut nal = vec![0x65];
        nal.extend(w.finish());
        let t = slice_type(&nal).unwrap();
        assert_eq!(t, 7);
        assert!(is_intra_slice(t));
        assert!(!is_intra_slice(5));

        let mut w = BitWriter::default();
        w.ue(0).ue(12);
        let mut bad = vec![0x41];
        bad.extend(w.finish());
        assert!(slice_type(&bad).is_err());
    }
}
