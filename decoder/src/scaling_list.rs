//! HEVC scaling lists (section 7.3.4) and their layout in the decoder's
//! scaling factor window.

use media::bits::BitReader;

use crate::error::{DecoderError, Result};

// Table 7-6, ScalingList[1..3][0..2]
const DEFAULTS_INTRA: [u8; 64] = [
    16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 16, 17, 16, 17, 18, //
    17, 18, 18, 17, 18, 21, 19, 20, 21, 20, 19, 21, 24, 22, 22, 24, //
    24, 22, 22, 24, 25, 25, 27, 30, 27, 25, 25, 29, 31, 35, 35, 31, //
    29, 36, 41, 44, 41, 36, 47, 54, 54, 47, 65, 70, 65, 88, 88, 115,
];

// Table 7-6, ScalingList[1..3][3..5]
const DEFAULTS_INTER: [u8; 64] = [
    16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 17, 17, 17, 17, 18, //
    18, 18, 18, 18, 18, 20, 20, 20, 20, 20, 20, 20, 24, 24, 24, 24, //
    24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 28, 28, 28, 28, 28, //
    28, 33, 33, 33, 33, 33, 41, 41, 41, 41, 54, 54, 54, 71, 71, 91,
];

pub const SIZES: usize = 4;
pub const MATRICES: usize = 6;

/// Up-right diagonal scan of a square block (6.5.3), as `(x, y)` pairs.
pub fn up_right_diagonal(block: usize) -> Vec<(usize, usize)> {
    let mut scan = Vec::with_capacity(block * block);
    let mut x = 0usize;
    let mut y = 0isize;
    while scan.len() < block * block {
        while y >= 0 {
            if x < block && (y as usize) < block {
                scan.push((x, y as usize));
            }
            y -= 1;
            x += 1;
        }
        y = x as isize;
        x = 0;
    }
    scan
}

/// Scaling factors of an SPS or PPS.
///
/// `lists[size][matrix]` holds the coefficients in raster order: 16 used
/// entries of a 4x4 block for size 0, an 8x8 block for the other sizes.
/// `dc[size - 2][matrix]` is the DC coefficient of the 16x16 and 32x32 lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingList {
    pub lists: [[[u8; 64]; MATRICES]; SIZES],
    pub dc: [[u8; MATRICES]; 2],
}

impl Default for ScalingList {
    fn default() -> Self {
        let mut list = Self {
            lists: [[[16; 64]; MATRICES]; SIZES],
            dc: [[16; MATRICES]; 2],
        };
        for size in 1..SIZES {
            for matrix in 0..MATRICES {
                list.set_default(size, matrix);
            }
        }
        list
    }
}

impl ScalingList {
    fn set_default(&mut self, size: usize, matrix: usize) {
        self.lists[size][matrix] = match (size, matrix) {
            (0, _) => [16; 64],
            (_, 0..=2) => DEFAULTS_INTRA,
            _ => DEFAULTS_INTER,
        };
        if size > 1 {
            self.dc[size - 2][matrix] = 16;
        }
    }

    /// Parse `scaling_list_data()`. Matrices the syntax does not code keep
    /// their default values.
    pub fn parse(reader: &mut BitReader) -> Result<Self> {
        let mut list = Self::default();
        list.read(reader)?;
        Ok(list)
    }

    /// Read `scaling_list_data()` over the current values.
    pub fn read(&mut self, reader: &mut BitReader) -> Result<()> {
        let scan4 = up_right_diagonal(4);
        let scan8 = up_right_diagonal(8);

        for size in 0..SIZES {
            let (scan, block) = if size == 0 { (&scan4, 4) } else { (&scan8, 8) };
            let step = if size == 3 { 3 } else { 1 };

            for matrix in (0..MATRICES).step_by(step) {
                let pred_mode_flag = reader.read_flag().ok_or_else(truncated)?;
                if !pred_mode_flag {
                    let delta = reader.read_ue().ok_or_else(truncated)? as usize * step;
                    if delta == 0 {
                        self.set_default(size, matrix);
                        continue;
                    }
                    if delta > matrix {
                        return Err(DecoderError::InvalidScalingList(format!(
                            "size {size} matrix {matrix} references matrix delta {delta}"
                        )));
                    }
                    let reference = matrix - delta;
                    self.lists[size][matrix] = self.lists[size][reference];
                    if size > 1 {
                        self.dc[size - 2][matrix] = self.dc[size - 2][reference];
                    }
                    continue;
                }

                let mut next_coef: i32 = 8;
                let coef_num = 64usize.min(1 << (4 + (size << 1)));
                if size > 1 {
                    let dc = reader.read_se().ok_or_else(truncated)? + 8;
                    if !(1..=255).contains(&dc) {
                        return Err(DecoderError::InvalidScalingList(format!(
                            "DC coefficient {dc} of size {size} matrix {matrix}"
                        )));
                    }
                    next_coef = dc;
                    self.dc[size - 2][matrix] = dc as u8;
                }

                for &(x, y) in scan.iter().take(coef_num) {
                    let delta = reader.read_se().ok_or_else(truncated)?;
                    next_coef = (next_coef + delta + 256).rem_euclid(256);
                    self.lists[size][matrix][block * y + x] = next_coef as u8;
                }
            }
        }
        Ok(())
    }
}

fn truncated() -> DecoderError {
    DecoderError::InvalidScalingList("unexpected end of data".to_string())
}

/// Byte offset of every `[size][matrix]` block in the scaling factor
/// window. Size 3 only carries matrices 0 and 3.
const BLOCK_OFFSETS: [[u16; MATRICES]; SIZES] = [
    [0x0000, 0x0010, 0x0020, 0x0030, 0x0040, 0x0050],
    [0x0060, 0x00A0, 0x00E0, 0x0120, 0x0160, 0x01A0],
    [0x01E0, 0x02E0, 0x03E0, 0x04E0, 0x05E0, 0x06E0],
    [0x07E0, 0, 0, 0x0BE0, 0, 0],
];

fn source_index(size: usize, x: usize, y: usize) -> usize {
    match size {
        0 => (y << 2) + x,
        1 => (y << 3) + x,
        2 => ((y >> 1) << 3) + (x >> 1),
        _ => ((y >> 2) << 3) + (x >> 2),
    }
}

const WINDOW_BYTES: usize = 4064;

/// Scaling factors expanded to full block size, ready to upload into the
/// decoder.
#[derive(Debug, Clone)]
pub struct DecoderScalingList {
    data: Box<[u8; WINDOW_BYTES]>,
    enabled: bool,
}

impl Default for DecoderScalingList {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderScalingList {
    pub const BYTES: usize = WINDOW_BYTES;
    pub const WORDS: usize = Self::BYTES / 4;

    pub fn new() -> Self {
        Self {
            data: Box::new([0; Self::BYTES]),
            enabled: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..]
    }

    fn update(&mut self, source: &ScalingList, size: usize, matrix: usize) {
        let offset = BLOCK_OFFSETS[size][matrix] as usize;
        let block = 4 << size;
        for y in 0..block {
            for x in 0..block {
                self.data[offset + x + y * block] = source.lists[size][matrix][source_index(size, x, y)];
            }
        }
        if size > 1 {
            self.data[offset] = source.dc[size - 2][matrix];
        }
    }

    pub fn initialize(&mut self, source: &ScalingList) {
        for size in 0..3 {
            for matrix in 0..MATRICES {
                self.update(source, size, matrix);
            }
        }
        self.update(source, 3, 0);
        self.update(source, 3, 3);
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Copy the window into `dest` as little-endian words. Returns false and
    /// leaves `dest` untouched when disabled.
    pub fn write(&self, dest: &mut [u32]) -> bool {
        if !self.enabled {
            return false;
        }
        for (word, chunk) in dest.iter_mut().zip(self.data.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MSB-first bit writer for hand-built RBSPs.
    #[derive(Default)]
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bits: usize,
    }

    impl BitWriter {
        pub(crate) fn bit(&mut self, bit: bool) -> &mut Self {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if bit {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
            self
        }

        pub(crate) fn bits(&mut self, value: u32, n: u32) -> &mut Self {
            for i in (0..n).rev() {
                self.bit((value >> i) & 1 == 1);
            }
            self
        }

        pub(crate) fn ue(&mut self, value: u32) -> &mut Self {
            let v = value + 1;
            let len = 32 - v.leading_zeros();
            self.bits(0, len - 1).bits(v, len)
        }

        pub(crate) fn se(&mut self, value: i32) -> &mut Self {
            let mapped = if value > 0 {
                (value as u32) * 2 - 1
            } else {
                (-value as u32) * 2
            };
            self.ue(mapped)
        }

        pub(crate) fn finish(&mut self) -> Vec<u8> {
            // Trailing bits keep the reader from running dry mid-syntax.
            self.bits(0, 16);
            self.bytes.clone()
        }
    }

    fn predict_default(w: &mut BitWriter) {
        w.bit(false).ue(0);
    }

    /// Writes the predicted-from-default syntax for every remaining matrix
    /// starting at `(size, matrix)`.
    fn defaults_from(w: &mut BitWriter, size: usize, matrix: usize) {
        for s in size..SIZES {
            let step = if s == 3 { 3 } else { 1 };
            let start = if s == size { matrix } else { 0 };
            for _ in (start..MATRICES).step_by(step) {
                predict_default(w);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let list = ScalingList::default();
        assert!(list.lists[0].iter().all(|m| m[..16].iter().all(|c| *c == 16)));
        assert_eq!(list.lists[1][0][63], 115);
        assert_eq!(list.lists[2][4][63], 91);
        assert_eq!(list.lists[3][3][43], 28);
        assert_eq!(list.dc, [[16; 6]; 2]);
    }

    #[test]
    fn test_diagonal_scan() {
        let scan = up_right_diagonal(4);
        assert_eq!(scan.len(), 16);
        assert_eq!(&scan[..6], &[(0, 0), (0, 1), (1, 0), (0, 2), (1, 1), (2, 0)]);
        assert_eq!(scan[15], (3, 3));
        assert_eq!(up_right_diagonal(8)[63], (7, 7));
    }

    #[test]
    fn test_parse_all_defaults() {
        let mut w = BitWriter::default();
        defaults_from(&mut w, 0, 0);
        let data = w.finish();
        let list = ScalingList::parse(&mut BitReader::new(&data)).unwrap();
        assert_eq!(list, ScalingList::default());
    }

    #[test]
    fn test_parse_explicit_follows_diagonal_scan() {
        let mut w = BitWriter::default();
        w.bit(true);
        for _ in 0..16 {
            w.se(1);
        }
        defaults_from(&mut w, 0, 1);
        let data = w.finish();
        let list = ScalingList::parse(&mut BitReader::new(&data)).unwrap();

        // Scan positions 0, 1, 2, 3 land on raster 0, 4, 1, 8.
        let m = &list.lists[0][0];
        assert_eq!(m[0], 9);
        assert_eq!(m[4], 10);
        assert_eq!(m[1], 11);
        assert_eq!(m[8], 12);
        assert_eq!(m[15], 24);
        assert_eq!(list.lists[0][1][..16], [16; 16]);
    }

    #[test]
    fn test_coefficients_wrap_modulo_256() {
        let mut w = BitWriter::default();
        w.bit(true).se(-10);
        for _ in 1..16 {
            w.se(0);
        }
        defaults_from(&mut w, 0, 1);
        let data = w.finish();
        let list = ScalingList::parse(&mut BitReader::new(&data)).unwrap();
        assert_eq!(list.lists[0][0][0], 254);
    }

    #[test]
    fn test_prediction_copies_reference() {
        let mut w = BitWriter::default();
        w.bit(true).se(2);
        for _ in 1..16 {
            w.se(0);
        }
        // Matrix 1 predicted from matrix 0.
        w.bit(false).ue(1);
        defaults_from(&mut w, 0, 2);
        let data = w.finish();
        let list = ScalingList::parse(&mut BitReader::new(&data)).unwrap();
        assert_eq!(list.lists[0][0][..16], [10; 16]);
        assert_eq!(list.lists[0][1][..16], [10; 16]);
        assert_eq!(list.lists[0][2][..16], [16; 16]);
    }

    #[test]
    fn test_dc_coefficient_and_size3_prediction() {
        let mut w = BitWriter::default();
        defaults_from_until(&mut w, 3);
        // Size 3 matrix 0: DC 12, flat 12.
        w.bit(true).se(4);
        for _ in 0..64 {
            w.se(0);
        }
        // Size 3 matrix 3 predicted from matrix 0 (delta 1 * 3).
        w.bit(false).ue(1);
        let data = w.finish();
        let list = ScalingList::parse(&mut BitReader::new(&data)).unwrap();
        assert_eq!(list.dc[1][0], 12);
        assert_eq!(list.lists[3][0], [12; 64]);
        assert_eq!(list.lists[3][3], [12; 64]);
        assert_eq!(list.dc[1][3], 12);
    }

    fn defaults_from_until(w: &mut BitWriter, size: usize) {
        for _ in 0..size * MATRICES {
            predict_default(w);
        }
    }

    #[test]
    fn test_reference_out_of_range() {
        let mut w = BitWriter::default();
        w.bit(false).ue(1);
        let data = w.finish();
        let err = ScalingList::parse(&mut BitReader::new(&data)).unwrap_err();
        assert!(matches!(err, DecoderError::InvalidScalingList(_)));
    }

    #[test]
    fn test_truncated_data() {
        let data = [0x80];
        let err = ScalingList::parse(&mut BitReader::new(&data)).unwrap_err();
        assert!(matches!(err, DecoderError::InvalidScalingList(_)));
    }

    #[test]
    fn test_decoder_layout() {
        let mut source = ScalingList::default();
        source.lists[1][2][(5 << 3) + 3] = 55;
        source.lists[2][0][17] = 77;
        source.dc[0][0] = 99;
        source.lists[3][3][63] = 201;

        let mut list = DecoderScalingList::new();
        list.initialize(&source);
        let bytes = list.bytes();

        assert_eq!(bytes[0xE0 + 3 + 5 * 8], 55);
        // 16x16 blocks upsample each coefficient into 2x2.
        for (x, y) in [(2, 4), (3, 4), (2, 5), (3, 5)] {
            assert_eq!(bytes[0x1E0 + x + y * 16], 77);
        }
        assert_eq!(bytes[0x1E0], 99);
        assert_eq!(bytes[0xBE0], 16);
        assert_eq!(bytes[DecoderScalingList::BYTES - 1], 201);
    }

    #[test]
    fn test_decoder_layout_every_coefficient() {
        let mut source = ScalingList::default();
        for size in 0..SIZES {
            for matrix in 0..MATRICES {
                let salt = ((size * MATRICES + matrix) * 37) as u8;
                for (i, value) in source.lists[size][matrix].iter_mut().enumerate() {
                    *value = (i as u8).wrapping_add(salt);
                }
            }
        }
        for (size, dcs) in source.dc.iter_mut().enumerate() {
            for (matrix, dc) in dcs.iter_mut().enumerate() {
                *dc = 0xC0 + (size * MATRICES + matrix) as u8;
            }
        }

        let mut list = DecoderScalingList::new();
        list.initialize(&source);
        let bytes = list.bytes();

        let mut covered = vec![0u8; DecoderScalingList::BYTES];
        for size in 0..SIZES {
            let matrices: &[usize] = if size == 3 { &[0, 3] } else { &[0, 1, 2, 3, 4, 5] };
            for &matrix in matrices {
                let offset = BLOCK_OFFSETS[size][matrix] as usize;
                let block = 4 << size;
                for y in 0..block {
                    for x in 0..block {
                        let at = offset + x + y * block;
                        covered[at] += 1;
                        let expected = if size > 1 && x == 0 && y == 0 {
                            source.dc[size - 2][matrix]
                        } else {
                            source.lists[size][matrix][source_index(size, x, y)]
                        };
                        assert_eq!(bytes[at], expected, "size {size} matrix {matrix} at ({x}, {y})");
                    }
                }
            }
        }
        // The blocks tile the window exactly.
        assert!(covered.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_write_requires_enabled() {
        let mut list = DecoderScalingList::new();
        let mut dest = [0xFFFF_FFFFu32; DecoderScalingList::WORDS];
        assert!(!list.write(&mut dest));
        assert!(dest.iter().all(|w| *w == 0xFFFF_FFFF));

        list.initialize(&ScalingList::default());
        assert!(list.enabled());
        assert!(list.write(&mut dest));
        assert_eq!(dest[0], 0x1010_1010);

        list.disable();
        assert!(!list.write(&mut dest));
    }
}
