//! MSB-first bit reader for H.264/HEVC RBSP payloads.

/// Strip emulation prevention bytes (`00 00 03` → `00 00`) from a NAL payload.
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 3 {
            result.push(0);
            result.push(0);
            i += 3;
        } else {
            result.push(data[i]);
            i += 1;
        }
    }

    result
}

/// Reads bits and Exp-Golomb codes from an RBSP. Every read returns `None`
/// once the data is exhausted.
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// Read n bits (up to 32).
    pub fn read_bits(&mut self, n: u8) -> Option<u32> {
        let mut result = 0u32;

        for _ in 0..n {
            if self.byte_pos >= self.data.len() {
                return None;
            }

            let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
            result = (result << 1) | (bit as u32);

            self.bit_pos += 1;
            if self.bit_pos == 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
        }

        Some(result)
    }

    pub fn read_flag(&mut self) -> Option<bool> {
        self.read_bits(1).map(|b| b == 1)
    }

    pub fn skip_bits(&mut self, n: u32) -> Option<()> {
        let total = self.byte_pos as u64 * 8 + self.bit_pos as u64 + n as u64;
        if total > self.data.len() as u64 * 8 {
            return None;
        }
        self.byte_pos = (total / 8) as usize;
        self.bit_pos = (total % 8) as u8;
        Some(())
    }

    /// Read unsigned Exp-Golomb coded value.
    pub fn read_ue(&mut self) -> Option<u32> {
        let mut leading_zeros = 0u8;
        loop {
            let bit = self.read_bits(1)?;
            if bit == 1 {
                break;
            }
            leading_zeros += 1;
            if leading_zeros > 31 {
                return None;
            }
        }

        if leading_zeros == 0 {
            return Some(0);
        }

        let suffix = self.read_bits(leading_zeros)?;
        Some(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// Read signed Exp-Golomb coded value.
    pub fn read_se(&mut self) -> Option<i32> {
        let k = self.read_ue()? as i64;
        let value = if k & 1 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Some(value as i32)
    }

    /// Bits left to read.
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() - self.byte_pos.min(self.data.len())) * 8 - self.bit_pos as usize
    }
}
