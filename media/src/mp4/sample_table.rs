//! Resolution of the `stbl` tables into one entry per sample.

use std::collections::HashSet;

/// Samples reserved up front; larger tables grow as they are mapped.
const PREALLOCATED_SAMPLES: usize = 1 << 16;

/// One sample with everything needed to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub index: usize,
    /// Absolute file offset.
    pub offset: u64,
    pub size: u32,
    /// Decode time, in media timescale units.
    pub dts: u64,
    pub cts_offset: i32,
    pub keyframe: bool,
}

impl Sample {
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub samples: Vec<Sample>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn max_size(&self) -> u32 {
        self.samples.iter().map(|s| s.size).max().unwrap_or(0)
    }

    /// Last sample whose decode time is at or before `dts`.
    pub fn find_sample_at(&self, dts: u64) -> Option<usize> {
        self.samples.partition_point(|s| s.dts <= dts).checked_sub(1)
    }

    /// Nearest sync sample at or before `index`.
    pub fn find_keyframe_at_or_before(&self, index: usize) -> Option<usize> {
        let last = index.min(self.samples.len().checked_sub(1)?);
        (0..=last).rev().find(|&i| self.samples[i].keyframe)
    }
}

/// Collects the raw `stbl` tables and resolves them.
#[derive(Debug, Default)]
pub struct SampleTableBuilder {
    /// (count, delta)
    stts: Vec<(u32, u32)>,
    /// (count, offset)
    ctts: Vec<(u32, i32)>,
    /// 1-based sync sample numbers; `None` when every sample is a sync sample.
    sync_samples: Option<Vec<u32>>,
    /// (first_chunk, samples_per_chunk)
    stsc: Vec<(u32, u32)>,
    uniform_size: u32,
    sizes: Vec<u32>,
    sample_count: u32,
    chunk_offsets: Vec<u64>,
    /// Samples must end at or before this file offset.
    data_end: Option<u64>,
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts = entries;
    }

    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts = entries;
    }

    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = Some(samples);
    }

    pub fn set_stsc(&mut self, entries: Vec<(u32, u32)>) {
        self.stsc = entries;
    }

    /// `sizes` is empty when every sample has `uniform_size` bytes.
    pub fn set_stsz(&mut self, uniform_size: u32, sample_count: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.sample_count = sample_count;
        self.sizes = sizes;
    }

    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub fn set_data_end(&mut self, end: u64) {
        self.data_end = Some(end);
    }

    /// Samples the `stsc` runs assign to the chunks present.
    fn chunk_capacity(&self) -> u64 {
        let num_chunks = self.chunk_offsets.len() as u64;
        self.stsc
            .iter()
            .enumerate()
            .map(|(i, &(first_chunk, per_chunk))| {
                let first = (first_chunk as u64).max(1);
                let next = self
                    .stsc
                    .get(i + 1)
                    .map_or(num_chunks + 1, |e| e.0 as u64)
                    .min(num_chunks + 1);
                next.saturating_sub(first).saturating_mul(per_chunk as u64)
            })
            .fold(0u64, u64::saturating_add)
    }

    fn size_of(&self, index: usize) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sizes.get(index).copied().unwrap_or(0)
        }
    }

    pub fn build(self) -> SampleTable {
        let declared = if self.uniform_size > 0 {
            self.sample_count as usize
        } else {
            self.sizes.len()
        };
        let count = declared.min(usize::try_from(self.chunk_capacity()).unwrap_or(usize::MAX));
        if count == 0 {
            return SampleTable::default();
        }

        let sync: Option<HashSet<u32>> = self
            .sync_samples
            .as_ref()
            .map(|s| s.iter().copied().collect());

        let mut dts_values = self.stts.iter().flat_map(|&(n, delta)| std::iter::repeat_n(delta, n as usize));
        let mut cts_values = self.ctts.iter().flat_map(|&(n, off)| std::iter::repeat_n(off, n as usize));

        let mut samples = Vec::with_capacity(count.min(PREALLOCATED_SAMPLES));
        let mut dts = 0u64;
        let mut last_delta = 0u32;
        let num_chunks = self.chunk_offsets.len() as u64;

        'chunks: for (i, &(first_chunk, per_chunk)) in self.stsc.iter().enumerate() {
            let next_first = self
                .stsc
                .get(i + 1)
                .map_or(num_chunks + 1, |e| e.0 as u64)
                .min(num_chunks + 1);
            for chunk in (first_chunk as u64).max(1)..next_first {
                let mut offset = self.chunk_offsets[(chunk - 1) as usize];
                for _ in 0..per_chunk {
                    let index = samples.len();
                    if index >= count {
                        break 'chunks;
                    }
                    let size = self.size_of(index);
                    let end = offset.saturating_add(size as u64);
                    if self.data_end.is_some_and(|limit| end > limit) {
                        log::warn!("sample {index} at 0x{offset:X} runs past the end of the file");
                        break 'chunks;
                    }
                    let delta = dts_values.next().unwrap_or(last_delta);
                    last_delta = delta;
                    let number = index as u32 + 1;
                    samples.push(Sample {
                        index,
                        offset,
                        size,
                        dts,
                        cts_offset: cts_values.next().unwrap_or(0),
                        keyframe: sync.as_ref().is_none_or(|s| s.contains(&number)),
                    });
                    offset = end;
                    dts += delta as u64;
                }
            }
        }

        if samples.len() < declared {
            log::warn!(
                "sample table maps {} of {declared} samples to chunks",
                samples.len()
            );
        }
        SampleTable { samples }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_pts() {
        let sample = Sample {
            index: 0,
            offset: 0,
            size: 1,
            dts: 100,
            cts_offset: -200,
            keyframe: true,
        };
        assert_eq!(sample.pts(), 0);
    }

    #[test]
    fn test_resolve_chunks_and_times() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(2, 1000), (3, 500)]);
        builder.set_sync_samples(vec![1, 4]);
        // chunks 1-2 hold 2 samples each, chunk 3 holds 1
        builder.set_stsc(vec![(1, 2), (3, 1)]);
        builder.set_stsz(0, 5, vec![10, 20, 30, 40, 50]);
        builder.set_chunk_offsets(vec![1000, 2000, 3000]);
        let table = builder.build();

        let offsets: Vec<u64> = table.samples.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![1000, 1010, 2000, 2030, 3000]);
        let dts: Vec<u64> = table.samples.iter().map(|s| s.dts).collect();
        assert_eq!(dts, vec![0, 1000, 2000, 2500, 3000]);
        assert!(table.samples[0].keyframe);
        assert!(!table.samples[1].keyframe);
        assert!(table.samples[3].keyframe);
        assert_eq!(table.max_size(), 50);
    }

    #[test]
    fn test_uniform_size_without_stss() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(4, 1536)]);
        builder.set_stsc(vec![(1, 4)]);
        builder.set_stsz(768, 4, Vec::new());
        builder.set_chunk_offsets(vec![64]);
        let table = builder.build();
        assert_eq!(table.len(), 4);
        assert_eq!(table.samples[3].offset, 64 + 3 * 768);
        assert!(table.samples.iter().all(|s| s.keyframe));
    }

    #[test]
    fn test_huge_uniform_count_bounded_by_chunks() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(u32::MAX, 1024)]);
        builder.set_stsc(vec![(1, 3)]);
        builder.set_stsz(1, u32::MAX, Vec::new());
        builder.set_chunk_offsets(vec![100]);
        assert_eq!(builder.chunk_capacity(), 3);
        let table = builder.build();
        assert_eq!(table.len(), 3);
        assert_eq!(table.samples[2].offset, 102);
    }

    #[test]
    fn test_samples_past_data_end_dropped() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(u32::MAX, 1024)]);
        builder.set_stsc(vec![(1, u32::MAX)]);
        builder.set_stsz(16, u32::MAX, Vec::new());
        builder.set_chunk_offsets(vec![40]);
        builder.set_data_end(100);
        let table = builder.build();
        // 40..56, 56..72, 72..88; the fourth would end at 104
        assert_eq!(table.len(), 3);
        assert_eq!(table.samples.last().map(|s| s.offset), Some(72));
    }

    #[test]
    fn test_find_sample_and_keyframe() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(10, 100)]);
        builder.set_sync_samples(vec![1, 6]);
        builder.set_stsc(vec![(1, 10)]);
        builder.set_stsz(10, 10, Vec::new());
        builder.set_chunk_offsets(vec![0]);
        let table = builder.build();

        assert_eq!(table.find_sample_at(0), Some(0));
        assert_eq!(table.find_sample_at(450), Some(4));
        assert_eq!(table.find_sample_at(1_000_000), Some(9));
        assert_eq!(table.find_keyframe_at_or_before(4), Some(0));
        assert_eq!(table.find_keyframe_at_or_before(7), Some(5));
        assert_eq!(SampleTable::default().find_keyframe_at_or_before(3), None);
    }
}
