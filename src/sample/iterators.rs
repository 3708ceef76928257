//! Lazy, finite, non-restartable cursors over the run-length-encoded MP4
//! tables (spec §9 "Iterator patterns"). Each is a direct translation of
//! the original implementation's `ChunkInfoIterator`/`DecodingTimeIterator`/
//! `CompositionOffsetIterator`, with the inner `std::vector::const_iterator`
//! replaced by a plain table + run index since Rust has no dangling
//! end-iterator sentinel to borrow past.

use super::{ChunkInfo, CompositionOffset, DecodingTime};

/// Iterates the `stsc` table chunk-by-chunk and sample-by-sample.
pub struct ChunkInfoIterator<'a> {
    table: &'a [ChunkInfo],
    run_index: usize,
    current_chunk: u32,
    chunk_sample_index: u32,
}

impl<'a> ChunkInfoIterator<'a> {
    pub fn new(table: &'a [ChunkInfo]) -> Self {
        let current_chunk = table.first().map(|c| c.first_chunk).unwrap_or(0);
        Self { table, run_index: 0, current_chunk, chunk_sample_index: 0 }
    }

    /// Advances to the next chunk. Always returns true, mirroring the
    /// original (which returns bool for interface symmetry with
    /// `AdvanceSample` but its loop body can't fail).
    pub fn advance_chunk(&mut self) -> bool {
        self.current_chunk += 1;
        if let Some(next_run) = self.table.get(self.run_index + 1) {
            if self.current_chunk >= next_run.first_chunk {
                self.run_index += 1;
            }
        }
        self.chunk_sample_index = 0;
        true
    }

    pub fn advance_sample(&mut self) -> bool {
        self.chunk_sample_index += 1;
        if self.chunk_sample_index >= self.current_run().samples_per_chunk {
            self.advance_chunk();
        }
        true
    }

    fn current_run(&self) -> &ChunkInfo {
        &self.table[self.run_index]
    }

    pub fn is_valid(&self) -> bool {
        self.run_index < self.table.len()
            && self.chunk_sample_index < self.current_run().samples_per_chunk
    }

    pub fn current_chunk(&self) -> u32 {
        self.current_chunk
    }

    pub fn samples_per_chunk(&self) -> u32 {
        self.current_run().samples_per_chunk
    }

    pub fn sample_description_index(&self) -> u32 {
        self.current_run().sample_description_index
    }

    /// Number of samples from `start_chunk` to `end_chunk`, both 1-based
    /// inclusive.
    pub fn num_samples(&self, start_chunk: u32, end_chunk: u32) -> u32 {
        debug_assert!(start_chunk <= end_chunk);
        let mut num_samples = 0u32;
        for (i, run) in self.table.iter().enumerate() {
            let last_chunk = match self.table.get(i + 1) {
                Some(next) => next.first_chunk - 1,
                None => u32::MAX,
            };
            if last_chunk >= start_chunk {
                num_samples += (end_chunk.min(last_chunk) - start_chunk.max(run.first_chunk) + 1)
                    * run.samples_per_chunk;
                if last_chunk >= end_chunk {
                    break;
                }
            }
        }
        num_samples
    }

    pub fn last_first_chunk(&self) -> u32 {
        self.table.last().map(|c| c.first_chunk).unwrap_or(0)
    }
}

/// Iterates the `stts` table sample-by-sample.
pub struct DecodingTimeIterator<'a> {
    table: &'a [DecodingTime],
    run_index: usize,
    sample_index: u32,
}

impl<'a> DecodingTimeIterator<'a> {
    pub fn new(table: &'a [DecodingTime]) -> Self {
        Self { table, run_index: 0, sample_index: 0 }
    }

    pub fn advance_sample(&mut self) -> bool {
        self.sample_index += 1;
        if self.sample_index >= self.table[self.run_index].sample_count {
            self.run_index += 1;
            if self.run_index >= self.table.len() {
                return false;
            }
            self.sample_index = 0;
        }
        true
    }

    pub fn is_valid(&self) -> bool {
        self.run_index < self.table.len()
            && self.sample_index < self.table[self.run_index].sample_count
    }

    /// Total decode-time duration covering samples `start_sample` through
    /// `end_sample`, both 1-based inclusive.
    pub fn duration(&self, start_sample: u32, end_sample: u32) -> i64 {
        debug_assert!(start_sample <= end_sample);
        let mut current_sample = 0u32;
        let mut prev_sample = 0u32;
        let mut duration = 0i64;
        for run in self.table {
            current_sample += run.sample_count;
            if current_sample >= start_sample {
                let span = end_sample.min(current_sample) - start_sample.max(prev_sample + 1) + 1;
                duration += span as i64 * run.sample_delta as i64;
                if current_sample >= end_sample {
                    break;
                }
            }
            prev_sample = current_sample;
        }
        duration
    }

    pub fn num_samples(&self) -> u32 {
        self.table.iter().map(|r| r.sample_count).sum()
    }
}

/// Iterates the `ctts` table sample-by-sample.
pub struct CompositionOffsetIterator<'a> {
    table: &'a [CompositionOffset],
    run_index: usize,
    sample_index: u32,
}

impl<'a> CompositionOffsetIterator<'a> {
    pub fn new(table: &'a [CompositionOffset]) -> Self {
        Self { table, run_index: 0, sample_index: 0 }
    }

    pub fn advance_sample(&mut self) -> bool {
        self.sample_index += 1;
        if self.sample_index >= self.table[self.run_index].sample_count {
            self.run_index += 1;
            if self.run_index >= self.table.len() {
                return false;
            }
            self.sample_index = 0;
        }
        true
    }

    pub fn is_valid(&self) -> bool {
        self.run_index < self.table.len()
            && self.sample_index < self.table[self.run_index].sample_count
    }

    /// Composition offset for 1-based `sample`.
    pub fn sample_offset(&self, sample: u32) -> i64 {
        let mut current_sample = 0u32;
        for run in self.table {
            current_sample += run.sample_count;
            if current_sample >= sample {
                return run.sample_offset;
            }
        }
        0
    }

    pub fn num_samples(&self) -> u32 {
        self.table.iter().map(|r| r.sample_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stsc() -> Vec<ChunkInfo> {
        vec![
            ChunkInfo { first_chunk: 1, samples_per_chunk: 2, sample_description_index: 1 },
            ChunkInfo { first_chunk: 4, samples_per_chunk: 3, sample_description_index: 1 },
        ]
    }

    #[test]
    fn chunk_info_iterator_walks_samples_and_chunks() {
        let table = sample_stsc();
        let mut it = ChunkInfoIterator::new(&table);
        assert_eq!(it.current_chunk(), 1);
        assert_eq!(it.samples_per_chunk(), 2);
        assert!(it.is_valid());
        it.advance_sample();
        assert!(it.is_valid());
        it.advance_sample(); // crosses into chunk 2, still run 0 (first_chunk=1)
        assert_eq!(it.current_chunk(), 2);
        assert_eq!(it.samples_per_chunk(), 2);
        it.advance_sample();
        it.advance_sample(); // now chunk 3, still run 0
        assert_eq!(it.current_chunk(), 3);
        it.advance_sample();
        it.advance_sample(); // chunk 4, crosses into run 1 (first_chunk=4, spc=3)
        assert_eq!(it.current_chunk(), 4);
        assert_eq!(it.samples_per_chunk(), 3);
    }

    #[test]
    fn chunk_info_num_samples_range() {
        let table = sample_stsc();
        let it = ChunkInfoIterator::new(&table);
        // chunks 1..3: 3 chunks * 2 samples = 6
        assert_eq!(it.num_samples(1, 3), 6);
        // chunks 4..5: 2 chunks * 3 samples = 6
        assert_eq!(it.num_samples(4, 5), 6);
    }

    #[test]
    fn decoding_time_iterator_duration() {
        let table = vec![
            DecodingTime { sample_count: 3, sample_delta: 3000 },
            DecodingTime { sample_count: 2, sample_delta: 1500 },
        ];
        let it = DecodingTimeIterator::new(&table);
        assert_eq!(it.num_samples(), 5);
        // samples 1..3 all at delta 3000: 3 * 3000 = 9000
        assert_eq!(it.duration(1, 3), 9000);
        // samples 4..5 at delta 1500: 2 * 1500 = 3000
        assert_eq!(it.duration(4, 5), 3000);
    }

    #[test]
    fn composition_offset_iterator_handles_negative_offsets() {
        let table = vec![
            CompositionOffset { sample_count: 2, sample_offset: -1500 },
            CompositionOffset { sample_count: 1, sample_offset: 3000 },
        ];
        let it = CompositionOffsetIterator::new(&table);
        assert_eq!(it.sample_offset(1), -1500);
        assert_eq!(it.sample_offset(2), -1500);
        assert_eq!(it.sample_offset(3), 3000);
    }
}
