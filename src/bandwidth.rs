//! Harmonic-mean bandwidth estimator (spec §4.9), grounded directly on
//! `mpd/base/bandwidth_estimator.h`: `num_blocks_for_estimation` selects
//! the last N blocks (N > 0), the first |N| blocks (N < 0), or all blocks
//! (N == 0).

use std::collections::VecDeque;

/// Sentinel matching the original's `kUseAllBlocks`.
pub const USE_ALL_BLOCKS: i32 = 0;

/// Tracks per-block `size*8/duration` bitrate samples and reports their
/// harmonic mean, bits per second, rounded up.
pub struct BandwidthEstimator {
    num_blocks_for_estimation: i32,
    /// Running Σ(1/bitrate) for the blocks currently in the estimation
    /// window — the harmonic mean denominator.
    harmonic_mean_denominator: f64,
    /// Count of blocks folded into `harmonic_mean_denominator` so far,
    /// used only in the "first |N|" mode to know when to stop recording.
    num_blocks_added: usize,
    /// Sliding window of per-block bitrates, kept only in "last N" mode
    /// so an evicted block's contribution can be subtracted back out.
    history: VecDeque<f64>,
}

impl BandwidthEstimator {
    pub fn new(num_blocks_for_estimation: i32) -> Self {
        Self {
            num_blocks_for_estimation,
            harmonic_mean_denominator: 0.0,
            num_blocks_added: 0,
            history: VecDeque::new(),
        }
    }

    /// Records one block. `size_bytes` and `duration_seconds` must both
    /// be positive.
    pub fn add_block(&mut self, size_bytes: u64, duration_seconds: f64) {
        if size_bytes == 0 || duration_seconds <= 0.0 {
            return;
        }
        let bitrate = (size_bytes as f64) * 8.0 / duration_seconds;

        if self.num_blocks_for_estimation < 0 {
            let limit = (-self.num_blocks_for_estimation) as usize;
            if self.num_blocks_added >= limit {
                return;
            }
            self.harmonic_mean_denominator += 1.0 / bitrate;
            self.num_blocks_added += 1;
        } else if self.num_blocks_for_estimation > 0 {
            let limit = self.num_blocks_for_estimation as usize;
            self.history.push_back(bitrate);
            self.harmonic_mean_denominator += 1.0 / bitrate;
            if self.history.len() > limit {
                if let Some(evicted) = self.history.pop_front() {
                    self.harmonic_mean_denominator -= 1.0 / evicted;
                }
            }
        } else {
            self.harmonic_mean_denominator += 1.0 / bitrate;
            self.num_blocks_added += 1;
        }
    }

    /// Harmonic mean bitrate over the selected window, bits per second,
    /// rounded up. `0` if no blocks have been recorded.
    pub fn estimate(&self) -> u64 {
        let count = if self.num_blocks_for_estimation > 0 { self.history.len() } else { self.num_blocks_added };
        if count == 0 || self.harmonic_mean_denominator <= 0.0 {
            return 0;
        }
        (count as f64 / self.harmonic_mean_denominator).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_matches_ceil_formula() {
        // Testable property 8: one block of size S, duration D ->
        // ceil(S*8/D).
        let mut e = BandwidthEstimator::new(USE_ALL_BLOCKS);
        e.add_block(125_000, 1.0);
        assert_eq!(e.estimate(), 1_000_000);
    }

    #[test]
    fn all_blocks_mode_uses_every_sample() {
        let mut e = BandwidthEstimator::new(USE_ALL_BLOCKS);
        e.add_block(1000, 1.0); // 8000 bps
        e.add_block(2000, 1.0); // 16000 bps
        let harmonic = 2.0 / (1.0 / 8000.0 + 1.0 / 16000.0);
        assert_eq!(e.estimate(), harmonic.ceil() as u64);
    }

    #[test]
    fn last_n_mode_evicts_oldest() {
        let mut e = BandwidthEstimator::new(2);
        e.add_block(1000, 1.0); // 8000 bps, will be evicted
        e.add_block(2000, 1.0); // 16000 bps
        e.add_block(4000, 1.0); // 32000 bps
        let harmonic = 2.0 / (1.0 / 16000.0 + 1.0 / 32000.0);
        assert_eq!(e.estimate(), harmonic.ceil() as u64);
    }

    #[test]
    fn first_n_mode_ignores_later_blocks() {
        let mut e = BandwidthEstimator::new(-1);
        e.add_block(1000, 1.0); // 8000 bps, kept
        e.add_block(999_999, 1.0); // ignored, window already full
        assert_eq!(e.estimate(), 8000);
    }

    #[test]
    fn no_blocks_estimates_zero() {
        let e = BandwidthEstimator::new(USE_ALL_BLOCKS);
        assert_eq!(e.estimate(), 0);
    }
}
