//! Piece selection strategies
//!
//! A selector turns a candidate bitmap into one piece index. The default is
//! rarest-first: prefer the candidate the fewest peers hold, so scarce pieces
//! replicate before their holders leave. Many clients jumping on the same
//! "rarest" piece at once would defeat the point, so ties are broken
//! uniformly at random.

use bitvec::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::stats::SharedPieceStats;

/// Strategy for picking one piece out of a candidate bitmap
pub trait PieceSelector: Send {
    /// Pick a candidate, or `None` when the bitmap has no set bit
    fn select(&mut self, candidates: &BitSlice<u8, Msb0>) -> Option<usize>;
}

/// Rarest-first selection with uniform random tie-break
pub struct RarestFirstSelector {
    stats: SharedPieceStats,
    rng: StdRng,
}

impl RarestFirstSelector {
    /// Create a selector over the shared availability counters
    pub fn new(stats: SharedPieceStats) -> Self {
        Self {
            stats,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a selector with a deterministic tie-break sequence
    pub fn with_seed(stats: SharedPieceStats, seed: u64) -> Self {
        Self {
            stats,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl PieceSelector for RarestFirstSelector {
    fn select(&mut self, candidates: &BitSlice<u8, Msb0>) -> Option<usize> {
        let stats = self.stats.lock();
        let counts = stats.counts();

        let mut min_count = u32::MAX;
        let mut minima: Vec<usize> = Vec::new();
        for i in candidates.iter_ones() {
            let count = counts.get(i).copied().unwrap_or(0);
            if count < min_count {
                min_count = count;
                minima.clear();
                minima.push(i);
            } else if count == min_count {
                minima.push(i);
            }
        }

        match minima.len() {
            0 => None,
            1 => Some(minima[0]),
            n => Some(minima[self.rng.gen_range(0..n)]),
        }
    }
}

/// Deterministic selector: always the lowest-indexed candidate
///
/// Useful for sequential-style picking and for tests that need reproducible
/// selection without seeding.
#[derive(Debug, Default)]
pub struct LowestIndexSelector;

impl PieceSelector for LowestIndexSelector {
    fn select(&mut self, candidates: &BitSlice<u8, Msb0>) -> Option<usize> {
        candidates.first_one()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::PieceStatMan;

    fn stats_with_counts(counts: &[u32]) -> SharedPieceStats {
        let stats = PieceStatMan::new_shared(counts.len());
        {
            let mut guard = stats.lock();
            for (i, &count) in counts.iter().enumerate() {
                for _ in 0..count {
                    guard.add_piece_stats_index(i);
                }
            }
        }
        stats
    }

    #[test]
    fn test_rarest_first_picks_minimum() {
        let stats = stats_with_counts(&[3, 1, 2, 5]);
        let mut selector = RarestFirstSelector::with_seed(stats, 42);

        let candidates = bitvec![u8, Msb0; 1, 1, 1, 1];
        assert_eq!(selector.select(&candidates), Some(1));

        // with piece 1 masked out, piece 2 is the rarest candidate
        let candidates = bitvec![u8, Msb0; 1, 0, 1, 1];
        assert_eq!(selector.select(&candidates), Some(2));
    }

    #[test]
    fn test_rarest_first_empty_candidates() {
        let stats = stats_with_counts(&[1, 1]);
        let mut selector = RarestFirstSelector::with_seed(stats, 0);
        let candidates = bitvec![u8, Msb0; 0, 0];
        assert_eq!(selector.select(&candidates), None);
    }

    #[test]
    fn test_tie_break_spreads_over_minima() {
        let stats = stats_with_counts(&[2, 2, 2, 9]);
        let mut selector = RarestFirstSelector::with_seed(stats, 7);
        let candidates = bitvec![u8, Msb0; 1, 1, 1, 1];

        let mut seen = [false; 4];
        for _ in 0..64 {
            let picked = selector.select(&candidates).unwrap();
            assert!(picked < 3, "picked non-minimum piece {}", picked);
            seen[picked] = true;
        }
        // over 64 draws a uniform tie-break visits every minimum
        assert!(seen[0] && seen[1] && seen[2]);
        assert!(!seen[3]);
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let candidates = bitvec![u8, Msb0; 1, 1, 1, 1];

        let run = |seed: u64| -> Vec<usize> {
            let stats = stats_with_counts(&[1, 1, 1, 1]);
            let mut selector = RarestFirstSelector::with_seed(stats, seed);
            (0..16).map(|_| selector.select(&candidates).unwrap()).collect()
        };

        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_lowest_index_selector() {
        let mut selector = LowestIndexSelector;
        let candidates = bitvec![u8, Msb0; 0, 0, 1, 1];
        assert_eq!(selector.select(&candidates), Some(2));

        let empty = bitvec![u8, Msb0; 0; 4];
        assert_eq!(selector.select(&empty), None);
    }
}
