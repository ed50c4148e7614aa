//! Per-piece availability statistics
//!
//! One counter per piece: how many connected peers report having it, plus
//! one for each locally durable piece credited by the store. The rarest-first
//! selector reads these counters to bias selection toward pieces the swarm
//! holds least.

use std::sync::Arc;

use bitvec::prelude::*;
use parking_lot::Mutex;

/// Handle shared between the store and the selector strategy
pub type SharedPieceStats = Arc<Mutex<PieceStatMan>>;

/// Availability counters for every piece of one download
#[derive(Debug)]
pub struct PieceStatMan {
    counts: Vec<u32>,
}

impl PieceStatMan {
    /// Create counters for `num_pieces` pieces, all zero
    pub fn new(num_pieces: usize) -> Self {
        Self {
            counts: vec![0; num_pieces],
        }
    }

    /// Create a shared handle for `num_pieces` pieces
    pub fn new_shared(num_pieces: usize) -> SharedPieceStats {
        Arc::new(Mutex::new(Self::new(num_pieces)))
    }

    /// Credit every piece a joining peer reports
    pub fn add_piece_stats(&mut self, peer: &BitSlice<u8, Msb0>) {
        let num_pieces = self.counts.len();
        for i in peer.iter_ones().take_while(|&i| i < num_pieces) {
            self.counts[i] += 1;
        }
    }

    /// Remove a leaving peer's contribution
    ///
    /// Every subtract must pair a prior add; a counter hitting underflow is a
    /// caller bug and panics.
    pub fn subtract_piece_stats(&mut self, peer: &BitSlice<u8, Msb0>) {
        let num_pieces = self.counts.len();
        for i in peer.iter_ones().take_while(|&i| i < num_pieces) {
            assert!(
                self.counts[i] > 0,
                "availability underflow for piece {}: subtract without matching add",
                i
            );
            self.counts[i] -= 1;
        }
    }

    /// Apply the delta between a peer's new and previous bitfields
    pub fn update_piece_stats(
        &mut self,
        new_peer: &BitSlice<u8, Msb0>,
        old_peer: &BitSlice<u8, Msb0>,
    ) {
        for i in 0..self.counts.len() {
            let now = new_peer.get(i).map(|b| *b).unwrap_or(false);
            let before = old_peer.get(i).map(|b| *b).unwrap_or(false);
            match (now, before) {
                (true, false) => self.counts[i] += 1,
                (false, true) => {
                    assert!(
                        self.counts[i] > 0,
                        "availability underflow for piece {}: subtract without matching add",
                        i
                    );
                    self.counts[i] -= 1;
                }
                _ => {}
            }
        }
    }

    /// Credit a single piece (local have)
    pub fn add_piece_stats_index(&mut self, index: usize) {
        assert!(
            index < self.counts.len(),
            "piece index {} out of range (num pieces {})",
            index,
            self.counts.len()
        );
        self.counts[index] += 1;
    }

    /// Read-only view of the counters
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }
}
