//! Piece-state index
//!
//! Three parallel bitmaps over the pieces of one download: `have` (durable,
//! verified pieces), `in_use` (pieces checked out to a worker), and `filter`
//! (pieces worth downloading under selective download). Every selection
//! policy in the store reduces to mask operations here, which keeps the
//! bit-twiddling in one place.
//!
//! Bitmaps are `BitVec<u8, Msb0>`: MSB-first within each byte, so the raw
//! bytes are exactly the wire-format bitfield. Trailing bits past the piece
//! count are always zero.

use bitvec::prelude::*;

use crate::error::{Result, StoreError};

/// Bitmap type used for piece sets throughout the crate
pub type PieceBitfield = BitVec<u8, Msb0>;

/// Have/in-use/filter bitmaps plus piece-length arithmetic
#[derive(Debug, Clone)]
pub struct BitfieldIndex {
    piece_length: u64,
    total_length: u64,
    have: PieceBitfield,
    in_use: PieceBitfield,
    filter: PieceBitfield,
    filter_enabled: bool,
}

impl BitfieldIndex {
    /// Create an index for `total_length` bytes split into `piece_length` pieces
    pub fn new(piece_length: u64, total_length: u64) -> Self {
        assert!(piece_length > 0, "piece length must be nonzero");
        let num_pieces = total_length.div_ceil(piece_length) as usize;
        Self {
            piece_length,
            total_length,
            have: bitvec![u8, Msb0; 0; num_pieces],
            in_use: bitvec![u8, Msb0; 0; num_pieces],
            filter: bitvec![u8, Msb0; 0; num_pieces],
            filter_enabled: false,
        }
    }

    /// Number of pieces in the download
    pub fn num_pieces(&self) -> usize {
        self.have.len()
    }

    /// Largest valid piece index
    pub fn max_index(&self) -> usize {
        self.num_pieces() - 1
    }

    /// Total download length in bytes
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Byte length of a single piece; the last piece may be short
    pub fn piece_length(&self, index: usize) -> u64 {
        self.assert_index(index);
        let start = index as u64 * self.piece_length;
        (self.total_length - start).min(self.piece_length)
    }

    fn assert_index(&self, index: usize) {
        assert!(
            index < self.num_pieces(),
            "piece index {} out of range (num pieces {})",
            index,
            self.num_pieces()
        );
    }

    /// Whether piece `index` is worth downloading under the current filter
    fn is_interesting(&self, index: usize) -> bool {
        !self.filter_enabled || self.filter[index]
    }

    // --- have bits ---

    /// Mark piece `index` as durable
    pub fn set_bit(&mut self, index: usize) {
        self.assert_index(index);
        self.have.set(index, true);
    }

    /// Clear piece `index`'s durable bit
    pub fn unset_bit(&mut self, index: usize) {
        self.assert_index(index);
        self.have.set(index, false);
    }

    /// Whether piece `index` is durable
    pub fn is_bit_set(&self, index: usize) -> bool {
        self.assert_index(index);
        self.have[index]
    }

    /// Mark the inclusive index range `[lo, hi]` as durable
    pub fn set_bit_range(&mut self, lo: usize, hi: usize) {
        assert!(lo <= hi, "range start {} exceeds end {}", lo, hi);
        self.assert_index(hi);
        self.have[lo..=hi].fill(true);
    }

    /// Mark every piece durable
    pub fn set_all_bits(&mut self) {
        self.have.fill(true);
    }

    /// Clear every durable bit
    pub fn clear_all_bits(&mut self) {
        self.have.fill(false);
    }

    // --- in-use bits ---

    /// Mark piece `index` as checked out
    pub fn set_use_bit(&mut self, index: usize) {
        self.assert_index(index);
        self.in_use.set(index, true);
    }

    /// Clear piece `index`'s checkout bit
    pub fn unset_use_bit(&mut self, index: usize) {
        self.assert_index(index);
        self.in_use.set(index, false);
    }

    /// Whether piece `index` is checked out
    pub fn is_use_bit_set(&self, index: usize) -> bool {
        self.assert_index(index);
        self.in_use[index]
    }

    /// Number of checked-out pieces
    pub fn count_use_bits(&self) -> usize {
        self.in_use.count_ones()
    }

    // --- candidate queries ---

    /// Number of pieces still missing (only filtered pieces when the filter is on)
    pub fn count_missing_pieces(&self) -> usize {
        if self.filter_enabled {
            self.filter.iter_ones().filter(|&i| !self.have[i]).count()
        } else {
            self.num_pieces() - self.have.count_ones()
        }
    }

    /// Smallest missing piece that is neither checked out nor filtered away
    pub fn first_missing_unused_index(&self) -> Option<usize> {
        (0..self.num_pieces())
            .find(|&i| !self.have[i] && !self.in_use[i] && self.is_interesting(i))
    }

    /// Pieces the peer has that we are missing, ignoring checkouts
    ///
    /// Used in end-game: duplicating an in-flight piece is allowed there.
    /// Returns `None` when no candidate exists.
    pub fn all_missing_indexes(&self, peer: &BitSlice<u8, Msb0>) -> Option<PieceBitfield> {
        self.collect_candidates(peer, false)
    }

    /// Pieces the peer has that we are missing and nobody is fetching
    pub fn all_missing_unused_indexes(&self, peer: &BitSlice<u8, Msb0>) -> Option<PieceBitfield> {
        self.collect_candidates(peer, true)
    }

    fn collect_candidates(
        &self,
        peer: &BitSlice<u8, Msb0>,
        exclude_in_use: bool,
    ) -> Option<PieceBitfield> {
        let mut out = bitvec![u8, Msb0; 0; self.num_pieces()];
        let mut any = false;
        for i in 0..self.num_pieces() {
            if !peer.get(i).map(|b| *b).unwrap_or(false) {
                continue;
            }
            if self.have[i] || !self.is_interesting(i) {
                continue;
            }
            if exclude_in_use && self.in_use[i] {
                continue;
            }
            out.set(i, true);
            any = true;
        }
        any.then_some(out)
    }

    /// Whether the peer has any piece we are missing
    pub fn has_missing_piece(&self, peer: &BitSlice<u8, Msb0>) -> bool {
        (0..self.num_pieces()).any(|i| {
            peer.get(i).map(|b| *b).unwrap_or(false) && !self.have[i] && self.is_interesting(i)
        })
    }

    /// A missing, unused, unignored piece far from already-claimed ones
    ///
    /// Partitions the index space into maximal runs of candidates and returns
    /// the midpoint (rounded down) of the longest run; the lowest-indexed run
    /// wins ties. Spreads initial checkouts across the whole download.
    pub fn sparse_missing_unused_index(&self, ignore: &BitSlice<u8, Msb0>) -> Option<usize> {
        let n = self.num_pieces();
        let mut best: Option<(usize, usize)> = None;
        let mut run_start = None;

        for i in 0..=n {
            let candidate = i < n
                && !self.have[i]
                && !self.in_use[i]
                && self.is_interesting(i)
                && !ignore.get(i).map(|b| *b).unwrap_or(false);
            match (candidate, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    let len = i - start;
                    if best.map_or(true, |(_, best_len)| len > best_len) {
                        best = Some((start, len));
                    }
                    run_start = None;
                }
                _ => {}
            }
        }

        best.map(|(start, len)| start + (len - 1) / 2)
    }

    // --- selective-download filter ---

    /// Mark the pieces overlapping bytes `[offset, offset + length)` as interesting
    ///
    /// Takes effect once `enable_filter` is called. A piece split by a file
    /// boundary is interesting if any requested range touches it.
    pub fn add_filter(&mut self, offset: u64, length: u64) {
        assert!(
            offset.checked_add(length).is_some_and(|end| end <= self.total_length),
            "filter range [{}, {}+{}) outside download of {} bytes",
            offset,
            offset,
            length,
            self.total_length
        );
        if length == 0 {
            return;
        }
        let first = (offset / self.piece_length) as usize;
        let last = ((offset + length - 1) / self.piece_length) as usize;
        self.filter[first..=last].fill(true);
    }

    /// Restrict candidate queries to the filtered pieces
    pub fn enable_filter(&mut self) {
        self.filter_enabled = true;
    }

    /// Drop all filter ranges and stop filtering
    pub fn clear_filter(&mut self) {
        self.filter.fill(false);
        self.filter_enabled = false;
    }

    /// Whether candidate queries are filtered
    pub fn is_filter_enabled(&self) -> bool {
        self.filter_enabled
    }

    // --- completion accounting ---

    /// Bytes covered by durable pieces
    pub fn completed_length(&self) -> u64 {
        self.have.iter_ones().map(|i| self.piece_length(i)).sum()
    }

    /// Bytes the filter selects; the whole download when filtering is off
    pub fn filtered_total_length(&self) -> u64 {
        if !self.filter_enabled {
            return self.total_length;
        }
        self.filter.iter_ones().map(|i| self.piece_length(i)).sum()
    }

    /// Durable bytes within the filter; all durable bytes when filtering is off
    pub fn filtered_completed_length(&self) -> u64 {
        if !self.filter_enabled {
            return self.completed_length();
        }
        self.filter
            .iter_ones()
            .filter(|&i| self.have[i])
            .map(|i| self.piece_length(i))
            .sum()
    }

    /// Whether every piece is durable
    pub fn is_all_bits_set(&self) -> bool {
        self.have.all()
    }

    /// Whether every filtered piece is durable (vacuously true for an empty filter)
    pub fn is_filtered_all_bits_set(&self) -> bool {
        if !self.filter_enabled {
            return self.is_all_bits_set();
        }
        self.filter.iter_ones().all(|i| self.have[i])
    }

    // --- wire exchange ---

    /// Byte length of the wire bitfield: ⌈num_pieces / 8⌉
    pub fn bitfield_length(&self) -> usize {
        self.num_pieces().div_ceil(8)
    }

    /// Replace the have bitmap from wire bytes
    ///
    /// Restore-time operation: also clears every checkout bit, so it must run
    /// before any piece is checked out. Padding bits in the input are masked.
    pub fn set_bitfield(&mut self, bytes: &[u8]) -> Result<()> {
        let expected = self.bitfield_length();
        if bytes.len() != expected {
            return Err(StoreError::bitfield_length(expected, bytes.len()));
        }
        let incoming = BitSlice::<u8, Msb0>::from_slice(bytes);
        for i in 0..self.num_pieces() {
            self.have.set(i, incoming[i]);
        }
        self.in_use.fill(false);
        Ok(())
    }

    /// The have bitmap as wire bytes (MSB-first, zero padding)
    pub fn bitfield(&self) -> &[u8] {
        self.have.as_raw_slice()
    }
}
