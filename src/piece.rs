//! In-flight pieces
//!
//! A [`Piece`] tracks block-granular progress for one piece currently being
//! fetched. Pieces are shared as `Arc<Piece>` between the store and the
//! worker feeding blocks in from its socket; only the block bitmap is
//! mutable, behind its own lock. The [`InFlightSet`] keeps every live piece
//! sorted by index so lookup, insert, and removal stay logarithmic.

use std::cmp::Ordering;
use std::sync::Arc;

use bitvec::prelude::*;
use parking_lot::RwLock;

/// Shared handle to an in-flight piece
pub type PieceHandle = Arc<Piece>;

/// One piece being downloaded, with per-block completion state
pub struct Piece {
    index: usize,
    length: u64,
    block_size: u32,
    blocks: RwLock<BitVec<u8, Msb0>>,
    hash_algo: Option<String>,
}

impl Piece {
    /// Create a piece with no completed blocks
    pub fn new(index: usize, length: u64, block_size: u32) -> Self {
        assert!(block_size > 0, "block size must be nonzero");
        assert!(length > 0, "piece length must be nonzero");
        let num_blocks = length.div_ceil(u64::from(block_size)) as usize;
        Self {
            index,
            length,
            block_size,
            blocks: RwLock::new(bitvec![u8, Msb0; 0; num_blocks]),
            hash_algo: None,
        }
    }

    /// Attach the hash algorithm tag the verifier will use
    pub fn with_hash_algo(mut self, algo: Option<String>) -> Self {
        self.hash_algo = algo;
        self
    }

    /// Piece index within the download
    pub fn index(&self) -> usize {
        self.index
    }

    /// Piece length in bytes
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Hash algorithm tag, if the download carries one
    pub fn hash_algo(&self) -> Option<&str> {
        self.hash_algo.as_deref()
    }

    /// Number of blocks in this piece
    pub fn count_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    /// Number of completed blocks
    pub fn count_complete_blocks(&self) -> usize {
        self.blocks.read().count_ones()
    }

    /// Byte length of one block; the last block may be short
    pub fn block_length(&self, block: usize) -> u32 {
        let num_blocks = self.count_blocks();
        assert!(block < num_blocks, "block index {} out of range", block);
        let offset = block as u64 * u64::from(self.block_size);
        (self.length - offset).min(u64::from(self.block_size)) as u32
    }

    /// Record block `block` as received
    pub fn complete_block(&self, block: usize) {
        let mut blocks = self.blocks.write();
        assert!(block < blocks.len(), "block index {} out of range", block);
        blocks.set(block, true);
    }

    /// Record every block as received
    ///
    /// Used when rebuilding a piece the download already has, so reporting
    /// paths see full progress.
    pub fn set_all_blocks(&self) {
        self.blocks.write().fill(true);
    }

    /// Whether every block has been received
    pub fn is_complete(&self) -> bool {
        self.blocks.read().all()
    }

    /// Bytes received so far, capped at the piece length
    pub fn completed_length(&self) -> u64 {
        let complete = self.count_complete_blocks() as u64;
        (complete * u64::from(self.block_size)).min(self.length)
    }
}

impl PartialEq for Piece {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Piece {}

impl PartialOrd for Piece {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Piece {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl std::fmt::Debug for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piece")
            .field("index", &self.index)
            .field("length", &self.length)
            .field("complete_blocks", &self.count_complete_blocks())
            .field("blocks", &self.count_blocks())
            .finish()
    }
}

/// Pieces currently in flight, sorted ascending by index
#[derive(Debug, Default)]
pub struct InFlightSet {
    pieces: Vec<PieceHandle>,
}

impl InFlightSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, index: usize) -> Result<usize, usize> {
        self.pieces.binary_search_by_key(&index, |p| p.index())
    }

    /// Look up the piece with the given index
    pub fn find(&self, index: usize) -> Option<PieceHandle> {
        self.position(index).ok().map(|at| self.pieces[at].clone())
    }

    /// Insert a piece, keeping the set sorted
    ///
    /// Returns false without inserting when a piece with the same index is
    /// already present.
    pub fn insert(&mut self, piece: PieceHandle) -> bool {
        match self.position(piece.index()) {
            Ok(_) => false,
            Err(at) => {
                self.pieces.insert(at, piece);
                true
            }
        }
    }

    /// Remove and return the piece with the given index
    pub fn erase(&mut self, index: usize) -> Option<PieceHandle> {
        self.position(index).ok().map(|at| self.pieces.remove(at))
    }

    /// Bulk insert for state restore: extend then re-sort
    pub fn insert_batch(&mut self, pieces: impl IntoIterator<Item = PieceHandle>) {
        self.pieces.extend(pieces);
        self.pieces.sort_by_key(|p| p.index());
        debug_assert!(
            self.pieces.windows(2).all(|w| w[0].index() < w[1].index()),
            "duplicate piece index in batch insert"
        );
    }

    /// Pieces in ascending index order
    pub fn iter(&self) -> impl Iterator<Item = &PieceHandle> {
        self.pieces.iter()
    }

    /// Number of in-flight pieces
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Drop every piece
    pub fn clear(&mut self) {
        self.pieces.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_accounting() {
        let piece = Piece::new(0, 32768, 16384);
        assert_eq!(piece.count_blocks(), 2);
        assert!(!piece.is_complete());
        assert_eq!(piece.completed_length(), 0);

        piece.complete_block(0);
        assert_eq!(piece.count_complete_blocks(), 1);
        assert_eq!(piece.completed_length(), 16384);
        assert!(!piece.is_complete());

        piece.complete_block(1);
        assert!(piece.is_complete());
        assert_eq!(piece.completed_length(), 32768);
    }

    #[test]
    fn test_short_last_block() {
        // 20000 bytes: one full 16 KiB block plus a 3616-byte tail
        let piece = Piece::new(0, 20000, 16384);
        assert_eq!(piece.count_blocks(), 2);
        assert_eq!(piece.block_length(0), 16384);
        assert_eq!(piece.block_length(1), 3616);

        piece.set_all_blocks();
        assert_eq!(piece.completed_length(), 20000);
    }

    #[test]
    fn test_completed_length_caps_at_piece_length() {
        let piece = Piece::new(0, 3, 2);
        piece.complete_block(1); // the short block
        assert_eq!(piece.completed_length(), 2);
        piece.complete_block(0);
        assert_eq!(piece.completed_length(), 3);
    }

    #[test]
    fn test_ordering_by_index() {
        let a = Piece::new(1, 4, 2);
        let b = Piece::new(2, 4, 2);
        let c = Piece::new(1, 8, 4);
        assert!(a < b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_in_flight_set_insert_find_erase() {
        let mut set = InFlightSet::new();
        assert!(set.insert(Arc::new(Piece::new(5, 4, 2))));
        assert!(set.insert(Arc::new(Piece::new(1, 4, 2))));
        assert!(set.insert(Arc::new(Piece::new(3, 4, 2))));
        assert!(!set.insert(Arc::new(Piece::new(3, 4, 2))));

        assert_eq!(set.len(), 3);
        let order: Vec<usize> = set.iter().map(|p| p.index()).collect();
        assert_eq!(order, vec![1, 3, 5]);

        assert_eq!(set.find(3).unwrap().index(), 3);
        assert!(set.find(2).is_none());

        assert_eq!(set.erase(3).unwrap().index(), 3);
        assert!(set.erase(3).is_none());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_in_flight_set_batch_restore() {
        let mut set = InFlightSet::new();
        set.insert(Arc::new(Piece::new(4, 4, 2)));
        set.insert_batch(vec![
            Arc::new(Piece::new(9, 4, 2)),
            Arc::new(Piece::new(0, 4, 2)),
        ]);

        let order: Vec<usize> = set.iter().map(|p| p.index()).collect();
        assert_eq!(order, vec![0, 4, 9]);
    }

    #[test]
    fn test_same_handle_shared() {
        let mut set = InFlightSet::new();
        let piece = Arc::new(Piece::new(7, 4, 2));
        set.insert(piece.clone());

        let found = set.find(7).unwrap();
        assert!(Arc::ptr_eq(&piece, &found));

        found.complete_block(0);
        assert_eq!(piece.count_complete_blocks(), 1);
    }
}
