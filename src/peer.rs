//! Peer availability view
//!
//! The slice of peer state the piece store consumes: which pieces the peer
//! has announced, whether it speaks the fast extension (BEP 6), and its
//! allowed-fast index set. Connection state, choking, and wire framing live
//! with the connection multiplexer, not here.

use bitvec::prelude::*;

/// What one connected peer has to offer
#[derive(Debug, Clone)]
pub struct Peer {
    /// Pieces the peer has announced via bitfield and have messages
    pieces: BitVec<u8, Msb0>,
    /// Peer negotiated the fast extension during handshake
    fast_extension: bool,
    /// Indices the peer allows us to request even while choked
    allowed_fast: Vec<usize>,
}

impl Peer {
    /// Create a peer view with no announced pieces
    pub fn new(num_pieces: usize) -> Self {
        Self {
            pieces: bitvec![u8, Msb0; 0; num_pieces],
            fast_extension: false,
            allowed_fast: Vec::new(),
        }
    }

    /// Replace the announced bitfield (from a wire bitfield message)
    ///
    /// Bits past the piece count are ignored.
    pub fn set_bitfield(&mut self, bytes: &[u8]) {
        let num_pieces = self.pieces.len();
        let incoming = BitVec::<u8, Msb0>::from_slice(bytes);
        for i in 0..num_pieces {
            let has = incoming.get(i).map(|b| *b).unwrap_or(false);
            self.pieces.set(i, has);
        }
    }

    /// Record a single have announcement
    pub fn set_piece(&mut self, index: usize) {
        assert!(index < self.pieces.len(), "piece index out of range");
        self.pieces.set(index, true);
    }

    /// The peer's announced pieces
    pub fn bitfield(&self) -> &BitSlice<u8, Msb0> {
        &self.pieces
    }

    /// Announced pieces as wire bytes
    pub fn bitfield_bytes(&self) -> &[u8] {
        self.pieces.as_raw_slice()
    }

    /// Byte length of the wire bitfield
    pub fn bitfield_length(&self) -> usize {
        self.pieces.as_raw_slice().len()
    }

    /// Whether the peer has announced a piece
    pub fn has_piece(&self, index: usize) -> bool {
        self.pieces.get(index).map(|b| *b).unwrap_or(false)
    }

    /// Mark the fast extension as negotiated
    pub fn enable_fast_extension(&mut self) {
        self.fast_extension = true;
    }

    /// Whether the fast extension was negotiated
    pub fn is_fast_extension_enabled(&self) -> bool {
        self.fast_extension
    }

    /// Record an allowed-fast index announced by the peer
    pub fn add_peer_allowed_index(&mut self, index: usize) {
        if !self.allowed_fast.contains(&index) {
            self.allowed_fast.push(index);
        }
    }

    /// The peer's allowed-fast set
    pub fn peer_allowed_index_set(&self) -> &[usize] {
        &self.allowed_fast
    }

    /// Size of the allowed-fast set
    pub fn count_peer_allowed_index_set(&self) -> usize {
        self.allowed_fast.len()
    }
}
