//! Piece storage façade
//!
//! [`PieceStorage`] is the swarm scheduler's source of truth for one
//! download: which pieces are durable, which are checked out to workers,
//! what each connected peer can offer, and which piece to hand out next.
//! It composes the piece-state index, the in-flight set, the availability
//! statistics, the selection strategy, and the advertisement queue, and it
//! wires up the disk adaptor the I/O layer will write through.
//!
//! All mutating operations take `&mut self` and are meant to run on the one
//! driver thread of the connection multiplexer; nothing here suspends or
//! blocks. Checked-out pieces are the only state that crosses the worker
//! boundary, as `Arc<Piece>` handles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bitvec::prelude::*;

use crate::adverts::AdvertQueue;
use crate::bitfield::{BitfieldIndex, PieceBitfield};
use crate::clock::{Clock, SystemClock};
use crate::config::{FileAllocation, StoreOptions};
use crate::context::DownloadContext;
use crate::disk::{
    DefaultDiskWriterFactory, DirectDiskAdaptor, DiskAdaptor, DiskWriterFactory, MultiDiskAdaptor,
};
use crate::error::{Result, StoreError};
use crate::peer::Peer;
use crate::piece::{InFlightSet, Piece, PieceHandle};
use crate::selector::{PieceSelector, RarestFirstSelector};
use crate::stats::{PieceStatMan, SharedPieceStats};

/// Piece-state store for one download
pub struct PieceStorage {
    context: Arc<DownloadContext>,
    bitfield: BitfieldIndex,
    in_flight: InFlightSet,
    stats: SharedPieceStats,
    selector: Box<dyn PieceSelector>,
    adverts: AdvertQueue,
    disk_writer_factory: Box<dyn DiskWriterFactory>,
    disk_adaptor: Option<Box<dyn DiskAdaptor>>,
    options: StoreOptions,
}

impl PieceStorage {
    /// Create a store for the given download
    pub fn new(context: Arc<DownloadContext>, options: &StoreOptions) -> Self {
        Self::with_clock(context, options, Arc::new(SystemClock))
    }

    /// Create a store with an injected time source
    pub fn with_clock(
        context: Arc<DownloadContext>,
        options: &StoreOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bitfield = BitfieldIndex::new(context.piece_length(), context.total_length());
        let stats = PieceStatMan::new_shared(context.num_pieces());
        let selector = Box::new(RarestFirstSelector::new(stats.clone()));
        Self {
            context,
            bitfield,
            in_flight: InFlightSet::new(),
            stats,
            selector,
            adverts: AdvertQueue::new(clock),
            disk_writer_factory: Box::new(DefaultDiskWriterFactory),
            disk_adaptor: None,
            options: options.clone(),
        }
    }

    /// Swap the selection strategy
    pub fn set_piece_selector(&mut self, selector: Box<dyn PieceSelector>) {
        self.selector = selector;
    }

    /// The download this store tracks
    pub fn context(&self) -> &Arc<DownloadContext> {
        &self.context
    }

    /// The shared availability counters
    pub fn piece_stats(&self) -> &SharedPieceStats {
        &self.stats
    }

    // --- queries ---

    /// Whether piece `index` is durable
    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.is_bit_set(index)
    }

    /// Whether piece `index` is checked out
    pub fn is_piece_used(&self, index: usize) -> bool {
        self.bitfield.is_use_bit_set(index)
    }

    /// Byte length of piece `index`; the last piece may be short
    pub fn piece_length(&self, index: usize) -> u64 {
        self.bitfield.piece_length(index)
    }

    /// Total download length in bytes
    pub fn total_length(&self) -> u64 {
        self.bitfield.total_length()
    }

    /// Durable bytes plus partial progress on in-flight pieces, capped at total
    pub fn completed_length(&self) -> u64 {
        let completed = self.bitfield.completed_length() + self.in_flight_completed_length();
        completed.min(self.total_length())
    }

    /// Bytes selected by the file filter; the whole download when unfiltered
    pub fn filtered_total_length(&self) -> u64 {
        self.bitfield.filtered_total_length()
    }

    /// Durable filtered bytes plus partial progress on in-flight pieces
    pub fn filtered_completed_length(&self) -> u64 {
        self.bitfield.filtered_completed_length() + self.in_flight_completed_length()
    }

    fn in_flight_completed_length(&self) -> u64 {
        self.in_flight.iter().map(|p| p.completed_length()).sum()
    }

    /// Whether the peer has any piece we are missing
    pub fn has_missing_piece(&self, peer: &Peer) -> bool {
        self.bitfield.has_missing_piece(peer.bitfield())
    }

    /// Whether any missing piece is not yet checked out
    pub fn has_missing_unused_piece(&self) -> bool {
        self.bitfield.first_missing_unused_index().is_some()
    }

    /// Whether every filtered piece is durable
    pub fn download_finished(&self) -> bool {
        self.bitfield.is_filtered_all_bits_set()
    }

    /// Whether every piece is durable, filter or not
    pub fn all_download_finished(&self) -> bool {
        self.bitfield.is_all_bits_set()
    }

    /// Whether few enough pieces remain that duplicate requests are allowed
    pub fn is_end_game(&self) -> bool {
        self.bitfield.count_missing_pieces() <= self.options.end_game_threshold
    }

    /// Whether a file filter restricts the download
    pub fn is_selective_download(&self) -> bool {
        self.bitfield.is_filter_enabled()
    }

    /// A piece for reporting: the live in-flight piece, or a fresh snapshot
    ///
    /// The snapshot has every block set when the piece is already durable.
    /// Never inserts into the in-flight set.
    pub fn piece(&self, index: usize) -> PieceHandle {
        if let Some(piece) = self.in_flight.find(index) {
            return piece;
        }
        let piece = self.build_piece(index);
        if self.has_piece(index) {
            piece.set_all_blocks();
        }
        Arc::new(piece)
    }

    /// Number of in-flight pieces
    pub fn count_in_flight_pieces(&self) -> usize {
        self.in_flight.len()
    }

    /// The in-flight pieces in index order (session-save support)
    pub fn in_flight_pieces(&self) -> Vec<PieceHandle> {
        self.in_flight.iter().cloned().collect()
    }

    // --- selection ---

    /// Pick and check out a piece the peer can serve
    ///
    /// Outside end-game only unused pieces are considered; in end-game a
    /// piece already in flight may be handed out again.
    pub fn get_missing_piece(&mut self, peer: &Peer) -> Option<PieceHandle> {
        self.get_missing_piece_from_bits(peer.bitfield())
    }

    /// Like [`get_missing_piece`](Self::get_missing_piece), minus the excluded indices
    pub fn get_missing_piece_excluding(
        &mut self,
        peer: &Peer,
        excluded: &[usize],
    ) -> Option<PieceHandle> {
        let bits = self.bits_excluding(peer.bitfield(), excluded);
        self.get_missing_piece_from_bits(&bits)
    }

    /// Pick and check out a piece from the peer's allowed-fast set
    ///
    /// Returns `None` unless the peer negotiated the fast extension and
    /// announced a nonempty allowed-fast set.
    pub fn get_missing_fast_piece(&mut self, peer: &Peer) -> Option<PieceHandle> {
        let bits = self.fast_candidate_bits(peer)?;
        self.get_missing_piece_from_bits(&bits)
    }

    /// Fast-set selection minus the excluded indices
    pub fn get_missing_fast_piece_excluding(
        &mut self,
        peer: &Peer,
        excluded: &[usize],
    ) -> Option<PieceHandle> {
        let bits = self.fast_candidate_bits(peer)?;
        let bits = self.bits_excluding(&bits, excluded);
        self.get_missing_piece_from_bits(&bits)
    }

    /// Check out one specific piece, or `None` if it is durable or taken
    pub fn get_missing_piece_at(&mut self, index: usize) -> Option<PieceHandle> {
        if self.has_piece(index) || self.is_piece_used(index) {
            return None;
        }
        Some(self.check_out_piece(index))
    }

    /// Check out a missing piece far from already-claimed ones
    ///
    /// Spreads initial checkouts across the download instead of clustering
    /// every worker at the front.
    pub fn get_sparse_missing_unused_piece(
        &mut self,
        ignore: &BitSlice<u8, Msb0>,
    ) -> Option<PieceHandle> {
        let index = self.bitfield.sparse_missing_unused_index(ignore)?;
        Some(self.check_out_piece(index))
    }

    fn get_missing_piece_from_bits(&mut self, bits: &BitSlice<u8, Msb0>) -> Option<PieceHandle> {
        let candidates = if self.is_end_game() {
            self.bitfield.all_missing_indexes(bits)
        } else {
            self.bitfield.all_missing_unused_indexes(bits)
        }?;
        let index = self.selector.select(&candidates)?;
        Some(self.check_out_piece(index))
    }

    fn bits_excluding(&self, peer: &BitSlice<u8, Msb0>, excluded: &[usize]) -> PieceBitfield {
        let num_pieces = self.bitfield.num_pieces();
        let mut bits = bitvec![u8, Msb0; 0; num_pieces];
        for i in 0..num_pieces {
            if peer.get(i).map(|b| *b).unwrap_or(false) {
                bits.set(i, true);
            }
        }
        for &i in excluded {
            if i < num_pieces {
                bits.set(i, false);
            }
        }
        bits
    }

    fn fast_candidate_bits(&self, peer: &Peer) -> Option<PieceBitfield> {
        if !peer.is_fast_extension_enabled() || peer.count_peer_allowed_index_set() == 0 {
            return None;
        }
        let num_pieces = self.bitfield.num_pieces();
        let mut bits = bitvec![u8, Msb0; 0; num_pieces];
        for &i in peer.peer_allowed_index_set() {
            if i < num_pieces && !self.bitfield.is_bit_set(i) && peer.has_piece(i) {
                bits.set(i, true);
            }
        }
        Some(bits)
    }

    // --- lifecycle ---

    /// Mark a piece checked out and return its in-flight handle
    ///
    /// Idempotent: checking out the same index again returns the same handle.
    pub fn check_out_piece(&mut self, index: usize) -> PieceHandle {
        self.bitfield.set_use_bit(index);
        if let Some(piece) = self.in_flight.find(index) {
            return piece;
        }
        let piece = Arc::new(self.build_piece(index));
        self.in_flight.insert(piece.clone());
        tracing::debug!(
            "checked out piece {} ({} in flight)",
            index,
            self.in_flight.len()
        );
        piece
    }

    fn build_piece(&self, index: usize) -> Piece {
        Piece::new(
            index,
            self.bitfield.piece_length(index),
            self.context.block_size(),
        )
        .with_hash_algo(self.context.piece_hash_algo().map(str::to_owned))
    }

    /// Record a verified piece as durable
    ///
    /// Safe to call again with an already-completed piece: the repeat is a
    /// no-op, including for the availability counters. When another code path
    /// already finished the whole download the call only drops the in-flight
    /// entry.
    pub fn complete_piece(&mut self, piece: &PieceHandle) {
        let index = piece.index();
        self.in_flight.erase(index);
        if self.all_download_finished() {
            return;
        }
        if self.bitfield.is_bit_set(index) {
            return;
        }
        self.bitfield.unset_use_bit(index);
        self.bitfield.set_bit(index);
        self.stats.lock().add_piece_stats_index(index);
        if self.download_finished() {
            self.context.reset_download_stop_time();
            if self.is_selective_download() {
                tracing::info!("selected files downloaded completely");
            } else {
                tracing::info!("download completed");
            }
        }
    }

    /// Release a checked-out piece
    ///
    /// Partial progress is kept only in end-game, where another worker may
    /// already be filling in the same piece; otherwise an untouched piece is
    /// dropped from the in-flight set.
    pub fn cancel_piece(&mut self, piece: &PieceHandle) {
        self.bitfield.unset_use_bit(piece.index());
        if !self.is_end_game() && piece.completed_length() == 0 {
            self.in_flight.erase(piece.index());
        }
    }

    /// Drop a piece from the in-flight set; no-op when absent
    pub fn delete_used_piece(&mut self, piece: &PieceHandle) {
        self.in_flight.erase(piece.index());
    }

    /// Clear a piece's durable bit (after the verifier rejects its hash)
    pub fn mark_piece_missing(&mut self, index: usize) {
        self.bitfield.unset_bit(index);
    }

    /// Mark the whole download durable
    pub fn mark_all_pieces_done(&mut self) {
        self.bitfield.set_all_bits();
    }

    /// Restore completion state from a byte count
    ///
    /// Full pieces below `length` become durable; a block-granular remainder
    /// becomes one partial in-flight piece. `length == 0` resets everything.
    pub fn mark_pieces_done(&mut self, length: u64) {
        assert!(
            length <= self.total_length(),
            "restore length {} exceeds total length {}",
            length,
            self.total_length()
        );
        if length == self.total_length() {
            self.bitfield.set_all_bits();
        } else if length == 0 {
            self.bitfield.clear_all_bits();
            self.in_flight.clear();
        } else {
            let piece_length = self.context.piece_length();
            let full_pieces = (length / piece_length) as usize;
            if full_pieces > 0 {
                self.bitfield.set_bit_range(0, full_pieces - 1);
            }
            let remainder_blocks =
                ((length % piece_length) / u64::from(self.context.block_size())) as usize;
            if remainder_blocks > 0 {
                let piece = Arc::new(self.build_piece(full_pieces));
                for block in 0..remainder_blocks {
                    piece.complete_block(block);
                }
                self.in_flight.insert(piece);
            }
        }
    }

    /// Restore saved in-flight pieces in bulk
    pub fn add_in_flight_pieces(&mut self, pieces: Vec<PieceHandle>) {
        self.in_flight.insert_batch(pieces);
    }

    // --- bitfield exchange ---

    /// Restore the have bitmap from wire bytes and credit it to statistics
    ///
    /// Restore-time operation: clears any checkout bits, so it must run
    /// before pieces are handed to workers.
    pub fn set_bitfield(&mut self, bytes: &[u8]) -> Result<()> {
        self.bitfield.set_bitfield(bytes)?;
        self.stats
            .lock()
            .add_piece_stats(BitSlice::<u8, Msb0>::from_slice(bytes));
        Ok(())
    }

    /// The have bitmap as wire bytes (MSB-first, zero padding)
    pub fn bitfield(&self) -> &[u8] {
        self.bitfield.bitfield()
    }

    /// Byte length of the wire bitfield
    pub fn bitfield_length(&self) -> usize {
        self.bitfield.bitfield_length()
    }

    // --- availability statistics relay ---

    /// Credit a joining peer's pieces to the availability counters
    pub fn add_piece_stats(&mut self, peer: &BitSlice<u8, Msb0>) {
        self.stats.lock().add_piece_stats(peer);
    }

    /// Remove a leaving peer's contribution from the availability counters
    pub fn subtract_piece_stats(&mut self, peer: &BitSlice<u8, Msb0>) {
        self.stats.lock().subtract_piece_stats(peer);
    }

    /// Apply the delta between a peer's new and previous bitfields
    pub fn update_piece_stats(
        &mut self,
        new_peer: &BitSlice<u8, Msb0>,
        old_peer: &BitSlice<u8, Msb0>,
    ) {
        self.stats.lock().update_piece_stats(new_peer, old_peer);
    }

    /// Credit a single piece to the availability counters
    pub fn add_piece_stats_index(&mut self, index: usize) {
        self.stats.lock().add_piece_stats_index(index);
    }

    // --- advertisements ---

    /// Queue a completed piece for gossip to connected peers
    pub fn advertise_piece(&mut self, owner: u64, index: usize) {
        self.adverts.push(owner, index);
    }

    /// Pieces advertised after `since` by connections other than `my_owner`
    pub fn advertised_piece_indexes(&self, my_owner: u64, since: Instant) -> Vec<usize> {
        self.adverts.collect_since(my_owner, since)
    }

    /// Drop advertisements older than `max_age`
    pub fn remove_advertised_piece(&mut self, max_age: Duration) {
        self.adverts.expire(max_age);
    }

    // --- selective download ---

    /// Install the file filter from the context's requested flags
    ///
    /// When every file is requested the filter stays disabled and all pieces
    /// remain interesting; otherwise each requested file contributes a range.
    pub fn setup_file_filter(&mut self) {
        let entries = self.context.file_entries();
        if entries.iter().all(|entry| entry.is_requested()) {
            return;
        }
        let ranges: Vec<(u64, u64)> = entries
            .iter()
            .filter(|entry| entry.is_requested())
            .map(|entry| (entry.offset, entry.length))
            .collect();
        for (offset, length) in ranges {
            self.bitfield.add_filter(offset, length);
        }
        self.bitfield.enable_filter();
    }

    /// Drop the file filter
    pub fn clear_file_filter(&mut self) {
        self.bitfield.clear_filter();
    }

    // --- storage wiring ---

    /// Install the disk adaptor matching the download's file layout
    pub fn init_storage(&mut self) -> Result<()> {
        let entries = self.context.file_entries();
        if entries.is_empty() {
            return Err(StoreError::NoFileEntries);
        }
        if entries.len() == 1 {
            tracing::debug!("instantiating direct disk adaptor");
            let mut adaptor = DirectDiskAdaptor::new();
            adaptor.set_total_length(self.context.total_length());
            adaptor.set_file_entries(entries.to_vec());
            let path = entries[0].path.clone();
            let mut writer = self.disk_writer_factory.new_disk_writer(&path);
            if self.options.enable_direct_io {
                writer.allow_direct_io();
            }
            adaptor.set_disk_writer(writer);
            self.disk_adaptor = Some(Box::new(adaptor));
        } else {
            tracing::debug!("instantiating multi-file disk adaptor");
            let mut adaptor = MultiDiskAdaptor::new();
            adaptor.set_file_entries(entries.to_vec());
            if self.options.enable_direct_io {
                adaptor.allow_direct_io();
            }
            adaptor.set_piece_length(self.context.piece_length());
            adaptor.set_max_open_files(self.options.max_open_files);
            self.disk_adaptor = Some(Box::new(adaptor));
        }
        if self.options.file_allocation == FileAllocation::Falloc {
            if let Some(adaptor) = self.disk_adaptor.as_mut() {
                adaptor.enable_fallocate();
            }
        }
        Ok(())
    }

    /// Replace the factory used to build disk writers
    pub fn set_disk_writer_factory(&mut self, factory: Box<dyn DiskWriterFactory>) {
        self.disk_writer_factory = factory;
    }

    /// The installed disk adaptor, if storage was initialized
    pub fn disk_adaptor(&self) -> Option<&dyn DiskAdaptor> {
        self.disk_adaptor.as_deref()
    }
}
