//! # piece-store
//!
//! Piece-storage core for a multi-source swarm downloader.
//!
//! A swarm download splits one logical file set into fixed-size pieces and
//! fetches them from many peers in parallel. This crate is the scheduler's
//! source of truth for that process: which pieces are durable, which are
//! checked out to workers, how rare each piece is across the swarm, and
//! which piece to hand an asking peer next.
//!
//! ## Features
//!
//! - **Piece-state index**: completion, in-use, and selective-download
//!   filter bitmaps in wire-compatible layout
//! - **Rarest-first selection**: availability-biased picking with uniform
//!   random tie-break, end-game duplication, fast-extension sets
//! - **In-flight tracking**: block-granular progress on shared piece handles
//! - **Advertisement queue**: time-windowed "have" gossip log
//!
//! Disk I/O, hashing, and the peer wire protocol live with the surrounding
//! engine; this crate defines the interfaces it consumes from them.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use piece_store::{DownloadContext, Peer, PieceStorage, StoreOptions};
//!
//! # fn main() -> Result<(), piece_store::StoreError> {
//! // 64 KiB download in 16 KiB pieces
//! let context = Arc::new(DownloadContext::new(16384, 65536)?);
//! let mut store = PieceStorage::new(context, &StoreOptions::default());
//!
//! let mut peer = Peer::new(4);
//! peer.set_bitfield(&[0b1100_0000]);
//!
//! if let Some(piece) = store.get_missing_piece(&peer) {
//!     // hand the piece to a worker; blocks arrive over its connection
//!     piece.complete_block(0);
//! }
//! # Ok(())
//! # }
//! ```

// Modules
pub mod adverts;
pub mod bitfield;
pub mod clock;
pub mod config;
pub mod context;
pub mod disk;
pub mod error;
pub mod peer;
pub mod piece;
pub mod selector;
pub mod stats;
pub mod store;

// Re-exports for convenience
pub use adverts::{AdvertQueue, HaveEntry};
pub use bitfield::{BitfieldIndex, PieceBitfield};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{FileAllocation, StoreOptions, DEFAULT_END_GAME_THRESHOLD};
pub use context::{DownloadContext, FileEntry, BLOCK_SIZE};
pub use disk::{
    DefaultDiskWriter, DefaultDiskWriterFactory, DirectDiskAdaptor, DiskAdaptor, DiskWriter,
    DiskWriterFactory, MultiDiskAdaptor,
};
pub use error::{Result, StoreError};
pub use peer::Peer;
pub use piece::{InFlightSet, Piece, PieceHandle};
pub use selector::{LowestIndexSelector, PieceSelector, RarestFirstSelector};
pub use stats::{PieceStatMan, SharedPieceStats};
pub use store::PieceStorage;
