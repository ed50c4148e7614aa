//! Download context
//!
//! Immutable description of one logical download: piece geometry, the file
//! table, and the piece hash algorithm tag. The piece store holds a shared
//! reference and reads it on every length calculation; the only mutable state
//! is the download stop time, recorded when the (filtered) download finishes.

use std::path::PathBuf;
use std::time::Instant;

use parking_lot::RwLock;

use crate::error::{Result, StoreError};

/// Standard block size: the unit of transfer within a piece (16 KiB)
pub const BLOCK_SIZE: u32 = 16384;

/// One file within the download
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path relative to the download root
    pub path: PathBuf,
    /// Byte offset of this file within the whole download
    pub offset: u64,
    /// File length in bytes
    pub length: u64,
    /// Whether the user asked for this file (selective download)
    requested: bool,
}

impl FileEntry {
    /// Create a file entry, requested by default
    pub fn new(path: impl Into<PathBuf>, offset: u64, length: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            length,
            requested: true,
        }
    }

    /// Mark whether the user wants this file
    pub fn set_requested(&mut self, requested: bool) {
        self.requested = requested;
    }

    /// Whether the user wants this file
    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// Geometry and file table for one download
pub struct DownloadContext {
    piece_length: u64,
    total_length: u64,
    block_size: u32,
    file_entries: Vec<FileEntry>,
    piece_hash_algo: Option<String>,
    download_stop_time: RwLock<Option<Instant>>,
}

impl DownloadContext {
    /// Create a context for the given piece geometry
    pub fn new(piece_length: u64, total_length: u64) -> Result<Self> {
        Self::with_block_size(piece_length, total_length, BLOCK_SIZE)
    }

    /// Create a context with a non-standard block size
    ///
    /// The block size must divide the piece length evenly except for the last
    /// piece; callers that scale geometry down for tests keep that invariant.
    pub fn with_block_size(piece_length: u64, total_length: u64, block_size: u32) -> Result<Self> {
        if piece_length == 0 {
            return Err(StoreError::invalid_geometry("piece length is zero"));
        }
        if total_length == 0 {
            return Err(StoreError::invalid_geometry("total length is zero"));
        }
        if block_size == 0 {
            return Err(StoreError::invalid_geometry("block size is zero"));
        }
        if u64::from(block_size) > piece_length {
            return Err(StoreError::invalid_geometry(format!(
                "block size {} exceeds piece length {}",
                block_size, piece_length
            )));
        }
        Ok(Self {
            piece_length,
            total_length,
            block_size,
            file_entries: Vec::new(),
            piece_hash_algo: None,
            download_stop_time: RwLock::new(None),
        })
    }

    /// Replace the file table
    pub fn set_file_entries(&mut self, entries: Vec<FileEntry>) {
        self.file_entries = entries;
    }

    /// Set the piece hash algorithm tag (e.g. "sha-1")
    pub fn set_piece_hash_algo(&mut self, algo: impl Into<String>) {
        self.piece_hash_algo = Some(algo.into());
    }

    /// Nominal piece length in bytes
    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Total download length in bytes
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Block size used when splitting pieces into transfer units
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of pieces in the download
    pub fn num_pieces(&self) -> usize {
        self.total_length.div_ceil(self.piece_length) as usize
    }

    /// The file table
    pub fn file_entries(&self) -> &[FileEntry] {
        &self.file_entries
    }

    /// Piece hash algorithm tag, if the download carries one
    pub fn piece_hash_algo(&self) -> Option<&str> {
        self.piece_hash_algo.as_deref()
    }

    /// Record now as the moment the download stopped making progress
    pub fn reset_download_stop_time(&self) {
        *self.download_stop_time.write() = Some(Instant::now());
    }

    /// When the download last stopped, if it has
    pub fn download_stop_time(&self) -> Option<Instant> {
        *self.download_stop_time.read()
    }
}

impl std::fmt::Debug for DownloadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadContext")
            .field("piece_length", &self.piece_length)
            .field("total_length", &self.total_length)
            .field("block_size", &self.block_size)
            .field("num_files", &self.file_entries.len())
            .field("piece_hash_algo", &self.piece_hash_algo)
            .finish()
    }
}
