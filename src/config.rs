//! Store configuration
//!
//! Knobs consumed by the piece store: storage wiring options and the
//! end-game threshold. Loading and merging these from files or a CLI is the
//! caller's concern.

use serde::{Deserialize, Serialize};

/// Number of missing pieces at or below which end-game mode engages
pub const DEFAULT_END_GAME_THRESHOLD: usize = 20;

/// Configuration for the piece store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Bypass the page cache when writing pieces (O_DIRECT where supported)
    #[serde(default)]
    pub enable_direct_io: bool,

    /// Maximum files the multi-file disk adaptor keeps open at once
    #[serde(default = "default_max_open_files")]
    pub max_open_files: u32,

    /// File allocation mode (none, prealloc, falloc, or trunc)
    #[serde(default)]
    pub file_allocation: FileAllocation,

    /// Missing-piece count at which duplicate requests become allowed
    #[serde(default = "default_end_game_threshold")]
    pub end_game_threshold: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            enable_direct_io: false,
            max_open_files: default_max_open_files(),
            file_allocation: FileAllocation::default(),
            end_game_threshold: default_end_game_threshold(),
        }
    }
}

fn default_max_open_files() -> u32 {
    100
}

fn default_end_game_threshold() -> usize {
    DEFAULT_END_GAME_THRESHOLD
}

/// File allocation mode for downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileAllocation {
    /// No preallocation (default) - files grow as data is written
    #[default]
    None,
    /// Write zeros up front to reserve the full length
    Prealloc,
    /// posix_fallocate where the filesystem supports it
    Falloc,
    /// Truncate the file to its final length without writing
    Trunc,
}

impl std::fmt::Display for FileAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Prealloc => write!(f, "prealloc"),
            Self::Falloc => write!(f, "falloc"),
            Self::Trunc => write!(f, "trunc"),
        }
    }
}

impl std::str::FromStr for FileAllocation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "prealloc" => Ok(Self::Prealloc),
            "falloc" => Ok(Self::Falloc),
            "trunc" => Ok(Self::Trunc),
            _ => Err(format!("Invalid file allocation mode: {}", s)),
        }
    }
}
