//! Disk adaptor wiring
//!
//! The piece store does not perform disk I/O; it selects and configures the
//! adaptor that will. [`DirectDiskAdaptor`] covers single-file downloads,
//! [`MultiDiskAdaptor`] spreads pieces over a file table with a bounded open
//! file count. Both are configuration sinks here; an I/O layer implements the
//! actual reads and writes against the same traits.

use std::path::{Path, PathBuf};

use crate::context::FileEntry;

/// Writer for one backing file
pub trait DiskWriter: Send {
    /// Path the writer targets
    fn path(&self) -> &Path;

    /// Bypass the page cache where the platform supports it
    fn allow_direct_io(&mut self);

    /// Whether direct I/O was requested
    fn is_direct_io_allowed(&self) -> bool;
}

/// Factory for disk writers
pub trait DiskWriterFactory: Send {
    /// Create a writer targeting `path`
    fn new_disk_writer(&self, path: &Path) -> Box<dyn DiskWriter>;
}

/// Destination for completed piece data
pub trait DiskAdaptor: Send {
    /// Total download length
    fn set_total_length(&mut self, length: u64);

    /// The file table pieces map onto
    fn set_file_entries(&mut self, entries: Vec<FileEntry>);

    /// Nominal piece length (used to locate pieces across file boundaries)
    fn set_piece_length(&mut self, length: u64);

    /// Cap on simultaneously open files
    fn set_max_open_files(&mut self, count: u32);

    /// Bypass the page cache where the platform supports it
    fn allow_direct_io(&mut self);

    /// Reserve file space with fallocate before writing
    fn enable_fallocate(&mut self);

    /// The file table
    fn file_entries(&self) -> &[FileEntry];
}

/// Plain file writer configuration
#[derive(Debug)]
pub struct DefaultDiskWriter {
    path: PathBuf,
    direct_io: bool,
}

impl DefaultDiskWriter {
    /// Create a writer targeting `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            direct_io: false,
        }
    }
}

impl DiskWriter for DefaultDiskWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn allow_direct_io(&mut self) {
        self.direct_io = true;
    }

    fn is_direct_io_allowed(&self) -> bool {
        self.direct_io
    }
}

/// Factory producing [`DefaultDiskWriter`]s
#[derive(Debug, Default)]
pub struct DefaultDiskWriterFactory;

impl DiskWriterFactory for DefaultDiskWriterFactory {
    fn new_disk_writer(&self, path: &Path) -> Box<dyn DiskWriter> {
        Box::new(DefaultDiskWriter::new(path))
    }
}

/// Adaptor for single-file downloads: pieces map 1:1 onto one file
#[derive(Default)]
pub struct DirectDiskAdaptor {
    total_length: u64,
    file_entries: Vec<FileEntry>,
    writer: Option<Box<dyn DiskWriter>>,
    direct_io: bool,
    fallocate: bool,
}

impl DirectDiskAdaptor {
    /// Create an unconfigured adaptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the single backing file
    pub fn file_path(&self) -> Option<&Path> {
        self.file_entries.first().map(|entry| entry.path.as_path())
    }

    /// Install the writer for the backing file
    pub fn set_disk_writer(&mut self, writer: Box<dyn DiskWriter>) {
        self.writer = Some(writer);
    }

    /// The installed writer, if any
    pub fn disk_writer(&self) -> Option<&dyn DiskWriter> {
        self.writer.as_deref()
    }

    /// Total length configured on this adaptor
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Whether fallocate was requested
    pub fn is_fallocate_enabled(&self) -> bool {
        self.fallocate
    }
}

impl DiskAdaptor for DirectDiskAdaptor {
    fn set_total_length(&mut self, length: u64) {
        self.total_length = length;
    }

    fn set_file_entries(&mut self, entries: Vec<FileEntry>) {
        self.file_entries = entries;
    }

    fn set_piece_length(&mut self, _length: u64) {
        // single file: piece offsets are absolute, nothing to configure
    }

    fn set_max_open_files(&mut self, _count: u32) {
        // single file: always exactly one open file
    }

    fn allow_direct_io(&mut self) {
        self.direct_io = true;
    }

    fn enable_fallocate(&mut self) {
        self.fallocate = true;
    }

    fn file_entries(&self) -> &[FileEntry] {
        &self.file_entries
    }
}

/// Adaptor for multi-file downloads: pieces may span file boundaries
#[derive(Debug, Default)]
pub struct MultiDiskAdaptor {
    file_entries: Vec<FileEntry>,
    piece_length: u64,
    max_open_files: u32,
    direct_io: bool,
    fallocate: bool,
}

impl MultiDiskAdaptor {
    /// Create an unconfigured adaptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Piece length configured on this adaptor
    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Open-file cap configured on this adaptor
    pub fn max_open_files(&self) -> u32 {
        self.max_open_files
    }

    /// Whether fallocate was requested
    pub fn is_fallocate_enabled(&self) -> bool {
        self.fallocate
    }

    /// Whether direct I/O was requested
    pub fn is_direct_io_allowed(&self) -> bool {
        self.direct_io
    }
}

impl DiskAdaptor for MultiDiskAdaptor {
    fn set_total_length(&mut self, _length: u64) {
        // derived from the file table
    }

    fn set_file_entries(&mut self, entries: Vec<FileEntry>) {
        self.file_entries = entries;
    }

    fn set_piece_length(&mut self, length: u64) {
        self.piece_length = length;
    }

    fn set_max_open_files(&mut self, count: u32) {
        self.max_open_files = count;
    }

    fn allow_direct_io(&mut self) {
        self.direct_io = true;
    }

    fn enable_fallocate(&mut self) {
        self.fallocate = true;
    }

    fn file_entries(&self) -> &[FileEntry] {
        &self.file_entries
    }
}
