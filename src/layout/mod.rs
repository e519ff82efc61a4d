//! File & Layout Manager
//!
//! This module owns the **single memory-mapped backing file**: creation,
//! validation, section-offset arithmetic, typed per-slot access, and
//! migration of older format versions.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER 1024 B]
//! [VECTORS     max_count × dim × 4 B]
//! [GRAPH       max_count × max_layers × max_neighbors × 4 B]
//! [METADATA    max_count × 512 B]
//! [DOC IDS     max_count × 16 B]
//! [TOMBSTONES  max_count × 1 B]
//! ```
//!
//! Every section is a flat array indexed by **slot**, so each accessor
//! is a constant-time offset computation and every mutation is a
//! localized write. All multi-byte values are **little-endian**.
//!
//! # Header
//!
//! The 1024-byte header is packed in this exact field order:
//! `max_layers i32`, `layer_probability f64`, `magic i32`, `version i32`,
//! `dim i32`, `count i32`, `max_count i32`, `max_neighbors i32`,
//! `entry_point i32`, `entry_point_level i32`, `deleted_count i32`,
//! `metric i32`, zero-padded to 1024 bytes.
//!
//! # Versions
//!
//! - **v1** — no DocID and no tombstone sections.
//! - **v2** — DocID section present, no tombstones.
//! - **v3** — current layout (both sections present).
//!
//! Because newer sections append strictly after older ones, migration
//! never moves data: the file is extended, fresh DocIDs are generated
//! where the old version had none, tombstones start zeroed, and the
//! header version is bumped.
//!
//! # Guarantees
//!
//! - **Exact size:** the file length always equals the total computed
//!   from the header parameters (validated on open).
//! - **Identity:** magic number and vector dimension are validated on
//!   open; a mismatch fails with [`LayoutError::FormatMismatch`].
//! - **Localized writes:** no accessor touches bytes outside its slot,
//!   which is what the crash-ordering argument in [`crate::engine`]
//!   relies on.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::score::Metric;

// The vector and graph sections are read through `&[f32]` / `&[i32]`
// casts, so the stored little-endian bytes must match native order.
#[cfg(target_endian = "big")]
compile_error!("the on-disk format is little-endian; big-endian targets are unsupported");

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 1024;

/// Magic constant identifying a backing file (`"CEVZ"` read as LE i32).
pub const MAGIC: i32 = 0x5A56_4543;

/// Current format version.
pub const VERSION: i32 = 3;

/// Fixed per-slot metadata capacity in bytes.
pub const METADATA_SIZE: usize = 512;

/// On-disk size of a document identifier.
pub const DOC_ID_SIZE: usize = 16;

/// Neighbour-list terminator.
pub const NO_NEIGHBOR: i32 = -1;

const I32_SIZE: usize = std::mem::size_of::<i32>();
const F32_SIZE: usize = std::mem::size_of::<f32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by layout operations.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not a backing file of this format, or its recorded
    /// parameters contradict the requested ones.
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// In-memory copy of the 1024-byte file header.
///
/// The engine mutates this copy during an operation and persists it
/// last via [`Layout::flush_header`], which is the commit point of
/// every mutating operation.
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// Maximum layer count `L`.
    pub max_layers: i32,

    /// Layer probability `mL = 1/ln(M)` used for level assignment.
    pub layer_probability: f64,

    /// Magic constant, always [`MAGIC`].
    pub magic: i32,

    /// Format version, [`VERSION`] after open.
    pub version: i32,

    /// Vector dimension `D`.
    pub dim: i32,

    /// Current slot count `N` (monotonically nondecreasing).
    pub count: i32,

    /// Physical capacity in slots.
    pub max_count: i32,

    /// Per-layer neighbour cap `M`.
    pub max_neighbors: i32,

    /// Slot where searches start their descent, `-1` when empty.
    pub entry_point: i32,

    /// Recorded level of the entry point.
    pub entry_point_level: i32,

    /// Number of tombstoned slots.
    pub deleted_count: i32,

    /// Similarity metric code (see [`Metric`]).
    pub metric: i32,
}

impl FileHeader {
    /// Encoded size of the populated prefix; the rest of the 1024-byte
    /// header is zero padding.
    /// Layout: `max_layers(4) + layer_probability(8) + 10 × i32` = 52.
    pub const ENCODED_SIZE: usize = 4 + 8 + 10 * 4;

    fn new(opts: &LayoutOptions) -> Self {
        Self {
            max_layers: opts.max_layers as i32,
            layer_probability: 1.0 / (opts.max_neighbors as f64).ln(),
            magic: MAGIC,
            version: VERSION,
            dim: opts.dim as i32,
            count: 0,
            max_count: opts.max_count as i32,
            max_neighbors: opts.max_neighbors as i32,
            entry_point: NO_NEIGHBOR,
            entry_point_level: 0,
            deleted_count: 0,
            metric: opts.metric.code(),
        }
    }

    /// Serialises the header into its packed little-endian form.
    fn encode_into(&self, buf: &mut [u8]) {
        buf[..HEADER_SIZE].fill(0);
        buf[0..4].copy_from_slice(&self.max_layers.to_le_bytes());
        buf[4..12].copy_from_slice(&self.layer_probability.to_le_bytes());
        buf[12..16].copy_from_slice(&self.magic.to_le_bytes());
        buf[16..20].copy_from_slice(&self.version.to_le_bytes());
        buf[20..24].copy_from_slice(&self.dim.to_le_bytes());
        buf[24..28].copy_from_slice(&self.count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.max_count.to_le_bytes());
        buf[32..36].copy_from_slice(&self.max_neighbors.to_le_bytes());
        buf[36..40].copy_from_slice(&self.entry_point.to_le_bytes());
        buf[40..44].copy_from_slice(&self.entry_point_level.to_le_bytes());
        buf[44..48].copy_from_slice(&self.deleted_count.to_le_bytes());
        buf[48..52].copy_from_slice(&self.metric.to_le_bytes());
    }

    /// Decodes the packed header prefix.
    fn decode_from(buf: &[u8]) -> Self {
        let i32_at = |off: usize| {
            i32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
        };
        let mut f64_bytes = [0u8; 8];
        f64_bytes.copy_from_slice(&buf[4..12]);
        Self {
            max_layers: i32_at(0),
            layer_probability: f64::from_le_bytes(f64_bytes),
            magic: i32_at(12),
            version: i32_at(16),
            dim: i32_at(20),
            count: i32_at(24),
            max_count: i32_at(28),
            max_neighbors: i32_at(32),
            entry_point: i32_at(36),
            entry_point_level: i32_at(40),
            deleted_count: i32_at(44),
            metric: i32_at(48),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Parameters for creating (or validating) a backing file.
#[derive(Debug, Clone, Copy)]
pub struct LayoutOptions {
    /// Vector dimension `D`.
    pub dim: usize,

    /// Physical capacity in slots.
    pub max_count: usize,

    /// Per-layer neighbour cap `M`.
    pub max_neighbors: usize,

    /// Maximum layer count `L`.
    pub max_layers: usize,

    /// Similarity metric.
    pub metric: Metric,
}

/// Byte offsets of the five data sections, derived from the header.
#[derive(Debug, Clone, Copy)]
struct SectionOffsets {
    vectors: usize,
    graph: usize,
    metadata: usize,
    ids: usize,
    tombstones: usize,
    total: usize,
}

impl SectionOffsets {
    fn compute(dim: usize, max_count: usize, max_neighbors: usize, max_layers: usize) -> Self {
        let vectors = HEADER_SIZE;
        let graph = vectors + max_count * dim * F32_SIZE;
        let metadata = graph + max_count * max_layers * max_neighbors * I32_SIZE;
        let ids = metadata + max_count * METADATA_SIZE;
        let tombstones = ids + max_count * DOC_ID_SIZE;
        let total = tombstones + max_count;
        Self {
            vectors,
            graph,
            metadata,
            ids,
            tombstones,
            total,
        }
    }

    /// File length of an older version, which simply omits the
    /// trailing sections.
    fn total_for_version(&self, version: i32) -> usize {
        match version {
            1 => self.ids,
            2 => self.tombstones,
            _ => self.total,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Layout
// ------------------------------------------------------------------------------------------------

/// The memory-mapped backing file with typed per-slot access.
///
/// All accessors take a slot index that the caller has already bounded
/// by `max_count`; the engine enforces this at its boundary.
pub struct Layout {
    /// Keeps the mapping's file descriptor alive and is used to grow
    /// the file during migration and to fsync on [`Layout::sync`].
    file: File,

    /// The whole backing file, mapped read-write.
    mmap: MmapMut,

    /// Authoritative in-memory header copy.
    pub header: FileHeader,

    /// Path the file was opened at.
    path: PathBuf,

    offsets: SectionOffsets,
}

impl Layout {
    /// Opens an existing backing file or creates a fresh one.
    ///
    /// On open the magic number and the recorded dimension are
    /// validated against `opts`; the remaining graph parameters are
    /// taken from the file (they are properties of the stored graph,
    /// not of the caller). Files at version 1 or 2 are migrated to
    /// the current layout before this returns.
    pub fn open(path: impl AsRef<Path>, opts: &LayoutOptions) -> Result<Self, LayoutError> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !exists {
            return Self::create(file, path, opts);
        }

        // Read the header through the file handle first: migration may
        // need to grow the file, which must happen before mapping.
        let mut header_buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header_buf).map_err(|_| {
            LayoutError::FormatMismatch("file too short to hold a header".into())
        })?;
        let header = FileHeader::decode_from(&header_buf);

        if header.magic != MAGIC {
            return Err(LayoutError::FormatMismatch(format!(
                "bad magic 0x{:08X}, expected 0x{MAGIC:08X}",
                header.magic
            )));
        }
        if header.version < 1 || header.version > VERSION {
            return Err(LayoutError::FormatMismatch(format!(
                "unsupported version {}, newest supported is {VERSION}",
                header.version
            )));
        }
        if header.dim != opts.dim as i32 {
            return Err(LayoutError::FormatMismatch(format!(
                "dimension {} recorded in file, {} requested",
                header.dim, opts.dim
            )));
        }
        if Metric::from_code(header.metric).is_none() {
            return Err(LayoutError::FormatMismatch(format!(
                "unknown metric code {}",
                header.metric
            )));
        }

        let offsets = SectionOffsets::compute(
            header.dim as usize,
            header.max_count as usize,
            header.max_neighbors as usize,
            header.max_layers as usize,
        );
        let expected = offsets.total_for_version(header.version);
        let actual = file.metadata()?.len() as usize;
        if actual != expected {
            return Err(LayoutError::FormatMismatch(format!(
                "file length {actual} does not match the {expected} bytes implied by its header"
            )));
        }

        let from_version = header.version;
        if from_version < VERSION {
            file.set_len(offsets.total as u64)?;
        }

        // Safety: the file is open read-write and sized to cover the
        // whole mapping; the Layout owns both the map and the handle.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let mut layout = Self {
            file,
            mmap,
            header,
            path,
            offsets,
        };

        if from_version < VERSION {
            layout.migrate(from_version)?;
        }

        debug!(
            path = %layout.path.display(),
            count = layout.header.count,
            deleted = layout.header.deleted_count,
            dim = layout.header.dim,
            "opened backing file"
        );
        Ok(layout)
    }

    fn create(file: File, path: PathBuf, opts: &LayoutOptions) -> Result<Self, LayoutError> {
        let offsets =
            SectionOffsets::compute(opts.dim, opts.max_count, opts.max_neighbors, opts.max_layers);
        file.set_len(offsets.total as u64)?;

        // Safety: as in `open` — file sized to the full mapping.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let header = FileHeader::new(opts);

        let mut layout = Self {
            file,
            mmap,
            header,
            path,
            offsets,
        };
        layout.flush_header()?;

        info!(
            path = %layout.path.display(),
            dim = opts.dim,
            max_count = opts.max_count,
            max_neighbors = opts.max_neighbors,
            max_layers = opts.max_layers,
            "created backing file"
        );
        Ok(layout)
    }

    /// Upgrades a v1/v2 file in place.
    ///
    /// Newer sections sit strictly after older ones, so the extension
    /// performed in `open` already placed them; `set_len` zero-fills,
    /// which is exactly the initial tombstone state. Version 1 files
    /// additionally receive fresh random DocIDs for every existing slot.
    fn migrate(&mut self, from_version: i32) -> Result<(), LayoutError> {
        warn!(
            from_version,
            to_version = VERSION,
            count = self.header.count,
            "migrating backing file"
        );

        if from_version < 2 {
            for slot in 0..self.header.count as u32 {
                self.write_doc_id(slot, Uuid::new_v4());
            }
        }

        self.header.version = VERSION;
        self.flush_header()?;
        self.mmap.flush()?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Section accessors
    // --------------------------------------------------------------------------------------------

    /// Borrow the stored vector at `slot`.
    #[inline]
    pub fn vector(&self, slot: u32) -> &[f32] {
        let dim = self.header.dim as usize;
        let start = self.offsets.vectors + slot as usize * dim * F32_SIZE;
        let bytes = &self.mmap[start..start + dim * F32_SIZE];
        // Safety: the section starts at offset 1024 with a stride that
        // is a multiple of 4, so the pointer is 4-byte aligned, and the
        // range was just bounds-checked.
        unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<f32>(), dim) }
    }

    /// Write the vector at `slot`.
    pub fn write_vector(&mut self, slot: u32, vector: &[f32]) {
        let dim = self.header.dim as usize;
        let start = self.offsets.vectors + slot as usize * dim * F32_SIZE;
        let bytes = &mut self.mmap[start..start + dim * F32_SIZE];
        for (chunk, value) in bytes.chunks_exact_mut(F32_SIZE).zip(vector) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Borrow the full 512-byte metadata slot (including padding).
    #[inline]
    pub fn metadata(&self, slot: u32) -> &[u8] {
        let start = self.offsets.metadata + slot as usize * METADATA_SIZE;
        &self.mmap[start..start + METADATA_SIZE]
    }

    /// Write metadata at `slot`, zero-padding the tail of the slot.
    ///
    /// `meta` must be at most [`METADATA_SIZE`] bytes; the engine
    /// validates this at its boundary.
    pub fn write_metadata(&mut self, slot: u32, meta: &[u8]) {
        let start = self.offsets.metadata + slot as usize * METADATA_SIZE;
        let dst = &mut self.mmap[start..start + METADATA_SIZE];
        dst[..meta.len()].copy_from_slice(meta);
        dst[meta.len()..].fill(0);
    }

    /// Read the document identifier at `slot`.
    #[inline]
    pub fn doc_id(&self, slot: u32) -> Uuid {
        let start = self.offsets.ids + slot as usize * DOC_ID_SIZE;
        let mut bytes = [0u8; DOC_ID_SIZE];
        bytes.copy_from_slice(&self.mmap[start..start + DOC_ID_SIZE]);
        Uuid::from_bytes(bytes)
    }

    /// Write the document identifier at `slot`.
    pub fn write_doc_id(&mut self, slot: u32, id: Uuid) {
        let start = self.offsets.ids + slot as usize * DOC_ID_SIZE;
        self.mmap[start..start + DOC_ID_SIZE].copy_from_slice(id.as_bytes());
    }

    /// Whether `slot` carries a tombstone.
    #[inline]
    pub fn is_tombstoned(&self, slot: u32) -> bool {
        self.mmap[self.offsets.tombstones + slot as usize] != 0
    }

    /// Set or clear the tombstone byte at `slot`.
    pub fn set_tombstone(&mut self, slot: u32, dead: bool) {
        self.mmap[self.offsets.tombstones + slot as usize] = u8::from(dead);
    }

    /// Borrow the neighbour list of `slot` at `layer`.
    ///
    /// The list holds `max_neighbors` entries; [`NO_NEIGHBOR`]
    /// terminates it and entries past the terminator are garbage.
    #[inline]
    pub fn neighbors(&self, slot: u32, layer: usize) -> &[i32] {
        let (start, len) = self.neighbor_range(slot, layer);
        let bytes = &self.mmap[start..start + len];
        // Safety: the graph section starts 4-byte aligned after the
        // vector section and every stride is a multiple of 4.
        unsafe {
            std::slice::from_raw_parts(
                bytes.as_ptr().cast::<i32>(),
                self.header.max_neighbors as usize,
            )
        }
    }

    /// Overwrite the neighbour list of `slot` at `layer`, terminating
    /// and padding with [`NO_NEIGHBOR`].
    pub fn write_neighbors(&mut self, slot: u32, layer: usize, list: &[i32]) {
        let m = self.header.max_neighbors as usize;
        let (start, len) = self.neighbor_range(slot, layer);
        let bytes = &mut self.mmap[start..start + len];
        for (i, chunk) in bytes.chunks_exact_mut(I32_SIZE).enumerate() {
            let value = if i < list.len().min(m) { list[i] } else { NO_NEIGHBOR };
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Reset every layer of `slot` to the empty list.
    pub fn clear_neighbor_lists(&mut self, slot: u32) {
        for layer in 0..self.header.max_layers as usize {
            self.write_neighbors(slot, layer, &[]);
        }
    }

    #[inline]
    fn neighbor_range(&self, slot: u32, layer: usize) -> (usize, usize) {
        let m = self.header.max_neighbors as usize;
        let l = self.header.max_layers as usize;
        let start = self.offsets.graph + (slot as usize * l + layer) * m * I32_SIZE;
        (start, m * I32_SIZE)
    }

    // --------------------------------------------------------------------------------------------
    // Durability
    // --------------------------------------------------------------------------------------------

    /// Persist the in-memory header copy.
    ///
    /// This is the commit point of every mutating operation: the header
    /// is always written after the data and graph bytes it describes.
    pub fn flush_header(&mut self) -> Result<(), LayoutError> {
        let mut buf = [0u8; HEADER_SIZE];
        self.header.encode_into(&mut buf);
        self.mmap[..HEADER_SIZE].copy_from_slice(&buf);
        self.mmap.flush_range(0, HEADER_SIZE)?;
        Ok(())
    }

    /// Flush the whole mapping and fsync the file.
    pub fn sync(&self) -> Result<(), LayoutError> {
        self.mmap.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Moves the backing file to `new_path`.
    ///
    /// The mapping follows the file descriptor, so it stays valid
    /// across the rename; only the recorded path changes.
    pub fn rename_to(&mut self, new_path: &Path) -> Result<(), LayoutError> {
        fs::rename(&self.path, new_path)?;
        self.path = new_path.to_path_buf();
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total file length in bytes.
    pub fn file_len(&self) -> usize {
        self.offsets.total
    }

    /// The metric recorded in the header.
    pub fn metric(&self) -> Metric {
        // The open path rejects unknown codes before constructing self.
        Metric::from_code(self.header.metric).unwrap_or(Metric::Dot)
    }
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("file_len", &self.offsets.total)
            .finish()
    }
}
