//! # Vector Storage Engine
//!
//! This module implements a **synchronous**, **crash-safe**, embedded
//! approximate-nearest-neighbor store over a single memory-mapped file,
//! with stable external document identifiers and tombstone-based
//! soft deletes.
//!
//! ## Design Overview
//!
//! Four subsystems compose linearly:
//!
//! 1. **[`crate::layout`]** — the backing file: section offsets, typed
//!    per-slot readers/writers, header persistence, format migration.
//! 2. **[`crate::idmap`]** — the in-memory DocID → slot index, rebuilt
//!    on every open by scanning the tombstone and DocID sections.
//! 3. **[`crate::hnsw`]** — layered graph construction and traversal.
//! 4. **Tombstone & repair** (this module + [`crate::hnsw::unlink`]) —
//!    soft-delete ordering, neighbour rewiring, entry-point migration.
//!
//! On `add`, the identifier index allocates the next slot, the layout
//! writes the raw bytes, and the graph engine wires the slot in. On
//! `search`, the graph engine walks the layers, the deleted set filters
//! candidates, and the identifier section maps winning slots back to
//! external ids.
//!
//! ## Concurrency Model
//!
//! All engine state is protected by a single `Arc<RwLock<EngineInner>>`.
//! `search*`, `get_by_id`, `count`, and `stats` acquire the **read
//! lock**; `add`, `update*`, `delete`, and `vacuum` acquire the **write
//! lock**. The handle is cheaply cloneable and shareable across
//! threads. The parallel linear scan fans out over worker threads that
//! receive only shared references held stable by the read lock.
//!
//! ## Crash Safety
//!
//! Every mutating operation writes the header **last**:
//!
//! - insert: vector/metadata/id/tombstone → graph wiring → header;
//! - delete: tombstone byte → graph rewiring → header.
//!
//! A crash between a slot's data write and the header increment leaves
//! an orphan beyond `count`, invisible to every operation and
//! overwritten by the next add. A crash mid-delete leaves residual
//! back-references to a tombstoned slot; search tolerates these because
//! it re-checks the tombstone on every visit. No journaling is needed.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hnsw::{self, Scored};
use crate::idmap::{IdIndex, IdIndexError};
use crate::layout::{Layout, LayoutError, LayoutOptions, METADATA_SIZE, NO_NEIGHBOR};
use crate::score::{self, Metric};

/// Base-layer beam width used when the caller does not supply one.
pub const DEFAULT_EF_SEARCH: usize = 64;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the file & layout subsystem.
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Every physical slot is occupied; only a vacuum reclaims slots.
    #[error("Database is full ({max_count} slots)")]
    DbFull {
        /// Physical capacity of the backing file.
        max_count: i32,
    },

    /// A vector's length does not match the engine dimension.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimMismatch {
        /// Dimension recorded in the file header.
        expected: usize,
        /// Length of the offending vector.
        got: usize,
    },

    /// A metadata payload exceeds the fixed per-slot capacity.
    #[error("Metadata too large: {len} bytes, limit is {max}")]
    MetadataTooLarge {
        /// Length of the offending payload.
        len: usize,
        /// Per-slot metadata capacity.
        max: usize,
    },

    /// The identifier sections of the file contradict themselves.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<IdIndexError> for EngineError {
    fn from(err: IdIndexError) -> Self {
        Self::CorruptIndex(err.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// Options / results
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance, passed to [`Engine::open`].
///
/// When opening an existing file only `dim` is checked against it; the
/// graph parameters are properties of the stored graph and are taken
/// from the header.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Vector dimension `D`.
    pub dim: usize,

    /// Physical capacity in slots. Slots are never reused during
    /// normal operation; only [`Engine::vacuum`] reclaims them.
    pub max_count: usize,

    /// Per-layer neighbour cap `M` (typical 16–32).
    pub max_neighbors: usize,

    /// Maximum layer count `L` (typical 5).
    pub max_layers: usize,

    /// Similarity metric. Cosine normalises vectors on ingress and on
    /// query; dot stores them as given.
    pub metric: Metric,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Stable external identifier of the document.
    pub id: Uuid,

    /// Similarity score against the query, higher is better.
    pub score: f32,

    /// Metadata payload with the zero padding stripped.
    pub metadata: Vec<u8>,
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Slots written so far (including tombstoned ones).
    pub count: i32,
    /// Tombstoned slots awaiting vacuum.
    pub deleted_count: i32,
    /// Live documents (`count - deleted_count`).
    pub live_count: i32,
    /// Physical capacity in slots.
    pub max_count: i32,
    /// Vector dimension.
    pub dim: i32,
    /// Entry-point slot, `-1` when the graph is empty.
    pub entry_point: i32,
    /// Recorded level of the entry point.
    pub entry_point_level: i32,
    /// Total backing-file size in bytes.
    pub file_size_bytes: usize,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

struct EngineInner {
    /// The memory-mapped backing file and its header.
    layout: Layout,

    /// DocID → slot for every live document.
    ids: IdIndex,

    /// Tombstoned slots, mirrored from the tombstone section.
    deleted: HashSet<u32>,

    /// Level sampler state for inserts.
    rng: StdRng,
}

/// The main vector store handle.
///
/// Thread-safe — can be cloned and shared across threads via the
/// internal `Arc<RwLock<_>>`.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens (or creates) an engine backed by the file at `path`.
    ///
    /// On an existing file the magic number and dimension are
    /// validated, older format versions are migrated, and the
    /// identifier index plus deleted-slot set are rebuilt by one
    /// linear scan of `[0, N)`. A duplicate DocID found during that
    /// scan fails with [`EngineError::CorruptIndex`].
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self, EngineError> {
        let layout_opts = LayoutOptions {
            dim: options.dim,
            max_count: options.max_count,
            max_neighbors: options.max_neighbors,
            max_layers: options.max_layers,
            metric: options.metric,
        };
        let layout = Layout::open(path, &layout_opts)?;
        let (ids, deleted) = IdIndex::rebuild(&layout)?;

        info!(
            path = %layout.path().display(),
            count = layout.header.count,
            live = ids.len(),
            deleted = deleted.len(),
            "opened engine"
        );

        let inner = EngineInner {
            layout,
            ids,
            deleted,
            rng: StdRng::from_os_rng(),
        };
        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Inserts a document and returns its identifier.
    ///
    /// When `external_id` is supplied and already live, nothing is
    /// written and the existing identifier is returned, making the call
    /// idempotent per id. Fails with [`EngineError::DbFull`] once every
    /// physical slot has been written.
    pub fn add(
        &self,
        vector: &[f32],
        metadata: &[u8],
        external_id: Option<Uuid>,
    ) -> Result<Uuid, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Self::add_inner(&mut inner, vector, metadata, external_id)
    }

    fn add_inner(
        inner: &mut EngineInner,
        vector: &[f32],
        metadata: &[u8],
        external_id: Option<Uuid>,
    ) -> Result<Uuid, EngineError> {
        let EngineInner {
            layout,
            ids,
            deleted,
            rng,
        } = inner;

        Self::check_dim(layout, vector)?;
        Self::check_metadata(metadata)?;

        // Deduplication: a live external id wins over the new payload.
        if let Some(id) = external_id
            && ids.contains(&id)
        {
            return Ok(id);
        }

        if layout.header.count >= layout.header.max_count {
            return Err(EngineError::DbFull {
                max_count: layout.header.max_count,
            });
        }

        let mut vector = vector.to_vec();
        if layout.metric() == Metric::Cosine {
            score::normalize(&mut vector);
        }

        let id = external_id.unwrap_or_else(Uuid::new_v4);
        let slot = layout.header.count as u32;
        let level = hnsw::assign_level(
            rng,
            layout.header.layer_probability,
            layout.header.max_layers as usize,
        );

        // Data first: the slot stays invisible until the header commit.
        layout.write_vector(slot, &vector);
        layout.write_metadata(slot, metadata);
        layout.write_doc_id(slot, id);
        layout.set_tombstone(slot, false);
        layout.clear_neighbor_lists(slot);

        hnsw::connect_new_node(layout, deleted, slot, &vector, level);

        layout.header.count += 1;
        layout.flush_header()?;
        ids.insert(id, slot);

        debug!(slot, level, %id, "added document");
        Ok(id)
    }

    /// Soft-deletes a document.
    ///
    /// Returns `Ok(false)` when the id is unknown (already gone); this
    /// is normal control flow, not an error. On success the slot is
    /// tombstoned, every live neighbour's list is rewired so searches
    /// never visit it, and the entry point migrates if it was the
    /// victim.
    pub fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Self::delete_inner(&mut inner, id)
    }

    fn delete_inner(inner: &mut EngineInner, id: Uuid) -> Result<bool, EngineError> {
        let EngineInner {
            layout,
            ids,
            deleted,
            ..
        } = inner;

        let Some(slot) = ids.get(&id) else {
            return Ok(false);
        };

        // Tombstone first: from here on searches skip the slot even if
        // the rewiring below is cut short by a crash.
        layout.set_tombstone(slot, true);
        deleted.insert(slot);
        ids.remove(&id);

        hnsw::unlink(layout, deleted, slot);

        if layout.header.entry_point == slot as i32 {
            Self::migrate_entry_point(layout, deleted);
        }

        layout.header.deleted_count += 1;
        layout.flush_header()?;

        debug!(slot, %id, "deleted document");
        Ok(true)
    }

    /// Selects a replacement entry point after its deletion: the first
    /// non-tombstoned slot, recorded at level 0. Conservative but
    /// always correct; the next higher-level insert re-promotes.
    fn migrate_entry_point(layout: &mut Layout, deleted: &HashSet<u32>) {
        let count = layout.header.count as u32;
        let replacement = (0..count).find(|slot| !deleted.contains(slot));
        match replacement {
            Some(slot) => {
                layout.header.entry_point = slot as i32;
                layout.header.entry_point_level = 0;
                debug!(slot, "migrated entry point");
            }
            None => {
                layout.header.entry_point = NO_NEIGHBOR;
                layout.header.entry_point_level = 0;
            }
        }
    }

    /// Rewrites a document's metadata in place.
    ///
    /// Returns `Ok(false)` for unknown ids. The vector, slot, and graph
    /// wiring are untouched.
    pub fn update_metadata(&self, id: Uuid, metadata: &[u8]) -> Result<bool, EngineError> {
        Self::check_metadata(metadata)?;
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let Some(slot) = inner.ids.get(&id) else {
            return Ok(false);
        };
        inner.layout.write_metadata(slot, metadata);
        Ok(true)
    }

    /// Replaces a document's vector, keeping its identifier and
    /// metadata.
    ///
    /// Implemented as soft-delete plus re-insert into a fresh slot, so
    /// it needs a free slot: at physical capacity it fails with
    /// [`EngineError::DbFull`] even when tombstones exist (capacity is
    /// physical; run [`Engine::vacuum`] and retry).
    pub fn update_vector(&self, id: Uuid, vector: &[f32]) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Self::update_inner(&mut inner, id, Some(vector), None)
    }

    /// Updates a document's vector and/or metadata under a stable id.
    ///
    /// - vector present: soft-delete + re-insert (same id, new slot);
    /// - metadata only: in-place rewrite;
    /// - neither: reports whether the id is live.
    pub fn update(
        &self,
        id: Uuid,
        vector: Option<&[f32]>,
        metadata: Option<&[u8]>,
    ) -> Result<bool, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Self::update_inner(&mut inner, id, vector, metadata)
    }

    fn update_inner(
        inner: &mut EngineInner,
        id: Uuid,
        vector: Option<&[f32]>,
        metadata: Option<&[u8]>,
    ) -> Result<bool, EngineError> {
        if let Some(meta) = metadata {
            Self::check_metadata(meta)?;
        }

        let Some(slot) = inner.ids.get(&id) else {
            return Ok(false);
        };

        let Some(vector) = vector else {
            if let Some(meta) = metadata {
                inner.layout.write_metadata(slot, meta);
            }
            return Ok(true);
        };

        Self::check_dim(&inner.layout, vector)?;

        // The re-insert needs a fresh physical slot; reject before
        // deleting anything so a full engine stays unchanged.
        if inner.layout.header.count >= inner.layout.header.max_count {
            return Err(EngineError::DbFull {
                max_count: inner.layout.header.max_count,
            });
        }

        let meta = match metadata {
            Some(meta) => meta.to_vec(),
            None => Self::trim_padding(inner.layout.metadata(slot)).to_vec(),
        };

        Self::delete_inner(inner, id)?;
        Self::add_inner(inner, vector, &meta, Some(id))?;
        Ok(true)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Approximate nearest-neighbour search with the default beam
    /// width and no metadata filter.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>, EngineError> {
        self.search_with(query, top_k, DEFAULT_EF_SEARCH, None)
    }

    /// Approximate nearest-neighbour search.
    ///
    /// Descends greedily from the entry point through the upper
    /// layers, then runs the base-layer beam with
    /// `ef = max(top_k, ef_search)`. Tombstoned slots never appear in
    /// the result; `predicate`, when given, sees each candidate's
    /// metadata payload and can veto it. Results are sorted by score
    /// descending.
    pub fn search_with(
        &self,
        query: &[f32],
        top_k: usize,
        ef_search: usize,
        predicate: Option<&dyn Fn(&[u8]) -> bool>,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        let EngineInner {
            layout, deleted, ..
        } = &*inner;

        Self::check_dim(layout, query)?;
        if top_k == 0 || layout.header.entry_point == NO_NEIGHBOR {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        if layout.metric() == Metric::Cosine {
            score::normalize(&mut query);
        }

        let entry = layout.header.entry_point as u32;
        let entry_level = layout.header.entry_point_level as usize;
        let seed = if entry_level >= 1 {
            hnsw::descend(layout, deleted, &query, entry, entry_level, 1)
        } else {
            entry
        };

        let ef = top_k.max(ef_search);
        let found = hnsw::search_layer_base(layout, deleted, &query, seed, 0, ef);

        let mut out = Vec::with_capacity(top_k);
        for Scored { slot, score } in found {
            if deleted.contains(&slot) {
                continue;
            }
            let metadata = Self::trim_padding(layout.metadata(slot));
            if let Some(pred) = predicate
                && !pred(metadata)
            {
                continue;
            }
            out.push(SearchResult {
                id: layout.doc_id(slot),
                score,
                metadata: metadata.to_vec(),
            });
            if out.len() == top_k {
                break;
            }
        }
        Ok(out)
    }

    /// Exact nearest-neighbour search by parallel linear scan.
    ///
    /// Scores every live slot against the query, fanning the vector
    /// section out across worker threads (the shared lock holds the
    /// mapping stable; workers never mutate). Useful as a recall
    /// baseline and for small or heavily deleted indices.
    pub fn search_linear(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        let EngineInner {
            layout, deleted, ..
        } = &*inner;

        Self::check_dim(layout, query)?;
        let count = layout.header.count as u32;
        if top_k == 0 || count == 0 {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        if layout.metric() == Metric::Cosine {
            score::normalize(&mut query);
        }
        let query = &query[..];

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(count.div_ceil(1024).max(1) as usize);
        let chunk = count.div_ceil(workers as u32);

        let mut merged = crossbeam::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for w in 0..workers as u32 {
                let start = w * chunk;
                let end = ((w + 1) * chunk).min(count);
                handles.push(scope.spawn(move |_| {
                    let mut top: Vec<Scored> = Vec::with_capacity(top_k + 1);
                    for slot in start..end {
                        if deleted.contains(&slot) {
                            continue;
                        }
                        let score = score::dot(query, layout.vector(slot));
                        let full = top.len() >= top_k;
                        if full && top.last().is_none_or(|worst| score <= worst.score) {
                            continue;
                        }
                        if full {
                            top.pop();
                        }
                        top.push(Scored { slot, score });
                        top.sort_unstable_by(|a, b| b.cmp(a));
                    }
                    top
                }));
            }
            let mut merged: Vec<Scored> = Vec::with_capacity(workers * top_k);
            for handle in handles {
                merged.extend(handle.join().unwrap_or_default());
            }
            merged
        })
        .map_err(|_| EngineError::Internal("linear scan worker panicked".into()))?;

        merged.sort_unstable_by(|a, b| b.cmp(a));
        merged.truncate(top_k);

        Ok(merged
            .into_iter()
            .map(|Scored { slot, score }| SearchResult {
                id: layout.doc_id(slot),
                score,
                metadata: Self::trim_padding(layout.metadata(slot)).to_vec(),
            })
            .collect())
    }

    /// Fetches a live document's vector and metadata by identifier.
    pub fn get_by_id(&self, id: Uuid) -> Result<Option<(Vec<f32>, Vec<u8>)>, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        Ok(inner.ids.get(&id).map(|slot| {
            (
                inner.layout.vector(slot).to_vec(),
                Self::trim_padding(inner.layout.metadata(slot)).to_vec(),
            )
        }))
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------------------------------

    /// Rebuilds the backing file, dropping tombstoned slots.
    ///
    /// Live documents are re-inserted into a fresh file at
    /// `<path>.vacuum` with their original identifiers, the file is
    /// atomically renamed over the original, and the in-memory state is
    /// swapped. On failure the original file is untouched. Returns the
    /// number of live documents carried over.
    pub fn vacuum(&self) -> Result<u32, EngineError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let path = inner.layout.path().to_path_buf();
        let tmp_path = Self::vacuum_path(&path);
        if tmp_path.exists() {
            // Leftover from an interrupted vacuum; the original is
            // still authoritative.
            fs::remove_file(&tmp_path)?;
        }

        let mut fresh = match Self::vacuum_build(&inner, &tmp_path) {
            Ok(fresh) => fresh,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(err);
            }
        };

        fresh.layout.rename_to(&path)?;
        let live = fresh.ids.len() as u32;
        let reclaimed = inner.deleted.len();
        *inner = fresh;

        info!(live, reclaimed, "vacuum complete");
        Ok(live)
    }

    /// Builds the compacted replacement engine state at `tmp_path`.
    fn vacuum_build(inner: &EngineInner, tmp_path: &Path) -> Result<EngineInner, EngineError> {
        let header = &inner.layout.header;
        let opts = LayoutOptions {
            dim: header.dim as usize,
            max_count: header.max_count as usize,
            max_neighbors: header.max_neighbors as usize,
            max_layers: header.max_layers as usize,
            metric: inner.layout.metric(),
        };

        let mut fresh = EngineInner {
            layout: Layout::open(tmp_path, &opts)?,
            ids: IdIndex::new(),
            deleted: HashSet::new(),
            rng: StdRng::from_os_rng(),
        };

        for slot in 0..header.count as u32 {
            if inner.deleted.contains(&slot) {
                continue;
            }
            let vector = inner.layout.vector(slot).to_vec();
            let metadata = Self::trim_padding(inner.layout.metadata(slot)).to_vec();
            let id = inner.layout.doc_id(slot);
            Self::add_inner(&mut fresh, &vector, &metadata, Some(id))?;
        }

        fresh.layout.sync()?;
        Ok(fresh)
    }

    fn vacuum_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_os_string();
        os.push(".vacuum");
        PathBuf::from(os)
    }

    /// Imports every live document from `other` whose identifier is
    /// not already present here, preserving identifiers. Returns the
    /// number imported; propagates [`EngineError::DbFull`] once this
    /// engine runs out of slots (documents imported before that point
    /// remain committed).
    pub fn sync_from(&self, other: &Engine) -> Result<u32, EngineError> {
        // Snapshot the source under its read lock, then release it
        // before taking our write lock so two engines never hold each
        // other's locks.
        let docs = {
            let src = other
                .inner
                .read()
                .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
            let mut docs = Vec::with_capacity(src.ids.len());
            for slot in 0..src.layout.header.count as u32 {
                if src.deleted.contains(&slot) {
                    continue;
                }
                docs.push((
                    src.layout.doc_id(slot),
                    src.layout.vector(slot).to_vec(),
                    Self::trim_padding(src.layout.metadata(slot)).to_vec(),
                ));
            }
            docs
        };

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;

        let mut imported = 0u32;
        for (id, vector, metadata) in docs {
            if inner.ids.contains(&id) {
                continue;
            }
            Self::add_inner(&mut inner, &vector, &metadata, Some(id))?;
            imported += 1;
        }

        info!(imported, "synchronized from peer engine");
        Ok(imported)
    }

    /// Flushes the whole mapping and fsyncs the backing file.
    pub fn flush(&self) -> Result<(), EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        inner.layout.sync()?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Introspection
    // --------------------------------------------------------------------------------------------

    /// Slots written so far, including tombstoned ones.
    pub fn count(&self) -> Result<i32, EngineError> {
        self.read_header(|h| h.count)
    }

    /// Tombstoned slots awaiting vacuum.
    pub fn deleted_count(&self) -> Result<i32, EngineError> {
        self.read_header(|h| h.deleted_count)
    }

    /// Entry-point slot, `-1` when the graph is empty.
    pub fn entry_point(&self) -> Result<i32, EngineError> {
        self.read_header(|h| h.entry_point)
    }

    /// Number of live documents.
    pub fn len(&self) -> Result<usize, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Ok(inner.ids.len())
    }

    /// Whether no documents are live.
    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len()? == 0)
    }

    /// Cheap structural self-check.
    ///
    /// Verifies the header invariants (`N ≤ MaxCount`,
    /// `deleted ≤ N`), that the identifier index covers exactly the
    /// live slots, and that the entry point is a live in-range slot
    /// whenever any document is live. Returns `false` instead of
    /// failing so callers can poll it.
    pub fn is_healthy(&self) -> bool {
        let Ok(inner) = self.inner.read() else {
            return false;
        };
        let h = &inner.layout.header;

        if h.count > h.max_count || h.deleted_count > h.count {
            return false;
        }
        if inner.ids.len() != (h.count - h.deleted_count) as usize {
            return false;
        }
        let live = h.count - h.deleted_count;
        if live > 0 {
            if h.entry_point < 0 || h.entry_point >= h.count {
                return false;
            }
            if inner.deleted.contains(&(h.entry_point as u32)) {
                return false;
            }
        }
        true
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        let h = &inner.layout.header;
        Ok(EngineStats {
            count: h.count,
            deleted_count: h.deleted_count,
            live_count: h.count - h.deleted_count,
            max_count: h.max_count,
            dim: h.dim,
            entry_point: h.entry_point,
            entry_point_level: h.entry_point_level,
            file_size_bytes: inner.layout.file_len(),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> Result<PathBuf, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Ok(inner.layout.path().to_path_buf())
    }

    // --------------------------------------------------------------------------------------------
    // Helpers
    // --------------------------------------------------------------------------------------------

    fn read_header<T>(
        &self,
        f: impl FnOnce(&crate::layout::FileHeader) -> T,
    ) -> Result<T, EngineError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))?;
        Ok(f(&inner.layout.header))
    }

    fn check_dim(layout: &Layout, vector: &[f32]) -> Result<(), EngineError> {
        let expected = layout.header.dim as usize;
        if vector.len() != expected {
            return Err(EngineError::DimMismatch {
                expected,
                got: vector.len(),
            });
        }
        Ok(())
    }

    fn check_metadata(metadata: &[u8]) -> Result<(), EngineError> {
        if metadata.len() > METADATA_SIZE {
            return Err(EngineError::MetadataTooLarge {
                len: metadata.len(),
                max: METADATA_SIZE,
            });
        }
        Ok(())
    }

    /// Strips the zero padding from a fixed-size metadata slot.
    fn trim_padding(meta: &[u8]) -> &[u8] {
        let end = meta.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        &meta[..end]
    }
}
