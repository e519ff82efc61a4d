//! # VelumDB
//!
//! An embedded, **single-file**, in-process approximate-nearest-neighbor
//! vector store with stable external document identifiers. Persists
//! high-dimensional `f32` vectors together with a small metadata payload
//! and serves sub-linear similarity search through a **Hierarchical
//! Navigable Small World (HNSW)** graph.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Engine                           │
//! │  ┌───────────┐  ┌────────────┐  ┌────────────────────┐  │
//! │  │ Identifier│  │   HNSW     │  │ Tombstones +       │  │
//! │  │ Index     │  │   graph    │  │ graph repair       │  │
//! │  │ (in mem)  │  │            │  │                    │  │
//! │  └─────┬─────┘  └─────┬──────┘  └─────────┬──────────┘  │
//! │        │              │                   │             │
//! │  ┌─────┴──────────────┴───────────────────┴──────────┐  │
//! │  │            Layout (one mmap'd file)               │  │
//! │  │  header │ vectors │ graph │ metadata │ ids │ tomb │  │
//! │  └───────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Public surface — open, add, search, update, delete, vacuum |
//! | [`layout`] | On-disk format: header, section offsets, typed slot access, migration |
//! | [`hnsw`] | Layered graph construction, traversal, and delete-time repair |
//! | [`idmap`] | DocID → slot index, rebuilt on open with duplicate detection |
//! | [`score`] | SIMD fused-multiply-add dot product and L2 normalisation |
//!
//! ## Key Features
//!
//! - **Single backing file** — all durable state lives in one
//!   memory-mapped file with constant-time per-slot access.
//! - **Stable identifiers** — every document keeps its 128-bit external
//!   id across updates and vacuum rebuilds.
//! - **Soft deletes with eager repair** — tombstoned slots are unlinked
//!   from every neighbour list the moment they die, so searches never
//!   visit them.
//! - **Crash safety without journaling** — the header is written last in
//!   every mutating operation; partial writes leave orphans that are
//!   invisible and reclaimed by the next add or vacuum.
//! - **Concurrent readers, one writer** — a single reader-writer lock
//!   over the whole engine; handles clone cheaply across threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use velumdb::engine::{Engine, EngineOptions};
//! use velumdb::score::Metric;
//!
//! let engine = Engine::open(
//!     "/tmp/my_vectors.vlm",
//!     EngineOptions {
//!         dim: 4,
//!         max_count: 10_000,
//!         max_neighbors: 16,
//!         max_layers: 5,
//!         metric: Metric::Cosine,
//!     },
//! )
//! .unwrap();
//!
//! // Insert
//! let id = engine.add(&[0.1, 0.2, 0.3, 0.4], b"doc-1", None).unwrap();
//!
//! // Search
//! let hits = engine.search(&[0.1, 0.2, 0.3, 0.4], 5).unwrap();
//! assert_eq!(hits[0].id, id);
//!
//! // Update and delete under the same id
//! engine.update_metadata(id, b"doc-1-v2").unwrap();
//! engine.delete(id).unwrap();
//! ```

pub mod engine;
pub mod hnsw;
pub mod idmap;
pub mod layout;
pub mod score;

pub use engine::{Engine, EngineError, EngineOptions, EngineStats, SearchResult};
pub use score::Metric;
