//! Identifier Index
//!
//! In-memory map from the 128-bit external document identifier to the
//! physical slot that currently holds the document. The map is the
//! authority on which documents are **live**: it contains exactly the
//! non-tombstoned slots in `[0, N)` and nothing else.
//!
//! The map is not persisted. On open it is rebuilt by one linear scan
//! of the tombstone and DocID sections, which is dominated by
//! sequential reads of the mapping. A duplicate identifier found during
//! that scan means a prior writer misbehaved and is surfaced as an
//! error rather than silently resolved.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::layout::Layout;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced while rebuilding the index from a backing file.
#[derive(Debug, Error)]
pub enum IdIndexError {
    /// Two live slots carry the same document identifier.
    #[error("duplicate document id {id} in slots {first_slot} and {second_slot}")]
    Duplicate {
        /// The colliding identifier.
        id: Uuid,
        /// Slot that claimed the identifier first.
        first_slot: u32,
        /// Slot found carrying the same identifier later in the scan.
        second_slot: u32,
    },
}

// ------------------------------------------------------------------------------------------------
// IdIndex
// ------------------------------------------------------------------------------------------------

/// Map from external document identifier to physical slot.
#[derive(Debug, Default)]
pub struct IdIndex {
    map: HashMap<Uuid, u32>,
}

impl IdIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the index from a backing file.
    ///
    /// Scans slots `[0, N)` once: tombstoned slots land in the returned
    /// deleted set, live slots are inserted into the map. Returns
    /// [`IdIndexError::Duplicate`] if two live slots carry the same id.
    pub fn rebuild(layout: &Layout) -> Result<(Self, HashSet<u32>), IdIndexError> {
        let count = layout.header.count as u32;
        let mut map = HashMap::with_capacity(count as usize);
        let mut deleted = HashSet::new();

        for slot in 0..count {
            if layout.is_tombstoned(slot) {
                deleted.insert(slot);
                continue;
            }
            let id = layout.doc_id(slot);
            if let Some(first_slot) = map.insert(id, slot) {
                return Err(IdIndexError::Duplicate {
                    id,
                    first_slot,
                    second_slot: slot,
                });
            }
        }

        debug!(
            live = map.len(),
            deleted = deleted.len(),
            "rebuilt identifier index"
        );
        Ok((Self { map }, deleted))
    }

    /// Slot currently holding `id`, if the document is live.
    #[inline]
    pub fn get(&self, id: &Uuid) -> Option<u32> {
        self.map.get(id).copied()
    }

    /// Whether `id` is live.
    #[inline]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.map.contains_key(id)
    }

    /// Registers `id` at `slot`. Returns `false` (and leaves the
    /// existing mapping intact) if the id is already present.
    pub fn insert(&mut self, id: Uuid, slot: u32) -> bool {
        match self.map.entry(id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(slot);
                true
            }
        }
    }

    /// Re-points `id` at a new slot, returning the previous slot.
    /// Used when a vector update re-inserts under the same identifier.
    pub fn reassign(&mut self, id: Uuid, slot: u32) -> Option<u32> {
        self.map.insert(id, slot)
    }

    /// Removes `id`, returning the slot it occupied.
    pub fn remove(&mut self, id: &Uuid) -> Option<u32> {
        self.map.remove(id)
    }

    /// Number of live documents.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no documents are live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
