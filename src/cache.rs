//! Descriptor-keyed cache of slice offset tables.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap as HashMap;

use crate::shape::ShapeDescriptor;
use crate::tad::{compute_slice_pack, SlicePack, TadDescriptor};
use crate::Result;

/// Counters describing how a [`SliceOffsetCache`] has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the table.
    pub hits: u64,
    /// Lookups that computed a new pack.
    pub misses: u64,
    /// Packs currently stored.
    pub entries: usize,
}

/// Thread-safe map from [`TadDescriptor`] to its [`SlicePack`].
///
/// Each distinct descriptor is computed at most once. A single lock covers
/// both the lookup and the insertion, so concurrent callers asking for the
/// same descriptor block until the first computation is visible and then
/// share its result. Entries are never evicted.
///
/// The cache is an ordinary value: construct one, wrap it in an [`Arc`] and
/// hand it to whatever needs it.
#[derive(Debug, Default)]
pub struct SliceOffsetCache {
    table: Mutex<HashMap<TadDescriptor, Arc<SlicePack>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SliceOffsetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pack for `desc`, computing and storing it on first use.
    pub fn get_or_compute(&self, desc: &TadDescriptor) -> Result<Arc<SlicePack>> {
        let mut table = self.lock();
        if let Some(pack) = table.get(desc) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(descriptor = %desc, "slice pack cache hit");
            return Ok(Arc::clone(pack));
        }

        let pack = Arc::new(compute_slice_pack(desc)?);
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            descriptor = %desc,
            num_slices = pack.num_slices(),
            slice_length = pack.slice_length(),
            entries = table.len() + 1,
            "computed slice pack"
        );
        table.insert(desc.clone(), Arc::clone(&pack));
        Ok(pack)
    }

    /// Build the descriptor and look it up in one call.
    pub fn slices_for(
        &self,
        shape: &ShapeDescriptor,
        axes: &[usize],
        keep_unities: bool,
    ) -> Result<Arc<SlicePack>> {
        let desc = TadDescriptor::new(shape.clone(), axes, keep_unities)?;
        self.get_or_compute(&desc)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    // Packs are inserted fully built, so a panic elsewhere cannot leave the
    // table half-updated.
    fn lock(&self) -> MutexGuard<'_, HashMap<TadDescriptor, Arc<SlicePack>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
