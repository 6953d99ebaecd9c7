//! Engine facade: cache lookup, classification and dispatch in one call.

use std::fmt;
use std::sync::Arc;

use crate::cache::SliceOffsetCache;
use crate::config::EngineConfig;
use crate::loop_kind::LoopKind;
use crate::loops::{
    run_element_wise, run_full_reduction, run_index_reduction, run_slice_reduction, run_transform,
    run_transform_in_place, Launch, Operand, OperandMut,
};
use crate::ops::{IndexReduceOp, ReduceOp};
use crate::threading::{Sequential, Workers};
use crate::Result;

/// Bundles an injected [`SliceOffsetCache`], an [`EngineConfig`] and a
/// [`Workers`] capability.
///
/// Engines are cheap to clone and share their cache and workers.
#[derive(Clone)]
pub struct LoopEngine {
    cache: Arc<SliceOffsetCache>,
    config: EngineConfig,
    workers: Arc<dyn Workers + Send>,
}

impl LoopEngine {
    /// # Errors
    /// [`LoopError::InvalidConfig`](crate::LoopError::InvalidConfig) if `config`
    /// fails validation.
    pub fn new(
        cache: Arc<SliceOffsetCache>,
        config: EngineConfig,
        workers: Arc<dyn Workers + Send>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            config,
            workers,
        })
    }

    /// Default configuration, everything on the calling thread.
    pub fn sequential(cache: Arc<SliceOffsetCache>) -> Self {
        Self {
            cache,
            config: EngineConfig::default(),
            workers: Arc::new(Sequential),
        }
    }

    /// Rayon's global pool with the given configuration.
    #[cfg(feature = "parallel")]
    pub fn with_rayon(cache: Arc<SliceOffsetCache>, config: EngineConfig) -> Result<Self> {
        Self::new(cache, config, Arc::new(crate::threading::RayonWorkers::global()))
    }

    pub fn cache(&self) -> &Arc<SliceOffsetCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn launch(&self) -> Launch<'_> {
        Launch::new(&self.config, &*self.workers)
    }

    /// `z = f(x, y)` element-wise.
    pub fn element_wise<X, Y, Z, F>(
        &self,
        x: Operand<'_, X>,
        y: Operand<'_, Y>,
        z: OperandMut<'_, Z>,
        f: F,
    ) -> Result<LoopKind>
    where
        X: Copy + Sync,
        Y: Copy + Sync,
        Z: Send,
        F: Fn(X, Y) -> Z + Sync,
    {
        run_element_wise(&self.launch(), x, y, z, f)
    }

    /// `z = f(x)` element-wise.
    pub fn transform<X, Z, F>(
        &self,
        x: Operand<'_, X>,
        z: OperandMut<'_, Z>,
        f: F,
    ) -> Result<LoopKind>
    where
        X: Copy + Sync,
        Z: Send,
        F: Fn(X) -> Z + Sync,
    {
        run_transform(&self.launch(), x, z, f)
    }

    /// `z = f(z)` element-wise.
    pub fn transform_in_place<T, F>(&self, z: OperandMut<'_, T>, f: F) -> Result<LoopKind>
    where
        T: Copy + Send + Sync,
        F: Fn(T) -> T + Sync,
    {
        run_transform_in_place(&self.launch(), z, f)
    }

    /// Reduce `x` along `axes` into `z`, one element per slice.
    ///
    /// `z` must hold as many elements as there are slices; slice `k` lands
    /// in element `k` of `z`.
    pub fn reduce_along_axes<X, Z, O>(
        &self,
        x: Operand<'_, X>,
        axes: &[usize],
        z: OperandMut<'_, Z>,
        op: &O,
    ) -> Result<LoopKind>
    where
        X: Copy + Sync,
        Z: Copy + Send,
        O: ReduceOp<X, Z>,
    {
        let pack = self.cache.slices_for(x.shape(), axes, false)?;
        run_slice_reduction(&self.launch(), x, &pack, z, op)
    }

    /// Position of the element selected by `op` within each slice along `axes`.
    pub fn index_reduce_along_axes<X, O>(
        &self,
        x: Operand<'_, X>,
        axes: &[usize],
        z: OperandMut<'_, i64>,
        op: &O,
    ) -> Result<LoopKind>
    where
        X: Copy + Sync,
        O: IndexReduceOp<X>,
    {
        let pack = self.cache.slices_for(x.shape(), axes, false)?;
        run_index_reduction(&self.launch(), x, &pack, z, op)
    }

    /// Fold all of `x` into one value.
    pub fn reduce_all<X, Z, O>(&self, x: Operand<'_, X>, op: &O) -> Z
    where
        X: Copy + Sync,
        Z: Copy,
        O: ReduceOp<X, Z>,
    {
        run_full_reduction(x, op)
    }
}

impl Default for LoopEngine {
    fn default() -> Self {
        Self::sequential(Arc::new(SliceOffsetCache::new()))
    }
}

impl fmt::Debug for LoopEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopEngine")
            .field("cache", &self.cache.stats())
            .field("config", &self.config)
            .field("max_workers", &self.workers.max_workers())
            .finish()
    }
}
