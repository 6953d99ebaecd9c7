//! Worker capability and task partitioning.
//!
//! Kernels never talk to a thread pool directly. They split their output into
//! independent tasks and hand a task body to a [`Workers`] implementation,
//! which runs every task index exactly once.

use std::ops::Range;
#[cfg(feature = "parallel")]
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "parallel")]
use crate::{LoopError, Result};

/// "Run N independent tasks using up to T workers".
pub trait Workers: Sync {
    /// Upper bound on tasks that can make progress at the same time.
    fn max_workers(&self) -> usize;

    /// Call `task(i)` exactly once for each `i` in `0..num_tasks`, in any
    /// order and on any worker, returning after all calls finished.
    fn run(&self, num_tasks: usize, task: &(dyn Fn(usize) + Sync));
}

/// Runs every task on the calling thread, in index order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Workers for Sequential {
    fn max_workers(&self) -> usize {
        1
    }

    fn run(&self, num_tasks: usize, task: &(dyn Fn(usize) + Sync)) {
        for i in 0..num_tasks {
            task(i);
        }
    }
}

/// Rayon-backed workers: the global pool or an owned [`rayon::ThreadPool`].
#[cfg(feature = "parallel")]
#[derive(Debug, Clone, Default)]
pub struct RayonWorkers {
    pool: Option<Arc<rayon::ThreadPool>>,
}

#[cfg(feature = "parallel")]
impl RayonWorkers {
    /// Use rayon's global pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Build a dedicated pool with `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("strided-loops-{i}"))
            .build()
            .map_err(|e| LoopError::InvalidConfig(format!("cannot build thread pool: {e}")))?;
        Ok(Self::from_pool(Arc::new(pool)))
    }

    pub fn from_pool(pool: Arc<rayon::ThreadPool>) -> Self {
        Self { pool: Some(pool) }
    }
}

#[cfg(feature = "parallel")]
impl Workers for RayonWorkers {
    fn max_workers(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn run(&self, num_tasks: usize, task: &(dyn Fn(usize) + Sync)) {
        match num_tasks {
            0 => {}
            1 => task(0),
            _ => match &self.pool {
                Some(pool) => pool.install(|| (0..num_tasks).into_par_iter().for_each(task)),
                None => (0..num_tasks).into_par_iter().for_each(task),
            },
        }
    }
}

/// Wrapper to make raw pointers Send + Sync for use in parallel closures.
///
/// Safety: callers guarantee that tasks sharing a `SendPtr` write disjoint
/// elements and that the buffer outlives every task.
#[derive(Debug)]
pub(crate) struct SendPtr<T>(pub(crate) *mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    #[inline]
    pub(crate) fn as_ptr(self) -> *mut T {
        self.0
    }
}

/// Number of tasks for `units` of work, each task getting at least
/// `min_units` (except when there is only one task).
pub(crate) fn plan_tasks(units: usize, min_units: usize, max_workers: usize) -> usize {
    if units == 0 {
        return 0;
    }
    (units / min_units.max(1)).clamp(1, max_workers.max(1))
}

/// Balanced `task`-th of `tasks` contiguous pieces of `0..units`.
#[inline]
pub(crate) fn chunk_range(units: usize, tasks: usize, task: usize) -> Range<usize> {
    let base = units / tasks;
    let extra = units % tasks;
    let start = task * base + task.min(extra);
    let len = base + usize::from(task < extra);
    start..start + len
}
