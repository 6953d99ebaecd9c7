//! Engine tuning knobs.

use std::str::FromStr;

use crate::{LoopError, Result};

/// Default upper bound on `slice length * output length` for the
/// small-aggregation reduction kernel.
pub const SMALL_AGGREGATION_THRESHOLD: usize = 1024;

/// Minimum number of elements to justify multi-threaded execution.
pub const MIN_ELEMENTS_PER_TASK: usize = 1 << 15;

/// Minimum number of whole slices handed to one reduction task.
pub const MIN_SLICES_PER_TASK: usize = 8;

const ENV_SMALL_AGG_THRESHOLD: &str = "STRIDED_LOOPS_SMALL_AGG_THRESHOLD";
const ENV_MIN_ELEMENTS_PER_TASK: &str = "STRIDED_LOOPS_MIN_ELEMENTS_PER_TASK";
const ENV_MIN_SLICES_PER_TASK: &str = "STRIDED_LOOPS_MIN_SLICES_PER_TASK";
const ENV_MAX_WORKERS: &str = "STRIDED_LOOPS_MAX_WORKERS";

/// Classification threshold and parallel granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Slice reductions with `slice length * output length` at or below this
    /// may use [`LoopKind::SmallArr2DX`](crate::LoopKind::SmallArr2DX).
    pub small_aggregation_threshold: usize,
    /// Element-wise loops split work only in chunks of at least this many elements.
    pub min_elements_per_task: usize,
    /// Reductions hand out at least this many slices per task.
    pub min_slices_per_task: usize,
    /// Cap on concurrently used workers; `None` uses whatever the pool offers.
    pub max_workers: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            small_aggregation_threshold: SMALL_AGGREGATION_THRESHOLD,
            min_elements_per_task: MIN_ELEMENTS_PER_TASK,
            min_slices_per_task: MIN_SLICES_PER_TASK,
            max_workers: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STRIDED_LOOPS_*` environment variables.
    ///
    /// # Errors
    /// [`LoopError::InvalidConfig`] if a variable is set but does not parse,
    /// or the resulting configuration fails [`EngineConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = read_env(ENV_SMALL_AGG_THRESHOLD)? {
            config.small_aggregation_threshold = v;
        }
        if let Some(v) = read_env(ENV_MIN_ELEMENTS_PER_TASK)? {
            config.min_elements_per_task = v;
        }
        if let Some(v) = read_env(ENV_MIN_SLICES_PER_TASK)? {
            config.min_slices_per_task = v;
        }
        if let Some(v) = read_env(ENV_MAX_WORKERS)? {
            config.max_workers = Some(v);
        }
        config.validate()?;
        tracing::debug!(?config, "engine configuration loaded from environment");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_elements_per_task == 0 {
            return Err(LoopError::InvalidConfig(
                "min_elements_per_task must be positive".into(),
            ));
        }
        if self.min_slices_per_task == 0 {
            return Err(LoopError::InvalidConfig(
                "min_slices_per_task must be positive".into(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(LoopError::InvalidConfig("max_workers must be positive".into()));
        }
        Ok(())
    }

    /// Effective worker cap given what a pool offers.
    pub(crate) fn worker_limit(&self, available: usize) -> usize {
        self.max_workers.map_or(available, |m| m.min(available)).max(1)
    }
}

fn read_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LoopError::InvalidConfig(format!("{name}={raw:?} is not a valid number"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(LoopError::InvalidConfig(format!("{name} is not valid unicode")))
        }
    }
}
