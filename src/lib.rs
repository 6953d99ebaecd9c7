//! Cached sub-array offset tables and shape-classified loop kernels for
//! N-dimensional arrays whose layout is only known at run time.
//!
//! The crate is built around two engines:
//!
//! - A descriptor-keyed [`SliceOffsetCache`] that maps "array layout + axes a
//!   slice spans" ([`TadDescriptor`]) to a [`SlicePack`]: one shared slice
//!   shape plus the base offset of every slice in the original buffer. Each
//!   distinct descriptor is computed once and then served from memory.
//! - A [`LoopKind`] classifier and the family of loop kernels it selects from.
//!   Every specialized kernel produces exactly the same output as the general
//!   coordinate-decoding fallback ([`LoopKind::Common`]).
//!
//! # Core Types
//!
//! - [`ShapeDescriptor`]: rank, extents, strides, [`Order`] and the derived
//!   element-wise stride of one array
//! - [`TadDescriptor`] / [`SlicePack`] / [`SliceOffsetCache`]: slice offset tables
//! - [`Operand`] / [`OperandMut`]: a buffer paired with its validated layout
//! - [`ReduceOp`] / [`IndexReduceOp`]: the operation contract consumed by the
//!   reduction kernels
//! - [`Workers`]: the "run N independent tasks on up to T workers" capability
//!
//! # Entry Points
//!
//! - [`run_element_wise`]: `z = f(x, y)` over three arrays
//! - [`run_transform`]: `z = f(x)` over two arrays
//! - [`run_slice_reduction`]: one folded value per slice of a [`SlicePack`]
//! - [`run_index_reduction`]: position of the extremal element per slice
//! - [`run_full_reduction`]: fold a whole array into one value
//! - [`LoopEngine`]: bundles cache, configuration and workers and performs
//!   lookup, classification and dispatch in one call
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strided_loops::{
//!     LoopEngine, Operand, OperandMut, ShapeDescriptor, SliceOffsetCache, Sum,
//! };
//!
//! let engine = LoopEngine::sequential(Arc::new(SliceOffsetCache::new()));
//!
//! // Sum a row-major (2, 3) matrix along axis 1.
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let x_shape = ShapeDescriptor::row_major(&[2, 3]).unwrap();
//! let z_shape = ShapeDescriptor::row_major(&[2]).unwrap();
//! let mut out = vec![0.0; 2];
//!
//! let x = Operand::new(&x_shape, &data).unwrap();
//! let z = OperandMut::new(&z_shape, &mut out).unwrap();
//! engine.reduce_along_axes(x, &[1], z, &Sum::new()).unwrap();
//!
//! assert_eq!(out, vec![6.0, 15.0]);
//! ```

mod cache;
mod config;
mod engine;
mod loop_kind;
pub mod loops;
mod ops;
mod shape;
mod tad;
mod threading;

// ============================================================================
// Layout descriptors
// ============================================================================
pub use shape::{NarrowShape, Order, ShapeDescriptor};

// ============================================================================
// Slice offset tables
// ============================================================================
pub use cache::{CacheStats, SliceOffsetCache};
pub use tad::{SlicePack, TadDescriptor};

// ============================================================================
// Classification and execution
// ============================================================================
pub use loop_kind::{
    classify_loop, classify_slice_reduction, classify_x, classify_xyz, classify_xz, LoopKind,
};
pub use loops::{
    run_element_wise, run_full_reduction, run_index_reduction, run_slice_reduction,
    run_transform, run_transform_in_place, Launch, Operand, OperandMut,
};

// ============================================================================
// Operations, configuration, workers
// ============================================================================
pub use config::EngineConfig;
pub use engine::LoopEngine;
pub use ops::{
    IndexMax, IndexMin, IndexReduceOp, IndexValue, Max, Mean, Min, Product, ReduceOp, Sum,
};
#[cfg(feature = "parallel")]
pub use threading::RayonWorkers;
pub use threading::{Sequential, Workers};

// ============================================================================
// Constants
// ============================================================================

/// Largest rank a [`ShapeDescriptor`] may describe.
pub const MAX_RANK: usize = 32;

// ============================================================================
// Error types
// ============================================================================

/// Errors raised while validating layouts, descriptors and operands.
///
/// Kernels never fail: every error is raised at an entry point before any
/// memory is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    /// Rank, extent or stride data does not describe a valid layout.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// A descriptor or operand argument violates a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Axis index is not within `[0, rank)`.
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },

    /// The same axis appears twice in an axis list.
    #[error("axis {axis} listed more than once")]
    DuplicateAxis { axis: usize },

    /// The layout reaches past the end of the buffer.
    #[error("layout needs {required} elements but buffer holds {len}")]
    BufferTooSmall { required: usize, len: usize },

    /// The layout reaches before the start of the buffer.
    #[error("layout reaches offset {offset}, before the start of the buffer")]
    NegativeOffset { offset: isize },

    /// Two operands that must hold the same number of elements do not.
    #[error("length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// An engine configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LoopError {
    /// True for malformed rank/extent/stride data.
    pub fn is_invalid_shape(&self) -> bool {
        matches!(self, LoopError::InvalidShape(_))
    }

    /// True for precondition violations on descriptors, axes and operands.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            LoopError::InvalidArgument(_)
                | LoopError::AxisOutOfRange { .. }
                | LoopError::DuplicateAxis { .. }
                | LoopError::BufferTooSmall { .. }
                | LoopError::NegativeOffset { .. }
                | LoopError::LengthMismatch { .. }
        )
    }
}

/// Result type for layout validation and loop execution.
pub type Result<T> = std::result::Result<T, LoopError>;
