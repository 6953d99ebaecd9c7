//! Loop kernel family and its entry points.
//!
//! Each entry point validates its operands, classifies the layouts, looks the
//! resulting [`LoopKind`] up in a kernel table and runs the kernel over
//! independent task ranges on the launch's [`Workers`]. Kernels themselves
//! never fail.
//!
//! Element-wise loops pair operands by linear index, each operand decoding
//! that index in its own [`Order`](crate::Order). Slice `k` of a reduction is
//! written to the `k`-th element of the output, again in the output's order.

use std::ops::Range;

use crate::config::{
    EngineConfig, MIN_ELEMENTS_PER_TASK, MIN_SLICES_PER_TASK, SMALL_AGGREGATION_THRESHOLD,
};
use crate::loop_kind::LoopKind;
use crate::shape::{Decoder, ShapeDescriptor};
use crate::threading::{chunk_range, plan_tasks, SendPtr, Sequential, Workers};
use crate::{LoopError, Result};

mod index_reduce;
mod nested;
mod pairwise;
mod reduce;
mod transform;

pub use index_reduce::{run_index_reduction, run_index_reduction_with_kind};
pub use pairwise::{run_element_wise, run_element_wise_with_kind};
pub use reduce::{run_full_reduction, run_slice_reduction, run_slice_reduction_with_kind};
pub use transform::{run_transform, run_transform_in_place, run_transform_with_kind};

/// Read-only array: a buffer, the layout of the array inside it and the
/// position of the array's offset-0 element.
#[derive(Debug)]
pub struct Operand<'a, T> {
    shape: &'a ShapeDescriptor,
    data: &'a [T],
    base: usize,
}

impl<'a, T> Clone for Operand<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for Operand<'a, T> {}

impl<'a, T> Operand<'a, T> {
    /// Array starting at the beginning of `data`.
    ///
    /// # Errors
    /// [`LoopError::BufferTooSmall`] or [`LoopError::NegativeOffset`] if some
    /// element of `shape` falls outside `data`.
    pub fn new(shape: &'a ShapeDescriptor, data: &'a [T]) -> Result<Self> {
        Self::with_offset(shape, data, 0)
    }

    /// Array whose offset-0 element is `data[base]`.
    pub fn with_offset(shape: &'a ShapeDescriptor, data: &'a [T], base: usize) -> Result<Self> {
        check_bounds(shape, data.len(), base)?;
        Ok(Self { shape, data, base })
    }

    #[inline]
    pub fn shape(&self) -> &'a ShapeDescriptor {
        self.shape
    }

    #[inline]
    pub fn data(&self) -> &'a [T] {
        self.data
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shape.total_length()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    /// Element at linear index `i` (in the layout's order).
    pub fn get(&self, i: usize) -> Option<&'a T> {
        if i >= self.len() {
            return None;
        }
        let pos = self.base as isize + self.shape.index_offset(i);
        self.data.get(pos as usize)
    }

    /// The sub-array with layout `shape` whose offset-0 element sits at
    /// `offset` relative to this array's.
    pub(crate) fn reslice(
        &self,
        shape: &'a ShapeDescriptor,
        offset: isize,
    ) -> Result<Operand<'a, T>> {
        let base = (self.base as isize)
            .checked_add(offset)
            .ok_or(LoopError::BufferTooSmall {
                required: usize::MAX,
                len: self.data.len(),
            })?;
        if base < 0 {
            return Err(LoopError::NegativeOffset { offset: base });
        }
        Operand::with_offset(shape, self.data, base as usize)
    }

    #[inline]
    pub(crate) fn raw(&self) -> RawArray<'a, T> {
        RawArray::new(
            self.shape,
            SendPtr(self.data.as_ptr().wrapping_add(self.base) as *mut T),
        )
    }
}

/// Writable array. Besides bounds, construction checks that no two elements
/// share a buffer position, so tasks writing distinct elements never race.
#[derive(Debug)]
pub struct OperandMut<'a, T> {
    shape: &'a ShapeDescriptor,
    data: &'a mut [T],
    base: usize,
}

impl<'a, T> OperandMut<'a, T> {
    /// # Errors
    /// Bounds errors as for [`Operand::new`]; [`LoopError::InvalidArgument`]
    /// if the layout maps two elements to the same position.
    pub fn new(shape: &'a ShapeDescriptor, data: &'a mut [T]) -> Result<Self> {
        Self::with_offset(shape, data, 0)
    }

    pub fn with_offset(shape: &'a ShapeDescriptor, data: &'a mut [T], base: usize) -> Result<Self> {
        check_bounds(shape, data.len(), base)?;
        check_no_overlap(shape)?;
        Ok(Self { shape, data, base })
    }

    #[inline]
    pub fn shape(&self) -> &'a ShapeDescriptor {
        self.shape
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shape.total_length()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    #[inline]
    pub(crate) fn raw(&mut self) -> RawArray<'a, T> {
        RawArray::new(
            self.shape,
            SendPtr(self.data.as_mut_ptr().wrapping_add(self.base)),
        )
    }
}

/// Raw view handed to kernels: pointer to the offset-0 element plus layout.
pub(crate) struct RawArray<'a, T> {
    ptr: SendPtr<T>,
    shape: &'a ShapeDescriptor,
    decoder: Decoder<'a>,
}

impl<'a, T> RawArray<'a, T> {
    fn new(shape: &'a ShapeDescriptor, ptr: SendPtr<T>) -> Self {
        Self {
            ptr,
            shape,
            decoder: Decoder::new(shape),
        }
    }

    /// A second view of the same elements, for loops whose input is their
    /// output.
    pub(crate) fn alias(&self) -> RawArray<'a, T> {
        RawArray::new(self.shape, self.ptr)
    }

    #[inline]
    pub(crate) fn shape(&self) -> &'a ShapeDescriptor {
        self.shape
    }

    #[inline]
    pub(crate) fn ews(&self) -> isize {
        self.shape.element_wise_stride()
    }

    /// Buffer offset of linear index `i`, by full coordinate decoding.
    #[inline]
    pub(crate) fn decode(&self, i: usize) -> isize {
        self.decoder.offset(i)
    }

    /// # Safety
    /// `offset` must address an element of the validated array.
    #[inline]
    pub(crate) unsafe fn read(&self, offset: isize) -> T
    where
        T: Copy,
    {
        *self.ptr.as_ptr().offset(offset)
    }

    /// # Safety
    /// `offset` must address an element of the validated array that no other
    /// task accesses concurrently.
    #[inline]
    pub(crate) unsafe fn write(&self, offset: isize, value: T) {
        *self.ptr.as_ptr().offset(offset) = value;
    }

    /// `len` consecutive elements starting at `offset`.
    ///
    /// # Safety
    /// The range must lie inside the validated array.
    #[inline]
    pub(crate) unsafe fn slice(&self, offset: isize, len: usize) -> &[T] {
        std::slice::from_raw_parts(self.ptr.as_ptr().offset(offset), len)
    }

    /// # Safety
    /// As [`RawArray::slice`], and no other task may touch the range.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: isize, len: usize) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().offset(offset), len)
    }
}

static SEQUENTIAL_CONFIG: EngineConfig = EngineConfig {
    small_aggregation_threshold: SMALL_AGGREGATION_THRESHOLD,
    min_elements_per_task: MIN_ELEMENTS_PER_TASK,
    min_slices_per_task: MIN_SLICES_PER_TASK,
    max_workers: None,
};

/// Configuration and workers for one kernel launch.
#[derive(Clone, Copy)]
pub struct Launch<'a> {
    config: &'a EngineConfig,
    workers: &'a dyn Workers,
}

impl<'a> Launch<'a> {
    pub fn new(config: &'a EngineConfig, workers: &'a dyn Workers) -> Self {
        Self { config, workers }
    }

    #[inline]
    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    /// Usable parallelism: the workers' limit capped by the configuration.
    #[inline]
    pub fn worker_limit(&self) -> usize {
        self.config.worker_limit(self.workers.max_workers())
    }

    /// Split `units` into tasks of at least `min_units` and run `kernel` on
    /// each task's range.
    pub(crate) fn execute<A: Sync>(
        &self,
        units: usize,
        min_units: usize,
        args: &A,
        kernel: fn(&A, Range<usize>),
    ) {
        let tasks = plan_tasks(units, min_units, self.worker_limit());
        tracing::debug!(units, tasks, "launching loop kernel");
        match tasks {
            0 => {}
            1 => kernel(args, 0..units),
            _ => self
                .workers
                .run(tasks, &|t| kernel(args, chunk_range(units, tasks, t))),
        }
    }
}

impl Launch<'static> {
    /// Default configuration, everything on the calling thread.
    pub fn sequential() -> Self {
        Self {
            config: &SEQUENTIAL_CONFIG,
            workers: &Sequential,
        }
    }
}

impl std::fmt::Debug for Launch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launch")
            .field("config", self.config)
            .field("max_workers", &self.workers.max_workers())
            .finish()
    }
}

fn check_bounds(shape: &ShapeDescriptor, len: usize, base: usize) -> Result<()> {
    if base > len {
        return Err(LoopError::BufferTooSmall { required: base, len });
    }
    let (Some(lo), Some(hi)) = (shape.min_offset(), shape.max_offset()) else {
        return Ok(());
    };
    // `base <= len <= isize::MAX` for any real buffer.
    let base =
        isize::try_from(base).map_err(|_| LoopError::BufferTooSmall { required: base, len })?;
    match base.checked_add(hi) {
        Some(hi) => check_range(base + lo, hi, len),
        None => Err(LoopError::BufferTooSmall { required: usize::MAX, len }),
    }
}

/// `lo..=hi` must be inside `0..len`.
pub(crate) fn check_range(lo: isize, hi: isize, len: usize) -> Result<()> {
    if lo < 0 {
        return Err(LoopError::NegativeOffset { offset: lo });
    }
    if hi as usize >= len {
        return Err(LoopError::BufferTooSmall {
            required: hi as usize + 1,
            len,
        });
    }
    Ok(())
}

/// Outputs up to this many elements that fail the stride test are checked
/// exactly by sorting their offsets.
const EXACT_OVERLAP_LIMIT: usize = 1 << 16;

/// Reject layouts in which two elements share a buffer position.
///
/// Layouts whose axes, sorted by stride magnitude, each step past everything
/// the smaller axes reach pass at once. Interleaved layouts above
/// [`EXACT_OVERLAP_LIMIT`] elements are rejected even when their offsets
/// happen to be distinct.
fn check_no_overlap(shape: &ShapeDescriptor) -> Result<()> {
    if strides_separate(shape) {
        return Ok(());
    }
    let len = shape.total_length();
    if len <= EXACT_OVERLAP_LIMIT {
        let mut offsets: Vec<isize> = (0..len).map(|i| shape.index_offset(i)).collect();
        offsets.sort_unstable();
        if offsets.windows(2).all(|w| w[0] != w[1]) {
            return Ok(());
        }
    }
    Err(LoopError::InvalidArgument(format!(
        "output layout {shape} maps several elements to one position"
    )))
}

fn strides_separate(shape: &ShapeDescriptor) -> bool {
    let mut axes: Vec<(usize, usize)> = shape
        .extents()
        .iter()
        .zip(shape.strides())
        .filter(|&(&e, _)| e > 1)
        .map(|(&e, &s)| (e, s.unsigned_abs()))
        .collect();
    axes.sort_unstable_by_key(|&(_, s)| s);

    let mut reach = 0usize;
    for (extent, stride) in axes {
        if stride <= reach {
            return false;
        }
        reach = reach.saturating_add((extent - 1).saturating_mul(stride));
    }
    true
}

/// Reject a requested kind unless it is the classified one or the fallback.
pub(crate) fn check_requested_kind(requested: LoopKind, classified: LoopKind) -> Result<()> {
    if requested == classified || requested == LoopKind::Common {
        Ok(())
    } else {
        Err(LoopError::InvalidArgument(format!(
            "loop kind {requested} is not valid for these layouts (classified as {classified})"
        )))
    }
}

pub(crate) fn check_same_length(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(LoopError::LengthMismatch { expected, actual });
    }
    Ok(())
}

/// Order-compatible lockstep walks follow row-major axis order unless every
/// operand is column-major.
pub(crate) fn walk_reversed(shapes: &[&ShapeDescriptor]) -> bool {
    shapes
        .iter()
        .all(|s| s.order() == crate::Order::ColumnMajor)
}

/// Minimum outer-axis steps per task so each task covers `min_elements`.
#[inline]
pub(crate) fn min_outer_units(min_elements: usize, inner_length: usize) -> usize {
    (min_elements / inner_length.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Order;

    #[test]
    fn test_operand_bounds() {
        let shape = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let data = vec![0.0f32; 5];
        assert_eq!(
            Operand::new(&shape, &data).unwrap_err(),
            LoopError::BufferTooSmall {
                required: 6,
                len: 5
            }
        );
        let data = vec![0.0f32; 8];
        let x = Operand::with_offset(&shape, &data, 2).unwrap();
        assert_eq!(x.len(), 6);
        assert!(Operand::with_offset(&shape, &data, 3).is_err());
    }

    #[test]
    fn test_negative_strides_need_base() {
        let shape = ShapeDescriptor::new(&[4], &[-1], Order::RowMajor).unwrap();
        let data = [1, 2, 3, 4];
        assert_eq!(
            Operand::new(&shape, &data).unwrap_err(),
            LoopError::NegativeOffset { offset: -3 }
        );
        let x = Operand::with_offset(&shape, &data, 3).unwrap();
        let got: Vec<i32> = (0..4).map(|i| *x.get(i).unwrap()).collect();
        assert_eq!(got, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_overlapping_output_rejected() {
        let broadcast = ShapeDescriptor::new(&[3, 4], &[0, 1], Order::RowMajor).unwrap();
        let mut data = vec![0.0; 4];
        let err = OperandMut::new(&broadcast, &mut data).unwrap_err();
        assert!(err.is_invalid_argument());

        let diagonal = ShapeDescriptor::new(&[2, 2], &[1, 1], Order::RowMajor).unwrap();
        let mut data = vec![0.0; 3];
        assert!(OperandMut::new(&diagonal, &mut data).is_err());

        let padded = ShapeDescriptor::new(&[2, 3], &[4, 1], Order::RowMajor).unwrap();
        let mut data = vec![0.0; 7];
        assert!(OperandMut::new(&padded, &mut data).is_ok());
    }

    #[test]
    fn test_interleaved_output_accepted() {
        // Offsets {0, 3, 2, 5, 4, 7}: no stride dominates, yet all distinct.
        let interleaved = ShapeDescriptor::new(&[3, 2], &[2, 3], Order::RowMajor).unwrap();
        assert!(!strides_separate(&interleaved));
        let mut data = vec![0.0; 8];
        assert!(OperandMut::new(&interleaved, &mut data).is_ok());

        // Offsets {0, 2, 4, 2, 4, 6}: collides.
        let folded = ShapeDescriptor::new(&[3, 2], &[2, 2], Order::RowMajor).unwrap();
        let mut data = vec![0.0; 7];
        assert!(OperandMut::new(&folded, &mut data).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_far_reaching_layout_rejected() {
        let shape = ShapeDescriptor::new(&[2], &[isize::MAX], Order::RowMajor).unwrap();
        let data = [0u8; 3];
        let err = Operand::with_offset(&shape, &data, 2).unwrap_err();
        assert!(matches!(err, LoopError::BufferTooSmall { .. }));
    }

    #[test]
    fn test_empty_operand() {
        let shape = ShapeDescriptor::row_major(&[3, 0]).unwrap();
        let data: [f64; 0] = [];
        let x = Operand::new(&shape, &data).unwrap();
        assert!(x.is_empty());
        assert!(x.get(0).is_none());
    }

    #[test]
    fn test_requested_kind() {
        assert!(check_requested_kind(LoopKind::Common, LoopKind::Ews1).is_ok());
        assert!(check_requested_kind(LoopKind::Ews1, LoopKind::Ews1).is_ok());
        assert!(check_requested_kind(LoopKind::Rank2, LoopKind::Ews1).is_err());
    }
}
