//! Loop-kind classification.
//!
//! Each classifier checks the kinds in priority order and returns the first
//! one whose preconditions hold. Every kind it can return is safe to run on
//! the given layouts and produces the same result as [`LoopKind::Common`].

use std::fmt;

use crate::shape::ShapeDescriptor;

/// Iteration strategy selected for a set of layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// Small slice reduction accumulated by scattering each input element into
    /// its output slot.
    SmallArr2DX,
    /// Every array is contiguous in a compatible order.
    Ews1,
    /// Every array is walked with its own constant, positive stride.
    EwsNonZero,
    /// Identical extents, rank 1.
    Rank1,
    /// Identical extents, rank 2.
    Rank2,
    /// Identical extents, rank 3.
    Rank3,
    /// Identical extents, rank 4.
    Rank4,
    /// Identical extents, rank 5.
    Rank5,
    /// Input has a constant stride, output needs coordinate decoding.
    XEwsNonZero,
    /// Output has a constant stride, input needs coordinate decoding.
    ZEwsNonZero,
    /// General coordinate decoding.
    Common,
}

impl LoopKind {
    /// Stable lowercase name for diagnostics and benchmark ids.
    pub fn name(self) -> &'static str {
        match self {
            LoopKind::SmallArr2DX => "small_arr_2d_x",
            LoopKind::Ews1 => "ews1",
            LoopKind::EwsNonZero => "ews_nonzero",
            LoopKind::Rank1 => "rank1",
            LoopKind::Rank2 => "rank2",
            LoopKind::Rank3 => "rank3",
            LoopKind::Rank4 => "rank4",
            LoopKind::Rank5 => "rank5",
            LoopKind::XEwsNonZero => "x_ews_nonzero",
            LoopKind::ZEwsNonZero => "z_ews_nonzero",
            LoopKind::Common => "common",
        }
    }

    /// Unrolled rank of a rank-specialized kind.
    pub fn rank(self) -> Option<usize> {
        match self {
            LoopKind::Rank1 => Some(1),
            LoopKind::Rank2 => Some(2),
            LoopKind::Rank3 => Some(3),
            LoopKind::Rank4 => Some(4),
            LoopKind::Rank5 => Some(5),
            _ => None,
        }
    }

    pub(crate) fn from_rank(rank: usize) -> Option<Self> {
        match rank {
            1 => Some(LoopKind::Rank1),
            2 => Some(LoopKind::Rank2),
            3 => Some(LoopKind::Rank3),
            4 => Some(LoopKind::Rank4),
            5 => Some(LoopKind::Rank5),
            _ => None,
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All shapes share one order, or every non-vector shape is row-major.
fn orders_compatible(shapes: &[&ShapeDescriptor]) -> bool {
    let Some(first) = shapes.first() else {
        return true;
    };
    shapes.iter().all(|s| s.order() == first.order())
        || shapes.iter().all(|s| s.is_row_major_or_vector())
}

fn all_ews(shapes: &[&ShapeDescriptor], pred: impl Fn(isize) -> bool) -> bool {
    shapes.iter().all(|s| pred(s.element_wise_stride()))
}

fn rank_kind(shapes: &[&ShapeDescriptor]) -> Option<LoopKind> {
    let first = shapes.first()?;
    if shapes.iter().all(|s| s.same_extents(first)) {
        LoopKind::from_rank(first.rank())
    } else {
        None
    }
}

/// Kinds valid for every array walked in lockstep by linear index.
fn classify_lockstep(shapes: &[&ShapeDescriptor]) -> LoopKind {
    if !orders_compatible(shapes) {
        return LoopKind::Common;
    }
    if all_ews(shapes, |e| e == 1) {
        return LoopKind::Ews1;
    }
    if all_ews(shapes, |e| e > 0) {
        return LoopKind::EwsNonZero;
    }
    rank_kind(shapes).unwrap_or(LoopKind::Common)
}

/// Whole-array walk of a single operand.
pub fn classify_x(x: &ShapeDescriptor) -> LoopKind {
    match x.element_wise_stride() {
        1 => LoopKind::Ews1,
        e if e > 0 => LoopKind::EwsNonZero,
        _ => LoopKind::Common,
    }
}

/// Two-operand element-wise loop (`z = f(x)`).
pub fn classify_xz(x: &ShapeDescriptor, z: &ShapeDescriptor) -> LoopKind {
    let kind = classify_lockstep(&[x, z]);
    if kind != LoopKind::Common {
        return kind;
    }
    let (xe, ze) = (x.element_wise_stride(), z.element_wise_stride());
    if xe > 0 && ze == 0 && x.is_row_major_or_vector() {
        return LoopKind::XEwsNonZero;
    }
    if ze > 0 && xe == 0 && z.is_row_major_or_vector() {
        return LoopKind::ZEwsNonZero;
    }
    LoopKind::Common
}

/// Three-operand element-wise loop (`z = f(x, y)`).
pub fn classify_xyz(x: &ShapeDescriptor, y: &ShapeDescriptor, z: &ShapeDescriptor) -> LoopKind {
    classify_lockstep(&[x, y, z])
}

/// Slice reduction: `x` is the input, `tad` the shared slice shape, `z` the
/// per-slice output.
///
/// The small-aggregation kind is checked first. It requires a contiguous
/// rank-2 input whose slices are its columns, so that scattering `x` in
/// linear order folds every slice first-to-last.
pub fn classify_slice_reduction(
    x: &ShapeDescriptor,
    tad: &ShapeDescriptor,
    z: &ShapeDescriptor,
    small_aggregation_threshold: usize,
) -> LoopKind {
    let tad_ews = tad.element_wise_stride();
    let z_ews = z.element_wise_stride();
    let z_len = z.total_length();
    let compatible = orders_compatible(&[tad, z]);

    let small = tad
        .total_length()
        .checked_mul(z_len)
        .is_some_and(|n| n <= small_aggregation_threshold);
    if small
        && compatible
        && x.rank() == 2
        && x.element_wise_stride() == 1
        && x.total_length() == tad.total_length() * z_len
        && tad.is_vector()
        && z_len > 1
        && tad_ews == z_len as isize
        && z_ews == 1
    {
        return LoopKind::SmallArr2DX;
    }

    if tad_ews == 1 && z_ews == 1 && compatible {
        return LoopKind::Ews1;
    }
    if tad_ews > 0 && z_ews > 0 && compatible {
        return LoopKind::EwsNonZero;
    }
    if z_ews == 1 && z.is_row_major_or_vector() {
        if let Some(kind) = LoopKind::from_rank(tad.rank()) {
            return kind;
        }
    }
    if tad_ews > 0 && z_ews == 0 && tad.is_row_major_or_vector() {
        return LoopKind::XEwsNonZero;
    }
    if z_ews > 0 && tad_ews == 0 && z.is_row_major_or_vector() {
        return LoopKind::ZEwsNonZero;
    }
    LoopKind::Common
}

/// Index reductions have no small-aggregation kernel.
pub(crate) fn classify_index_reduction(
    x: &ShapeDescriptor,
    tad: &ShapeDescriptor,
    z: &ShapeDescriptor,
) -> LoopKind {
    match classify_slice_reduction(x, tad, z, 0) {
        LoopKind::SmallArr2DX => LoopKind::EwsNonZero,
        kind => kind,
    }
}

/// Classify an element-wise loop over one, two or three layouts.
pub fn classify_loop(shapes: &[&ShapeDescriptor]) -> LoopKind {
    let kind = match shapes {
        [x] => classify_x(x),
        [x, z] => classify_xz(x, z),
        [x, y, z] => classify_xyz(x, y, z),
        _ => LoopKind::Common,
    };
    tracing::trace!(kind = %kind, arity = shapes.len(), "classified loop");
    kind
}
