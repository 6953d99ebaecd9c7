//! Indexed slice reductions: the position of the selected element per slice.

use std::marker::PhantomData;

use super::reduce::{execute_slices, validate_slices, SliceFold};
use super::{check_requested_kind, Launch, Operand, OperandMut};
use crate::loop_kind::{classify_index_reduction, LoopKind};
use crate::ops::{IndexReduceOp, IndexValue};
use crate::tad::SlicePack;
use crate::Result;

struct IndexFold<'a, O, X> {
    op: &'a O,
    _elem: PhantomData<fn(X)>,
}

impl<X, O> SliceFold<X> for IndexFold<'_, O, X>
where
    X: Copy,
    O: IndexReduceOp<X>,
{
    type Acc = IndexValue<X>;
    type Out = i64;

    fn empty(&self) -> i64 {
        -1
    }

    #[inline]
    fn start(&self, first: X) -> IndexValue<X> {
        self.op.starting_value(first)
    }

    #[inline]
    fn step(&self, acc: IndexValue<X>, j: usize, x: X) -> IndexValue<X> {
        self.op.update(
            acc,
            IndexValue {
                value: x,
                index: j as i64,
            },
        )
    }

    #[inline]
    fn finish(&self, acc: IndexValue<X>, _len: usize) -> i64 {
        acc.index
    }
}

/// For every slice of `x` described by `pack`, write the in-slice position
/// chosen by `op` to the matching element of `z`; `-1` for empty slices.
///
/// Positions count elements of the slice in the slice layout's own order.
pub fn run_index_reduction<X, O>(
    launch: &Launch<'_>,
    x: Operand<'_, X>,
    pack: &SlicePack,
    z: OperandMut<'_, i64>,
    op: &O,
) -> Result<LoopKind>
where
    X: Copy + Sync,
    O: IndexReduceOp<X>,
{
    validate_slices(&x, pack, z.len())?;
    let kind = classify_index_reduction(x.shape(), pack.slice_shape(), z.shape());
    tracing::trace!(kind = %kind, num_slices = pack.num_slices(), "classified index reduction");
    execute(launch, kind, x, pack, z, op);
    Ok(kind)
}

/// [`run_index_reduction`] forcing `kind`, which must be the classified kind
/// or [`LoopKind::Common`].
pub fn run_index_reduction_with_kind<X, O>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: Operand<'_, X>,
    pack: &SlicePack,
    z: OperandMut<'_, i64>,
    op: &O,
) -> Result<()>
where
    X: Copy + Sync,
    O: IndexReduceOp<X>,
{
    validate_slices(&x, pack, z.len())?;
    check_requested_kind(
        kind,
        classify_index_reduction(x.shape(), pack.slice_shape(), z.shape()),
    )?;
    execute(launch, kind, x, pack, z, op);
    Ok(())
}

fn execute<X, O>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: Operand<'_, X>,
    pack: &SlicePack,
    z: OperandMut<'_, i64>,
    op: &O,
) where
    X: Copy + Sync,
    O: IndexReduceOp<X>,
{
    let fold = IndexFold {
        op,
        _elem: PhantomData,
    };
    execute_slices(launch, kind, x, pack, z, &fold);
}
