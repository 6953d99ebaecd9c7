//! Slice reductions: one folded value per slice of a [`SlicePack`].
//!
//! The kernels here are generic over a [`SliceFold`], so plain and indexed
//! reductions share the traversal code and differ only in what they
//! accumulate. Work is split by whole slices; each slice is folded
//! sequentially, first element to last.

use std::marker::PhantomData;
use std::ops::Range;

use super::nested::Nest;
use super::{
    check_range, check_requested_kind, check_same_length, Launch, Operand, OperandMut, RawArray,
};
use crate::loop_kind::{classify_slice_reduction, classify_x, LoopKind};
use crate::ops::ReduceOp;
use crate::shape::{Decoder, ShapeDescriptor};
use crate::tad::SlicePack;
use crate::Result;

/// What a kernel accumulates while walking one slice.
pub(crate) trait SliceFold<X>: Sync {
    type Acc: Copy;
    type Out;

    /// Result for a slice without elements.
    fn empty(&self) -> Self::Out;
    fn start(&self, first: X) -> Self::Acc;
    fn step(&self, acc: Self::Acc, j: usize, x: X) -> Self::Acc;
    fn finish(&self, acc: Self::Acc, len: usize) -> Self::Out;
}

/// [`ReduceOp`] as a [`SliceFold`].
pub(crate) struct ReduceFold<'a, O, Z> {
    op: &'a O,
    _out: PhantomData<fn() -> Z>,
}

impl<'a, O, Z> ReduceFold<'a, O, Z> {
    pub(crate) fn new(op: &'a O) -> Self {
        Self {
            op,
            _out: PhantomData,
        }
    }
}

impl<X, Z, O> SliceFold<X> for ReduceFold<'_, O, Z>
where
    O: ReduceOp<X, Z>,
    Z: Copy,
{
    type Acc = Z;
    type Out = Z;

    fn empty(&self) -> Z {
        self.op.post_process(self.op.starting_value(None), 0)
    }

    #[inline]
    fn start(&self, first: X) -> Z {
        self.op.starting_value(Some(first))
    }

    #[inline]
    fn step(&self, acc: Z, _j: usize, x: X) -> Z {
        self.op.update(acc, self.op.op(x))
    }

    #[inline]
    fn finish(&self, acc: Z, len: usize) -> Z {
        self.op.post_process(acc, len)
    }
}

/// Fold a slice given random access to its elements in walk order.
#[inline]
pub(crate) fn fold_with<X, S>(fold: &S, len: usize, mut element: impl FnMut(usize) -> X) -> S::Out
where
    S: SliceFold<X>,
{
    if len == 0 {
        return fold.empty();
    }
    let mut acc = fold.start(element(0));
    for j in 0..len {
        acc = fold.step(acc, j, element(j));
    }
    fold.finish(acc, len)
}

/// Reduce every slice of `x` described by `pack` into one element of `z`.
///
/// `pack` must have been computed for `x`'s layout, and `z` must hold exactly
/// `pack.num_slices()` elements. Slice `k` is written to element `k` of `z`
/// (in `z`'s order). An empty pack touches no memory.
pub fn run_slice_reduction<X, Z, O>(
    launch: &Launch<'_>,
    x: Operand<'_, X>,
    pack: &SlicePack,
    z: OperandMut<'_, Z>,
    op: &O,
) -> Result<LoopKind>
where
    X: Copy + Sync,
    Z: Copy + Send,
    O: ReduceOp<X, Z>,
{
    validate_slices(&x, pack, z.len())?;
    let kind = classify(launch, x.shape(), pack, z.shape());
    execute_reduce(launch, kind, x, pack, z, op);
    Ok(kind)
}

/// [`run_slice_reduction`] forcing `kind`, which must be the classified kind
/// or [`LoopKind::Common`].
pub fn run_slice_reduction_with_kind<X, Z, O>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: Operand<'_, X>,
    pack: &SlicePack,
    z: OperandMut<'_, Z>,
    op: &O,
) -> Result<()>
where
    X: Copy + Sync,
    Z: Copy + Send,
    O: ReduceOp<X, Z>,
{
    validate_slices(&x, pack, z.len())?;
    check_requested_kind(kind, classify(launch, x.shape(), pack, z.shape()))?;
    execute_reduce(launch, kind, x, pack, z, op);
    Ok(())
}

/// Fold the whole of `x` into one value, in `x`'s own order.
pub fn run_full_reduction<X, Z, O>(x: Operand<'_, X>, op: &O) -> Z
where
    X: Copy + Sync,
    Z: Copy,
    O: ReduceOp<X, Z>,
{
    let fold = ReduceFold::new(op);
    let raw = x.raw();
    let len = x.len();
    // SAFETY: every offset below belongs to the validated operand.
    match classify_x(x.shape()) {
        LoopKind::Ews1 => {
            let xs = unsafe { raw.slice(0, len) };
            fold_with(&fold, len, |j| xs[j])
        }
        LoopKind::EwsNonZero => {
            let s = raw.ews();
            fold_with(&fold, len, |j| unsafe { raw.read(j as isize * s) })
        }
        _ => fold_with(&fold, len, |j| unsafe { raw.read(raw.decode(j)) }),
    }
}

/// Output length matches the slice count and every slice lies inside `x`.
pub(crate) fn validate_slices<X>(x: &Operand<'_, X>, pack: &SlicePack, z_len: usize) -> Result<()> {
    check_same_length(pack.num_slices(), z_len)?;
    if let Some((lo, hi)) = pack.offset_bounds() {
        let base = x.base() as isize;
        check_range(base + lo, base + hi, x.data().len())?;
    }
    Ok(())
}

fn classify(
    launch: &Launch<'_>,
    x: &ShapeDescriptor,
    pack: &SlicePack,
    z: &ShapeDescriptor,
) -> LoopKind {
    let threshold = launch.config().small_aggregation_threshold;
    let kind = classify_slice_reduction(x, pack.slice_shape(), z, threshold);
    // Scattering needs slice k to start at element k.
    let kind = if kind == LoopKind::SmallArr2DX
        && !pack
            .iter_offsets()
            .enumerate()
            .all(|(k, offset)| offset == k as isize)
    {
        classify_slice_reduction(x, pack.slice_shape(), z, 0)
    } else {
        kind
    };
    tracing::trace!(kind = %kind, num_slices = pack.num_slices(), "classified slice reduction");
    kind
}

fn execute_reduce<X, Z, O>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: Operand<'_, X>,
    pack: &SlicePack,
    z: OperandMut<'_, Z>,
    op: &O,
) where
    X: Copy + Sync,
    Z: Copy + Send,
    O: ReduceOp<X, Z>,
{
    let fold = ReduceFold::new(op);
    if kind == LoopKind::SmallArr2DX {
        let mut z = z;
        if !pack.is_empty() {
            small_arr_2d_x(&x.raw(), &z.raw(), &fold, pack.slice_length());
        }
        return;
    }
    execute_slices(launch, kind, x, pack, z, &fold);
}

/// Shared driver for plain and indexed slice reductions.
pub(crate) fn execute_slices<X, S>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: Operand<'_, X>,
    pack: &SlicePack,
    mut z: OperandMut<'_, S::Out>,
    fold: &S,
) where
    X: Copy + Sync,
    S: SliceFold<X>,
    S::Out: Send,
{
    let num_slices = pack.num_slices();
    if num_slices == 0 {
        return;
    }
    let tad = pack.slice_shape();
    let args = SliceArgs {
        x: x.raw(),
        tad,
        tad_decoder: Decoder::new(tad),
        offsets: pack.offsets(),
        z: z.raw(),
        fold,
        nest: kind.rank().map(|_| Nest::single(tad)),
    };
    let config = launch.config();
    let min_slices = config
        .min_slices_per_task
        .max(config.min_elements_per_task / pack.slice_length().max(1));
    launch.execute(num_slices, min_slices, &args, kernel_for(kind));
}

struct SliceArgs<'a, X, S: SliceFold<X>> {
    x: RawArray<'a, X>,
    tad: &'a ShapeDescriptor,
    tad_decoder: Decoder<'a>,
    offsets: &'a [isize],
    z: RawArray<'a, S::Out>,
    fold: &'a S,
    nest: Option<Nest<1>>,
}

type Kernel<'a, X, S> = fn(&SliceArgs<'a, X, S>, Range<usize>);

fn kernel_for<'a, X, S>(kind: LoopKind) -> Kernel<'a, X, S>
where
    X: Copy,
    S: SliceFold<X>,
{
    match kind {
        LoopKind::Ews1 => ews1 as Kernel<'a, X, S>,
        LoopKind::EwsNonZero => ews_nonzero as Kernel<'a, X, S>,
        LoopKind::Rank1
        | LoopKind::Rank2
        | LoopKind::Rank3
        | LoopKind::Rank4
        | LoopKind::Rank5 => rank as Kernel<'a, X, S>,
        LoopKind::XEwsNonZero => x_ews as Kernel<'a, X, S>,
        LoopKind::ZEwsNonZero => z_ews as Kernel<'a, X, S>,
        _ => common as Kernel<'a, X, S>,
    }
}

// SAFETY (all kernels): slice offsets were checked against the input buffer,
// tad offsets stay within a slice, and each task writes only its own slots.

fn ews1<X: Copy, S: SliceFold<X>>(a: &SliceArgs<'_, X, S>, range: Range<usize>) {
    let len = a.tad.total_length();
    let zs = a.z.ews();
    for k in range {
        let base = a.offsets[k];
        let out = fold_with(a.fold, len, |j| unsafe { a.x.read(base + j as isize) });
        unsafe { a.z.write(k as isize * zs, out) };
    }
}

fn ews_nonzero<X: Copy, S: SliceFold<X>>(a: &SliceArgs<'_, X, S>, range: Range<usize>) {
    let len = a.tad.total_length();
    let (ts, zs) = (a.tad.element_wise_stride(), a.z.ews());
    for k in range {
        let base = a.offsets[k];
        let out = fold_with(a.fold, len, |j| unsafe { a.x.read(base + j as isize * ts) });
        unsafe { a.z.write(k as isize * zs, out) };
    }
}

fn rank<X: Copy, S: SliceFold<X>>(a: &SliceArgs<'_, X, S>, range: Range<usize>) {
    let Some(nest) = &a.nest else {
        return common(a, range);
    };
    let len = a.tad.total_length();
    let zs = a.z.ews();
    for k in range {
        let base = a.offsets[k];
        let out = if len == 0 {
            a.fold.empty()
        } else {
            let mut acc = a.fold.start(unsafe { a.x.read(base) });
            let mut j = 0usize;
            nest.visit(0..nest.outer_extent(), [base], &mut |o: &[isize; 1]| {
                acc = a.fold.step(acc, j, unsafe { a.x.read(o[0]) });
                j += 1;
            });
            a.fold.finish(acc, len)
        };
        unsafe { a.z.write(k as isize * zs, out) };
    }
}

fn x_ews<X: Copy, S: SliceFold<X>>(a: &SliceArgs<'_, X, S>, range: Range<usize>) {
    let len = a.tad.total_length();
    let ts = a.tad.element_wise_stride();
    for k in range {
        let base = a.offsets[k];
        let out = fold_with(a.fold, len, |j| unsafe { a.x.read(base + j as isize * ts) });
        unsafe { a.z.write(a.z.decode(k), out) };
    }
}

fn z_ews<X: Copy, S: SliceFold<X>>(a: &SliceArgs<'_, X, S>, range: Range<usize>) {
    let len = a.tad.total_length();
    let zs = a.z.ews();
    for k in range {
        let base = a.offsets[k];
        let out = fold_with(a.fold, len, |j| unsafe { a.x.read(base + a.tad_decoder.offset(j)) });
        unsafe { a.z.write(k as isize * zs, out) };
    }
}

fn common<X: Copy, S: SliceFold<X>>(a: &SliceArgs<'_, X, S>, range: Range<usize>) {
    let len = a.tad.total_length();
    for k in range {
        let base = a.offsets[k];
        let out = fold_with(a.fold, len, |j| unsafe { a.x.read(base + a.tad_decoder.offset(j)) });
        unsafe { a.z.write(a.z.decode(k), out) };
    }
}

/// Scatter-accumulate a contiguous rank-2 input whose slices are its
/// columns: element `p` of the buffer belongs to slice `p % z_len`, and
/// walking `p` upwards visits every slice first-to-last.
fn small_arr_2d_x<X, Z, S>(x: &RawArray<'_, X>, z: &RawArray<'_, Z>, fold: &S, slice_len: usize)
where
    X: Copy,
    Z: Copy,
    S: SliceFold<X, Acc = Z, Out = Z>,
{
    let z_len = z.shape().total_length();
    let x_len = x.shape().total_length();
    // SAFETY: x is contiguous over 0..x_len, z over 0..z_len; single task.
    unsafe {
        let xs = x.slice(0, x_len);
        let zs = z.slice_mut(0, z_len);
        for (k, slot) in zs.iter_mut().enumerate() {
            *slot = fold.start(xs[k]);
        }
        for (p, &v) in xs.iter().enumerate() {
            let k = p % z_len;
            zs[k] = fold.step(zs[k], p / z_len, v);
        }
        for slot in zs.iter_mut() {
            *slot = fold.finish(*slot, slice_len);
        }
    }
}
