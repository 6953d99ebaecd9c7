//! Three-operand element-wise loops: `z[i] = f(x[i], y[i])`.

use std::ops::Range;

use super::nested::Nest;
use super::{
    check_requested_kind, check_same_length, min_outer_units, walk_reversed, Launch, Operand,
    OperandMut, RawArray,
};
use crate::loop_kind::{classify_xyz, LoopKind};
use crate::Result;

struct PairwiseArgs<'a, X, Y, Z, F> {
    x: RawArray<'a, X>,
    y: RawArray<'a, Y>,
    z: RawArray<'a, Z>,
    f: &'a F,
    nest: Option<Nest<3>>,
}

type Kernel<'a, X, Y, Z, F> = fn(&PairwiseArgs<'a, X, Y, Z, F>, Range<usize>);

/// Apply `f` element-wise over `x` and `y`, writing `z`.
///
/// All three operands must hold the same number of elements. Returns the
/// loop kind that was executed.
pub fn run_element_wise<X, Y, Z, F>(
    launch: &Launch<'_>,
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
    validate(&x, &y, &z)?;
    let kind = classify_xyz(x.shape(), y.shape(), z.shape());
    execute(launch, kind, x, y, z, &f);
    Ok(kind)
}

/// [`run_element_wise`] forcing `kind`, which must be the classified kind or
/// [`LoopKind::Common`].
pub fn run_element_wise_with_kind<X, Y, Z, F>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: Operand<'_, X>,
    y: Operand<'_, Y>,
    z: OperandMut<'_, Z>,
    f: F,
) -> Result<()>
where
    X: Copy + Sync,
    Y: Copy + Sync,
    Z: Send,
    F: Fn(X, Y) -> Z + Sync,
{
    validate(&x, &y, &z)?;
    check_requested_kind(kind, classify_xyz(x.shape(), y.shape(), z.shape()))?;
    execute(launch, kind, x, y, z, &f);
    Ok(())
}

fn validate<X, Y, Z>(x: &Operand<'_, X>, y: &Operand<'_, Y>, z: &OperandMut<'_, Z>) -> Result<()> {
    check_same_length(z.len(), x.len())?;
    check_same_length(z.len(), y.len())
}

fn execute<X, Y, Z, F>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: Operand<'_, X>,
    y: Operand<'_, Y>,
    mut z: OperandMut<'_, Z>,
    f: &F,
) where
    X: Copy + Sync,
    Y: Copy + Sync,
    Z: Send,
    F: Fn(X, Y) -> Z + Sync,
{
    let len = z.len();
    if len == 0 {
        return;
    }
    let min_elements = launch.config().min_elements_per_task;
    let nest = kind.rank().map(|_| {
        let shapes = [x.shape(), y.shape(), z.shape()];
        Nest::lockstep(shapes, walk_reversed(&shapes))
    });
    let args = PairwiseArgs {
        x: x.raw(),
        y: y.raw(),
        z: z.raw(),
        f,
        nest,
    };
    match &args.nest {
        Some(nest) => launch.execute(
            nest.outer_extent(),
            min_outer_units(min_elements, nest.inner_length()),
            &args,
            kernel_for(kind),
        ),
        None => launch.execute(len, min_elements, &args, kernel_for(kind)),
    }
}

fn kernel_for<'a, X, Y, Z, F>(kind: LoopKind) -> Kernel<'a, X, Y, Z, F>
where
    X: Copy,
    Y: Copy,
    F: Fn(X, Y) -> Z,
{
    match kind {
        LoopKind::Ews1 => ews1 as Kernel<'a, X, Y, Z, F>,
        LoopKind::EwsNonZero => ews_nonzero as Kernel<'a, X, Y, Z, F>,
        LoopKind::Rank1
        | LoopKind::Rank2
        | LoopKind::Rank3
        | LoopKind::Rank4
        | LoopKind::Rank5 => rank as Kernel<'a, X, Y, Z, F>,
        _ => common as Kernel<'a, X, Y, Z, F>,
    }
}

fn ews1<X, Y, Z, F>(a: &PairwiseArgs<'_, X, Y, Z, F>, range: Range<usize>)
where
    X: Copy,
    Y: Copy,
    F: Fn(X, Y) -> Z,
{
    let start = range.start as isize;
    let n = range.len();
    // SAFETY: contiguous operands hold elements 0..len at offsets 0..len, and
    // this task owns `range` of the output.
    let (xs, ys, zs) = unsafe {
        (
            a.x.slice(start, n),
            a.y.slice(start, n),
            a.z.slice_mut(start, n),
        )
    };
    for ((z, &x), &y) in zs.iter_mut().zip(xs).zip(ys) {
        *z = (a.f)(x, y);
    }
}

fn ews_nonzero<X, Y, Z, F>(a: &PairwiseArgs<'_, X, Y, Z, F>, range: Range<usize>)
where
    X: Copy,
    Y: Copy,
    F: Fn(X, Y) -> Z,
{
    let (xs, ys, zs) = (a.x.ews(), a.y.ews(), a.z.ews());
    for i in range {
        let i = i as isize;
        // SAFETY: element i of a uniformly strided operand sits at i * ews.
        unsafe { a.z.write(i * zs, (a.f)(a.x.read(i * xs), a.y.read(i * ys))) };
    }
}

fn rank<X, Y, Z, F>(a: &PairwiseArgs<'_, X, Y, Z, F>, range: Range<usize>)
where
    X: Copy,
    Y: Copy,
    F: Fn(X, Y) -> Z,
{
    let Some(nest) = &a.nest else {
        return common(a, range);
    };
    nest.visit(range, [0; 3], &mut |o: &[isize; 3]| {
        // SAFETY: the nest only yields offsets of elements of each operand.
        unsafe { a.z.write(o[2], (a.f)(a.x.read(o[0]), a.y.read(o[1]))) };
    });
}

fn common<X, Y, Z, F>(a: &PairwiseArgs<'_, X, Y, Z, F>, range: Range<usize>)
where
    X: Copy,
    Y: Copy,
    F: Fn(X, Y) -> Z,
{
    for i in range {
        // SAFETY: decoded offsets address elements of the validated operands.
        unsafe {
            let v = (a.f)(a.x.read(a.x.decode(i)), a.y.read(a.y.decode(i)));
            a.z.write(a.z.decode(i), v);
        }
    }
}
