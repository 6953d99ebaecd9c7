//! Two-operand element-wise loops: `z[i] = f(x[i])`.

use std::ops::Range;

use super::nested::Nest;
use super::{
    check_requested_kind, check_same_length, min_outer_units, walk_reversed, Launch, Operand,
    OperandMut, RawArray,
};
use crate::loop_kind::{classify_xz, LoopKind};
use crate::Result;

struct TransformArgs<'a, X, Z, F> {
    x: RawArray<'a, X>,
    z: RawArray<'a, Z>,
    f: &'a F,
    nest: Option<Nest<2>>,
}

type Kernel<'a, X, Z, F> = fn(&TransformArgs<'a, X, Z, F>, Range<usize>);

/// Apply `f` to every element of `x`, writing `z`.
///
/// Both operands must hold the same number of elements. Besides the kinds
/// shared with [`run_element_wise`](super::run_element_wise), this loop can
/// run one side by constant stride while decoding the other
/// ([`LoopKind::XEwsNonZero`], [`LoopKind::ZEwsNonZero`]).
pub fn run_transform<X, Z, F>(
    launch: &Launch<'_>,
    x: Operand<'_, X>,
    mut z: OperandMut<'_, Z>,
    f: F,
) -> Result<LoopKind>
where
    X: Copy + Sync,
    Z: Send,
    F: Fn(X) -> Z + Sync,
{
    check_same_length(z.len(), x.len())?;
    let kind = classify_xz(x.shape(), z.shape());
    execute(launch, kind, x.raw(), z.raw(), &f);
    Ok(kind)
}

/// Apply `f` to every element of `z`, overwriting it.
///
/// This is the aliased form of [`run_transform`] (input and output are the
/// same array), which the borrow rules forbid expressing with separate
/// [`Operand`] and [`OperandMut`] views of one buffer.
pub fn run_transform_in_place<T, F>(
    launch: &Launch<'_>,
    mut z: OperandMut<'_, T>,
    f: F,
) -> Result<LoopKind>
where
    T: Copy + Send + Sync,
    F: Fn(T) -> T + Sync,
{
    let kind = classify_xz(z.shape(), z.shape());
    let zr = z.raw();
    let xr = zr.alias();
    // `ews1` borrows input and output as slices, which must not alias.
    let kernel_kind = if kind == LoopKind::Ews1 {
        LoopKind::EwsNonZero
    } else {
        kind
    };
    execute(launch, kernel_kind, xr, zr, &f);
    Ok(kind)
}

/// [`run_transform`] forcing `kind`, which must be the classified kind or
/// [`LoopKind::Common`].
pub fn run_transform_with_kind<X, Z, F>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: Operand<'_, X>,
    mut z: OperandMut<'_, Z>,
    f: F,
) -> Result<()>
where
    X: Copy + Sync,
    Z: Send,
    F: Fn(X) -> Z + Sync,
{
    check_same_length(z.len(), x.len())?;
    check_requested_kind(kind, classify_xz(x.shape(), z.shape()))?;
    execute(launch, kind, x.raw(), z.raw(), &f);
    Ok(())
}

fn execute<X, Z, F>(
    launch: &Launch<'_>,
    kind: LoopKind,
    x: RawArray<'_, X>,
    z: RawArray<'_, Z>,
    f: &F,
) where
    X: Copy + Sync,
    Z: Send,
    F: Fn(X) -> Z + Sync,
{
    let len = z.shape().total_length();
    if len == 0 {
        return;
    }
    let min_elements = launch.config().min_elements_per_task;
    let nest = kind.rank().map(|_| {
        let shapes = [x.shape(), z.shape()];
        Nest::lockstep(shapes, walk_reversed(&shapes))
    });
    let args = TransformArgs { x, z, f, nest };
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

fn kernel_for<'a, X, Z, F>(kind: LoopKind) -> Kernel<'a, X, Z, F>
where
    X: Copy,
    F: Fn(X) -> Z,
{
    match kind {
        LoopKind::Ews1 => ews1 as Kernel<'a, X, Z, F>,
        LoopKind::EwsNonZero => ews_nonzero as Kernel<'a, X, Z, F>,
        LoopKind::Rank1
        | LoopKind::Rank2
        | LoopKind::Rank3
        | LoopKind::Rank4
        | LoopKind::Rank5 => rank as Kernel<'a, X, Z, F>,
        LoopKind::XEwsNonZero => x_ews as Kernel<'a, X, Z, F>,
        LoopKind::ZEwsNonZero => z_ews as Kernel<'a, X, Z, F>,
        _ => common as Kernel<'a, X, Z, F>,
    }
}

fn ews1<X, Z, F>(a: &TransformArgs<'_, X, Z, F>, range: Range<usize>)
where
    X: Copy,
    F: Fn(X) -> Z,
{
    let start = range.start as isize;
    let n = range.len();
    // SAFETY: contiguous operands; this task owns `range` of the output.
    let (xs, zs) = unsafe { (a.x.slice(start, n), a.z.slice_mut(start, n)) };
    for (z, &x) in zs.iter_mut().zip(xs) {
        *z = (a.f)(x);
    }
}

fn ews_nonzero<X, Z, F>(a: &TransformArgs<'_, X, Z, F>, range: Range<usize>)
where
    X: Copy,
    F: Fn(X) -> Z,
{
    let (xs, zs) = (a.x.ews(), a.z.ews());
    for i in range {
        let i = i as isize;
        // SAFETY: element i of a uniformly strided operand sits at i * ews.
        unsafe { a.z.write(i * zs, (a.f)(a.x.read(i * xs))) };
    }
}

fn rank<X, Z, F>(a: &TransformArgs<'_, X, Z, F>, range: Range<usize>)
where
    X: Copy,
    F: Fn(X) -> Z,
{
    let Some(nest) = &a.nest else {
        return common(a, range);
    };
    nest.visit(range, [0; 2], &mut |o: &[isize; 2]| {
        // SAFETY: the nest only yields offsets of elements of each operand.
        unsafe { a.z.write(o[1], (a.f)(a.x.read(o[0]))) };
    });
}

fn x_ews<X, Z, F>(a: &TransformArgs<'_, X, Z, F>, range: Range<usize>)
where
    X: Copy,
    F: Fn(X) -> Z,
{
    let xs = a.x.ews();
    for i in range {
        // SAFETY: strided input, decoded output, both within bounds.
        unsafe { a.z.write(a.z.decode(i), (a.f)(a.x.read(i as isize * xs))) };
    }
}

fn z_ews<X, Z, F>(a: &TransformArgs<'_, X, Z, F>, range: Range<usize>)
where
    X: Copy,
    F: Fn(X) -> Z,
{
    let zs = a.z.ews();
    for i in range {
        // SAFETY: decoded input, strided output, both within bounds.
        unsafe { a.z.write(i as isize * zs, (a.f)(a.x.read(a.x.decode(i)))) };
    }
}

fn common<X, Z, F>(a: &TransformArgs<'_, X, Z, F>, range: Range<usize>)
where
    X: Copy,
    F: Fn(X) -> Z,
{
    for i in range {
        // SAFETY: decoded offsets address elements of the validated operands.
        unsafe { a.z.write(a.z.decode(i), (a.f)(a.x.read(a.x.decode(i)))) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Order, ShapeDescriptor};

    #[test]
    fn test_strided_input_into_padded_output() {
        let xs = ShapeDescriptor::row_major(&[6]).unwrap();
        let zs = ShapeDescriptor::new(&[2, 3], &[4, 1], Order::RowMajor).unwrap();
        let x = [1, 2, 3, 4, 5, 6];
        let mut z = [0; 7];
        let kind = run_transform(
            &Launch::sequential(),
            Operand::new(&xs, &x).unwrap(),
            OperandMut::new(&zs, &mut z).unwrap(),
            |v| v * 10,
        )
        .unwrap();
        assert_eq!(kind, LoopKind::XEwsNonZero);
        assert_eq!(z, [10, 20, 30, 0, 40, 50, 60]);
    }

    #[test]
    fn test_reversed_input() {
        let xs = ShapeDescriptor::new(&[4], &[-1], Order::RowMajor).unwrap();
        let zs = ShapeDescriptor::row_major(&[4]).unwrap();
        let x = [1.0, 2.0, 3.0, 4.0];
        let mut z = [0.0; 4];
        let kind = run_transform(
            &Launch::sequential(),
            Operand::with_offset(&xs, &x, 3).unwrap(),
            OperandMut::new(&zs, &mut z).unwrap(),
            |v: f64| v,
        )
        .unwrap();
        assert_eq!(kind, LoopKind::Rank1);
        assert_eq!(z, [4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_in_place_contiguous() {
        let s = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let mut z = [1, 2, 3, 4, 5, 6];
        let kind = run_transform_in_place(
            &Launch::sequential(),
            OperandMut::new(&s, &mut z).unwrap(),
            |v| v * v,
        )
        .unwrap();
        assert_eq!(kind, LoopKind::Ews1);
        assert_eq!(z, [1, 4, 9, 16, 25, 36]);
    }

    #[test]
    fn test_in_place_leaves_gaps_untouched() {
        let s = ShapeDescriptor::new(&[2, 3], &[4, 1], Order::RowMajor).unwrap();
        let mut z = [1, 2, 3, -1, 4, 5, 6];
        let kind = run_transform_in_place(
            &Launch::sequential(),
            OperandMut::new(&s, &mut z).unwrap(),
            |v| v + 100,
        )
        .unwrap();
        assert_eq!(kind, LoopKind::Rank2);
        assert_eq!(z, [101, 102, 103, -1, 104, 105, 106]);
    }

    #[test]
    fn test_type_changing_transform() {
        let s = ShapeDescriptor::column_major(&[2, 2]).unwrap();
        let x = [1.5f32, -2.0, 0.0, 3.25];
        let mut z = [false; 4];
        run_transform(
            &Launch::sequential(),
            Operand::new(&s, &x).unwrap(),
            OperandMut::new(&s, &mut z).unwrap(),
            |v| v > 0.0,
        )
        .unwrap();
        assert_eq!(z, [true, false, false, true]);
    }
}
