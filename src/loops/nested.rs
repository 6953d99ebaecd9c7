//! Rank-unrolled visitors.
//!
//! A [`Nest`] walks `R <= 5` axes for `N` operands in lockstep, outermost axis
//! first. Offsets are advanced incrementally; no coordinate is ever decoded.
//! The outermost axis can be restricted to a sub-range so callers may split
//! it across tasks.

use std::ops::Range;

use crate::shape::{DimVec, ShapeDescriptor};

/// Axes and per-operand strides of one lockstep walk.
#[derive(Debug, Clone)]
pub(crate) struct Nest<const N: usize> {
    /// Extents, outermost first.
    dims: DimVec<usize>,
    /// `strides[axis][operand]`, same axis order as `dims`.
    strides: DimVec<[isize; N]>,
}

impl<const N: usize> Nest<N> {
    /// Walk `shapes` (identical extents) in row-major axis order, or in
    /// reversed axis order when `reversed` is set.
    pub(crate) fn lockstep(shapes: [&ShapeDescriptor; N], reversed: bool) -> Self {
        let rank = shapes[0].rank();
        let axes: DimVec<usize> = if reversed {
            (0..rank).rev().collect()
        } else {
            (0..rank).collect()
        };
        Self {
            dims: axes.iter().map(|&a| shapes[0].extent_at(a)).collect(),
            strides: axes
                .iter()
                .map(|&a| std::array::from_fn(|k| shapes[k].stride_at(a)))
                .collect(),
        }
    }

    #[inline]
    pub(crate) fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Extent of the outermost axis (1 for rank 0).
    #[inline]
    pub(crate) fn outer_extent(&self) -> usize {
        self.dims.first().copied().unwrap_or(1)
    }

    /// Elements visited per step of the outermost axis.
    #[inline]
    pub(crate) fn inner_length(&self) -> usize {
        self.dims.iter().skip(1).product()
    }

    /// Call `f` with the offsets of every element whose outermost coordinate
    /// lies in `outer`, in walk order. `offsets` are the operands' bases.
    #[inline]
    pub(crate) fn visit<F>(&self, outer: Range<usize>, offsets: [isize; N], f: &mut F)
    where
        F: FnMut(&[isize; N]),
    {
        match self.rank() {
            1 => visit_rank1(&self.dims, &self.strides, outer, offsets, f),
            2 => visit_rank2(&self.dims, &self.strides, outer, offsets, f),
            3 => visit_rank3(&self.dims, &self.strides, outer, offsets, f),
            4 => visit_rank4(&self.dims, &self.strides, outer, offsets, f),
            5 => visit_rank5(&self.dims, &self.strides, outer, offsets, f),
            rank => unreachable!("no unrolled visitor for rank {rank}"),
        }
    }
}

impl Nest<1> {
    /// Walk a single layout in its own order.
    pub(crate) fn single(shape: &ShapeDescriptor) -> Self {
        let (dims, strides) = shape.walk_axes();
        Self {
            dims,
            strides: strides.iter().map(|&s| [s]).collect(),
        }
    }
}

#[inline(always)]
fn advance<const N: usize>(offsets: &mut [isize; N], strides: &[isize; N], steps: isize) {
    for (o, s) in offsets.iter_mut().zip(strides.iter()) {
        *o += steps * s;
    }
}

#[inline]
fn visit_rank1<const N: usize, F>(
    _dims: &[usize],
    strides: &[[isize; N]],
    outer: Range<usize>,
    mut offsets: [isize; N],
    f: &mut F,
) where
    F: FnMut(&[isize; N]),
{
    advance(&mut offsets, &strides[0], outer.start as isize);
    for _ in outer {
        f(&offsets);
        advance(&mut offsets, &strides[0], 1);
    }
}

#[inline]
fn visit_rank2<const N: usize, F>(
    dims: &[usize],
    strides: &[[isize; N]],
    outer: Range<usize>,
    mut offsets: [isize; N],
    f: &mut F,
) where
    F: FnMut(&[isize; N]),
{
    let d1 = dims[1];
    advance(&mut offsets, &strides[0], outer.start as isize);
    for _ in outer {
        for _ in 0..d1 {
            f(&offsets);
            advance(&mut offsets, &strides[1], 1);
        }
        advance(&mut offsets, &strides[1], -(d1 as isize));
        advance(&mut offsets, &strides[0], 1);
    }
}

#[inline]
fn visit_rank3<const N: usize, F>(
    dims: &[usize],
    strides: &[[isize; N]],
    outer: Range<usize>,
    mut offsets: [isize; N],
    f: &mut F,
) where
    F: FnMut(&[isize; N]),
{
    let (d1, d2) = (dims[1], dims[2]);
    advance(&mut offsets, &strides[0], outer.start as isize);
    for _ in outer {
        for _ in 0..d1 {
            for _ in 0..d2 {
                f(&offsets);
                advance(&mut offsets, &strides[2], 1);
            }
            advance(&mut offsets, &strides[2], -(d2 as isize));
            advance(&mut offsets, &strides[1], 1);
        }
        advance(&mut offsets, &strides[1], -(d1 as isize));
        advance(&mut offsets, &strides[0], 1);
    }
}

#[inline]
fn visit_rank4<const N: usize, F>(
    dims: &[usize],
    strides: &[[isize; N]],
    outer: Range<usize>,
    mut offsets: [isize; N],
    f: &mut F,
) where
    F: FnMut(&[isize; N]),
{
    let (d1, d2, d3) = (dims[1], dims[2], dims[3]);
    advance(&mut offsets, &strides[0], outer.start as isize);
    for _ in outer {
        for _ in 0..d1 {
            for _ in 0..d2 {
                for _ in 0..d3 {
                    f(&offsets);
                    advance(&mut offsets, &strides[3], 1);
                }
                advance(&mut offsets, &strides[3], -(d3 as isize));
                advance(&mut offsets, &strides[2], 1);
            }
            advance(&mut offsets, &strides[2], -(d2 as isize));
            advance(&mut offsets, &strides[1], 1);
        }
        advance(&mut offsets, &strides[1], -(d1 as isize));
        advance(&mut offsets, &strides[0], 1);
    }
}

#[inline]
fn visit_rank5<const N: usize, F>(
    dims: &[usize],
    strides: &[[isize; N]],
    outer: Range<usize>,
    mut offsets: [isize; N],
    f: &mut F,
) where
    F: FnMut(&[isize; N]),
{
    let (d1, d2, d3, d4) = (dims[1], dims[2], dims[3], dims[4]);
    advance(&mut offsets, &strides[0], outer.start as isize);
    for _ in outer {
        for _ in 0..d1 {
            for _ in 0..d2 {
                for _ in 0..d3 {
                    for _ in 0..d4 {
                        f(&offsets);
                        advance(&mut offsets, &strides[4], 1);
                    }
                    advance(&mut offsets, &strides[4], -(d4 as isize));
                    advance(&mut offsets, &strides[3], 1);
                }
                advance(&mut offsets, &strides[3], -(d3 as isize));
                advance(&mut offsets, &strides[2], 1);
            }
            advance(&mut offsets, &strides[2], -(d2 as isize));
            advance(&mut offsets, &strides[1], 1);
        }
        advance(&mut offsets, &strides[1], -(d1 as isize));
        advance(&mut offsets, &strides[0], 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Order;

    fn collect<const N: usize>(nest: &Nest<N>, outer: Range<usize>) -> Vec<[isize; N]> {
        let mut out = Vec::new();
        nest.visit(outer, [0; N], &mut |o: &[isize; N]| out.push(*o));
        out
    }

    #[test]
    fn test_matches_index_offset() {
        let cases: [&[usize]; 5] = [&[7], &[3, 4], &[2, 3, 4], &[2, 1, 3, 2], &[2, 2, 1, 3, 2]];
        for extents in cases {
            let c = ShapeDescriptor::row_major(extents).unwrap();
            let got: Vec<isize> = collect(&Nest::single(&c), 0..extents[0])
                .into_iter()
                .map(|[o]| o)
                .collect();
            let want: Vec<isize> = (0..c.total_length()).map(|i| c.index_offset(i)).collect();
            assert_eq!(got, want);
        }
    }

    #[test]
    fn test_column_major_walks_own_order() {
        let f = ShapeDescriptor::column_major(&[2, 3, 4]).unwrap();
        let nest = Nest::single(&f);
        let got: Vec<isize> = collect(&nest, 0..nest.outer_extent())
            .into_iter()
            .map(|[o]| o)
            .collect();
        let want: Vec<isize> = (0..24).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_outer_subrange() {
        let a = ShapeDescriptor::row_major(&[4, 3]).unwrap();
        let b = ShapeDescriptor::new(&[4, 3], &[1, 4], Order::RowMajor).unwrap();
        let nest = Nest::lockstep([&a, &b], false);
        assert_eq!(nest.inner_length(), 3);
        let got = collect(&nest, 2..3);
        assert_eq!(got, vec![[6, 2], [7, 6], [8, 10]]);
    }
}
