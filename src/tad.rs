//! Slice descriptors and precomputed slice offset tables.

use std::fmt;

use smallvec::smallvec;

use crate::loops::Operand;
use crate::shape::{DimVec, ShapeDescriptor};
use crate::{LoopError, Result};

/// Cache key: an array layout, the axes every slice spans, and whether the
/// remaining axes are kept as unit dimensions in the slice shape.
///
/// Equality and hashing cover all three fields. The axis list is compared
/// as given, so `[0, 2]` and `[2, 0]` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TadDescriptor {
    shape: ShapeDescriptor,
    axes: DimVec<usize>,
    keep_unities: bool,
}

impl TadDescriptor {
    /// Describe the slices of `shape` spanning `axes`.
    ///
    /// An empty list selects the whole array as a single slice.
    ///
    /// # Errors
    /// [`LoopError::AxisOutOfRange`] for an axis `>= rank`,
    /// [`LoopError::DuplicateAxis`] for an axis listed twice.
    pub fn new(shape: ShapeDescriptor, axes: &[usize], keep_unities: bool) -> Result<Self> {
        let rank = shape.rank();
        let mut seen = [false; crate::MAX_RANK];
        for &axis in axes {
            if axis >= rank {
                return Err(LoopError::AxisOutOfRange { axis, rank });
            }
            if seen[axis] {
                return Err(LoopError::DuplicateAxis { axis });
            }
            seen[axis] = true;
        }
        Ok(Self {
            shape,
            axes: DimVec::from_slice(axes),
            keep_unities,
        })
    }

    /// Slices spanning the single axis `axis` (rows, columns, fibers).
    pub fn along(shape: ShapeDescriptor, axis: usize) -> Result<Self> {
        Self::new(shape, &[axis], false)
    }

    pub fn shape(&self) -> &ShapeDescriptor {
        &self.shape
    }

    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    pub fn keep_unities(&self) -> bool {
        self.keep_unities
    }

    /// True when the slice is the whole array (empty list or every axis).
    pub fn spans_whole_array(&self) -> bool {
        self.axes.is_empty() || self.axes.len() == self.shape.rank()
    }

    /// Axes that index slices, ascending. Empty when one slice covers the array.
    pub fn excluded_axes(&self) -> DimVec<usize> {
        if self.spans_whole_array() {
            return DimVec::new();
        }
        (0..self.shape.rank())
            .filter(|axis| !self.axes.contains(axis))
            .collect()
    }
}

impl fmt::Display for TadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} along {:?}{}",
            self.shape,
            self.axes.as_slice(),
            if self.keep_unities { " (keep unities)" } else { "" }
        )
    }
}

/// One shared slice layout plus the base offset of every slice.
///
/// Offsets are in elements, relative to the base of the original array.
/// A pack with no slices still stores one placeholder offset `0`; use
/// [`SlicePack::num_slices`] or [`SlicePack::iter_offsets`] to iterate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePack {
    slice_shape: ShapeDescriptor,
    offsets: Box<[isize]>,
    num_slices: usize,
}

impl SlicePack {
    /// Shape shared by every slice.
    #[inline]
    pub fn slice_shape(&self) -> &ShapeDescriptor {
        &self.slice_shape
    }

    /// Stored offsets, including the placeholder of an empty pack.
    #[inline]
    pub fn offsets(&self) -> &[isize] {
        &self.offsets
    }

    #[inline]
    pub fn num_slices(&self) -> usize {
        self.num_slices
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_slices == 0
    }

    /// Elements per slice.
    #[inline]
    pub fn slice_length(&self) -> usize {
        self.slice_shape.total_length()
    }

    /// Base offset of slice `i`, or `None` past the last slice.
    #[inline]
    pub fn slice_offset(&self, i: usize) -> Option<isize> {
        if i < self.num_slices {
            Some(self.offsets[i])
        } else {
            None
        }
    }

    /// Offsets of the real slices only.
    pub fn iter_offsets(&self) -> impl ExactSizeIterator<Item = isize> + '_ {
        self.offsets[..self.num_slices].iter().copied()
    }

    /// View slice `i` of an array this pack was computed for.
    ///
    /// # Errors
    /// [`LoopError::InvalidArgument`] if `i` is out of range; bounds errors if
    /// the slice does not fit in the array's buffer.
    pub fn slice_view<'a, T>(&'a self, array: &Operand<'a, T>, i: usize) -> Result<Operand<'a, T>> {
        let offset = self.slice_offset(i).ok_or_else(|| {
            LoopError::InvalidArgument(format!(
                "slice {i} out of range for {} slices",
                self.num_slices
            ))
        })?;
        array.reslice(&self.slice_shape, offset)
    }

    /// Smallest and largest element offset touched by any slice.
    pub(crate) fn offset_bounds(&self) -> Option<(isize, isize)> {
        let lo = self.slice_shape.min_offset()?;
        let hi = self.slice_shape.max_offset()?;
        let mut iter = self.iter_offsets();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(a, b), o| (a.min(o), b.max(o)));
        Some((min + lo, max + hi))
    }
}

impl fmt::Display for SlicePack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} slices of {}", self.num_slices, self.slice_shape)
    }
}

/// Build the pack for a descriptor.
///
/// Offsets are enumerated with an odometer over the excluded axes, the last
/// excluded axis varying fastest.
pub(crate) fn compute_slice_pack(desc: &TadDescriptor) -> Result<SlicePack> {
    let shape = desc.shape();
    if desc.spans_whole_array() {
        return Ok(SlicePack {
            slice_shape: shape.clone(),
            offsets: vec![0].into_boxed_slice(),
            num_slices: 1,
        });
    }

    let excluded = desc.excluded_axes();
    let slice_shape = slice_shape_of(desc, &excluded)?;
    let num_slices: usize = excluded.iter().map(|&a| shape.extent_at(a)).product();
    if num_slices == 0 {
        return Ok(SlicePack {
            slice_shape,
            offsets: vec![0].into_boxed_slice(),
            num_slices: 0,
        });
    }

    let extents: DimVec<usize> = excluded.iter().map(|&a| shape.extent_at(a)).collect();
    let strides: DimVec<isize> = excluded.iter().map(|&a| shape.stride_at(a)).collect();
    let mut coords: DimVec<usize> = smallvec![0; excluded.len()];
    let mut offsets = Vec::with_capacity(num_slices);
    let mut offset = 0isize;

    offsets.push(offset);
    for _ in 1..num_slices {
        let mut j = excluded.len() - 1;
        // Never step past the last coordinate: every intermediate offset is a
        // reachable one, which the descriptor guarantees fits in `isize`.
        loop {
            if coords[j] + 1 < extents[j] {
                coords[j] += 1;
                offset += strides[j];
                break;
            }
            offset -= coords[j] as isize * strides[j];
            coords[j] = 0;
            j -= 1;
        }
        offsets.push(offset);
    }

    Ok(SlicePack {
        slice_shape,
        offsets: offsets.into_boxed_slice(),
        num_slices,
    })
}

fn slice_shape_of(desc: &TadDescriptor, excluded: &[usize]) -> Result<ShapeDescriptor> {
    let shape = desc.shape();
    let (extents, strides): (DimVec<usize>, DimVec<isize>) = if desc.keep_unities() {
        (0..shape.rank())
            .map(|a| {
                let extent = if excluded.contains(&a) { 1 } else { shape.extent_at(a) };
                (extent, shape.stride_at(a))
            })
            .unzip()
    } else {
        (0..shape.rank())
            .filter(|a| !excluded.contains(a))
            .map(|a| (shape.extent_at(a), shape.stride_at(a)))
            .unzip()
    };
    ShapeDescriptor::new(&extents, &strides, shape.order())
}
