//! Run-time layout descriptors.
//!
//! A [`ShapeDescriptor`] is the canonical, hashable description of how one
//! array is laid out in its buffer: extents, strides (in elements, possibly
//! negative), the logical [`Order`] used to enumerate linear indices, and the
//! derived element-wise stride (ews).

use std::fmt;

use smallvec::SmallVec;

use crate::{LoopError, Result, MAX_RANK};

/// Inline storage for per-axis data; spills to the heap above rank 8.
pub(crate) type DimVec<T> = SmallVec<[T; 8]>;

/// Order in which linear indices enumerate the elements of an array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Order {
    /// Last axis varies fastest ('c').
    #[default]
    RowMajor,
    /// First axis varies fastest ('f').
    ColumnMajor,
}

impl Order {
    /// The single-character code used in shape headers.
    pub fn as_char(self) -> char {
        match self {
            Order::RowMajor => 'c',
            Order::ColumnMajor => 'f',
        }
    }

    /// Parse a shape-header order code.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'c' | 'C' => Some(Order::RowMajor),
            'f' | 'F' => Some(Order::ColumnMajor),
            _ => None,
        }
    }
}

/// Immutable layout of one array.
///
/// The element-wise stride is never supplied by the caller; it is recomputed
/// from extents, strides and order on every construction:
///
/// - `1` when the array is contiguous when walked in its order,
/// - `s > 1` when walking it in order advances by a constant `s`,
/// - `0` when no single stride describes the walk.
///
/// Unit extents are ignored by this computation, and arrays with at most one
/// element always report `1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeDescriptor {
    extents: DimVec<usize>,
    strides: DimVec<isize>,
    order: Order,
    ews: isize,
}

impl ShapeDescriptor {
    /// Create a descriptor from explicit extents and strides.
    ///
    /// # Errors
    /// [`LoopError::InvalidShape`] if the rank exceeds [`MAX_RANK`], if the
    /// extent and stride lists differ in length, if the element count exceeds
    /// `isize::MAX`, or if some element's offset does not fit in `isize`.
    pub fn new(extents: &[usize], strides: &[isize], order: Order) -> Result<Self> {
        if extents.len() > MAX_RANK {
            return Err(LoopError::InvalidShape(format!(
                "rank {} exceeds maximum rank {}",
                extents.len(),
                MAX_RANK
            )));
        }
        if extents.len() != strides.len() {
            return Err(LoopError::InvalidShape(format!(
                "{} extents but {} strides",
                extents.len(),
                strides.len()
            )));
        }
        extents
            .iter()
            .try_fold(1usize, |acc, &e| acc.checked_mul(e))
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or_else(|| {
                LoopError::InvalidShape(format!("element count of {extents:?} overflows"))
            })?;
        offset_span(extents, strides).ok_or_else(|| {
            LoopError::InvalidShape(format!(
                "offsets of extents {extents:?} with strides {strides:?} overflow"
            ))
        })?;

        let ews = compute_ews(extents, strides, order);
        Ok(Self {
            extents: DimVec::from_slice(extents),
            strides: DimVec::from_slice(strides),
            order,
            ews,
        })
    }

    /// Dense row-major layout.
    pub fn row_major(extents: &[usize]) -> Result<Self> {
        let strides = dense_strides(extents, Order::RowMajor)?;
        Self::new(extents, &strides, Order::RowMajor)
    }

    /// Dense column-major layout.
    pub fn column_major(extents: &[usize]) -> Result<Self> {
        let strides = dense_strides(extents, Order::ColumnMajor)?;
        Self::new(extents, &strides, Order::ColumnMajor)
    }

    /// Rank-0 layout holding a single element.
    pub fn scalar() -> Self {
        Self {
            extents: DimVec::new(),
            strides: DimVec::new(),
            order: Order::RowMajor,
            ews: 1,
        }
    }

    /// Decode a flat shape header `[rank, extents.., strides.., extra, ews, order]`.
    ///
    /// The stored ews is ignored and recomputed; `extra` carries type flags
    /// that this crate does not interpret.
    pub fn from_shape_info(info: &[i64]) -> Result<Self> {
        let rank = *info
            .first()
            .ok_or_else(|| LoopError::InvalidShape("empty shape header".into()))?;
        if rank < 0 || rank as usize > MAX_RANK {
            return Err(LoopError::InvalidShape(format!("header rank {rank} out of range")));
        }
        let rank = rank as usize;
        let expected = shape_info_length(rank);
        if info.len() < expected {
            return Err(LoopError::InvalidShape(format!(
                "header for rank {rank} needs {expected} entries, got {}",
                info.len()
            )));
        }

        let mut extents: DimVec<usize> = DimVec::with_capacity(rank);
        for &e in &info[1..=rank] {
            let e = usize::try_from(e)
                .map_err(|_| LoopError::InvalidShape(format!("negative extent {e}")))?;
            extents.push(e);
        }
        let mut strides: DimVec<isize> = DimVec::with_capacity(rank);
        for &s in &info[rank + 1..=2 * rank] {
            let s = isize::try_from(s)
                .map_err(|_| LoopError::InvalidShape(format!("stride {s} does not fit isize")))?;
            strides.push(s);
        }
        let code = info[2 * rank + 3];
        let order = u8::try_from(code)
            .ok()
            .and_then(|c| Order::from_char(c as char))
            .ok_or_else(|| LoopError::InvalidShape(format!("unknown order code {code}")))?;

        Self::new(&extents, &strides, order)
    }

    /// Encode as a flat shape header (see [`ShapeDescriptor::from_shape_info`]).
    pub fn to_shape_info(&self) -> Vec<i64> {
        let mut info = Vec::with_capacity(shape_info_length(self.rank()));
        info.push(self.rank() as i64);
        info.extend(self.extents.iter().map(|&e| e as i64));
        info.extend(self.strides.iter().map(|&s| s as i64));
        info.push(0);
        info.push(self.ews as i64);
        info.push(self.order.as_char() as i64);
        info
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    #[inline]
    pub fn extent_at(&self, axis: usize) -> usize {
        self.extents[axis]
    }

    #[inline]
    pub fn stride_at(&self, axis: usize) -> isize {
        self.strides[axis]
    }

    #[inline]
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn order(&self) -> Order {
        self.order
    }

    /// Derived element-wise stride; see the type-level docs.
    #[inline]
    pub fn element_wise_stride(&self) -> isize {
        self.ews
    }

    /// Product of extents (1 for rank 0).
    #[inline]
    pub fn total_length(&self) -> usize {
        self.extents.iter().product()
    }

    /// True if at most one extent exceeds 1.
    pub fn is_vector(&self) -> bool {
        self.extents.iter().filter(|&&e| e > 1).count() <= 1
    }

    /// True if the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.extents.contains(&0)
    }

    /// Vectors are order-agnostic; everything else must be row-major.
    #[inline]
    pub(crate) fn is_row_major_or_vector(&self) -> bool {
        self.order == Order::RowMajor || self.is_vector()
    }

    /// Same extents, ignoring strides and order.
    #[inline]
    pub fn same_extents(&self, other: &ShapeDescriptor) -> bool {
        self.extents == other.extents
    }

    /// Smallest offset reachable by any element, or `None` for empty arrays.
    pub fn min_offset(&self) -> Option<isize> {
        if self.is_empty() {
            return None;
        }
        Some(
            self.extents
                .iter()
                .zip(self.strides.iter())
                .map(|(&e, &s)| if s < 0 { (e as isize - 1) * s } else { 0 })
                .sum(),
        )
    }

    /// Largest offset reachable by any element, or `None` for empty arrays.
    pub fn max_offset(&self) -> Option<isize> {
        if self.is_empty() {
            return None;
        }
        Some(
            self.extents
                .iter()
                .zip(self.strides.iter())
                .map(|(&e, &s)| if s > 0 { (e as isize - 1) * s } else { 0 })
                .sum(),
        )
    }

    /// Buffer offset of a multi-index.
    pub fn offset_of_coords(&self, coords: &[usize]) -> isize {
        coords
            .iter()
            .zip(self.strides.iter())
            .map(|(&c, &s)| c as isize * s)
            .sum()
    }

    /// Decode a linear index (in this descriptor's order) into a multi-index.
    pub fn index_to_coords(&self, index: usize, coords: &mut [usize]) {
        let mut rem = index;
        match self.order {
            Order::RowMajor => {
                for axis in (0..self.rank()).rev() {
                    let e = self.extents[axis];
                    coords[axis] = rem % e;
                    rem /= e;
                }
            }
            Order::ColumnMajor => {
                for axis in 0..self.rank() {
                    let e = self.extents[axis];
                    coords[axis] = rem % e;
                    rem /= e;
                }
            }
        }
    }

    /// Buffer offset of the element at a linear index (in this descriptor's order).
    ///
    /// This is the general coordinate decoding used by the fallback kernels.
    #[inline]
    pub fn index_offset(&self, index: usize) -> isize {
        let mut rem = index;
        let mut offset = 0isize;
        match self.order {
            Order::RowMajor => {
                for (&e, &s) in self.extents.iter().zip(self.strides.iter()).rev() {
                    offset += (rem % e) as isize * s;
                    rem /= e;
                }
            }
            Order::ColumnMajor => {
                for (&e, &s) in self.extents.iter().zip(self.strides.iter()) {
                    offset += (rem % e) as isize * s;
                    rem /= e;
                }
            }
        }
        offset
    }

    /// Extents and strides arranged outermost axis first for a walk in this
    /// descriptor's order.
    pub(crate) fn walk_axes(&self) -> (DimVec<usize>, DimVec<isize>) {
        match self.order {
            Order::RowMajor => (self.extents.clone(), self.strides.clone()),
            Order::ColumnMajor => (
                self.extents.iter().rev().copied().collect(),
                self.strides.iter().rev().copied().collect(),
            ),
        }
    }
}

impl fmt::Display for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[rank={} extents={:?} strides={:?} order={} ews={}]",
            self.rank(),
            self.extents.as_slice(),
            self.strides.as_slice(),
            self.order.as_char(),
            self.ews
        )
    }
}

/// Number of entries in a flat shape header of the given rank.
pub(crate) fn shape_info_length(rank: usize) -> usize {
    2 * rank + 4
}

fn dense_strides(extents: &[usize], order: Order) -> Result<DimVec<isize>> {
    let mut strides: DimVec<isize> = smallvec::smallvec![0; extents.len()];
    let mut acc = 1isize;
    let overflow = || LoopError::InvalidShape(format!("dense strides of {extents:?} overflow"));
    match order {
        Order::RowMajor => {
            for axis in (0..extents.len()).rev() {
                strides[axis] = acc;
                acc = acc.checked_mul(extents[axis].max(1) as isize).ok_or_else(overflow)?;
            }
        }
        Order::ColumnMajor => {
            for axis in 0..extents.len() {
                strides[axis] = acc;
                acc = acc.checked_mul(extents[axis].max(1) as isize).ok_or_else(overflow)?;
            }
        }
    }
    Ok(strides)
}

/// Smallest and largest offset any element can reach, or `None` if either
/// overflows. Every partial sum of per-axis terms lies between the two, so
/// offset arithmetic on a descriptor that passed this check cannot overflow.
fn offset_span(extents: &[usize], strides: &[isize]) -> Option<(isize, isize)> {
    if extents.contains(&0) {
        return Some((0, 0));
    }
    let mut lo = 0isize;
    let mut hi = 0isize;
    for (&e, &s) in extents.iter().zip(strides) {
        if e == 1 || s == 0 {
            continue;
        }
        let term = isize::try_from(e - 1).ok()?.checked_mul(s)?;
        if term < 0 {
            lo = lo.checked_add(term)?;
        } else {
            hi = hi.checked_add(term)?;
        }
    }
    Some((lo, hi))
}

fn compute_ews(extents: &[usize], strides: &[isize], order: Order) -> isize {
    if extents.iter().product::<usize>() <= 1 {
        return 1;
    }

    // Walk the non-unit axes from the fastest-varying one outwards.
    let mut dims: DimVec<(usize, isize)> = extents
        .iter()
        .zip(strides.iter())
        .filter(|&(&e, _)| e != 1)
        .map(|(&e, &s)| (e, s))
        .collect();
    if order == Order::RowMajor {
        dims.reverse();
    }

    let Some(&(_, base)) = dims.first() else {
        return 1;
    };
    if base <= 0 {
        return 0;
    }

    let mut expected = base;
    for &(extent, stride) in &dims {
        if stride != expected {
            return 0;
        }
        expected = match expected.checked_mul(extent as isize) {
            Some(v) => v,
            None => return 0,
        };
    }
    base
}

/// 32-bit copy of a layout for the general fallback.
///
/// Only built when the element count, every extent and every reachable
/// offset fit in `u32` and no stride is negative, so decoding through it
/// yields exactly the offsets [`ShapeDescriptor::index_offset`] would.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrowShape {
    extents: SmallVec<[u32; 8]>,
    strides: SmallVec<[u32; 8]>,
    order: Order,
}

impl NarrowShape {
    /// Narrow a descriptor, or `None` if any value does not fit.
    pub fn try_from_shape(shape: &ShapeDescriptor) -> Option<Self> {
        u32::try_from(shape.total_length()).ok()?;
        if shape.strides().iter().any(|&s| s < 0) {
            return None;
        }
        if let Some(max) = shape.max_offset() {
            u32::try_from(max).ok()?;
        }
        let extents = shape
            .extents()
            .iter()
            .map(|&e| u32::try_from(e).ok())
            .collect::<Option<SmallVec<[u32; 8]>>>()?;
        let strides = shape
            .strides()
            .iter()
            .map(|&s| u32::try_from(s).ok())
            .collect::<Option<SmallVec<[u32; 8]>>>()?;
        Some(Self {
            extents,
            strides,
            order: shape.order(),
        })
    }

    /// Buffer offset of the element at a linear index.
    #[inline]
    pub fn index_offset(&self, index: u32) -> u32 {
        let mut rem = index;
        let mut offset = 0u32;
        match self.order {
            Order::RowMajor => {
                for (&e, &s) in self.extents.iter().zip(self.strides.iter()).rev() {
                    offset += (rem % e) * s;
                    rem /= e;
                }
            }
            Order::ColumnMajor => {
                for (&e, &s) in self.extents.iter().zip(self.strides.iter()) {
                    offset += (rem % e) * s;
                    rem /= e;
                }
            }
        }
        offset
    }
}

/// Linear-index decoder used by the general fallback: narrowed when possible.
#[derive(Debug, Clone)]
pub(crate) enum Decoder<'a> {
    Wide(&'a ShapeDescriptor),
    Narrow(NarrowShape),
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(shape: &'a ShapeDescriptor) -> Self {
        match NarrowShape::try_from_shape(shape) {
            Some(narrow) => Decoder::Narrow(narrow),
            None => Decoder::Wide(shape),
        }
    }

    #[inline]
    pub(crate) fn offset(&self, index: usize) -> isize {
        match self {
            Decoder::Wide(shape) => shape.index_offset(index),
            Decoder::Narrow(narrow) => narrow.index_offset(index as u32) as isize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_ews() {
        let s = ShapeDescriptor::row_major(&[2, 3, 4]).unwrap();
        assert_eq!(s.strides(), &[12, 4, 1]);
        assert_eq!(s.element_wise_stride(), 1);
        assert_eq!(s.total_length(), 24);
    }

    #[test]
    fn test_column_major_ews() {
        let s = ShapeDescriptor::column_major(&[2, 3, 4]).unwrap();
        assert_eq!(s.strides(), &[1, 2, 6]);
        assert_eq!(s.element_wise_stride(), 1);
    }

    #[test]
    fn test_ews_depends_on_order() {
        // Column-major strides described as row-major are not a single-stride walk.
        let s = ShapeDescriptor::new(&[2, 3], &[1, 2], Order::RowMajor).unwrap();
        assert_eq!(s.element_wise_stride(), 0);
    }

    #[test]
    fn test_uniform_stride() {
        // Every other element of a length-10 buffer.
        let s = ShapeDescriptor::new(&[5], &[2], Order::RowMajor).unwrap();
        assert_eq!(s.element_wise_stride(), 2);

        let s = ShapeDescriptor::new(&[2, 3], &[6, 2], Order::RowMajor).unwrap();
        assert_eq!(s.element_wise_stride(), 2);
    }

    #[test]
    fn test_unit_axes_ignored() {
        let s = ShapeDescriptor::new(&[1, 4, 1], &[99, 3, 7], Order::RowMajor).unwrap();
        assert_eq!(s.element_wise_stride(), 3);
        assert!(s.is_vector());
    }

    #[test]
    fn test_negative_stride_not_uniform() {
        let s = ShapeDescriptor::new(&[4], &[-1], Order::RowMajor).unwrap();
        assert_eq!(s.element_wise_stride(), 0);
        assert_eq!(s.min_offset(), Some(-3));
        assert_eq!(s.max_offset(), Some(0));
    }

    #[test]
    fn test_overflowing_offsets_rejected() {
        let half = isize::MAX / 2 + 1;
        let err = ShapeDescriptor::new(&[3], &[half], Order::RowMajor).unwrap_err();
        assert!(err.is_invalid_shape());
        assert!(ShapeDescriptor::new(&[2, 2], &[half, half], Order::RowMajor).is_err());
        assert!(ShapeDescriptor::new(&[2, 2], &[-1, isize::MIN], Order::RowMajor).is_err());
        assert!(ShapeDescriptor::from_shape_info(&[1, 3, half as i64, 0, 0, 'c' as i64]).is_err());

        // The largest reachable offset may sit exactly at the limit.
        let s = ShapeDescriptor::new(&[2], &[isize::MAX], Order::RowMajor).unwrap();
        assert_eq!(s.max_offset(), Some(isize::MAX));
        let s = ShapeDescriptor::new(&[2], &[isize::MIN], Order::RowMajor).unwrap();
        assert_eq!(s.min_offset(), Some(isize::MIN));
        // Empty arrays reach no offsets at all.
        assert!(ShapeDescriptor::new(&[0, 3], &[1, half], Order::RowMajor).is_ok());
    }

    #[test]
    fn test_gapped_rows() {
        // Rows of 3 inside rows of 4: contiguous within a row, gap between rows.
        let s = ShapeDescriptor::new(&[2, 3], &[4, 1], Order::RowMajor).unwrap();
        assert_eq!(s.element_wise_stride(), 0);
    }

    #[test]
    fn test_scalar() {
        let s = ShapeDescriptor::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.total_length(), 1);
        assert_eq!(s.element_wise_stride(), 1);
        assert_eq!(s.index_offset(0), 0);
        assert!(s.is_vector());
    }

    #[test]
    fn test_invalid_rank() {
        let extents = vec![1usize; MAX_RANK + 1];
        let strides = vec![1isize; MAX_RANK + 1];
        let err = ShapeDescriptor::new(&extents, &strides, Order::RowMajor).unwrap_err();
        assert!(err.is_invalid_shape());
    }

    #[test]
    fn test_mismatched_lengths() {
        let err = ShapeDescriptor::new(&[2, 3], &[1], Order::RowMajor).unwrap_err();
        assert!(err.is_invalid_shape());
    }

    #[test]
    fn test_index_offset_orders() {
        let c = ShapeDescriptor::row_major(&[2, 3]).unwrap();
        let offsets: Vec<isize> = (0..6).map(|i| c.index_offset(i)).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4, 5]);

        // Row-major memory walked in column-major order.
        let f = ShapeDescriptor::new(&[2, 3], &[3, 1], Order::ColumnMajor).unwrap();
        let offsets: Vec<isize> = (0..6).map(|i| f.index_offset(i)).collect();
        assert_eq!(offsets, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_index_to_coords() {
        let s = ShapeDescriptor::row_major(&[2, 3, 4]).unwrap();
        let mut coords = [0usize; 3];
        s.index_to_coords(17, &mut coords);
        assert_eq!(coords, [1, 1, 1]);
        assert_eq!(s.offset_of_coords(&coords), 17);
    }

    #[test]
    fn test_narrow_matches_wide() {
        let s = ShapeDescriptor::new(&[3, 4, 5], &[40, 1, 8], Order::ColumnMajor).unwrap();
        let narrow = NarrowShape::try_from_shape(&s).unwrap();
        for i in 0..s.total_length() {
            assert_eq!(narrow.index_offset(i as u32) as isize, s.index_offset(i));
        }
    }

    #[test]
    fn test_narrow_rejects_negative_strides() {
        let s = ShapeDescriptor::new(&[4], &[-1], Order::RowMajor).unwrap();
        assert!(NarrowShape::try_from_shape(&s).is_none());
    }

    #[test]
    fn test_shape_info_round_trip() {
        let s = ShapeDescriptor::new(&[2, 3], &[1, 2], Order::ColumnMajor).unwrap();
        let info = s.to_shape_info();
        assert_eq!(info, vec![2, 2, 3, 1, 2, 0, 1, 'f' as i64]);
        assert_eq!(ShapeDescriptor::from_shape_info(&info).unwrap(), s);
    }

    #[test]
    fn test_shape_info_recomputes_ews() {
        // The stored ews (7) is ignored.
        let info = vec![2, 2, 3, 3, 1, 0, 7, 'c' as i64];
        let s = ShapeDescriptor::from_shape_info(&info).unwrap();
        assert_eq!(s.element_wise_stride(), 1);
    }

    #[test]
    fn test_shape_info_malformed() {
        assert!(ShapeDescriptor::from_shape_info(&[]).unwrap_err().is_invalid_shape());
        assert!(ShapeDescriptor::from_shape_info(&[2, 2, 3])
            .unwrap_err()
            .is_invalid_shape());
        assert!(ShapeDescriptor::from_shape_info(&[1, 4, 1, 0, 1, 'x' as i64])
            .unwrap_err()
            .is_invalid_shape());
        assert!(ShapeDescriptor::from_shape_info(&[1, -4, 1, 0, 1, 'c' as i64])
            .unwrap_err()
            .is_invalid_shape());
    }
}
