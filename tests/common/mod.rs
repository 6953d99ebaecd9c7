#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use strided_loops::{Order, ShapeDescriptor};

/// A layout placed inside a buffer large enough for every element.
#[derive(Debug, Clone)]
pub struct Placed {
    pub shape: ShapeDescriptor,
    pub base: usize,
    pub buffer_len: usize,
}

impl Placed {
    pub fn new(shape: ShapeDescriptor) -> Self {
        match (shape.min_offset(), shape.max_offset()) {
            (Some(lo), Some(hi)) => {
                let base = (-lo).max(0) as usize;
                Self {
                    buffer_len: base + hi as usize + 1,
                    base,
                    shape,
                }
            }
            _ => Self {
                shape,
                base: 0,
                buffer_len: 0,
            },
        }
    }
}

pub fn random_order(rng: &mut StdRng) -> Order {
    if rng.gen_bool(0.5) {
        Order::RowMajor
    } else {
        Order::ColumnMajor
    }
}

/// Non-overlapping layout of `extents`: axes stored in a random permutation,
/// optionally padded and optionally reversed.
pub fn random_layout(rng: &mut StdRng, extents: &[usize], order: Order) -> Placed {
    let rank = extents.len();
    let mut perm: Vec<usize> = (0..rank).collect();
    perm.shuffle(rng);

    let mut strides = vec![0isize; rank];
    let mut acc = 1isize;
    for &axis in perm.iter().rev() {
        let pad = if rng.gen_bool(0.25) { 2 } else { 1 };
        let sign = if rng.gen_bool(0.15) { -1 } else { 1 };
        strides[axis] = sign * acc * pad;
        acc *= extents[axis].max(1) as isize * pad;
    }
    Placed::new(ShapeDescriptor::new(extents, &strides, order).unwrap())
}

/// Dense layout in the given order.
pub fn dense(extents: &[usize], order: Order) -> Placed {
    let shape = match order {
        Order::RowMajor => ShapeDescriptor::row_major(extents),
        Order::ColumnMajor => ShapeDescriptor::column_major(extents),
    };
    Placed::new(shape.unwrap())
}

pub fn random_extents(rng: &mut StdRng, max_rank: usize, max_extent: usize) -> Vec<usize> {
    let rank = rng.gen_range(1..=max_rank);
    (0..rank).map(|_| rng.gen_range(1..=max_extent)).collect()
}

pub fn random_values(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Non-empty random subset of `0..rank`, in random order.
pub fn random_axes(rng: &mut StdRng, rank: usize) -> Vec<usize> {
    let mut axes: Vec<usize> = (0..rank).filter(|_| rng.gen_bool(0.5)).collect();
    if axes.is_empty() {
        axes.push(rng.gen_range(0..rank));
    }
    axes.shuffle(rng);
    axes
}

/// Offsets of every slice by a direct nested loop over the excluded axes.
pub fn brute_force_offsets(shape: &ShapeDescriptor, excluded: &[usize]) -> Vec<isize> {
    let mut offsets = vec![0isize];
    for &axis in excluded {
        let mut next = Vec::with_capacity(offsets.len() * shape.extent_at(axis));
        for &o in &offsets {
            for c in 0..shape.extent_at(axis) {
                next.push(o + c as isize * shape.stride_at(axis));
            }
        }
        offsets = next;
    }
    offsets
}

pub fn bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|v| v.to_bits()).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
