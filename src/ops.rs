//! Operation contracts consumed by the reduction kernels, plus a handful of
//! reference operations.
//!
//! Parameters an operation needs (the "extra params" of a reduction) live in
//! the implementing type itself.

use std::marker::PhantomData;

use num_traits::{Bounded, Float, NumCast, One, Zero};

/// A reduction folding `X` elements into a `Z` accumulator.
///
/// Each slice is folded as
/// `post_process(fold(update, starting_value(first), op(x_0), .., op(x_n-1)), n)`,
/// strictly first-to-last. The engine adds no associativity assumptions of
/// its own.
pub trait ReduceOp<X, Z = X>: Sync {
    /// Seed for a fold. `first` is the first element of the slice, `None`
    /// for an empty slice.
    fn starting_value(&self, first: Option<X>) -> Z;

    /// Map one element into accumulator space.
    fn op(&self, x: X) -> Z;

    /// Combine the accumulator with one mapped element.
    fn update(&self, acc: Z, value: Z) -> Z;

    /// Finish a fold over `n` elements.
    fn post_process(&self, acc: Z, _n: usize) -> Z {
        acc
    }
}

/// A value together with its position inside a slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexValue<X> {
    pub value: X,
    pub index: i64,
}

/// An index reduction: the accumulator tracks a value and where it was found.
///
/// Tie-breaking is entirely up to `update`. Empty slices never reach the
/// operation; the kernels write index `-1` for them.
pub trait IndexReduceOp<X>: Sync {
    /// Seed from the first element of a non-empty slice.
    fn starting_value(&self, first: X) -> IndexValue<X> {
        IndexValue {
            value: first,
            index: 0,
        }
    }

    fn update(&self, acc: IndexValue<X>, candidate: IndexValue<X>) -> IndexValue<X>;
}

macro_rules! marker_op {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name<T>(PhantomData<fn() -> T>);

        impl<T> $name<T> {
            pub fn new() -> Self {
                Self(PhantomData)
            }
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}
    };
}

marker_op!(
    /// Sum of elements; zero for an empty slice.
    Sum
);
marker_op!(
    /// Product of elements; one for an empty slice.
    Product
);
marker_op!(
    /// Largest element; the type's minimum for an empty slice.
    Max
);
marker_op!(
    /// Smallest element; the type's maximum for an empty slice.
    Min
);
marker_op!(
    /// Arithmetic mean; NaN for an empty slice.
    Mean
);
marker_op!(
    /// Position of the first largest element.
    IndexMax
);
marker_op!(
    /// Position of the first smallest element.
    IndexMin
);

impl<T> ReduceOp<T> for Sum<T>
where
    T: Copy + Zero,
{
    fn starting_value(&self, _first: Option<T>) -> T {
        T::zero()
    }

    #[inline]
    fn op(&self, x: T) -> T {
        x
    }

    #[inline]
    fn update(&self, acc: T, value: T) -> T {
        acc + value
    }
}

impl<T> ReduceOp<T> for Product<T>
where
    T: Copy + One,
{
    fn starting_value(&self, _first: Option<T>) -> T {
        T::one()
    }

    #[inline]
    fn op(&self, x: T) -> T {
        x
    }

    #[inline]
    fn update(&self, acc: T, value: T) -> T {
        acc * value
    }
}

impl<T> ReduceOp<T> for Max<T>
where
    T: Copy + PartialOrd + Bounded,
{
    fn starting_value(&self, first: Option<T>) -> T {
        first.unwrap_or_else(T::min_value)
    }

    #[inline]
    fn op(&self, x: T) -> T {
        x
    }

    #[inline]
    fn update(&self, acc: T, value: T) -> T {
        if value > acc {
            value
        } else {
            acc
        }
    }
}

impl<T> ReduceOp<T> for Min<T>
where
    T: Copy + PartialOrd + Bounded,
{
    fn starting_value(&self, first: Option<T>) -> T {
        first.unwrap_or_else(T::max_value)
    }

    #[inline]
    fn op(&self, x: T) -> T {
        x
    }

    #[inline]
    fn update(&self, acc: T, value: T) -> T {
        if value < acc {
            value
        } else {
            acc
        }
    }
}

impl<T> ReduceOp<T> for Mean<T>
where
    T: Float,
{
    fn starting_value(&self, _first: Option<T>) -> T {
        T::zero()
    }

    #[inline]
    fn op(&self, x: T) -> T {
        x
    }

    #[inline]
    fn update(&self, acc: T, value: T) -> T {
        acc + value
    }

    fn post_process(&self, acc: T, n: usize) -> T {
        match <T as NumCast>::from(n) {
            Some(n) => acc / n,
            None => T::nan(),
        }
    }
}

impl<T> IndexReduceOp<T> for IndexMax<T>
where
    T: Copy + PartialOrd,
{
    #[inline]
    fn update(&self, acc: IndexValue<T>, candidate: IndexValue<T>) -> IndexValue<T> {
        if candidate.value > acc.value {
            candidate
        } else {
            acc
        }
    }
}

impl<T> IndexReduceOp<T> for IndexMin<T>
where
    T: Copy + PartialOrd,
{
    #[inline]
    fn update(&self, acc: IndexValue<T>, candidate: IndexValue<T>) -> IndexValue<T> {
        if candidate.value < acc.value {
            candidate
        } else {
            acc
        }
    }
}
