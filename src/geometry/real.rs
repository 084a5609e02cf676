use std::cmp::Ordering;
use std::fmt::{Debug, Display};

use nalgebra::{ClosedAddAssign, ClosedDivAssign, ClosedMulAssign, ClosedSubAssign, Scalar};
use num_traits::Float;
use ordered_float::OrderedFloat;

/// Scalar type the whole engine is generic over.
///
/// Implemented for `f32` and `f64`. The two instantiations share every line of
/// code; only the tolerances below differ.
pub trait Real:
    Float
    + Scalar
    + ClosedAddAssign
    + ClosedSubAssign
    + ClosedMulAssign
    + ClosedDivAssign
    + Default
    + Display
    + Debug
    + Send
    + Sync
{
    /// Triangles whose doubled area (length of the edge cross product) is at or
    /// below this value are degenerate.
    const DEGENERATE_AREA: Self;

    /// Tolerance of the barycentric in-triangle test.
    const EDGE_EPSILON: Self;

    /// Ray is considered parallel to a triangle plane if the cosine of the angle
    /// between the ray direction and the plane normal is at most this value.
    const PARALLEL_EPSILON: Self;

    /// Relative padding applied to leaf distance intervals during traversal.
    const INTERVAL_SLACK: Self;

    fn from_f64(value: f64) -> Self;

    /// Total order, NaNs sort above everything else.
    fn ordered_cmp(&self, other: &Self) -> Ordering;
}

impl Real for f32 {
    const DEGENERATE_AREA: Self = 1e-6;
    const EDGE_EPSILON: Self = 1e-5;
    const PARALLEL_EPSILON: Self = 1e-6;
    const INTERVAL_SLACK: Self = 1e-4;

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn ordered_cmp(&self, other: &Self) -> Ordering {
        OrderedFloat(*self).cmp(&OrderedFloat(*other))
    }
}

impl Real for f64 {
    const DEGENERATE_AREA: Self = 1e-12;
    const EDGE_EPSILON: Self = 1e-10;
    const PARALLEL_EPSILON: Self = 1e-12;
    const INTERVAL_SLACK: Self = 1e-9;

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value
    }

    fn ordered_cmp(&self, other: &Self) -> Ordering {
        OrderedFloat(*self).cmp(&OrderedFloat(*other))
    }
}

/// Tolerance scaled by the magnitude of `value`, never smaller than `tolerance` itself.
#[inline]
pub fn relative_tolerance<T: Real>(value: T, tolerance: T) -> T {
    tolerance * value.abs().max(T::one())
}
