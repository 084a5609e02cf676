use std::ops::Sub;

use super::{Axis, Real, WorldBox, WorldPoint, WorldVector};

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }
}

impl<Point: Sub + Copy> AABB<Point> {
    pub fn size(&self) -> Point::Output {
        self.max - self.min
    }
}

impl<T: Real> WorldBox<T> {
    /// Box containing a single point.
    pub fn point(p: WorldPoint<T>) -> Self {
        AABB { min: p, max: p }
    }

    /// Smallest box containing all the points, None if the iterator is empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a WorldPoint<T>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let mut ret = Self::point(*iter.next()?);
        for p in iter {
            ret.grow(p);
        }
        Some(ret)
    }

    pub fn grow(&mut self, p: &WorldPoint<T>) {
        self.min
            .coords
            .zip_apply(&p.coords, |a, b| *a = a.min(b));
        self.max
            .coords
            .zip_apply(&p.coords, |a, b| *a = a.max(b));
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut ret = *self;
        ret.grow(&other.min);
        ret.grow(&other.max);
        ret
    }

    pub fn center(&self) -> WorldPoint<T> {
        WorldPoint::from((self.min.coords + self.max.coords) / T::from_f64(2.0))
    }

    pub fn extent(&self, axis: Axis) -> T {
        self.max[axis.index()] - self.min[axis.index()]
    }

    /// Axis along which the box is the longest, lowest axis wins ties.
    pub fn longest_axis(&self) -> Axis {
        let size: WorldVector<T> = self.size();
        Axis::ALL
            .into_iter()
            .fold(Axis::X, |best, axis| {
                if size[axis.index()] > size[best.index()] {
                    axis
                } else {
                    best
                }
            })
    }

    pub fn surface_area(&self) -> T {
        let s: WorldVector<T> = self.size();
        T::from_f64(2.0) * (s.x * s.y + s.y * s.z + s.z * s.x)
    }

    /// Closed containment test.
    pub fn contains(&self, p: &WorldPoint<T>) -> bool {
        (0..3).all(|i| self.min[i] <= p[i] && p[i] <= self.max[i])
    }

    /// True if coordinate `at` lies strictly inside the box along `axis`.
    pub fn strictly_inside(&self, axis: Axis, at: T) -> bool {
        self.min[axis.index()] < at && at < self.max[axis.index()]
    }

    /// Splits the box with an axis aligned plane into the lower and upper part.
    pub fn split(&self, axis: Axis, at: T) -> (Self, Self) {
        let mut lower = *self;
        let mut upper = *self;
        lower.max[axis.index()] = at;
        upper.min[axis.index()] = at;
        (lower, upper)
    }
}
