use std::ops::{Add, Index, Mul};

use super::{Real, WorldBox, WorldPoint, WorldVector};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Triangle<Point>([Point; 3]);

impl<Point> Triangle<Point> {
    pub fn new(a: Point, b: Point, c: Point) -> Triangle<Point> {
        Triangle([a, b, c])
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = &'a Point> {
        self.0.iter()
    }

    pub fn into_array(self) -> [Point; 3] {
        self.0
    }

    /// Edges in winding order, as pairs of (start vertex, end vertex).
    pub fn edge_vertices(&self) -> [(&Point, &Point); 3] {
        [
            (&self.0[0], &self.0[1]),
            (&self.0[1], &self.0[2]),
            (&self.0[2], &self.0[0]),
        ]
    }
}

impl<Point> From<[Point; 3]> for Triangle<Point> {
    fn from(value: [Point; 3]) -> Self {
        Triangle(value)
    }
}

impl<Point> Index<usize> for Triangle<Point> {
    type Output = Point;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<Point> Triangle<Point> {
    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> Triangle<Point2> {
        Triangle([f(&self[0]), f(&self[1]), f(&self[2])])
    }
}

impl<T: Real> Triangle<WorldPoint<T>> {
    /// Returns edge vectors, coming from self[0]
    pub fn edges(&self) -> [WorldVector<T>; 2] {
        [self.0[1] - self.0[0], self.0[2] - self.0[0]]
    }

    /// Returns a normal vector of the triangle, not normalized.
    /// Its length is twice the area of the triangle.
    pub fn normal(&self) -> WorldVector<T> {
        let [e1, e2] = self.edges();
        e1.cross(&e2)
    }

    pub fn doubled_area(&self) -> T {
        let normal = self.normal();
        normal.dot(&normal).sqrt()
    }

    pub fn centroid(&self) -> WorldPoint<T> {
        let sum = self.0[0].coords + self.0[1].coords + self.0[2].coords;
        WorldPoint::from(sum / T::from_f64(3.0))
    }

    pub fn bounding_box(&self) -> WorldBox<T> {
        let mut bounds = WorldBox::point(self.0[0]);
        bounds.grow(&self.0[1]);
        bounds.grow(&self.0[2]);
        bounds
    }

    pub fn is_finite(&self) -> bool {
        self.iter().all(|p| p.iter().all(|x| x.is_finite()))
    }
}

/// Barycentric coordinates of a point within a triangle.
/// `alpha` weights the second vertex, `beta` the third one and the rest
/// (`gamma`) goes to the first vertex.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BarycentricCoordinates<T> {
    pub alpha: T,
    pub beta: T,
}

impl<T: Real> BarycentricCoordinates<T> {
    pub fn new(alpha: T, beta: T) -> Self {
        BarycentricCoordinates { alpha, beta }
    }

    /// Weight of the first vertex.
    pub fn gamma(&self) -> T {
        T::one() - self.alpha - self.beta
    }

    pub fn interpolate<T2>(&self, a: T2, b: T2, c: T2) -> T2
    where
        T2: Mul<T, Output = T2> + Add<Output = T2>,
    {
        a * self.gamma() + b * self.alpha + c * self.beta
    }

    pub fn interpolate_triangle<T2>(&self, triangle: &Triangle<T2>) -> T2
    where
        T2: Mul<T, Output = T2> + Add<Output = T2> + Clone,
    {
        self.interpolate(
            triangle[0].clone(),
            triangle[1].clone(),
            triangle[2].clone(),
        )
    }
}
