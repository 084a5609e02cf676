mod aabb;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod real;
mod triangle;

pub use aabb::AABB;
pub use ray_box_intersection::RayIntersectionExt;
pub use ray_triangle_intersection::{PreparedTriangle, TriangleFlags, TriangleHit};
pub use real::{Real, relative_tolerance};
pub use triangle::{BarycentricCoordinates, Triangle};

pub type WorldPoint<T> = nalgebra::Point3<T>;
pub type WorldVector<T> = nalgebra::Vector3<T>;
pub type WorldBox<T> = AABB<WorldPoint<T>>;
pub type PlaneVector<T> = nalgebra::Vector2<T>;

/// One of the three coordinate axes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn from_index(index: usize) -> Axis {
        Self::ALL[index % 3]
    }

    /// The two remaining axes, in cyclic order.
    pub fn others(self) -> (Axis, Axis) {
        let i = self.index();
        (Self::from_index(i + 1), Self::from_index(i + 2))
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Ray<T: Real> {
    origin: WorldPoint<T>,
    direction: WorldVector<T>,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    inv_direction: WorldVector<T>,
    direction_length: T,

    /// Hits at or beyond this distance are not reported.
    /// Distances are measured in multiples of the direction vector's length.
    pub max_distance: T,

    /// Recursion depth of secondary rays. Free for the caller's use.
    pub depth: u32,

    /// Deepest tree level reached by the most recent traversal of this ray.
    pub kdtree_depth: u32,
}

impl<T: Real> Ray<T> {
    /// Creates an unbounded ray.
    /// The direction doesn't have to be normalized.
    pub fn new(origin: WorldPoint<T>, direction: WorldVector<T>) -> Ray<T> {
        Self::segment(origin, direction, T::infinity())
    }

    /// Creates a ray that only reports hits closer than `max_distance`.
    pub fn segment(origin: WorldPoint<T>, direction: WorldVector<T>, max_distance: T) -> Ray<T> {
        let inv_direction = direction.map(|x| {
            if x == T::zero() {
                T::infinity()
            } else {
                T::one() / x
            }
        });

        Ray {
            origin,
            direction,
            inv_direction,
            direction_length: direction.dot(&direction).sqrt(),
            max_distance,
            depth: 0,
            kdtree_depth: 0,
        }
    }

    pub fn origin(&self) -> &WorldPoint<T> {
        &self.origin
    }

    pub fn direction(&self) -> &WorldVector<T> {
        &self.direction
    }

    pub fn inv_direction(&self) -> &WorldVector<T> {
        &self.inv_direction
    }

    pub fn direction_length(&self) -> T {
        self.direction_length
    }

    pub fn point_at(&self, distance: T) -> WorldPoint<T> {
        self.origin + self.direction * distance
    }
}
