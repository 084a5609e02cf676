use std::cmp::Ordering;

use bitflags::bitflags;

use super::{
    Axis, BarycentricCoordinates, PlaneVector, Ray, Real, Triangle, WorldPoint, WorldVector,
};

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TriangleFlags: u8 {
        /// Normal is dominated by the X component, barycentrics are computed in the YZ plane.
        const DOMINANT_X = 1 << 0;
        const DOMINANT_Y = 1 << 1;
        const DOMINANT_Z = 1 << 2;
        /// Zero area triangle, it can never be hit.
        const DEGENERATE = 1 << 3;
    }
}

/// Triangle with the data needed for fast ray intersection precomputed.
#[derive(Copy, Clone, Debug)]
pub struct PreparedTriangle<T: Real> {
    vertices: Triangle<WorldPoint<T>>,
    /// Unit normal, oriented by the vertex winding.
    normal: WorldVector<T>,
    /// Maps a plane point relative to the first vertex, projected along the dominant
    /// axis, to its barycentric coordinates (alpha, beta).
    plane_basis: [PlaneVector<T>; 2],
    flags: TriangleFlags,
}

/// Intersection of a ray with a single triangle
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TriangleHit<T: Real> {
    pub distance: T,
    pub point: WorldPoint<T>,
    pub uv: BarycentricCoordinates<T>,
}

impl<T: Real> PreparedTriangle<T> {
    pub fn new(vertices: Triangle<WorldPoint<T>>) -> PreparedTriangle<T> {
        let [e1, e2] = vertices.edges();
        let normal = e1.cross(&e2);
        let doubled_area = normal.dot(&normal).sqrt();

        // NaN coordinates end up here too
        if !(doubled_area > T::DEGENERATE_AREA) {
            return PreparedTriangle {
                vertices,
                normal: WorldVector::zeros(),
                plane_basis: [PlaneVector::zeros(); 2],
                flags: TriangleFlags::DEGENERATE,
            };
        }

        let dominant = Axis::ALL.into_iter().fold(Axis::X, |best, axis| {
            if normal[axis.index()].abs() > normal[best.index()].abs() {
                axis
            } else {
                best
            }
        });
        let (i, j) = dominant.others();
        let (i, j) = (i.index(), j.index());

        // Equal to the dominant normal component, so it can't be too close to zero.
        let det = e1[i] * e2[j] - e2[i] * e1[j];
        let plane_basis = [
            PlaneVector::new(e2[j], -e2[i]) / det,
            PlaneVector::new(-e1[j], e1[i]) / det,
        ];

        PreparedTriangle {
            vertices,
            normal: normal / doubled_area,
            plane_basis,
            flags: match dominant {
                Axis::X => TriangleFlags::DOMINANT_X,
                Axis::Y => TriangleFlags::DOMINANT_Y,
                Axis::Z => TriangleFlags::DOMINANT_Z,
            },
        }
    }

    pub fn vertices(&self) -> &Triangle<WorldPoint<T>> {
        &self.vertices
    }

    pub fn normal(&self) -> &WorldVector<T> {
        &self.normal
    }

    pub fn flags(&self) -> TriangleFlags {
        self.flags
    }

    pub fn is_degenerate(&self) -> bool {
        self.flags.contains(TriangleFlags::DEGENERATE)
    }

    /// Axis along which the triangle is projected for the in-triangle test.
    /// None for degenerate triangles.
    pub fn dominant_axis(&self) -> Option<Axis> {
        if self.flags.contains(TriangleFlags::DOMINANT_X) {
            Some(Axis::X)
        } else if self.flags.contains(TriangleFlags::DOMINANT_Y) {
            Some(Axis::Y)
        } else if self.flags.contains(TriangleFlags::DOMINANT_Z) {
            Some(Axis::Z)
        } else {
            None
        }
    }

    /// Calculates ray intersection with the (two sided) triangle.
    /// Only hits with distance in (0, max_distance) are reported.
    ///
    /// Points strictly inside always hit. Points exactly on an edge, or outside it by at
    /// most `T::EDGE_EPSILON` (in barycentric coordinates), hit only if the triangle owns
    /// the edge, see [`owns_edge`]. Of two triangles sharing an edge exactly one owns it,
    /// so a ray through the edge hits exactly once. A ray through a silhouette edge
    /// that no other triangle shares hits only if this triangle owns it.
    pub fn intersect(&self, ray: &Ray<T>, max_distance: T) -> Option<TriangleHit<T>> {
        let axis = self.dominant_axis()?;

        let denominator = self.normal.dot(ray.direction());
        if denominator.abs() <= T::PARALLEL_EPSILON * ray.direction_length() {
            return None;
        }

        let distance = self.normal.dot(&(self.vertices[0] - *ray.origin())) / denominator;
        if !(distance > T::zero() && distance < max_distance) {
            return None;
        }

        let point = ray.point_at(distance);
        let (i, j) = axis.others();
        let relative = point - self.vertices[0];
        let (pi, pj) = (relative[i.index()], relative[j.index()]);

        let uv = BarycentricCoordinates::new(
            self.plane_basis[0].x * pi + self.plane_basis[0].y * pj,
            self.plane_basis[1].x * pi + self.plane_basis[1].y * pj,
        );

        let epsilon = T::EDGE_EPSILON;
        // Opposite edges to the coordinates: beta ~ AB, gamma ~ BC, alpha ~ CA
        let edge_coordinates = [uv.beta, uv.gamma(), uv.alpha];
        if edge_coordinates.iter().any(|c| *c < -epsilon) {
            return None;
        }

        let back_face = denominator > T::zero();
        let edges = self.vertices.edge_vertices();
        for ((from, to), coordinate) in edges.into_iter().zip(edge_coordinates) {
            if coordinate <= T::zero() && !owns_edge(from, to, back_face) {
                return None;
            }
        }

        Some(TriangleHit {
            distance,
            point,
            uv,
        })
    }
}

/// Tie-break for points lying on an edge going from `from` to `to`.
///
/// Two consistently wound triangles sharing an edge traverse it in opposite
/// directions and face the same way, inconsistently wound ones traverse it in the
/// same direction but face opposite ways. Either way exactly one of them owns it.
fn owns_edge<T: Real>(from: &WorldPoint<T>, to: &WorldPoint<T>, back_face: bool) -> bool {
    match lexicographic_cmp(from, to) {
        Ordering::Less => !back_face,
        Ordering::Greater => back_face,
        Ordering::Equal => false,
    }
}

fn lexicographic_cmp<T: Real>(a: &WorldPoint<T>, b: &WorldPoint<T>) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.partial_cmp(y).unwrap_or(Ordering::Equal))
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}
