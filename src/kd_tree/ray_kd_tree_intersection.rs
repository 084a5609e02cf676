use std::ops::ControlFlow;

use super::{KdTree, LeafRange, Node, NodeIdx};
use crate::{
    geometry::{
        BarycentricCoordinates, Ray, RayIntersectionExt as _, Real, WorldPoint, WorldVector,
        relative_tolerance,
    },
    triangle_store::{TriangleIdx, TriangleRecord, TriangleStore},
};

/// A single ray/triangle intersection, as handed to the hit callback.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hit<T: Real> {
    pub point: WorldPoint<T>,
    /// Unit geometric normal, oriented by the triangle's winding.
    pub normal: WorldVector<T>,
    /// In multiples of the ray direction length.
    pub distance: T,
    pub uv: BarycentricCoordinates<T>,
    pub triangle: TriangleIdx,
}

#[derive(Copy, Clone, Debug)]
struct StackFrame<T> {
    node: NodeIdx,
    t_near: T,
    t_far: T,
    depth: u32,
}

/// Scratch memory of a single traversal.
///
/// Reusing one stack per thread avoids allocating on every ray.
/// Also records how much work the last traversal did.
#[derive(Clone, Debug, Default)]
pub struct TraversalStack<T: Real> {
    frames: Vec<StackFrame<T>>,
    leaf_hits: Vec<Hit<T>>,
    /// Hits already handed out during this traversal, as (triangle, distance)
    reported: Vec<(TriangleIdx, T)>,

    nodes_visited: u64,
    triangles_tested: u64,
    deepest: u32,
}

impl<T: Real> TraversalStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes_visited(&self) -> u64 {
        self.nodes_visited
    }

    pub fn triangles_tested(&self) -> u64 {
        self.triangles_tested
    }

    /// Deepest tree level reached.
    pub fn deepest(&self) -> u32 {
        self.deepest
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.leaf_hits.clear();
        self.reported.clear();
        self.nodes_visited = 0;
        self.triangles_tested = 0;
        self.deepest = 0;
    }
}

impl<T: Real> KdTree<T> {
    /// Walks the leaves pierced by the ray front to back and calls `hit_fn` for every
    /// triangle hit, ordered by distance.
    ///
    /// Each triangle is reported at most once, even if it is referenced from several leaves.
    /// Returning [`ControlFlow::Break`] from the callback stops the traversal and the
    /// break value is returned.
    pub fn traverse<Tag, R>(
        &self,
        store: &TriangleStore<T, Tag>,
        ray: &Ray<T>,
        stack: &mut TraversalStack<T>,
        mut hit_fn: impl FnMut(&Ray<T>, &Hit<T>, &TriangleRecord<T, Tag>) -> ControlFlow<R>,
    ) -> Option<R> {
        stack.reset();

        let (t_near, t_far) = self.bounding_box.intersect(ray);
        let t_near = t_near.max(T::zero());
        let t_far = t_far.min(ray.max_distance);
        if !(t_near <= t_far) {
            return None;
        }

        stack.frames.push(StackFrame {
            node: self.root,
            t_near,
            t_far,
            depth: 0,
        });

        while let Some(StackFrame {
            mut node,
            t_near,
            mut t_far,
            mut depth,
        }) = stack.frames.pop()
        {
            loop {
                stack.nodes_visited += 1;
                stack.deepest = stack.deepest.max(depth);

                match &self.nodes[node] {
                    Node::Inner {
                        axis,
                        split,
                        children,
                    } => {
                        let i = axis.index();
                        let origin = ray.origin()[i];
                        let direction = ray.direction()[i];

                        // Rays starting in the plane belong to the side they are heading to,
                        // rays lying in the plane go below.
                        let below_first =
                            origin < *split || (origin == *split && direction <= T::zero());
                        let (near, far) = if below_first {
                            (children[0], children[1])
                        } else {
                            (children[1], children[0])
                        };
                        depth += 1;

                        if direction == T::zero() {
                            node = near;
                            continue;
                        }

                        let t_split = (*split - origin) * ray.inv_direction()[i];
                        if t_split > t_far || t_split <= T::zero() {
                            node = near;
                        } else if t_split < t_near {
                            node = far;
                        } else {
                            stack.frames.push(StackFrame {
                                node: far,
                                t_near: t_split,
                                t_far,
                                depth,
                            });
                            node = near;
                            t_far = t_split;
                        }
                    }
                    Node::Leaf { triangles } => {
                        if let ControlFlow::Break(result) = self.intersect_leaf(
                            *triangles,
                            store,
                            ray,
                            (t_near, t_far),
                            stack,
                            &mut hit_fn,
                        ) {
                            return Some(result);
                        }
                        break;
                    }
                }
            }
        }

        None
    }

    /// Reports hits of triangles in a leaf within the leaf's distance interval
    /// that haven't been reported yet.
    fn intersect_leaf<Tag, R>(
        &self,
        triangles: LeafRange,
        store: &TriangleStore<T, Tag>,
        ray: &Ray<T>,
        (t_near, t_far): (T, T),
        stack: &mut TraversalStack<T>,
        hit_fn: &mut impl FnMut(&Ray<T>, &Hit<T>, &TriangleRecord<T, Tag>) -> ControlFlow<R>,
    ) -> ControlFlow<R> {
        // Slack so that hits exactly on a split plane are found from both sides
        let low = t_near - relative_tolerance(t_near, T::INTERVAL_SLACK);
        let high = (t_far + relative_tolerance(t_far, T::INTERVAL_SLACK)).min(ray.max_distance);

        let TraversalStack {
            leaf_hits,
            reported,
            triangles_tested,
            ..
        } = stack;

        leaf_hits.clear();
        for &index in self.leaf_triangles(triangles) {
            *triangles_tested += 1;
            let Some(hit) = store[index].geometry().intersect(ray, high) else {
                continue;
            };
            if hit.distance < low {
                continue;
            }
            leaf_hits.push(Hit {
                point: hit.point,
                normal: *store[index].geometry().normal(),
                distance: hit.distance,
                uv: hit.uv,
                triangle: index,
            });
        }

        leaf_hits.sort_by(|a, b| {
            a.distance
                .ordered_cmp(&b.distance)
                .then(a.triangle.cmp(&b.triangle))
        });

        // Anything reported before this leaf's interval can't be hit again
        reported.retain(|(_, distance)| *distance >= low);

        // Leaves never list a triangle twice, only earlier leaves need checking
        let previous = reported.len();
        for hit in leaf_hits.iter() {
            if reported[..previous]
                .iter()
                .any(|(index, _)| *index == hit.triangle)
            {
                continue;
            }
            reported.push((hit.triangle, hit.distance));

            hit_fn(ray, hit, &store[hit.triangle])?;
        }

        ControlFlow::Continue(())
    }
}
