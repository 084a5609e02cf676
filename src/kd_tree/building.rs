use std::collections::TryReserveError;

use arrayvec::ArrayVec;
use index_vec::IndexVec;
use itertools::Itertools as _;
use thiserror::Error;

use crate::{
    geometry::{Axis, Real, WorldBox, WorldPoint},
    triangle_store::{TriangleIdx, TriangleStore},
};

use super::{
    BuildStats, KdTree, LEAF_TRIANGLES, LeafRange, LeafRefIdx, MAX_DEPTH_LIMIT, Node, NodeIdx,
    OPTIMAL_CANDIDATES,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BuildPolicy {
    /// Split on the longest axis at the middle of the triangle centroids.
    #[default]
    Fast,
    /// Try several planes per axis and keep the one with the lowest surface area cost.
    Optimal,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("No triangles to build a tree from")]
    EmptyStore,

    #[error("Tree needs more than {max} entries")]
    TooLarge { max: usize },

    #[error("Failed to allocate tree storage: {0}")]
    Allocation(#[from] TryReserveError),
}

/// Depth limit used when none is configured: `8 + 1.3 * log2(n)`.
pub fn default_max_depth(triangle_count: usize) -> u32 {
    let n = triangle_count.max(1) as f64;
    ((8.0 + 1.3 * n.log2()).round() as u32).min(MAX_DEPTH_LIMIT)
}

/// Per triangle data that the builder needs over and over.
#[derive(Clone, Debug)]
struct BuildTriangle<T: Real> {
    bounds: WorldBox<T>,
    centroid: WorldPoint<T>,
}

/// Node waiting to be either split or turned into a leaf.
struct PendingNode<T: Real> {
    node: NodeIdx,
    bounds: WorldBox<T>,
    triangles: Vec<TriangleIdx>,
    depth: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Split<T> {
    axis: Axis,
    at: T,
}

impl<T: Real> KdTree<T> {
    /// Builds a tree over all triangles of the store.
    ///
    /// Uses an explicit work stack, so neither input size nor `max_depth` affects
    /// the call stack. `max_depth` of None picks [`default_max_depth`].
    pub fn build<Tag>(
        store: &TriangleStore<T, Tag>,
        policy: BuildPolicy,
        max_depth: Option<u32>,
    ) -> Result<KdTree<T>, BuildError> {
        let Some(bounding_box) = store.bounds().copied() else {
            return Err(BuildError::EmptyStore);
        };

        let max_depth = max_depth
            .unwrap_or_else(|| default_max_depth(store.len()))
            .min(MAX_DEPTH_LIMIT);

        let mut build_triangles = IndexVec::<TriangleIdx, BuildTriangle<T>>::new();
        build_triangles.raw.try_reserve_exact(store.len())?;
        build_triangles.extend(store.iter().map(|(_, record)| BuildTriangle {
            bounds: record.vertices().bounding_box(),
            centroid: record.vertices().centroid(),
        }));

        let mut all_triangles = Vec::new();
        all_triangles.try_reserve_exact(store.len())?;
        all_triangles.extend(build_triangles.indices());

        let mut tree = KdTree {
            bounding_box,
            root: NodeIdx::new(0),
            nodes: IndexVec::new(),
            leaf_triangles: IndexVec::new(),
            stats: BuildStats {
                policy,
                max_depth,
                triangles: store.len(),
                ..BuildStats::default()
            },
        };

        tree.nodes.push(Node::default());
        let mut stack = vec![PendingNode {
            node: tree.root,
            bounds: bounding_box,
            triangles: all_triangles,
            depth: 0,
        }];

        while let Some(pending) = stack.pop() {
            let split = if pending.triangles.len() <= LEAF_TRIANGLES || pending.depth >= max_depth {
                None
            } else {
                match policy {
                    BuildPolicy::Fast => fast_split(&pending, &build_triangles),
                    BuildPolicy::Optimal => optimal_split(&pending, &build_triangles),
                }
            };

            let partitioned = match split {
                Some(split) => partition(&pending.triangles, &build_triangles, split)?
                    .map(|(below, above)| (split, below, above)),
                None => None,
            };

            let Some((split, below, above)) = partitioned else {
                tree.build_leaf(pending.node, &pending.triangles, pending.depth)?;
                continue;
            };

            let children = tree.add_placeholders()?;
            tree.nodes[pending.node] = Node::Inner {
                axis: split.axis,
                split: split.at,
                children,
            };
            tree.stats.inner_nodes += 1;

            let (lower_bounds, upper_bounds) = pending.bounds.split(split.axis, split.at);
            stack.try_reserve(2)?;
            // Lower child is popped first, so that arena order follows a depth first walk
            stack.push(PendingNode {
                node: children[1],
                bounds: upper_bounds,
                triangles: above,
                depth: pending.depth + 1,
            });
            stack.push(PendingNode {
                node: children[0],
                bounds: lower_bounds,
                triangles: below,
                depth: pending.depth + 1,
            });
        }

        log::debug!("{}", tree.stats);

        Ok(tree)
    }

    /// Create two placeholder nodes that will be overwritten later
    fn add_placeholders(&mut self) -> Result<[NodeIdx; 2], BuildError> {
        if self.nodes.len() + 2 > NodeIdx::MAX_INDEX {
            return Err(BuildError::TooLarge {
                max: NodeIdx::MAX_INDEX,
            });
        }
        self.nodes.raw.try_reserve(2)?;
        let lower = self.nodes.push(Node::default());
        let upper = self.nodes.push(Node::default());
        Ok([lower, upper])
    }

    fn build_leaf(
        &mut self,
        node: NodeIdx,
        triangles: &[TriangleIdx],
        depth: u32,
    ) -> Result<(), BuildError> {
        if self.leaf_triangles.len() + triangles.len() > LeafRefIdx::MAX_INDEX {
            return Err(BuildError::TooLarge {
                max: LeafRefIdx::MAX_INDEX,
            });
        }
        self.leaf_triangles.raw.try_reserve(triangles.len())?;

        let first = self.leaf_triangles.next_idx();
        self.leaf_triangles.extend(triangles.iter().copied());
        let last = self.leaf_triangles.next_idx();

        self.nodes[node] = Node::Leaf {
            triangles: LeafRange { first, last },
        };
        self.stats.add_leaf(depth, triangles.len());
        log::trace!("Leaf {node:?} at depth {depth} with {} triangles", triangles.len());

        Ok(())
    }
}

/// Splits the node's longest axis in the middle of the centroid range.
/// Falls back to the other axes in order of centroid spread.
fn fast_split<T: Real>(
    pending: &PendingNode<T>,
    triangles: &IndexVec<TriangleIdx, BuildTriangle<T>>,
) -> Option<Split<T>> {
    let centroid_bounds =
        WorldBox::from_points(pending.triangles.iter().map(|i| &triangles[*i].centroid))?;

    let longest = pending.bounds.longest_axis();
    let mut axes: ArrayVec<Axis, 3> = ArrayVec::new();
    axes.push(longest);
    axes.extend(
        Axis::ALL
            .into_iter()
            .filter(|axis| *axis != longest)
            .sorted_by(|a, b| {
                centroid_bounds
                    .extent(*b)
                    .ordered_cmp(&centroid_bounds.extent(*a))
            }),
    );

    axes.into_iter().find_map(|axis| {
        if !(centroid_bounds.extent(axis) > T::zero()) {
            return None;
        }
        let i = axis.index();
        let middle = (centroid_bounds.min[i] + centroid_bounds.max[i]) * T::from_f64(0.5);

        if pending.bounds.strictly_inside(axis, middle) {
            Some(Split { axis, at: middle })
        } else {
            // Centroids of triangles reaching into the node from outside can lie outside of it
            let middle = pending.bounds.center()[i];
            pending
                .bounds
                .strictly_inside(axis, middle)
                .then_some(Split { axis, at: middle })
        }
    })
}

/// Evaluates [`OPTIMAL_CANDIDATES`] evenly spaced planes on every axis and keeps the one
/// with the lowest cost. Ties go to the lower axis, then to the lower coordinate.
fn optimal_split<T: Real>(
    pending: &PendingNode<T>,
    triangles: &IndexVec<TriangleIdx, BuildTriangle<T>>,
) -> Option<Split<T>> {
    let count = pending.triangles.len();
    let mut best: Option<(T, Split<T>)> = None;

    for axis in Axis::ALL {
        let extent = pending.bounds.extent(axis);
        if !(extent > T::zero()) {
            continue;
        }
        let min = pending.bounds.min[axis.index()];

        let candidates: ArrayVec<Split<T>, OPTIMAL_CANDIDATES> = (1..=OPTIMAL_CANDIDATES)
            .map(|k| Split {
                axis,
                at: min + extent * T::from_f64(k as f64 / (OPTIMAL_CANDIDATES + 1) as f64),
            })
            .filter(|split| pending.bounds.strictly_inside(axis, split.at))
            .collect();

        let mut counts = [(0usize, 0usize); OPTIMAL_CANDIDATES];
        for index in &pending.triangles {
            let triangle = &triangles[*index];
            for (split, (below, above)) in candidates.iter().zip(counts.iter_mut()) {
                let (is_below, is_above) = sides(triangle, *split);
                *below += is_below as usize;
                *above += is_above as usize;
            }
        }

        for (split, (below, above)) in candidates.iter().zip(counts) {
            if below == 0 || above == 0 || (below == count && above == count) {
                continue;
            }
            let cost = split_cost(&pending.bounds, *split, below, above);
            if best.as_ref().is_none_or(|(best_cost, _)| cost < *best_cost) {
                best = Some((cost, *split));
            }
        }
    }

    best.map(|(_, split)| split)
}

/// Surface area heuristic, relative to the parent node.
/// Flat nodes have no meaningful area and fall back to the larger side.
fn split_cost<T: Real>(bounds: &WorldBox<T>, split: Split<T>, below: usize, above: usize) -> T {
    let area = bounds.surface_area();
    if area > T::zero() {
        let (lower, upper) = bounds.split(split.axis, split.at);
        (lower.surface_area() * T::from_f64(below as f64)
            + upper.surface_area() * T::from_f64(above as f64))
            / area
    } else {
        T::from_f64(below.max(above) as f64)
    }
}

/// Which sides of the plane a triangle's bounding box reaches.
/// Every triangle touching the plane belongs below, where rays lying in the plane go.
fn sides<T: Real>(triangle: &BuildTriangle<T>, split: Split<T>) -> (bool, bool) {
    let i = split.axis.index();
    let below = triangle.bounds.min[i] <= split.at;
    let above = triangle.bounds.max[i] > split.at;
    (below, above)
}

/// Distributes triangles to the two children.
/// Returns None if the split wouldn't make any progress.
#[allow(clippy::type_complexity)]
fn partition<T: Real>(
    indices: &[TriangleIdx],
    triangles: &IndexVec<TriangleIdx, BuildTriangle<T>>,
    split: Split<T>,
) -> Result<Option<(Vec<TriangleIdx>, Vec<TriangleIdx>)>, BuildError> {
    let (below_count, above_count) = indices.iter().fold((0, 0), |(b, a), index| {
        let (is_below, is_above) = sides(&triangles[*index], split);
        (b + is_below as usize, a + is_above as usize)
    });

    if below_count == 0
        || above_count == 0
        || (below_count == indices.len() && above_count == indices.len())
    {
        return Ok(None);
    }

    let mut below = Vec::new();
    below.try_reserve_exact(below_count)?;
    let mut above = Vec::new();
    above.try_reserve_exact(above_count)?;

    for index in indices {
        let (is_below, is_above) = sides(&triangles[*index], split);
        if is_below {
            below.push(*index);
        }
        if is_above {
            above.push(*index);
        }
    }

    Ok(Some((below, above)))
}
