mod building;
mod printing;
mod ray_kd_tree_intersection;

use index_vec::IndexVec;

use crate::geometry::{Axis, Real, WorldBox};
use crate::triangle_store::TriangleIdx;

pub use building::{BuildError, BuildPolicy, default_max_depth};
pub use printing::BuildStats;
pub use ray_kd_tree_intersection::{Hit, TraversalStack};

/// Nodes with at most this many triangles are not split any further.
pub const LEAF_TRIANGLES: usize = 4;

/// Hard ceiling on the tree depth, regardless of configuration.
pub const MAX_DEPTH_LIMIT: u32 = 64;

/// Number of evenly spaced candidate planes per axis tried by [`BuildPolicy::Optimal`].
const OPTIMAL_CANDIDATES: usize = 8;

/// Binary space partition over the triangles of a [`TriangleStore`](crate::TriangleStore).
///
/// Nodes live in a single arena and reference their children by index,
/// leaves reference a contiguous range of triangle indices.
#[derive(Clone, Debug)]
pub struct KdTree<T: Real> {
    bounding_box: WorldBox<T>,
    root: NodeIdx,

    nodes: IndexVec<NodeIdx, Node<T>>,
    leaf_triangles: IndexVec<LeafRefIdx, TriangleIdx>,

    stats: BuildStats,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node<T> {
    /// Splits space with an axis aligned plane.
    /// `children[0]` is below the plane, `children[1]` above.
    Inner {
        axis: Axis,
        split: T,
        children: [NodeIdx; 2],
    },
    Leaf {
        triangles: LeafRange,
    },
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Node::Leaf {
            triangles: LeafRange::default(),
        }
    }
}

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    pub struct LeafRefIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeafRange {
    pub first: LeafRefIdx,
    pub last: LeafRefIdx,
}

impl Default for LeafRange {
    fn default() -> Self {
        LeafRange {
            first: LeafRefIdx::new(0),
            last: LeafRefIdx::new(0),
        }
    }
}

impl LeafRange {
    pub fn into_range(self) -> std::ops::Range<LeafRefIdx> {
        self.first..self.last
    }

    pub fn iter(&self) -> impl Iterator<Item = LeafRefIdx> {
        (u32::from(self.first)..u32::from(self.last)).map(LeafRefIdx::from)
    }

    pub fn len(&self) -> usize {
        self.last.index() - self.first.index()
    }

    pub fn is_empty(&self) -> bool {
        self.first == self.last
    }
}

impl<T: Real> KdTree<T> {
    /// Bounding box of all triangles in the tree.
    pub fn bounding_box(&self) -> &WorldBox<T> {
        &self.bounding_box
    }

    pub fn root(&self) -> NodeIdx {
        self.root
    }

    pub fn node(&self, index: NodeIdx) -> &Node<T> {
        &self.nodes[index]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Triangle indices referenced by a leaf.
    pub fn leaf_triangles(&self, range: LeafRange) -> &[TriangleIdx] {
        &self.leaf_triangles[range.into_range()].raw
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::{assert, let_assert};
    use test_strategy::proptest;

    #[test]
    fn default_node_is_empty_leaf() {
        let_assert!(Node::Leaf { triangles } = Node::<f32>::default());
        assert!(triangles.is_empty());
        assert!(triangles.len() == 0);
    }

    #[proptest]
    fn leaf_range_length(#[strategy(0u32..1000)] first: u32, #[strategy(0u32..1000)] count: u32) {
        let range = LeafRange {
            first: first.into(),
            last: (first + count).into(),
        };
        assert!(range.len() == count as usize);
        assert!(range.iter().count() == count as usize);
    }
}
