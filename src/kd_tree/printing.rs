use std::fmt::Display;

use crate::{
    geometry::{Real, WorldBox},
    util::Stats,
};

use super::{BuildPolicy, KdTree, Node, NodeIdx};

/// Summary of a finished build.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildStats {
    pub policy: BuildPolicy,
    /// Depth limit the tree was built with.
    pub max_depth: u32,
    pub triangles: usize,
    pub inner_nodes: usize,
    pub leaves: usize,
    /// Sum of leaf sizes, triangles straddling a split plane count once per leaf.
    pub leaf_references: usize,
    pub leaf_depth: Stats,
    pub leaf_fill: Stats,
}

impl BuildStats {
    pub(super) fn add_leaf(&mut self, depth: u32, triangles: usize) {
        self.leaves += 1;
        self.leaf_references += triangles;
        self.leaf_depth.add_sample(depth as usize);
        self.leaf_fill.add_sample(triangles);
    }

    /// Average number of leaves a triangle ended up in.
    pub fn duplication(&self) -> f32 {
        if self.triangles == 0 {
            0.0
        } else {
            self.leaf_references as f32 / self.triangles as f32
        }
    }
}

impl Display for BuildStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} build of {} triangles: {} inner nodes, {} leaves, duplication {:.2}",
            self.policy,
            self.triangles,
            self.inner_nodes,
            self.leaves,
            self.duplication()
        )
    }
}

impl<T: Real> KdTree<T> {
    pub fn log_statistics(&self) {
        log::info!("{}", self.stats);
        log::info!(
            "Leaf depth: {} (limit {})",
            self.stats.leaf_depth,
            self.stats.max_depth
        );
        log::info!("Leaf nodes fill: {}", self.stats.leaf_fill);
    }

    /// Dumps the whole tree to the debug log, one line per node.
    pub fn print_tree(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        self.print_recursive(0, self.root, &self.bounding_box);
    }

    fn print_recursive(&self, indent: usize, node: NodeIdx, enclosing_box: &WorldBox<T>) {
        let prefix = "  ".repeat(indent);
        match &self.nodes[node] {
            Node::Inner {
                axis,
                split,
                children,
            } => {
                log::debug!(
                    "{prefix}- I{}: {:?}-{:?} split {axis:?} at {split}",
                    node.index(),
                    enclosing_box.min,
                    enclosing_box.max,
                );
                let (lower, upper) = enclosing_box.split(*axis, *split);
                self.print_recursive(indent + 1, children[0], &lower);
                self.print_recursive(indent + 1, children[1], &upper);
            }
            Node::Leaf { triangles } => {
                log::debug!(
                    "{prefix}- L{}: {:?}-{:?}",
                    node.index(),
                    enclosing_box.min,
                    enclosing_box.max,
                );
                if triangles.is_empty() {
                    log::debug!("{prefix}    <EMPTY>");
                } else {
                    log::debug!("{prefix}    {:?}", self.leaf_triangles(*triangles));
                }
            }
        }
    }
}
