//! Ray/triangle intersection engine accelerated by a kd-tree.
//!
//! Triangles are pushed into an [`Engine`], [`Engine::prep`] builds the tree and
//! [`Engine::work`] then walks a ray through it, handing every hit to a callback
//! in front to back order. Everything is generic over the scalar type, with
//! [`Engine32`] and [`Engine64`] as the two usual instantiations.

mod engine;
pub mod geometry;
pub mod kd_tree;
pub mod triangle_store;
mod util;

pub use engine::{Engine, Engine32, Engine64, EngineConfig, EngineError, EngineStatistics};
pub use geometry::{Ray, Real, WorldBox, WorldPoint, WorldVector};
pub use kd_tree::{BuildError, BuildPolicy, BuildStats, Hit, KdTree, TraversalStack};
pub use triangle_store::{PushError, TriangleIdx, TriangleRecord, TriangleStore};
pub use util::Stats;
