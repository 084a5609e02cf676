use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};

use bon::bon;
use thiserror::Error;

use crate::{
    geometry::{Ray, Real, WorldBox, WorldPoint},
    kd_tree::{BuildError, BuildPolicy, BuildStats, Hit, KdTree, MAX_DEPTH_LIMIT, TraversalStack},
    triangle_store::{PushError, TriangleRecord, TriangleStore},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub build_policy: BuildPolicy,
    /// Tree depth limit, None picks one from the triangle count.
    pub max_depth: Option<u32>,
    /// Drop near zero area triangles when pushing.
    pub degenerate_check: bool,
    /// Capacity hint for the triangle store.
    pub expected_triangles: usize,
}

#[bon]
impl EngineConfig {
    #[builder]
    pub fn new(
        #[builder(default)] build_policy: BuildPolicy,
        max_depth: Option<u32>,
        #[builder(default = true)] degenerate_check: bool,
        #[builder(default)] expected_triangles: usize,
    ) -> Self {
        EngineConfig {
            build_policy,
            max_depth: max_depth.map(|depth| depth.min(MAX_DEPTH_LIMIT)),
            degenerate_check,
            expected_triangles,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::builder().build()
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Triangles can't change while a tree built from them is installed")]
    TreeInstalled,
}

/// Counters accumulated over all queries of an engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStatistics {
    pub rays_fired: u64,
    pub nodes_visited: u64,
    pub triangles_tested: u64,
}

/// Ray/triangle intersection engine.
///
/// Triangles are pushed in a build phase, [`Engine::prep`] builds the tree and from then on
/// the engine is read only: any number of threads may call [`Engine::work`] concurrently.
/// The only shared mutable state are the statistics counters, which are atomic.
#[derive(Debug)]
pub struct Engine<T: Real, Tag> {
    config: EngineConfig,
    triangles: TriangleStore<T, Tag>,
    tree: Option<KdTree<T>>,

    rays_fired: AtomicU64,
    nodes_visited: AtomicU64,
    triangles_tested: AtomicU64,
}

pub type Engine32<Tag> = Engine<f32, Tag>;
pub type Engine64<Tag> = Engine<f64, Tag>;

impl<T: Real, Tag> Engine<T, Tag> {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            triangles: TriangleStore::with_capacity(
                config.expected_triangles,
                config.degenerate_check,
            ),
            tree: None,
            rays_fired: AtomicU64::new(0),
            nodes_visited: AtomicU64::new(0),
            triangles_tested: AtomicU64::new(0),
        }
    }

    pub fn with_capacity(expected_triangles: usize, build_policy: BuildPolicy) -> Self {
        Self::new(
            EngineConfig::builder()
                .expected_triangles(expected_triangles)
                .build_policy(build_policy)
                .build(),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Adds triangles from a flat coordinate buffer, see [`TriangleStore::push`].
    /// Fails while a tree is installed, call [`Engine::free`] first.
    pub fn push<I>(
        &mut self,
        vertices: &[T],
        stride: usize,
        count: usize,
        tags: I,
    ) -> Result<usize, EngineError>
    where
        I: IntoIterator<Item = Tag>,
        I::IntoIter: ExactSizeIterator,
    {
        self.check_no_tree()?;
        Ok(self.triangles.push(vertices, stride, count, tags)?)
    }

    pub fn push_triangles(
        &mut self,
        triangles: impl IntoIterator<Item = ([WorldPoint<T>; 3], Tag)>,
    ) -> Result<usize, EngineError> {
        self.check_no_tree()?;
        Ok(self.triangles.push_triangles(triangles)?)
    }

    /// Builds the tree over all pushed triangles, replacing the previous one.
    /// On failure the previous tree (if any) stays installed.
    pub fn prep(&mut self) -> Result<&BuildStats, EngineError> {
        let tree = KdTree::build(
            &self.triangles,
            self.config.build_policy,
            self.config.max_depth,
        )?;
        tree.log_statistics();
        Ok(self.tree.insert(tree).stats())
    }

    /// Drops the tree. Triangles are kept and more can be pushed.
    pub fn free(&mut self) {
        self.tree = None;
    }

    /// Drops all triangles. Fails while a tree is installed.
    pub fn free_triangles(&mut self) -> Result<(), EngineError> {
        self.check_no_tree()?;
        self.triangles.clear();
        Ok(())
    }

    fn check_no_tree(&self) -> Result<(), EngineError> {
        if self.tree.is_some() {
            Err(EngineError::TreeInstalled)
        } else {
            Ok(())
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.tree.is_some()
    }

    pub fn tree(&self) -> Option<&KdTree<T>> {
        self.tree.as_ref()
    }

    pub fn triangles(&self) -> &TriangleStore<T, Tag> {
        &self.triangles
    }

    /// Bounding box of all pushed triangles.
    pub fn bounds(&self) -> Option<&WorldBox<T>> {
        self.triangles.bounds()
    }

    pub fn build_stats(&self) -> Option<&BuildStats> {
        self.tree.as_ref().map(|tree| tree.stats())
    }

    pub fn rays_fired(&self) -> u64 {
        self.rays_fired.load(Ordering::Relaxed)
    }

    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            rays_fired: self.rays_fired.load(Ordering::Relaxed),
            nodes_visited: self.nodes_visited.load(Ordering::Relaxed),
            triangles_tested: self.triangles_tested.load(Ordering::Relaxed),
        }
    }

    /// Shoots a ray, calling `hit_fn` for every hit front to back.
    ///
    /// Traversal stops early when `hit_fn` breaks, the break value is returned.
    /// An unprepared engine never reports hits. Sets `ray.kdtree_depth`.
    pub fn work<R>(
        &self,
        ray: &mut Ray<T>,
        hit_fn: impl FnMut(&Ray<T>, &Hit<T>, &TriangleRecord<T, Tag>) -> ControlFlow<R>,
    ) -> Option<R> {
        self.work_with_stack(ray, &mut TraversalStack::new(), hit_fn)
    }

    /// Same as [`Engine::work`], reusing caller provided scratch memory.
    pub fn work_with_stack<R>(
        &self,
        ray: &mut Ray<T>,
        stack: &mut TraversalStack<T>,
        hit_fn: impl FnMut(&Ray<T>, &Hit<T>, &TriangleRecord<T, Tag>) -> ControlFlow<R>,
    ) -> Option<R> {
        self.rays_fired.fetch_add(1, Ordering::Relaxed);

        let Some(tree) = &self.tree else {
            ray.kdtree_depth = 0;
            return None;
        };

        let result = tree.traverse(&self.triangles, ray, stack, hit_fn);

        ray.kdtree_depth = stack.deepest();
        self.nodes_visited
            .fetch_add(stack.nodes_visited(), Ordering::Relaxed);
        self.triangles_tested
            .fetch_add(stack.triangles_tested(), Ordering::Relaxed);

        result
    }

    /// Closest hit along the ray.
    pub fn first_hit(&self, ray: &Ray<T>) -> Option<Hit<T>> {
        let mut ray = *ray;
        self.work(&mut ray, |_, hit, _| ControlFlow::Break(*hit))
    }

    /// All hits along the ray, front to back.
    pub fn all_hits(&self, ray: &Ray<T>) -> Vec<Hit<T>> {
        let mut ray = *ray;
        let mut hits = Vec::new();
        let _: Option<()> = self.work(&mut ray, |_, hit, _| {
            hits.push(*hit);
            ControlFlow::Continue(())
        });
        hits
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        geometry::{Axis, WorldVector, relative_tolerance},
        kd_tree::Node,
        triangle_store::TriangleIdx,
    };
    use assert2::{assert, check, let_assert};
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    fn point<T: Real>(x: f64, y: f64, z: f64) -> WorldPoint<T> {
        WorldPoint::new(T::from_f64(x), T::from_f64(y), T::from_f64(z))
    }

    fn vector<T: Real>(x: f64, y: f64, z: f64) -> WorldVector<T> {
        WorldVector::new(T::from_f64(x), T::from_f64(y), T::from_f64(z))
    }

    fn random_point(rng: &mut SmallRng, size: f64) -> [f64; 3] {
        [
            rng.random_range(-size..size),
            rng.random_range(-size..size),
            rng.random_range(-size..size),
        ]
    }

    /// Random triangles of mixed sizes in a 20x20x20 cube.
    fn random_soup<T: Real>(count: usize, seed: u64) -> Vec<([WorldPoint<T>; 3], usize)> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..count)
            .map(|i| {
                let [x, y, z] = random_point(&mut rng, 10.0);
                let size = if i % 10 == 0 { 5.0 } else { 1.0 };
                let vertices = std::array::from_fn(|_| {
                    let [dx, dy, dz] = random_point(&mut rng, size);
                    point(x + dx, y + dy, z + dz)
                });
                (vertices, i)
            })
            .collect()
    }

    /// Rays starting around the soup, aimed at random points inside it.
    fn random_rays<T: Real>(count: usize, seed: u64) -> Vec<Ray<T>> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let [ox, oy, oz] = random_point(&mut rng, 15.0);
                let [tx, ty, tz] = random_point(&mut rng, 8.0);
                Ray::new(point(ox, oy, oz), vector(tx - ox, ty - oy, tz - oz))
            })
            .collect()
    }

    fn prepared<T: Real>(
        triangles: Vec<([WorldPoint<T>; 3], usize)>,
        policy: BuildPolicy,
    ) -> Engine<T, usize> {
        let mut engine = Engine::with_capacity(triangles.len(), policy);
        engine.push_triangles(triangles).unwrap();
        engine.prep().unwrap();
        engine
    }

    /// Hits found by testing every stored triangle, as sorted triangle indices.
    fn brute_force<T: Real>(engine: &Engine<T, usize>, ray: &Ray<T>) -> Vec<TriangleIdx> {
        let mut hits: Vec<_> = engine
            .triangles()
            .iter()
            .filter(|(_, record)| record.geometry().intersect(ray, ray.max_distance).is_some())
            .map(|(index, _)| index)
            .collect();
        hits.sort();
        hits
    }

    fn hit_indices<T: Real>(hits: &[Hit<T>]) -> Vec<TriangleIdx> {
        let mut indices: Vec<_> = hits.iter().map(|hit| hit.triangle).collect();
        indices.sort();
        indices
    }

    macro_rules! precision_tests {
        ($name:ident, $t:ty, $tolerance:expr) => {
            mod $name {
                use super::*;
                use assert2::{assert, check, let_assert};
                use test_case::test_case;

                type T = $t;
                const TOLERANCE: T = $tolerance;

                fn unit_triangle() -> [WorldPoint<T>; 3] {
                    [
                        point(0.0, 0.0, 0.0),
                        point(1.0, 0.0, 0.0),
                        point(0.0, 1.0, 0.0),
                    ]
                }

                #[test_case(BuildPolicy::Fast)]
                #[test_case(BuildPolicy::Optimal)]
                fn perpendicular_hit(policy: BuildPolicy) {
                    let engine = prepared::<T>(vec![(unit_triangle(), 7)], policy);
                    let mut ray = Ray::new(point(0.25, 0.25, 10.0), vector(0.0, 0.0, -1.0));

                    let result = engine.work(&mut ray, |_, hit, record| {
                        ControlFlow::Break((*hit, *record.owner()))
                    });

                    let_assert!(Some((hit, owner)) = result);
                    check!(owner == 7);
                    check!((hit.distance - 10.0).abs() <= TOLERANCE);
                    check!(hit.normal == vector(0.0, 0.0, 1.0));
                    check!((hit.uv.alpha - 0.25).abs() <= TOLERANCE);
                    check!((hit.uv.beta - 0.25).abs() <= TOLERANCE);
                    check!((hit.point - point(0.25, 0.25, 0.0)).norm() <= TOLERANCE);
                }

                #[test]
                fn barycentric_round_trip() {
                    let a = point(1.0, -2.0, 0.5);
                    let b = point(4.0, 1.0, -1.0);
                    let c = point(-1.0, 3.0, 2.0);
                    let engine = prepared::<T>(vec![([a, b, c], 0)], BuildPolicy::Fast);

                    let target = a + (b - a) * 0.3 + (c - a) * 0.2;
                    let direction = vector(-0.2, 0.1, 1.0);
                    let ray = Ray::new(target - direction * 3.0, direction);

                    let_assert!(Some(hit) = engine.first_hit(&ray));
                    check!((hit.uv.alpha - 0.3).abs() <= TOLERANCE);
                    check!((hit.uv.beta - 0.2).abs() <= TOLERANCE);
                    check!((hit.uv.gamma() - 0.5).abs() <= TOLERANCE);
                    check!((hit.distance - 3.0).abs() <= TOLERANCE);
                }

                #[test]
                fn ray_missing_the_box() {
                    let engine = prepared::<T>(random_soup(100, 81), BuildPolicy::Optimal);
                    let mut ray = Ray::new(point(0.0, 0.0, 50.0), vector(1.0, 0.0, 0.0));
                    let result: Option<()> = engine.work(&mut ray, |_, _, _| {
                        panic!("Ray outside of the bounds must not hit");
                    });
                    assert!(result.is_none());
                    assert!(engine.statistics().nodes_visited == 0);
                    assert!(engine.rays_fired() == 1);
                }

                #[test_case(point(-1.0, 0.25, 0.0), vector(1.0, 0.0, 0.0) ; "in_plane")]
                #[test_case(point(-1.0, 0.25, 1.0), vector(1.0, 0.0, 0.0) ; "above_plane")]
                #[test_case(point(-1.0, 0.25, 0.0), vector(1.0, 1e-9, 0.0) ; "nearly_in_plane")]
                fn parallel_ray_misses(origin: WorldPoint<T>, direction: WorldVector<T>) {
                    let engine = prepared::<T>(vec![(unit_triangle(), 0)], BuildPolicy::Fast);
                    let mut ray = Ray::new(origin, direction);
                    let result: Option<()> = engine.work(&mut ray, |_, _, _| {
                        panic!("Parallel ray must not hit");
                    });
                    assert!(result.is_none());
                }

                #[test_case(BuildPolicy::Fast)]
                #[test_case(BuildPolicy::Optimal)]
                fn coincident_triangles(policy: BuildPolicy) {
                    let triangles = (0..10_000).map(|i| (unit_triangle(), i)).collect();
                    let engine = prepared::<T>(triangles, policy);

                    let stats = engine.build_stats().unwrap();
                    assert!(stats.leaf_depth.max <= stats.max_depth as usize);

                    let ray = Ray::new(point(0.2, 0.2, 1.0), vector(0.0, 0.0, -1.0));
                    let hits = engine.all_hits(&ray);
                    assert!(hits.len() == 10_000);
                    assert!(hit_indices(&hits).windows(2).all(|w| w[0] != w[1]));
                }

                #[test_case(BuildPolicy::Fast)]
                #[test_case(BuildPolicy::Optimal)]
                fn idempotent_prep(policy: BuildPolicy) {
                    let mut engine = prepared::<T>(random_soup(300, 11), policy);
                    let rays = random_rays::<T>(200, 12);

                    let before: Vec<_> = rays.iter().map(|ray| engine.all_hits(ray)).collect();
                    engine.prep().unwrap();
                    let again: Vec<_> = rays.iter().map(|ray| engine.all_hits(ray)).collect();
                    engine.free();
                    engine.prep().unwrap();
                    let after_free: Vec<_> = rays.iter().map(|ray| engine.all_hits(ray)).collect();

                    assert!(before == again);
                    assert!(before == after_free);
                }

                #[test]
                fn policies_agree() {
                    let fast = prepared::<T>(random_soup(400, 21), BuildPolicy::Fast);
                    let optimal = prepared::<T>(random_soup(400, 21), BuildPolicy::Optimal);

                    for ray in random_rays::<T>(300, 22) {
                        let fast_hits = fast.all_hits(&ray);
                        let optimal_hits = optimal.all_hits(&ray);
                        assert!(hit_indices(&fast_hits) == hit_indices(&optimal_hits));

                        match (fast.first_hit(&ray), optimal.first_hit(&ray)) {
                            (None, None) => {}
                            (Some(a), Some(b)) => {
                                let tolerance = relative_tolerance(a.distance, TOLERANCE);
                                assert!((a.distance - b.distance).abs() <= tolerance);
                            }
                            (a, b) => panic!("Policies disagree: {a:?} vs {b:?}"),
                        }
                    }
                }

                #[test_case(BuildPolicy::Fast)]
                #[test_case(BuildPolicy::Optimal)]
                fn matches_brute_force(policy: BuildPolicy) {
                    let engine = prepared::<T>(random_soup(500, 31), policy);
                    for ray in random_rays::<T>(300, 32) {
                        let hits = engine.all_hits(&ray);
                        assert!(hit_indices(&hits) == brute_force(&engine, &ray));
                    }
                }

                #[test]
                fn hits_are_front_to_back_and_consistent() {
                    let engine = prepared::<T>(random_soup(500, 41), BuildPolicy::Optimal);
                    let bounds = *engine.bounds().unwrap();

                    for ray in random_rays::<T>(200, 42) {
                        let hits = engine.all_hits(&ray);

                        for pair in hits.windows(2) {
                            let slack = relative_tolerance(pair[0].distance, TOLERANCE);
                            assert!(pair[0].distance <= pair[1].distance + slack);
                        }

                        for hit in &hits {
                            let vertices = engine.triangles()[hit.triangle].vertices();
                            let interpolated = hit.uv.interpolate_triangle(&vertices.map(|p| p.coords));
                            let tolerance = relative_tolerance(hit.distance, TOLERANCE);

                            assert!((interpolated - hit.point.coords).norm() <= tolerance);
                            assert!((ray.point_at(hit.distance) - hit.point).norm() <= tolerance);
                            assert!((hit.normal.norm() - 1.0).abs() <= TOLERANCE);
                            assert!((0..3).all(|i| {
                                bounds.min[i] - tolerance <= hit.point[i]
                                    && hit.point[i] <= bounds.max[i] + tolerance
                            }));
                        }
                    }
                }

                #[test_case(vector(0.0, 0.0, -1.0) ; "front")]
                #[test_case(vector(0.0, 0.0, 1.0) ; "back")]
                #[test_case(vector(0.3, -0.2, -1.0) ; "oblique")]
                fn shared_edge_hit_once(direction: WorldVector<T>) {
                    // Two triangles sharing the edge x == 1, the ray aims at the edge's midpoint
                    let a = point(0.0, 0.0, 0.0);
                    let b = point(1.0, 0.0, 0.0);
                    let c = point(1.0, 2.0, 0.0);
                    let d = point(2.0, 1.0, 0.0);
                    let engine = prepared::<T>(vec![([a, b, c], 0), ([b, d, c], 1)], BuildPolicy::Fast);

                    let target = point(1.0, 1.0, 0.0);
                    let ray = Ray::new(target - direction * 5.0, direction);
                    assert!(engine.all_hits(&ray).len() == 1);
                }

                #[test_case(BuildPolicy::Fast)]
                #[test_case(BuildPolicy::Optimal)]
                fn ray_in_split_plane_finds_touching_triangle(policy: BuildPolicy) {
                    // Two clusters with centroids at x == 0 and x == 10 split the root at x == 5
                    let cluster = |x: f64| {
                        (0..5).map(move |i| {
                            let z = i as f64 * 0.1;
                            [point::<T>(x - 0.5, 0.0, z), point(x + 0.5, 0.0, z), point(x, 1.0, z)]
                        })
                    };
                    let mut triangles: Vec<_> = cluster(0.0).chain(cluster(10.0)).zip(0..).collect();
                    // Touches the plane x == 5 with an edge, reaches above it
                    triangles.push(([point(5.0, 0.0, 0.0), point(5.0, 0.0, 1.0), point(6.0, 0.5, 0.5)], 99));
                    let engine = prepared::<T>(triangles, policy);

                    let tree = engine.tree().unwrap();
                    if policy == BuildPolicy::Fast {
                        let_assert!(Node::Inner { axis, split, .. } = tree.node(tree.root()));
                        assert!(*axis == Axis::X);
                        assert!(*split == 5.0);
                    }

                    let ray = Ray::new(point(5.0, 2.0, 0.5), vector(0.0, -1.0, 0.0));
                    let hits = engine.all_hits(&ray);
                    assert!(hit_indices(&hits) == brute_force(&engine, &ray));
                    let owners: Vec<_> = hits.iter().map(|hit| *engine.triangles()[hit.triangle].owner()).collect();
                    assert!(owners == [99]);
                }

                #[test_case(0.5, 0.0, 1.0 ; "ab")]
                #[test_case(0.5, 0.5, -1.0 ; "bc")]
                #[test_case(0.0, 0.5, 1.0 ; "ca")]
                fn lone_triangle_edges(x: f64, y: f64, inward: f64) {
                    let engine = prepared::<T>(vec![(unit_triangle(), 0)], BuildPolicy::Fast);
                    let offset = f64::from(TOLERANCE) * 1e-3;
                    let (dx, dy) = if x == 0.0 {
                        (inward * offset, 0.0)
                    } else if y == 0.0 {
                        (0.0, inward * offset)
                    } else {
                        (inward * offset, inward * offset)
                    };

                    for direction in [-1.0, 1.0] {
                        let inside = Ray::new(point(x + dx, y + dy, -direction), vector(0.0, 0.0, direction));
                        assert!(engine.all_hits(&inside).len() == 1);
                    }

                    // Exactly on the edge the winding decides, front and back disagree
                    let on_edge: Vec<_> = [-1.0, 1.0]
                        .into_iter()
                        .map(|direction| {
                            let ray = Ray::new(point(x, y, -direction), vector(0.0, 0.0, direction));
                            engine.all_hits(&ray).len()
                        })
                        .collect();
                    assert!(on_edge.iter().sum::<usize>() == 1);
                }

                #[test]
                fn triangle_in_many_leaves_reported_once() {
                    let mut triangles = random_soup::<T>(400, 51);
                    // Huge triangle cutting through the whole soup
                    triangles.push((
                        [point(-20.0, -20.0, 0.1), point(40.0, -20.0, 0.1), point(-20.0, 40.0, 0.1)],
                        1000,
                    ));
                    let engine = prepared::<T>(triangles, BuildPolicy::Fast);
                    assert!(engine.build_stats().unwrap().leaves > 1);

                    for ray in random_rays::<T>(100, 52) {
                        let owners: Vec<_> = engine
                            .all_hits(&ray)
                            .iter()
                            .map(|hit| *engine.triangles()[hit.triangle].owner())
                            .filter(|owner| *owner == 1000)
                            .collect();
                        assert!(owners.len() <= 1);
                    }

                    let down = Ray::new(point(0.5, 0.5, 20.0), vector(0.0, 0.0, -1.0));
                    let big_hits = engine
                        .all_hits(&down)
                        .iter()
                        .filter(|hit| *engine.triangles()[hit.triangle].owner() == 1000)
                        .count();
                    assert!(big_hits == 1);
                }

                #[test]
                fn degenerate_triangles_are_excluded() {
                    let mut engine = Engine::<T, usize>::new(EngineConfig::default());
                    let collinear = [point(0.0, 0.0, 0.0), point(1.0, 1.0, 0.0), point(2.0, 2.0, 0.0)];
                    let tiny = [point(0.0, 0.0, 0.0), point(1e-9, 0.0, 0.0), point(0.0, 1e-9, 0.0)];
                    let stored = engine
                        .push_triangles([(collinear, 0), (unit_triangle(), 1), (tiny, 2)])
                        .unwrap();
                    assert!(stored == 1);
                    assert!(engine.triangles().degenerate_count() == 2);
                    engine.prep().unwrap();

                    let ray = Ray::new(point(1.0, 1.0, 1.0), vector(0.0, 0.0, -1.0));
                    assert!(engine.first_hit(&ray).is_none());
                }

                #[test]
                fn concurrent_work() {
                    let engine = prepared::<T>(random_soup(300, 61), BuildPolicy::Optimal);
                    let rays = random_rays::<T>(100, 62);
                    let expected: Vec<_> = rays.iter().map(|ray| engine.all_hits(ray)).collect();
                    let before = engine.statistics();

                    std::thread::scope(|scope| {
                        for _ in 0..4 {
                            scope.spawn(|| {
                                let mut stack = TraversalStack::new();
                                for (ray, expected) in rays.iter().zip(&expected) {
                                    let mut ray = *ray;
                                    let mut hits = Vec::new();
                                    let _: Option<()> = engine.work_with_stack(&mut ray, &mut stack, |_, hit, _| {
                                        hits.push(*hit);
                                        ControlFlow::Continue(())
                                    });
                                    assert!(hits == *expected);
                                }
                            });
                        }
                    });

                    let after = engine.statistics();
                    assert!(after.rays_fired - before.rays_fired == 400);
                    assert!(after.nodes_visited - before.nodes_visited == 4 * before.nodes_visited);
                    assert!(after.triangles_tested - before.triangles_tested == 4 * before.triangles_tested);
                }

                #[test]
                fn unprepared_engine_misses() {
                    let mut engine = Engine::<T, usize>::new(EngineConfig::default());
                    engine.push_triangles([(unit_triangle(), 0)]).unwrap();

                    let mut ray = Ray::new(point(0.25, 0.25, 1.0), vector(0.0, 0.0, -1.0));
                    let result: Option<()> = engine.work(&mut ray, |_, _, _| {
                        panic!("Unprepared engine must not hit");
                    });
                    assert!(result.is_none());
                    assert!(engine.rays_fired() == 1);
                    assert!(ray.kdtree_depth == 0);
                }

                #[test]
                fn malformed_push_changes_nothing() {
                    let mut engine = Engine::<T, usize>::new(EngineConfig::default());
                    let flat: Vec<T> = unit_triangle().iter().flat_map(|p| p.coords.iter().copied()).collect();

                    let_assert!(Err(EngineError::Push(PushError::InvalidStride { .. })) = engine.push(&flat, 2, 1, [0]));
                    let_assert!(Err(EngineError::Push(PushError::BufferTooShort { .. })) = engine.push(&flat, 3, 2, [0, 1]));
                    let_assert!(Err(EngineError::Push(PushError::TagCountMismatch { .. })) = engine.push(&flat, 3, 1, [0, 1]));
                    assert!(engine.triangles().is_empty());
                    assert!(engine.bounds().is_none());

                    let_assert!(Ok(1) = engine.push(&flat, 3, 1, [0]));
                }

                #[test]
                fn lifecycle() {
                    let mut engine = Engine::<T, usize>::new(EngineConfig::default());
                    let_assert!(Err(EngineError::Build(BuildError::EmptyStore)) = engine.prep());

                    engine.push_triangles([(unit_triangle(), 0)]).unwrap();
                    engine.prep().unwrap();
                    assert!(engine.is_prepared());

                    let_assert!(Err(EngineError::TreeInstalled) = engine.push_triangles([(unit_triangle(), 1)]));
                    let_assert!(Err(EngineError::TreeInstalled) = engine.free_triangles());

                    engine.free();
                    assert!(!engine.is_prepared());
                    assert!(engine.triangles().len() == 1);

                    engine.push_triangles([(unit_triangle(), 1)]).unwrap();
                    engine.prep().unwrap();
                    let ray = Ray::new(point(0.25, 0.25, 1.0), vector(0.0, 0.0, -1.0));
                    assert!(engine.all_hits(&ray).len() == 2);

                    engine.free();
                    engine.free_triangles().unwrap();
                    assert!(engine.triangles().is_empty());
                }

                #[test]
                fn kdtree_depth_is_recorded() {
                    let engine = prepared::<T>(random_soup(500, 71), BuildPolicy::Fast);
                    let mut deepest = 0;
                    for mut ray in random_rays::<T>(50, 72) {
                        ray.depth = 3;
                        let _: Option<()> = engine.work(&mut ray, |_, _, _| ControlFlow::Continue(()));
                        assert!(ray.depth == 3);
                        assert!(ray.kdtree_depth as usize <= engine.build_stats().unwrap().leaf_depth.max);
                        deepest = deepest.max(ray.kdtree_depth);
                    }
                    assert!(deepest > 0);
                }
            }
        };
    }

    precision_tests!(single_precision, f32, 1e-3);
    precision_tests!(double_precision, f64, 1e-9);

    #[test]
    fn config_defaults() {
        let config = EngineConfig::default();
        assert!(config.build_policy == BuildPolicy::Fast);
        assert!(config.max_depth.is_none());
        assert!(config.degenerate_check);
        assert!(config.expected_triangles == 0);
    }

    #[test]
    fn config_clamps_depth() {
        let config = EngineConfig::builder()
            .build_policy(BuildPolicy::Optimal)
            .max_depth(1000)
            .degenerate_check(false)
            .build();
        assert!(config.max_depth == Some(MAX_DEPTH_LIMIT));
        assert!(!config.degenerate_check);
    }

    #[test]
    fn degenerate_check_can_be_disabled() {
        let mut engine = Engine64::<()>::new(EngineConfig::builder().degenerate_check(false).build());
        let collinear = [
            point(0.0, 0.0, 0.0),
            point(1.0, 1.0, 0.0),
            point(2.0, 2.0, 0.0),
        ];
        assert!(engine.push_triangles([(collinear, ())]).unwrap() == 1);
        engine.prep().unwrap();
        let ray = Ray::new(point(1.0, 1.0, 1.0), vector(0.0, 0.0, -1.0));
        assert!(engine.first_hit(&ray).is_none());
    }
}
