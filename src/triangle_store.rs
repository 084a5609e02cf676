use std::collections::TryReserveError;
use std::ops::Index;

use index_vec::IndexVec;
use thiserror::Error;

use crate::geometry::{PreparedTriangle, Real, Triangle, TriangleFlags, WorldBox, WorldPoint};

index_vec::define_index_type! {
    pub struct TriangleIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

/// A stored triangle: precomputed intersection data plus the caller's owner tag.
#[derive(Clone, Debug)]
pub struct TriangleRecord<T: Real, Tag> {
    geometry: PreparedTriangle<T>,
    owner: Tag,
}

impl<T: Real, Tag> TriangleRecord<T, Tag> {
    pub fn geometry(&self) -> &PreparedTriangle<T> {
        &self.geometry
    }

    pub fn vertices(&self) -> &Triangle<WorldPoint<T>> {
        self.geometry.vertices()
    }

    /// The opaque tag given when the triangle was pushed.
    pub fn owner(&self) -> &Tag {
        &self.owner
    }

    pub fn flags(&self) -> TriangleFlags {
        self.geometry.flags()
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("No triangles to push")]
    EmptyInput,

    #[error("Point stride {stride} is smaller than a point")]
    InvalidStride { stride: usize },

    #[error("Vertex buffer holds {len} values, {needed} needed")]
    BufferTooShort { needed: usize, len: usize },

    #[error("Buffer size for {count} triangles with point stride {stride} overflows")]
    SizeOverflow { count: usize, stride: usize },

    #[error("Got {tags} owner tags for {triangles} triangles")]
    TagCountMismatch { triangles: usize, tags: usize },

    #[error("Store can't hold more than {max} triangles")]
    CapacityExceeded { max: usize },

    #[error("Failed to allocate triangle storage: {0}")]
    Allocation(#[from] TryReserveError),
}

/// Flat array of prepared triangles, addressed by [`TriangleIdx`].
#[derive(Clone, Debug)]
pub struct TriangleStore<T: Real, Tag> {
    triangles: IndexVec<TriangleIdx, TriangleRecord<T, Tag>>,
    bounds: Option<WorldBox<T>>,
    degenerate_check: bool,
    degenerate_count: usize,
}

impl<T: Real, Tag> TriangleStore<T, Tag> {
    pub fn new(degenerate_check: bool) -> Self {
        Self::with_capacity(0, degenerate_check)
    }

    pub fn with_capacity(capacity: usize, degenerate_check: bool) -> Self {
        TriangleStore {
            triangles: IndexVec::with_capacity(capacity),
            bounds: None,
            degenerate_check,
            degenerate_count: 0,
        }
    }

    /// Appends `count` triangles given as a flat buffer of point coordinates.
    ///
    /// Point `k` starts at `vertices[k * stride]`, triangle `i` is formed by points
    /// `3i`, `3i + 1` and `3i + 2`. Every triangle needs one owner tag.
    ///
    /// Returns how many triangles were actually stored; degenerate ones are dropped
    /// (and counted) when degeneracy checking is enabled. On error nothing is stored.
    pub fn push<I>(
        &mut self,
        vertices: &[T],
        stride: usize,
        count: usize,
        tags: I,
    ) -> Result<usize, PushError>
    where
        I: IntoIterator<Item = Tag>,
        I::IntoIter: ExactSizeIterator,
    {
        if count == 0 {
            return Err(PushError::EmptyInput);
        }
        if stride < 3 {
            return Err(PushError::InvalidStride { stride });
        }
        let needed = count
            .checked_mul(3)
            .and_then(|points| (points - 1).checked_mul(stride))
            .and_then(|last_point| last_point.checked_add(3))
            .ok_or(PushError::SizeOverflow { count, stride })?;
        if vertices.len() < needed {
            return Err(PushError::BufferTooShort {
                needed,
                len: vertices.len(),
            });
        }
        let tags = tags.into_iter();
        if tags.len() != count {
            return Err(PushError::TagCountMismatch {
                triangles: count,
                tags: tags.len(),
            });
        }

        let point = |k: usize| {
            let p = &vertices[k * stride..k * stride + 3];
            WorldPoint::new(p[0], p[1], p[2])
        };

        self.extend((0..count).zip(tags).map(|(i, tag)| {
            let triangle = Triangle::new(point(3 * i), point(3 * i + 1), point(3 * i + 2));
            (triangle, tag)
        }))
    }

    /// Appends triangles given as vertex triples, same semantics as [`TriangleStore::push`].
    pub fn push_triangles(
        &mut self,
        triangles: impl IntoIterator<Item = ([WorldPoint<T>; 3], Tag)>,
    ) -> Result<usize, PushError> {
        let triangles: Vec<_> = triangles.into_iter().collect();
        if triangles.is_empty() {
            return Err(PushError::EmptyInput);
        }

        self.extend(
            triangles
                .into_iter()
                .map(|(vertices, tag)| (Triangle::from(vertices), tag)),
        )
    }

    fn extend(
        &mut self,
        triangles: impl ExactSizeIterator<Item = (Triangle<WorldPoint<T>>, Tag)>,
    ) -> Result<usize, PushError> {
        let count = triangles.len();
        if self.triangles.len() + count > TriangleIdx::MAX_INDEX {
            return Err(PushError::CapacityExceeded {
                max: TriangleIdx::MAX_INDEX,
            });
        }
        self.triangles.raw.try_reserve(count)?;

        let mut stored = 0;
        for (vertices, owner) in triangles {
            let geometry = PreparedTriangle::new(vertices);

            // Infinite coordinates would poison the bounding box, drop them regardless of the setting
            if (geometry.is_degenerate() && self.degenerate_check) || !vertices.is_finite() {
                self.degenerate_count += 1;
                log::trace!("Dropping degenerate triangle {vertices:?}");
                continue;
            }

            let triangle_box = vertices.bounding_box();
            self.bounds = Some(match &self.bounds {
                Some(b) => b.union(&triangle_box),
                None => triangle_box,
            });

            self.triangles.push(TriangleRecord { geometry, owner });
            stored += 1;
        }

        Ok(stored)
    }

    /// Number of stored (non-dropped) triangles.
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Number of triangles dropped as degenerate so far.
    pub fn degenerate_count(&self) -> usize {
        self.degenerate_count
    }

    pub fn degenerate_check(&self) -> bool {
        self.degenerate_check
    }

    /// Bounding box of all stored triangles, None when empty.
    pub fn bounds(&self) -> Option<&WorldBox<T>> {
        self.bounds.as_ref()
    }

    pub fn get(&self, index: TriangleIdx) -> Option<&TriangleRecord<T, Tag>> {
        self.triangles.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TriangleIdx, &TriangleRecord<T, Tag>)> {
        self.triangles.iter_enumerated()
    }

    /// Removes all triangles and releases their memory. The degenerate counter is kept.
    pub fn clear(&mut self) {
        self.triangles = IndexVec::new();
        self.bounds = None;
    }
}

impl<T: Real, Tag> Index<TriangleIdx> for TriangleStore<T, Tag> {
    type Output = TriangleRecord<T, Tag>;

    fn index(&self, index: TriangleIdx) -> &Self::Output {
        &self.triangles[index]
    }
}
