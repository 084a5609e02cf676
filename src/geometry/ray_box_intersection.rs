use super::{Ray, Real, WorldBox};

pub trait RayIntersectionExt<T: Real> {
    /// Entry and exit distance of the ray's line through the box.
    /// The ray misses if entry > exit, distances may be negative.
    fn intersect(&self, ray: &Ray<T>) -> (T, T);
}

impl<T: Real> RayIntersectionExt<T> for WorldBox<T> {
    fn intersect(&self, ray: &Ray<T>) -> (T, T) {
        let origin = ray.origin();
        let inv_direction = ray.inv_direction();

        let mut min_t = T::neg_infinity();
        let mut max_t = T::infinity();

        for i in 0..3 {
            // 0 * inf gives NaN for a ray lying in a slab plane, treat the slab as unbounded
            let to_box_min = (self.min[i] - origin[i]) * inv_direction[i];
            let to_box_min = if to_box_min.is_nan() {
                T::neg_infinity()
            } else {
                to_box_min
            };
            let to_box_max = (self.max[i] - origin[i]) * inv_direction[i];
            let to_box_max = if to_box_max.is_nan() {
                T::infinity()
            } else {
                to_box_max
            };

            min_t = min_t.max(to_box_min.min(to_box_max));
            max_t = max_t.min(to_box_min.max(to_box_max));
        }

        (min_t, max_t)
    }
}
