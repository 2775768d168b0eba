//! Bounding Volumes
//!
//! Axis-aligned boxes and spheres used for culling, intersection queries,
//! and shadow caster fitting. World-space bounds are recomputed lazily from
//! local bounds and the owning node's world matrix.

use glam::{Affine3A, Vec3};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::INVALID
    }
}

impl BoundingBox {
    /// An inverted box that absorbs the first point merged into it.
    pub const INVALID: Self = Self {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn from_points(points: &[Vec3]) -> Self {
        let mut aabb = Self::INVALID;
        for &p in points {
            aabb.add_point(p);
        }
        aabb
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn add_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn merge(&mut self, other: &Self) {
        if other.is_valid() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Longest edge of the box.
    #[must_use]
    pub fn max_extent(&self) -> f32 {
        let e = self.max - self.min;
        e.x.max(e.y).max(e.z)
    }

    /// Transforms all eight corners and refits.
    #[must_use]
    pub fn transformed(&self, matrix: &Affine3A) -> Self {
        if !self.is_valid() {
            return *self;
        }
        let mut out = Self::INVALID;
        for corner in self.corners() {
            out.add_point(matrix.transform_point3(corner));
        }
        out
    }

    #[must_use]
    pub fn corners(&self) -> [Vec3; 8] {
        let (mn, mx) = (self.min, self.max);
        [
            Vec3::new(mn.x, mn.y, mn.z),
            Vec3::new(mx.x, mn.y, mn.z),
            Vec3::new(mx.x, mx.y, mn.z),
            Vec3::new(mn.x, mx.y, mn.z),
            Vec3::new(mn.x, mn.y, mx.z),
            Vec3::new(mx.x, mn.y, mx.z),
            Vec3::new(mx.x, mx.y, mx.z),
            Vec3::new(mn.x, mx.y, mx.z),
        ]
    }

    /// Slab-method ray test. Returns the entry distance when the ray hits
    /// within `[t_min, t_max]`.
    #[must_use]
    pub fn intersect_ray(&self, origin: Vec3, direction: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        let inv = direction.recip();
        let t0 = (self.min - origin) * inv;
        let t1 = (self.max - origin) * inv;
        let t_near = t0.min(t1);
        let t_far = t0.max(t1);
        let near = t_near.max_element().max(t_min);
        let far = t_far.min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

/// Center + radius bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    #[must_use]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Sphere circumscribing an AABB.
    #[must_use]
    pub fn from_box(aabb: &BoundingBox) -> Self {
        if !aabb.is_valid() {
            return Self::default();
        }
        Self {
            center: aabb.center(),
            radius: aabb.half_extents().length(),
        }
    }

    /// Squared distance from `point` to the sphere center.
    #[inline]
    #[must_use]
    pub fn distance_sq(&self, point: Vec3) -> f32 {
        self.center.distance_squared(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn merge_and_refit() {
        let mut a = BoundingBox::from_points(&[Vec3::ZERO, Vec3::ONE]);
        let b = BoundingBox::from_points(&[Vec3::splat(-2.0), Vec3::splat(-1.0)]);
        a.merge(&b);
        assert_eq!(a.min, Vec3::splat(-2.0));
        assert_eq!(a.max, Vec3::ONE);
    }

    #[test]
    fn transform_keeps_containment() {
        let aabb = BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let m = Affine3A::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::from_rotation_y(0.7),
            Vec3::new(5.0, 0.0, 0.0),
        );
        let world = aabb.transformed(&m);
        for corner in aabb.corners() {
            let p = m.transform_point3(corner);
            assert!(world.min.x <= p.x + 1e-4 && p.x <= world.max.x + 1e-4);
        }
    }

    #[test]
    fn ray_hits_box_from_outside() {
        let aabb = BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let t = aabb
            .intersect_ray(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 0.0, 100.0)
            .unwrap();
        assert!((t - 4.0).abs() < 1e-5);
        assert!(aabb
            .intersect_ray(Vec3::new(-5.0, 3.0, 0.0), Vec3::X, 0.0, 100.0)
            .is_none());
    }

    #[test]
    fn sphere_from_box() {
        let aabb = BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let sphere = BoundingSphere::from_box(&aabb);
        assert_eq!(sphere.center, Vec3::ZERO);
        assert!((sphere.radius - 3.0_f32.sqrt()).abs() < 1e-6);
    }
}
