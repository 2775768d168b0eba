//! Transform Component
//!
//! Local translation, rotation (quaternion), and non-uniform scale with
//! cached local and world matrices. Mutation marks the component dirty with
//! a field bitmask; the transform system consumes the mask during hierarchy
//! propagation and the bounds component invalidates world bounds off it.

use bitflags::bitflags;
use glam::{Affine3A, EulerRot, Mat3, Mat4, Quat, Vec3};

bitflags! {
    /// Which local fields changed since the last propagation pass.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct TransformDirty: u8 {
        const TRANSLATION = 1 << 0;
        const ROTATION    = 1 << 1;
        const SCALE       = 1 << 2;
        const ALL         = Self::TRANSLATION.bits() | Self::ROTATION.bits() | Self::SCALE.bits();
    }
}

/// TRS transform with cached matrices.
#[derive(Debug, Clone)]
pub struct Transform {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,

    // Cached matrices (read by the renderer)
    local_matrix: Affine3A,
    world_matrix: Affine3A,

    dirty: TransformDirty,
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            local_matrix: Affine3A::IDENTITY,
            world_matrix: Affine3A::IDENTITY,
            dirty: TransformDirty::ALL,
        }
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    #[must_use]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    #[must_use]
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty |= TransformDirty::TRANSLATION;
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
        self.dirty |= TransformDirty::TRANSLATION;
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.dirty |= TransformDirty::ROTATION;
    }

    /// Sets rotation from Euler angles (XYZ order, radians).
    pub fn set_rotation_euler(&mut self, x: f32, y: f32, z: f32) {
        self.set_rotation(Quat::from_euler(EulerRot::XYZ, x, y, z));
    }

    /// Rotation as Euler angles (XYZ order, radians).
    #[must_use]
    pub fn rotation_euler(&self) -> Vec3 {
        let (x, y, z) = self.rotation.to_euler(EulerRot::XYZ);
        Vec3::new(x, y, z)
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty |= TransformDirty::SCALE;
    }

    /// Orients the transform to face a target point in parent space.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward.cross(up).length_squared() < 1e-4 {
            return;
        }
        let right = forward.cross(up).normalize();
        let new_up = right.cross(forward).normalize();
        let rot_mat = Mat3::from_cols(right, new_up, -forward);
        self.set_rotation(Quat::from_mat3(&rot_mat));
    }

    /// Directly sets the local matrix (e.g. from a physics pose).
    /// Decomposes into TRS and synchronizes state.
    pub fn apply_local_matrix(&mut self, mat: Affine3A) {
        self.local_matrix = mat;
        let (scale, rotation, translation) = mat.to_scale_rotation_translation();
        self.scale = scale;
        self.rotation = rotation;
        self.position = translation;
        self.dirty = TransformDirty::ALL;
    }

    /// Pending dirty mask, without clearing it.
    #[inline]
    #[must_use]
    pub fn dirty_mask(&self) -> TransformDirty {
        self.dirty
    }

    /// Recomputes the local matrix if any field changed. Returns the mask of
    /// changed fields and clears it.
    pub fn update_local_matrix(&mut self) -> TransformDirty {
        let mask = self.dirty;
        if !mask.is_empty() {
            self.local_matrix =
                Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.position);
            self.dirty = TransformDirty::empty();
        }
        mask
    }

    #[inline]
    #[must_use]
    pub fn local_matrix(&self) -> &Affine3A {
        &self.local_matrix
    }

    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> &Affine3A {
        &self.world_matrix
    }

    #[inline]
    #[must_use]
    pub fn world_matrix_as_mat4(&self) -> Mat4 {
        Mat4::from(self.world_matrix)
    }

    pub(crate) fn set_world_matrix(&mut self, mat: Affine3A) {
        self.world_matrix = mat;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_accumulates_the_dirty_mask() {
        let mut t = Transform::new();
        t.update_local_matrix();
        assert!(t.dirty_mask().is_empty());

        t.set_position(Vec3::X);
        t.set_scale(Vec3::splat(2.0));
        assert_eq!(
            t.dirty_mask(),
            TransformDirty::TRANSLATION | TransformDirty::SCALE
        );

        let mask = t.update_local_matrix();
        assert!(mask.contains(TransformDirty::TRANSLATION));
        assert!(t.dirty_mask().is_empty());
    }

    #[test]
    fn local_matrix_matches_trs() {
        let mut t = Transform::new();
        t.set_position(Vec3::new(1.0, 2.0, 3.0));
        t.set_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        t.update_local_matrix();
        let p = t.local_matrix().transform_point3(Vec3::Z);
        assert!((p - Vec3::new(2.0, 2.0, 3.0)).length() < 1e-5);
    }
}
