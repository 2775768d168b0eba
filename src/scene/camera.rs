//! Cameras and Frustums
//!
//! A camera is eye + orientation + projection, with cached view/projection
//! matrices and a derived 6-plane frustum. Depth is standard [0, 1].

use glam::{EulerRot, Mat4, Quat, Vec3, Vec4};

use crate::resources::bounds::BoundingBox;

/// Projection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view, radians.
        fov_y: f32,
        aspect: f32,
        z_near: f32,
        z_far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        z_near: f32,
        z_far: f32,
    },
}

impl Projection {
    #[must_use]
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Self::Perspective {
                fov_y,
                aspect,
                z_near,
                z_far,
            } => Mat4::perspective_rh(fov_y, aspect, z_near, z_far),
            Self::Orthographic {
                left,
                right,
                bottom,
                top,
                z_near,
                z_far,
            } => Mat4::orthographic_rh(left, right, bottom, top, z_near, z_far),
        }
    }

    #[must_use]
    pub fn z_range(&self) -> (f32, f32) {
        match *self {
            Self::Perspective { z_near, z_far, .. }
            | Self::Orthographic { z_near, z_far, .. } => (z_near, z_far),
        }
    }
}

/// A viewpoint with cached matrices and frustum.
#[derive(Debug, Clone)]
pub struct Camera {
    eye: Vec3,
    orientation: Quat,
    projection: Projection,

    view_matrix: Mat4,
    projection_matrix: Mat4,
    view_projection_matrix: Mat4,
    frustum: Frustum,
    dirty: bool,
}

impl Camera {
    #[must_use]
    pub fn new_perspective(fov_y_degrees: f32, aspect: f32, z_near: f32, z_far: f32) -> Self {
        let mut camera = Self {
            eye: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            projection: Projection::Perspective {
                fov_y: fov_y_degrees.to_radians(),
                aspect,
                z_near,
                z_far,
            },
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection_matrix: Mat4::IDENTITY,
            frustum: Frustum::default(),
            dirty: true,
        };
        camera.update();
        camera
    }

    #[inline]
    #[must_use]
    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    #[inline]
    #[must_use]
    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    #[inline]
    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn set_eye(&mut self, eye: Vec3) {
        self.eye = eye;
        self.dirty = true;
    }

    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation.normalize();
        self.dirty = true;
    }

    /// Orientation from Euler angles in degrees (pitch, yaw, roll).
    pub fn set_euler_degrees(&mut self, euler: Vec3) {
        self.set_orientation(Quat::from_euler(
            EulerRot::YXZ,
            euler.y.to_radians(),
            euler.x.to_radians(),
            euler.z.to_radians(),
        ));
    }

    /// Orientation as Euler angles in degrees (pitch, yaw, roll).
    #[must_use]
    pub fn euler_degrees(&self) -> Vec3 {
        let (yaw, pitch, roll) = self.orientation.to_euler(EulerRot::YXZ);
        Vec3::new(pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees())
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
        self.dirty = true;
    }

    pub fn set_aspect(&mut self, new_aspect: f32) {
        if let Projection::Perspective { aspect, .. } = &mut self.projection {
            *aspect = new_aspect;
            self.dirty = true;
        }
    }

    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let view = Mat4::look_at_rh(self.eye, target, up);
        // View is the inverse of the camera's world pose.
        self.orientation = Quat::from_mat4(&view.inverse()).normalize();
        self.dirty = true;
    }

    /// Recomputes cached matrices and the frustum when dirty.
    pub fn update(&mut self) {
        if !self.dirty {
            return;
        }
        let world = Mat4::from_rotation_translation(self.orientation, self.eye);
        self.view_matrix = world.inverse();
        self.projection_matrix = self.projection.matrix();
        self.view_projection_matrix = self.projection_matrix * self.view_matrix;
        self.frustum = Frustum::from_matrix_standard_z(self.view_projection_matrix);
        self.dirty = false;
    }

    #[inline]
    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        self.view_matrix
    }

    #[inline]
    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    #[inline]
    #[must_use]
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.view_projection_matrix
    }

    #[inline]
    #[must_use]
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Forward direction in world space (-Z of the camera basis).
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.orientation * -Vec3::Z
    }
}

/// Six-plane view volume. Planes point inward; a zero plane never rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6], // Left, Right, Bottom, Top, Near, Far
}

impl Frustum {
    /// Gribb-Hartmann extraction for standard-depth ([0, 1]) projections.
    #[must_use]
    pub fn from_matrix_standard_z(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];
        let mut planes = [Vec4::ZERO; 6];
        planes[0] = rows[3] + rows[0]; // Left
        planes[1] = rows[3] - rows[0]; // Right
        planes[2] = rows[3] + rows[1]; // Bottom
        planes[3] = rows[3] - rows[1]; // Top
        planes[4] = rows[2]; // Near (z >= 0)
        planes[5] = rows[3] - rows[2]; // Far (z <= w)
        Self::normalized(planes)
    }

    /// Variant for shadow-caster culling: the near plane is disabled so
    /// casters between the light and the frustum slice are never rejected.
    #[must_use]
    pub fn from_matrix_shadow_caster(m: Mat4) -> Self {
        let mut frustum = Self::from_matrix_standard_z(m);
        frustum.planes[4] = Vec4::ZERO;
        frustum
    }

    fn normalized(mut planes: [Vec4; 6]) -> Self {
        for plane in &mut planes {
            let length = Vec3::new(plane.x, plane.y, plane.z).length();
            if length > 1e-6 {
                *plane /= length;
            } else {
                // Degenerate plane never culls.
                *plane = Vec4::ZERO;
            }
        }
        Self { planes }
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        for plane in &self.planes {
            if plane.x == 0.0 && plane.y == 0.0 && plane.z == 0.0 {
                continue;
            }
            let dist = plane.x * center.x + plane.y * center.y + plane.z * center.z + plane.w;
            if dist < -radius {
                return false;
            }
        }
        true
    }

    /// Plane/AABB test via the positive vertex. Returns false only when the
    /// box is fully outside some plane.
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &BoundingBox) -> bool {
        for plane in &self.planes {
            if plane.x == 0.0 && plane.y == 0.0 && plane.z == 0.0 {
                continue;
            }
            let p = Vec3::new(
                if plane.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            if plane.x * p.x + plane.y * p.y + plane.z * p.z + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_neg_z() -> Camera {
        let mut camera = Camera::new_perspective(60.0, 16.0 / 9.0, 0.1, 100.0);
        camera.set_eye(Vec3::ZERO);
        camera.update();
        camera
    }

    #[test]
    fn frustum_accepts_visible_rejects_behind() {
        let camera = looking_down_neg_z();
        let frustum = camera.frustum();
        assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0));
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
        assert!(!frustum.intersects_sphere(Vec3::new(500.0, 0.0, -10.0), 1.0));
    }

    #[test]
    fn aabb_test_agrees_with_sphere_test_on_gross_cases() {
        let camera = looking_down_neg_z();
        let frustum = camera.frustum();
        let visible = BoundingBox::new(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0));
        let behind = BoundingBox::new(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(1.0, 1.0, 11.0));
        assert!(frustum.intersects_aabb(&visible));
        assert!(!frustum.intersects_aabb(&behind));
    }

    #[test]
    fn euler_round_trip_within_tolerance() {
        let mut camera = looking_down_neg_z();
        camera.set_euler_degrees(Vec3::new(-30.0, 45.0, 0.0));
        let euler = camera.euler_degrees();
        assert!((euler.x - -30.0).abs() < 1e-3);
        assert!((euler.y - 45.0).abs() < 1e-3);
    }

    #[test]
    fn identical_cameras_share_identical_frusta() {
        let a = looking_down_neg_z();
        let b = looking_down_neg_z();
        assert_eq!(a.frustum(), b.frustum());
    }
}
