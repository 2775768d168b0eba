//! Shadow View Builders
//!
//! Pure math for the three shadow generators: cascaded maps for
//! directional lights, six-face cube views for point lights, and a single
//! cone-matched perspective view for spot lights. Extracted from the pass
//! manager for reuse and testability.
//!
//! Cascade stabilisation works by fitting each frustum slice with its
//! bounding sphere (so the orthographic window has a rotation-invariant
//! size) and rounding the window's light-space translation to whole
//! texels, which stops the map shimmering as the camera moves.

use glam::{Mat4, Quat, Vec3, Vec4, Vec4Swizzles};

use crate::scene::camera::{Camera, Frustum};
use crate::scene::light::{ShadowSettings, SpotLight};

/// Maximum shadow slices one light may occupy (directional cascades or
/// cube faces).
pub const MAX_SPLITS_PER_LIGHT: u32 = 6;

/// Shortest usable near distance for perspective shadow projections.
const MIN_SHADOW_NEAR: f32 = 0.05;

/// One renderable shadow viewpoint.
pub struct ShadowView {
    /// Slice offset within the light's atlas allocation.
    pub layer: u32,
    pub view_projection: Mat4,
    pub frustum: Frustum,
    /// CSM only: far split distance in view space.
    pub split_far: Option<f32>,
}

// ============================================================================
// Cascade Split Computation
// ============================================================================

/// Split distances via the practical split scheme:
/// `d_i = lerp(uniform_i, log_i, lambda)`.
///
/// The linear distribution is walked with a running accumulator; the
/// logarithmic one falls out of the accumulated depth fraction.
#[must_use]
pub fn compute_cascade_splits(
    cascade_count: u32,
    near: f32,
    far: f32,
    lambda: f32,
) -> [f32; MAX_SPLITS_PER_LIGHT as usize] {
    let slots = cascade_count.clamp(1, MAX_SPLITS_PER_LIGHT) as usize;
    let near = near.max(1e-4);
    let mut splits = [0.0f32; MAX_SPLITS_PER_LIGHT as usize];

    let linear_step = (far - near) / slots as f32;
    let depth_ratio = far / near;
    let mut linear = near;
    for (index, split) in splits.iter_mut().enumerate().take(slots) {
        linear += linear_step;
        let fraction = (index + 1) as f32 / slots as f32;
        let logarithmic = near * depth_ratio.powf(fraction);
        *split = linear + (logarithmic - linear) * lambda;
    }

    // The last cascade covers the configured range exactly.
    splits[slots - 1] = far;
    splits
}

// ============================================================================
// Frustum Slice Corners
// ============================================================================

/// The 8 world-space corners of a camera frustum slice `[slice_near,
/// slice_far]` (view-space distances).
///
/// The four image-corner rays are recovered by unprojecting the NDC
/// corners once and rescaling each ray so one unit of travel advances one
/// unit along the camera forward axis; corner positions are then just the
/// rays scaled by the slice depths. Assumes a standard-depth perspective
/// projection.
#[must_use]
pub fn frustum_slice_corners(camera: &Camera, slice_near: f32, slice_far: f32) -> [Vec3; 8] {
    let unproject = camera.projection_matrix().inverse();
    let camera_to_world = camera.view_matrix().inverse();

    let mut corners = [Vec3::ZERO; 8];
    for (index, (u, v)) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
        .into_iter()
        .enumerate()
    {
        // Any point on the corner ray does; depth 0.5 is arbitrary.
        let clip = unproject * Vec4::new(u, v, 0.5, 1.0);
        let on_ray = clip.xyz() / clip.w;
        // View-space forward is -Z, so dividing by -z normalises the ray
        // to unit forward depth.
        let per_depth = on_ray / -on_ray.z;
        corners[index] = camera_to_world.transform_point3(per_depth * slice_near);
        corners[index + 4] = camera_to_world.transform_point3(per_depth * slice_far);
    }
    corners
}

// ============================================================================
// CSM: Cascade VP Construction
// ============================================================================

/// Fits one cascade's orthographic VP around a frustum slice.
///
/// The slice is wrapped in its bounding sphere, the light view is anchored
/// at the world origin, and the projection window is recentred on the
/// sphere with its translation rounded to whole texels. `caster_extension`
/// adds depth headroom towards the light so casters outside the slice
/// still land in the map.
#[must_use]
pub fn build_cascade_vp(
    light_direction: Vec3,
    frustum_corners: &[Vec3; 8],
    shadow_map_size: u32,
    caster_extension: f32,
) -> Mat4 {
    let aim = light_direction.try_normalize().unwrap_or(Vec3::NEG_Z);

    // Bounding sphere of the slice. Unlike a tight AABB, the sphere keeps
    // the window size constant while the camera rotates, which is what
    // makes texel snapping effective.
    let centroid = frustum_corners.iter().copied().sum::<Vec3>() / frustum_corners.len() as f32;
    let radius = frustum_corners
        .iter()
        .map(|corner| corner.distance(centroid))
        .fold(0.0f32, f32::max)
        .max(1e-3);

    let side = if aim.y.abs() > 0.98 { Vec3::X } else { Vec3::Y };
    let light_view = Mat4::look_to_rh(Vec3::ZERO, aim, side);

    // Snap the window centre to the texel grid in light space.
    let texel_size = (2.0 * radius) / shadow_map_size.max(1) as f32;
    let mut focus = light_view.transform_point3(centroid);
    focus.x = (focus.x / texel_size).round() * texel_size;
    focus.y = (focus.y / texel_size).round() * texel_size;

    let centre_depth = -focus.z;
    let towards_light = caster_extension.max(2.0 * radius);
    let projection = Mat4::orthographic_rh(
        focus.x - radius,
        focus.x + radius,
        focus.y - radius,
        focus.y + radius,
        centre_depth - radius - towards_light,
        centre_depth + radius + radius.max(25.0),
    );

    projection * light_view
}

/// Builds all cascade views for one directional light, plus the split
/// distances (view space, indexed by cascade).
#[must_use]
pub fn build_directional_views(
    light_direction: Vec3,
    camera: &Camera,
    settings: &ShadowSettings,
    shadow_map_size: u32,
    caster_extension: f32,
) -> (Vec<ShadowView>, [f32; MAX_SPLITS_PER_LIGHT as usize]) {
    let cascade_count = settings.cascade_count.clamp(1, MAX_SPLITS_PER_LIGHT);
    let (camera_near, camera_far) = camera.projection().z_range();
    let range_start = camera_near.max(0.1);
    let range_end = settings.max_shadow_distance.min(camera_far);

    let splits = compute_cascade_splits(
        cascade_count,
        range_start,
        range_end,
        settings.split_lambda,
    );

    let mut slice_start = range_start;
    let views = (0..cascade_count as usize)
        .map(|cascade| {
            let slice_end = splits[cascade];
            let corners = frustum_slice_corners(camera, slice_start, slice_end);
            slice_start = slice_end;

            let vp =
                build_cascade_vp(light_direction, &corners, shadow_map_size, caster_extension);
            ShadowView {
                layer: cascade as u32,
                view_projection: vp,
                // Near plane left open so casters towards the light are
                // never culled away.
                frustum: Frustum::from_matrix_shadow_caster(vp),
                split_far: Some(slice_end),
            }
        })
        .collect();

    (views, splits)
}

// ============================================================================
// Cube (Point) Views
// ============================================================================

/// Standard cube face bases: `(forward, up)` for +X, -X, +Y, -Y, +Z, -Z.
const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Y),
    (Vec3::Y, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::Z),
    (Vec3::Z, Vec3::Y),
    (Vec3::NEG_Z, Vec3::Y),
];

/// Builds the six face views for one point light.
#[must_use]
pub fn build_cube_views(position: Vec3, range: f32) -> Vec<ShadowView> {
    let reach = range.max(MIN_SHADOW_NEAR * 2.0);
    let face_projection =
        Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, MIN_SHADOW_NEAR, reach);
    CUBE_FACES
        .iter()
        .enumerate()
        .map(|(face, &(forward, up))| {
            let vp = face_projection * Mat4::look_to_rh(position, forward, up);
            ShadowView {
                layer: face as u32,
                view_projection: vp,
                frustum: Frustum::from_matrix_standard_z(vp),
                split_far: None,
            }
        })
        .collect()
}

// ============================================================================
// Single (Spot) View
// ============================================================================

/// Builds the single perspective view for a spot light; the vertical FoV
/// matches the full outer cone.
#[must_use]
pub fn build_spot_view(position: Vec3, direction: Vec3, spot: &SpotLight) -> ShadowView {
    let aim = direction.try_normalize().unwrap_or(Vec3::NEG_Z);
    // Basis from a rotation arc rather than a look-at: no up-vector case
    // split, and degenerate (anti-parallel) aims resolve inside glam.
    let orientation = Quat::from_rotation_arc(Vec3::NEG_Z, aim);
    let world = Mat4::from_rotation_translation(orientation, position);

    let fov_y = (2.0 * spot.outer_cone).clamp(0.05, 3.0);
    let reach = spot.range.max(MIN_SHADOW_NEAR * 4.0);
    let vp = Mat4::perspective_rh(fov_y, 1.0, MIN_SHADOW_NEAR, reach) * world.inverse();

    ShadowView {
        layer: 0,
        view_projection: vp,
        frustum: Frustum::from_matrix_standard_z(vp),
        split_far: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_camera() -> Camera {
        let mut camera = Camera::new_perspective(60.0, 16.0 / 9.0, 0.1, 500.0);
        camera.set_eye(Vec3::new(0.0, 5.0, 0.0));
        camera.update();
        camera
    }

    #[test]
    fn splits_are_monotonic_and_end_at_far() {
        let splits = compute_cascade_splits(3, 0.1, 200.0, 0.925);
        assert!(splits[0] < splits[1]);
        assert!(splits[1] < splits[2]);
        assert!((splits[2] - 200.0).abs() < 1e-4);
    }

    #[test]
    fn lambda_zero_gives_uniform_splits() {
        let splits = compute_cascade_splits(4, 0.0, 100.0, 0.0);
        assert!((splits[0] - 25.0).abs() < 1e-3);
        assert!((splits[1] - 50.0).abs() < 1e-3);
        assert!((splits[2] - 75.0).abs() < 1e-3);
        assert!((splits[3] - 100.0).abs() < 1e-3);
    }

    #[test]
    fn slice_corners_sit_at_their_depths() {
        let camera = main_camera();
        let corners = frustum_slice_corners(&camera, 1.0, 10.0);
        let view = camera.view_matrix();
        for (i, corner) in corners.iter().enumerate() {
            let depth = -view.transform_point3(*corner).z;
            let expected = if i < 4 { 1.0 } else { 10.0 };
            assert!((depth - expected).abs() < 1e-3, "corner {i} at depth {depth}");
        }
    }

    #[test]
    fn cascade_vp_contains_its_frustum_slice() {
        let camera = main_camera();
        let direction = Vec3::new(1.0, 1.0, 1.0).normalize() * -1.0;
        let (views, splits) = build_directional_views(
            direction,
            &camera,
            &ShadowSettings {
                cascade_count: 3,
                split_lambda: 0.925,
                max_shadow_distance: 200.0,
                ..ShadowSettings::default()
            },
            1024,
            50.0,
        );
        assert_eq!(views.len(), 3);

        let mut prev = 0.1_f32;
        for (i, view) in views.iter().enumerate() {
            let corners = frustum_slice_corners(&camera, prev, splits[i]);
            prev = splits[i];
            for corner in corners {
                let clip = view.view_projection * corner.extend(1.0);
                let ndc = clip.xyz() / clip.w;
                // Inside the unit cube (with a snap-tolerance margin).
                assert!(ndc.x >= -1.01 && ndc.x <= 1.01, "x out of cube: {ndc}");
                assert!(ndc.y >= -1.01 && ndc.y <= 1.01, "y out of cube: {ndc}");
                assert!(ndc.z >= -0.01 && ndc.z <= 1.01, "z out of cube: {ndc}");
            }
        }
    }

    #[test]
    fn cascades_cover_the_requested_depth_range() {
        let camera = main_camera();
        let settings = ShadowSettings {
            cascade_count: 3,
            split_lambda: 0.925,
            max_shadow_distance: 200.0,
            ..ShadowSettings::default()
        };
        let (_, splits) = build_directional_views(
            Vec3::NEG_Y,
            &camera,
            &settings,
            1024,
            50.0,
        );
        // Combined cascades end within 1% of the configured far distance.
        assert!((splits[2] - 200.0).abs() / 200.0 < 0.01);
    }

    #[test]
    fn snapped_windows_translate_in_whole_texels() {
        // Two slightly shifted slices of the same size must produce ortho
        // windows whose centres differ by an exact texel multiple.
        let camera = main_camera();
        let direction = Vec3::new(0.3, -1.0, 0.2).normalize();
        let map_size = 512;

        let a = frustum_slice_corners(&camera, 1.0, 20.0);
        let mut camera_b = camera.clone();
        camera_b.set_eye(camera.eye() + Vec3::new(0.013, 0.0, 0.007));
        camera_b.update();
        let b = frustum_slice_corners(&camera_b, 1.0, 20.0);

        let vp_a = build_cascade_vp(direction, &a, map_size, 50.0);
        let vp_b = build_cascade_vp(direction, &b, map_size, 50.0);

        // Project a fixed world point through both; the XY difference must
        // be a whole-texel multiple of the (shared) window size.
        let probe = Vec3::new(2.0, 0.0, -5.0);
        let pa = vp_a * probe.extend(1.0);
        let pb = vp_b * probe.extend(1.0);
        let delta_texels_x = (pa.x - pb.x) * 0.5 * map_size as f32;
        let delta_texels_y = (pa.y - pb.y) * 0.5 * map_size as f32;
        assert!((delta_texels_x - delta_texels_x.round()).abs() < 1e-2);
        assert!((delta_texels_y - delta_texels_y.round()).abs() < 1e-2);
    }

    #[test]
    fn cube_views_cover_all_six_directions() {
        let views = build_cube_views(Vec3::new(1.0, 2.0, 3.0), 25.0);
        assert_eq!(views.len(), 6);
        // A point along each axis from the light lands in exactly the
        // matching face's frustum interior (faces share edges).
        let probes = [
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ];
        for (face, probe) in probes.iter().enumerate() {
            let world = Vec3::new(1.0, 2.0, 3.0) + *probe * 5.0;
            assert!(
                views[face].frustum.intersects_sphere(world, 0.01),
                "face {face} misses its axis probe"
            );
        }
    }

    #[test]
    fn spot_view_matches_the_cone() {
        let spot = SpotLight {
            range: 30.0,
            inner_cone: 0.4,
            outer_cone: 0.6,
        };
        let view = build_spot_view(Vec3::ZERO, Vec3::NEG_Z, &spot);
        // On-axis point inside range: visible.
        assert!(view.frustum.intersects_sphere(Vec3::new(0.0, 0.0, -10.0), 0.01));
        // Beyond range: culled.
        assert!(!view.frustum.intersects_sphere(Vec3::new(0.0, 0.0, -40.0), 0.01));
        // Far off-axis: culled.
        assert!(!view.frustum.intersects_sphere(Vec3::new(20.0, 0.0, -10.0), 0.01));
    }

    #[test]
    fn spot_basis_handles_awkward_aims() {
        let spot = SpotLight {
            range: 10.0,
            inner_cone: 0.3,
            outer_cone: 0.5,
        };
        // Straight down and straight back both produce usable frusta.
        for aim in [Vec3::NEG_Y, Vec3::Z, Vec3::ZERO] {
            let view = build_spot_view(Vec3::splat(1.0), aim, &spot);
            let effective = if aim == Vec3::ZERO { Vec3::NEG_Z } else { aim };
            let probe = Vec3::splat(1.0) + effective * 3.0;
            assert!(view.frustum.intersects_sphere(probe, 0.01), "aim {aim} broken");
        }
    }
}
