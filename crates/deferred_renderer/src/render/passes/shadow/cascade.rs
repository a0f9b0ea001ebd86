//! Cascaded shadow map fitting
//!
//! The view frustum is cut into [`SHADOW_MAP_CASCADE_COUNT`] depth slices
//! placed between a logarithmic and a uniform distribution. Each slice gets
//! an orthographic light-space projection sized to its bounding sphere, with
//! the radius snapped to 1/16 units so the box does not shimmer while the
//! camera turns.

use crate::foundation::math::{look_at, orthographic, to_cols_array, Mat4, Vec3, Vec4};
use crate::render::resources::uniform::{CascadeUniform, CascadesUniform, ShadowUniform, SHADOW_MAP_CASCADE_COUNT};
use crate::scene::{Scene, SceneChanges};

/// Blend between logarithmic (1.0) and uniform (0.0) split placement
pub const SPLIT_LAMBDA: f32 = 0.95;

const RADIUS_SNAP: f32 = 16.0;

/// One slice of the view frustum as seen from the light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cascade {
    /// Light orthographic projection x light view
    pub projection_view: Mat4,
    /// View-space depth where this slice ends; negative, since the camera looks down -Z
    pub split_distance: f32,
}

impl Default for Cascade {
    fn default() -> Self {
        Self { projection_view: Mat4::identity(), split_distance: 0.0 }
    }
}

/// Split positions as fractions of `[near, far]`, one per cascade
///
/// The last split is always 1.0 and the sequence strictly increases for any
/// `0 < near < far` and `lambda` in `[0, 1]`.
pub fn split_fractions(near: f32, far: f32, lambda: f32) -> [f32; SHADOW_MAP_CASCADE_COUNT] {
    let range = far - near;
    let ratio = far / near;
    let mut splits = [0.0; SHADOW_MAP_CASCADE_COUNT];
    for (i, split) in splits.iter_mut().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let p = (i + 1) as f32 / SHADOW_MAP_CASCADE_COUNT as f32;
        let log = near * ratio.powf(p);
        let uniform = near + range * p;
        let d = lambda * (log - uniform) + uniform;
        *split = (d - near) / range;
    }
    splits
}

/// Fit cascades to the camera frustum for a light shining from `light_position`
///
/// Only the xyz of `light_position` is used, as a direction towards the light.
/// Returns `None` when that direction is zero.
pub fn compute_cascades(
    view: &Mat4,
    projection: &Mat4,
    near: f32,
    far: f32,
    light_position: &Vec4,
    lambda: f32,
) -> Option<[Cascade; SHADOW_MAP_CASCADE_COUNT]> {
    let towards_light = light_position.xyz();
    if towards_light.norm_squared() <= f32::EPSILON {
        return None;
    }
    let light_dir = -towards_light.normalize();
    let inverse = (projection * view).try_inverse()?;
    let splits = split_fractions(near, far, lambda);
    let range = far - near;

    let mut cascades = [Cascade::default(); SHADOW_MAP_CASCADE_COUNT];
    let mut last_split = 0.0;
    for (cascade, &split) in cascades.iter_mut().zip(&splits) {
        let corners = slice_corners(&inverse, last_split, split);

        let center = corners.iter().sum::<Vec3>() / 8.0;
        let radius = corners.iter().map(|corner| (corner - center).norm()).fold(0.0_f32, f32::max);
        let radius = (radius * RADIUS_SNAP).ceil() / RADIUS_SNAP;

        let eye = center - light_dir * radius;
        let up = if light_dir.y.abs() > 0.999 { Vec3::z() } else { Vec3::y() };
        let light_view = look_at(&eye, &center, &up);
        let light_projection = orthographic(-radius, radius, -radius, radius, 0.0, 2.0 * radius);

        *cascade = Cascade {
            projection_view: light_projection * light_view,
            split_distance: -(near + split * range),
        };
        last_split = split;
    }
    Some(cascades)
}

/// World-space corners of the frustum slice between two split fractions
fn slice_corners(inverse_projection_view: &Mat4, from: f32, to: f32) -> [Vec3; 8] {
    const NDC: [[f32; 3]; 8] = [
        [-1.0, 1.0, 0.0],
        [1.0, 1.0, 0.0],
        [1.0, -1.0, 0.0],
        [-1.0, -1.0, 0.0],
        [-1.0, 1.0, 1.0],
        [1.0, 1.0, 1.0],
        [1.0, -1.0, 1.0],
        [-1.0, -1.0, 1.0],
    ];

    let mut corners = NDC.map(|[x, y, z]| {
        let world = inverse_projection_view * Vec4::new(x, y, z, 1.0);
        world.xyz() / world.w
    });
    for i in 0..4 {
        let edge = corners[i + 4] - corners[i];
        corners[i + 4] = corners[i] + edge * to;
        corners[i] += edge * from;
    }
    corners
}

/// Cascades for the scene's directional light, refit only when the camera,
/// the lights or the projection changed
#[derive(Debug, Clone, Default)]
pub struct CascadeShadows {
    cascades: [Cascade; SHADOW_MAP_CASCADE_COUNT],
    fitted: bool,
}

impl CascadeShadows {
    /// Identity cascades, refit on the first update
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the cascades stale, e.g. after a swapchain resize
    pub fn invalidate(&mut self) {
        self.fitted = false;
    }

    /// Refit if needed; returns whether the cascades changed
    ///
    /// Without a directional light the previous cascades are kept.
    pub fn update(&mut self, scene: &Scene) -> bool {
        let dirty = SceneChanges::CAMERA_MOVED | SceneChanges::LIGHT_CHANGED | SceneChanges::PROJECTION_CHANGED;
        if self.fitted && !scene.changes().intersects(dirty) {
            return false;
        }
        let Some(light) = scene.directional_light() else {
            return false;
        };

        let projection = scene.projection();
        let fitted = compute_cascades(
            scene.camera().view_matrix(),
            projection.matrix(),
            projection.near(),
            projection.far(),
            &light.position,
            SPLIT_LAMBDA,
        );
        match fitted {
            Some(cascades) => {
                self.cascades = cascades;
                self.fitted = true;
                log::trace!("Shadow cascades refit, splits {:?}", cascades.map(|c| c.split_distance));
                true
            }
            None => {
                log::warn!("Directional light has no direction; shadow cascades not updated");
                false
            }
        }
    }

    /// Current cascades, nearest first
    pub fn cascades(&self) -> &[Cascade; SHADOW_MAP_CASCADE_COUNT] {
        &self.cascades
    }

    /// Record for the lighting pass
    pub fn lighting_uniform(&self) -> CascadesUniform {
        CascadesUniform {
            cascades: self.cascades.map(|cascade| CascadeUniform {
                projection_view: to_cols_array(&cascade.projection_view),
                split_distance: [cascade.split_distance, 0.0, 0.0, 0.0],
            }),
        }
    }

    /// Record for the shadow geometry shader
    pub fn shadow_uniform(&self) -> ShadowUniform {
        ShadowUniform { projection_views: self.cascades.map(|cascade| to_cols_array(&cascade.projection_view)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineProperties;
    use crate::foundation::math::{perspective, transform_point};
    use crate::scene::Light;
    use approx::assert_relative_eq;

    const NEAR: f32 = 1.0;
    const FAR: f32 = 100.0;

    fn camera() -> (Mat4, Mat4) {
        let view = look_at(&Vec3::new(3.0, 4.0, 10.0), &Vec3::new(0.0, 0.0, -20.0), &Vec3::y());
        let projection = perspective(60.0_f32.to_radians(), 16.0 / 9.0, NEAR, FAR);
        (view, projection)
    }

    #[test]
    fn splits_cover_the_clip_range_in_increasing_order() {
        let splits = split_fractions(NEAR, FAR, SPLIT_LAMBDA);
        assert_relative_eq!(splits[SHADOW_MAP_CASCADE_COUNT - 1], 1.0, epsilon = 1e-6);
        assert!(splits[0] > 0.0);
        assert!(splits.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn zero_lambda_gives_uniform_splits() {
        let splits = split_fractions(NEAR, FAR, 0.0);
        for (i, split) in splits.iter().enumerate() {
            assert_relative_eq!(*split, (i + 1) as f32 / SHADOW_MAP_CASCADE_COUNT as f32, epsilon = 1e-6);
        }
    }

    #[test]
    fn raising_lambda_pulls_splits_towards_the_camera() {
        let uniform = split_fractions(NEAR, FAR, 0.0);
        let blended = split_fractions(NEAR, FAR, 0.5);
        let logarithmic = split_fractions(NEAR, FAR, 1.0);
        for i in 0..SHADOW_MAP_CASCADE_COUNT - 1 {
            assert!(logarithmic[i] < blended[i]);
            assert!(blended[i] < uniform[i]);
        }
    }

    #[test]
    fn split_distances_tile_near_to_far() {
        let (view, projection) = camera();
        let light = Vec4::new(0.3, 1.0, 0.2, 0.0);
        let cascades = compute_cascades(&view, &projection, NEAR, FAR, &light, SPLIT_LAMBDA).unwrap();

        assert!(cascades.windows(2).all(|pair| pair[1].split_distance < pair[0].split_distance));
        assert!(cascades[0].split_distance < -NEAR);
        assert_relative_eq!(cascades[SHADOW_MAP_CASCADE_COUNT - 1].split_distance, -FAR, epsilon = 1e-3);
    }

    #[test]
    fn slice_corners_fit_inside_the_light_box() {
        let (view, projection) = camera();
        let light = Vec4::new(-0.5, 1.0, 0.25, 0.0);
        let cascades = compute_cascades(&view, &projection, NEAR, FAR, &light, SPLIT_LAMBDA).unwrap();
        let inverse = (projection * view).try_inverse().unwrap();
        let splits = split_fractions(NEAR, FAR, SPLIT_LAMBDA);

        let mut from = 0.0;
        for (cascade, &to) in cascades.iter().zip(&splits) {
            for corner in slice_corners(&inverse, from, to) {
                let clip = transform_point(&cascade.projection_view, &corner);
                assert!(clip.x.abs() <= 1.0 + 1e-3, "x {} outside", clip.x);
                assert!(clip.y.abs() <= 1.0 + 1e-3, "y {} outside", clip.y);
                assert!((-1e-3..=1.0 + 1e-3).contains(&clip.z), "z {} outside", clip.z);
            }
            from = to;
        }
    }

    #[test]
    fn radius_is_snapped_to_sixteenths() {
        let (view, projection) = camera();
        let light = Vec4::new(0.0, 1.0, 1.0, 0.0);
        let cascades = compute_cascades(&view, &projection, NEAR, FAR, &light, SPLIT_LAMBDA).unwrap();

        for cascade in &cascades {
            // x scale of ortho(-r, r) is 1/r
            let radius = 1.0 / cascade.projection_view.fixed_view::<1, 3>(0, 0).norm();
            let snapped = radius * RADIUS_SNAP;
            assert_relative_eq!(snapped, snapped.round(), epsilon = 1e-2);
        }
    }

    #[test]
    fn light_straight_above_still_fits() {
        let (view, projection) = camera();
        let light = Vec4::new(0.0, 1.0, 0.0, 0.0);
        let cascades = compute_cascades(&view, &projection, NEAR, FAR, &light, SPLIT_LAMBDA).unwrap();
        assert!(cascades.iter().all(|c| c.projection_view.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn zero_direction_is_rejected() {
        let (view, projection) = camera();
        assert!(compute_cascades(&view, &projection, NEAR, FAR, &Vec4::zeros(), SPLIT_LAMBDA).is_none());
    }

    #[test]
    fn refit_only_when_the_scene_changed() {
        let mut scene = Scene::new(&EngineProperties::default(), 800, 600);
        scene.set_lights(vec![Light::directional(Vec3::new(0.2, 1.0, 0.1), Vec3::repeat(1.0), 1.0)]).unwrap();
        let mut shadows = CascadeShadows::new();

        assert!(shadows.update(&scene));
        scene.end_frame();
        assert!(!shadows.update(&scene));

        scene.camera_mut().move_forward(1.0);
        assert!(shadows.update(&scene));
        scene.end_frame();
        assert!(!shadows.update(&scene));

        shadows.invalidate();
        assert!(shadows.update(&scene));
    }

    #[test]
    fn no_directional_light_keeps_previous_cascades() {
        let mut scene = Scene::new(&EngineProperties::default(), 800, 600);
        let mut shadows = CascadeShadows::new();
        assert!(!shadows.update(&scene));
        assert_eq!(shadows.cascades()[0], Cascade::default());

        scene.set_lights(vec![Light::point(Vec3::zeros(), Vec3::repeat(1.0), 1.0)]).unwrap();
        assert!(!shadows.update(&scene));
    }
}
