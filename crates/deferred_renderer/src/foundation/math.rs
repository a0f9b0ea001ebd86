//! Math utilities and types
//!
//! nalgebra aliases plus the Vulkan-convention projection helpers used by
//! the scene and the shadow cascades. All projections map depth to `[0, 1]`
//! and follow the right-handed convention (camera looks down -Z).

pub use nalgebra::{Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Convert degrees to radians
pub fn deg_to_rad(degrees: f32) -> f32 {
    degrees.to_radians()
}

/// Right-handed perspective projection with depth in `[0, 1]`
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let h = (fov_y * 0.5).tan();
    let mut m = Mat4::zeros();
    m[(0, 0)] = 1.0 / (h * aspect);
    m[(1, 1)] = 1.0 / h;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = near * far / (near - far);
    m[(3, 2)] = -1.0;
    m
}

/// Right-handed orthographic projection with depth in `[0, 1]`
pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let mut m = Mat4::identity();
    m[(0, 0)] = 2.0 / (right - left);
    m[(1, 1)] = 2.0 / (top - bottom);
    m[(2, 2)] = 1.0 / (near - far);
    m[(0, 3)] = -(right + left) / (right - left);
    m[(1, 3)] = -(top + bottom) / (top - bottom);
    m[(2, 3)] = near / (near - far);
    m
}

/// Right-handed view matrix looking from `eye` at `target`
pub fn look_at(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(&Point3::from(*eye), &Point3::from(*target), up)
}

/// Transform a point by a projective matrix, dividing by w
pub fn transform_point(m: &Mat4, p: &Vec3) -> Vec3 {
    let v = m * Vec4::new(p.x, p.y, p.z, 1.0);
    Vec3::new(v.x / v.w, v.y / v.w, v.z / v.w)
}

/// Column-major float array, the layout GLSL expects in uniform blocks
pub fn to_cols_array(m: &Mat4) -> [[f32; 4]; 4] {
    (*m).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn perspective_maps_near_and_far_to_unit_depth() {
        let proj = perspective(deg_to_rad(60.0), 16.0 / 9.0, 1.0, 100.0);

        let near = transform_point(&proj, &Vec3::new(0.0, 0.0, -1.0));
        let far = transform_point(&proj, &Vec3::new(0.0, 0.0, -100.0));

        assert_relative_eq!(near.z, 0.0, epsilon = 1e-6);
        assert_relative_eq!(far.z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn orthographic_maps_box_to_clip_volume() {
        let ortho = orthographic(-2.0, 2.0, -3.0, 3.0, 0.0, 10.0);

        let corner = transform_point(&ortho, &Vec3::new(2.0, -3.0, -10.0));
        assert_relative_eq!(corner, Vec3::new(1.0, -1.0, 1.0), epsilon = 1e-6);

        let origin = transform_point(&ortho, &Vec3::zeros());
        assert_relative_eq!(origin.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn look_at_places_target_on_negative_z() {
        let view = look_at(&Vec3::new(0.0, 0.0, 5.0), &Vec3::zeros(), &Vec3::y());
        let target = transform_point(&view, &Vec3::zeros());
        assert_relative_eq!(target, Vec3::new(0.0, 0.0, -5.0), epsilon = 1e-6);
    }

    #[test]
    fn cols_array_is_column_major() {
        let m = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let cols = to_cols_array(&m);
        assert_relative_eq!(cols[3][0], 1.0);
        assert_relative_eq!(cols[3][1], 2.0);
        assert_relative_eq!(cols[3][2], 3.0);
    }
}
