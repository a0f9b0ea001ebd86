//! First-person camera
//!
//! Every mutation funnels through [`Camera::recalculate`], which rebuilds the
//! view matrix and raises the "moved" flag consumed by the shadow cascades.

use crate::foundation::math::{Mat4, Vec2, Vec3};

/// Camera with pitch/yaw rotation and a cached view matrix
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    /// x = pitch, y = yaw, radians
    rotation: Vec2,
    view_matrix: Mat4,
    has_moved: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera {
    /// Camera at the origin looking down -Z
    pub fn new() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec2::zeros(),
            view_matrix: Mat4::identity(),
            has_moved: false,
        }
    }

    /// World-space position
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Pitch (x) and yaw (y) in radians
    pub fn rotation(&self) -> Vec2 {
        self.rotation
    }

    /// World-to-view transform
    pub fn view_matrix(&self) -> &Mat4 {
        &self.view_matrix
    }

    /// True if the camera changed since the flag was last cleared
    pub fn has_moved(&self) -> bool {
        self.has_moved
    }

    /// Clear the moved flag; the engine does this once per frame
    pub fn clear_moved(&mut self) {
        self.has_moved = false;
    }

    /// Add to pitch and yaw
    pub fn add_rotation(&mut self, pitch: f32, yaw: f32) {
        self.rotation += Vec2::new(pitch, yaw);
        self.recalculate();
    }

    /// Move along the view direction
    pub fn move_forward(&mut self, inc: f32) {
        self.position += self.forward() * inc;
        self.recalculate();
    }

    /// Move against the view direction
    pub fn move_backwards(&mut self, inc: f32) {
        self.position -= self.forward() * inc;
        self.recalculate();
    }

    /// Strafe left
    pub fn move_left(&mut self, inc: f32) {
        self.position -= self.right() * inc;
        self.recalculate();
    }

    /// Strafe right
    pub fn move_right(&mut self, inc: f32) {
        self.position += self.right() * inc;
        self.recalculate();
    }

    /// Move along the camera's up axis
    pub fn move_up(&mut self, inc: f32) {
        self.position += self.up() * inc;
        self.recalculate();
    }

    /// Move against the camera's up axis
    pub fn move_down(&mut self, inc: f32) {
        self.position -= self.up() * inc;
        self.recalculate();
    }

    /// Teleport
    pub fn set_position(&mut self, x: f32, y: f32, z: f32) {
        self.position = Vec3::new(x, y, z);
        self.recalculate();
    }

    /// Replace pitch and yaw
    pub fn set_rotation(&mut self, pitch: f32, yaw: f32) {
        self.rotation = Vec2::new(pitch, yaw);
        self.recalculate();
    }

    fn view_row(&self, row: usize) -> Vec3 {
        let m = &self.view_matrix;
        Vec3::new(m[(row, 0)], m[(row, 1)], m[(row, 2)])
    }

    fn right(&self) -> Vec3 {
        self.view_row(0)
    }

    fn up(&self) -> Vec3 {
        self.view_row(1)
    }

    fn forward(&self) -> Vec3 {
        -self.view_row(2)
    }

    fn recalculate(&mut self) {
        self.has_moved = true;
        self.view_matrix = Mat4::from_axis_angle(&Vec3::x_axis(), self.rotation.x)
            * Mat4::from_axis_angle(&Vec3::y_axis(), self.rotation.y)
            * Mat4::new_translation(&-self.position);
        log::trace!("Camera moved to {:?}", self.position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn forward_without_rotation_moves_down_negative_z() {
        let mut camera = Camera::new();
        camera.move_forward(2.0);
        assert_relative_eq!(camera.position(), Vec3::new(0.0, 0.0, -2.0), epsilon = 1e-6);
        assert!(camera.has_moved());
    }

    #[test]
    fn yaw_rotates_forward_axis() {
        let mut camera = Camera::new();
        camera.set_rotation(0.0, FRAC_PI_2);
        camera.move_forward(1.0);
        assert_relative_eq!(camera.position(), Vec3::new(1.0, 0.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn view_matrix_moves_world_opposite_to_camera() {
        let mut camera = Camera::new();
        camera.set_position(1.0, 2.0, 3.0);
        let p = camera.view_matrix().transform_point(&crate::foundation::math::Point3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(p.coords, Vec3::zeros(), epsilon = 1e-6);
    }

    #[test]
    fn clear_moved_resets_flag_until_next_change() {
        let mut camera = Camera::new();
        camera.move_up(1.0);
        camera.clear_moved();
        assert!(!camera.has_moved());
        camera.add_rotation(0.1, 0.0);
        assert!(camera.has_moved());
    }
}
