//! Perspective projection tracking the surface size

use crate::core::config::EngineProperties;
use crate::foundation::math::{perspective, Mat4};

/// Perspective projection with depth mapped to `[0, 1]`
#[derive(Debug, Clone)]
pub struct Projection {
    fov: f32,
    near: f32,
    far: f32,
    matrix: Mat4,
}

impl Projection {
    /// Build from configured fov/near/far for a `width` x `height` surface
    pub fn new(props: &EngineProperties, width: u32, height: u32) -> Self {
        let mut projection = Self {
            fov: props.fov_radians(),
            near: props.z_near,
            far: props.z_far,
            matrix: Mat4::identity(),
        };
        projection.resize(width, height);
        projection
    }

    /// Recompute for a new surface size; zero sizes keep the previous matrix
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let aspect = width as f32 / height as f32;
        self.matrix = perspective(self.fov, aspect, self.near, self.far);
    }

    /// Projection matrix
    pub fn matrix(&self) -> &Mat4 {
        &self.matrix
    }

    /// Near plane distance
    pub fn near(&self) -> f32 {
        self.near
    }

    /// Far plane distance
    pub fn far(&self) -> f32 {
        self.far
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_with_same_size_is_byte_identical() {
        let props = EngineProperties::default();
        let mut projection = Projection::new(&props, 800, 600);

        projection.resize(1024, 768);
        let first: [[f32; 4]; 4] = (*projection.matrix()).into();
        projection.resize(1024, 768);
        let second: [[f32; 4]; 4] = (*projection.matrix()).into();

        assert_eq!(bytemuck::bytes_of(&first), bytemuck::bytes_of(&second));
    }

    #[test]
    fn zero_size_keeps_previous_matrix() {
        let props = EngineProperties::default();
        let mut projection = Projection::new(&props, 800, 600);
        let before = *projection.matrix();
        projection.resize(0, 600);
        assert_eq!(before, *projection.matrix());
    }
}
