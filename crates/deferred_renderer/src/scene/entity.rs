//! Scene entities: positioned instances of a loaded model

use crate::foundation::math::{Mat4, Quat, Vec3};

/// One placed instance of a model
#[derive(Debug, Clone)]
pub struct Entity {
    id: String,
    model_id: String,
    position: Vec3,
    rotation: Quat,
    scale: f32,
    model_matrix: Mat4,
}

impl Entity {
    /// Create an entity at `position` with identity rotation and unit scale
    pub fn new(id: impl Into<String>, model_id: impl Into<String>, position: Vec3) -> Self {
        let mut entity = Self {
            id: id.into(),
            model_id: model_id.into(),
            position,
            rotation: Quat::identity(),
            scale: 1.0,
            model_matrix: Mat4::identity(),
        };
        entity.update_model_matrix();
        entity
    }

    /// Entity identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the model this entity draws
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// World-space position
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Orientation
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    /// Uniform scale
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Model-to-world transform
    pub fn model_matrix(&self) -> &Mat4 {
        &self.model_matrix
    }

    /// Move the entity
    pub fn set_position(&mut self, x: f32, y: f32, z: f32) {
        self.position = Vec3::new(x, y, z);
        self.update_model_matrix();
    }

    /// Reorient the entity
    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.update_model_matrix();
    }

    /// Rescale the entity
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
        self.update_model_matrix();
    }

    /// Rebuild translation * rotation * scale
    pub fn update_model_matrix(&mut self) {
        self.model_matrix = Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_scaling(self.scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Point3;
    use approx::assert_relative_eq;

    #[test]
    fn model_matrix_applies_scale_then_rotation_then_translation() {
        let mut entity = Entity::new("e", "m", Vec3::new(0.0, 0.0, -5.0));
        entity.set_scale(2.0);
        entity.set_rotation(Quat::from_axis_angle(&Vec3::y_axis(), std::f32::consts::FRAC_PI_2));

        let p = entity.model_matrix().transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.coords, Vec3::new(0.0, 0.0, -7.0), epsilon = 1e-5);
    }
}
