//! Point and directional lights

use crate::foundation::math::{Vec3, Vec4};

/// A light source; `position.w == 0` marks a directional light whose xyz
/// points towards the light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// Position (w = 1) or direction (w = 0)
    pub position: Vec4,
    /// Linear RGB color, intensity in w
    pub color: Vec4,
}

impl Light {
    /// Directional light shining from `direction` towards the origin
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position: Vec4::new(direction.x, direction.y, direction.z, 0.0),
            color: Vec4::new(color.x, color.y, color.z, intensity),
        }
    }

    /// Point light at `position`
    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position: Vec4::new(position.x, position.y, position.z, 1.0),
            color: Vec4::new(color.x, color.y, color.z, intensity),
        }
    }

    /// True for directional lights
    pub fn is_directional(&self) -> bool {
        self.position.w == 0.0
    }
}
