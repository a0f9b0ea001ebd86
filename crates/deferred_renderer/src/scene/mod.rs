//! Scene state consumed by the renderer
//!
//! The scene owns the camera, projection, lights and every entity, grouped by
//! the model they instance. The renderer reads it as an immutable snapshot
//! for one frame; mutations happen between frames and are summarized by
//! [`SceneChanges`] so expensive derived data (shadow cascades) can be
//! recomputed only when needed.

mod camera;
mod entity;
mod light;
mod projection;

use std::collections::HashMap;

use bitflags::bitflags;
use thiserror::Error;

pub use camera::Camera;
pub use entity::Entity;
pub use light::Light;
pub use projection::Projection;

use crate::core::config::EngineProperties;
use crate::foundation::math::Vec4;

/// Upper bound on lights the lighting pass evaluates
pub const MAX_LIGHTS: usize = 10;

bitflags! {
    /// What changed since the last [`Scene::end_frame`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SceneChanges: u32 {
        /// Camera position or rotation changed
        const CAMERA_MOVED = 1 << 0;
        /// Light array or ambient light changed
        const LIGHT_CHANGED = 1 << 1;
        /// Projection was resized
        const PROJECTION_CHANGED = 1 << 2;
    }
}

/// Scene errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// More lights than the lighting pass can evaluate
    #[error("Too many lights: {count} exceeds the maximum of {max}")]
    TooManyLights {
        /// Lights supplied
        count: usize,
        /// Allowed maximum
        max: usize,
    },

    /// No entity with the given id
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// A point light was passed where a directional one is required
    #[error("Light is not directional")]
    NotDirectional,
}

/// Everything the renderer draws
#[derive(Debug)]
pub struct Scene {
    camera: Camera,
    projection: Projection,
    ambient_light: Vec4,
    lights: Vec<Light>,
    entities: HashMap<String, Vec<Entity>>,
    changes: SceneChanges,
}

impl Scene {
    /// Empty scene sized for a `width` x `height` surface
    pub fn new(props: &EngineProperties, width: u32, height: u32) -> Self {
        Self {
            camera: Camera::new(),
            projection: Projection::new(props, width, height),
            ambient_light: Vec4::zeros(),
            lights: Vec::new(),
            entities: HashMap::new(),
            changes: SceneChanges::all(),
        }
    }

    /// Camera
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Mutable camera; moves raise [`SceneChanges::CAMERA_MOVED`]
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Projection
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Resize the projection to a new surface size
    pub fn resize(&mut self, width: u32, height: u32) {
        self.projection.resize(width, height);
        self.changes |= SceneChanges::PROJECTION_CHANGED;
    }

    /// Ambient light color
    pub fn ambient_light(&self) -> Vec4 {
        self.ambient_light
    }

    /// Replace the ambient light color
    pub fn set_ambient_light(&mut self, ambient: Vec4) {
        self.ambient_light = ambient;
        self.changes |= SceneChanges::LIGHT_CHANGED;
    }

    /// Current lights
    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Replace the light array
    ///
    /// Fails without modifying the scene if `lights` exceeds [`MAX_LIGHTS`].
    pub fn set_lights(&mut self, lights: Vec<Light>) -> Result<(), SceneError> {
        if lights.len() > MAX_LIGHTS {
            log::error!("Rejected {} lights, maximum is {}", lights.len(), MAX_LIGHTS);
            return Err(SceneError::TooManyLights { count: lights.len(), max: MAX_LIGHTS });
        }
        self.lights = lights;
        self.changes |= SceneChanges::LIGHT_CHANGED;
        Ok(())
    }

    /// The light that casts shadows: the first directional light
    pub fn directional_light(&self) -> Option<&Light> {
        self.lights.iter().find(|light| light.is_directional())
    }

    /// Replace the shadow-casting light, or add one if there is none
    pub fn set_directional_light(&mut self, light: Light) -> Result<(), SceneError> {
        if !light.is_directional() {
            return Err(SceneError::NotDirectional);
        }
        match self.lights.iter_mut().find(|existing| existing.is_directional()) {
            Some(existing) => *existing = light,
            None => {
                if self.lights.len() >= MAX_LIGHTS {
                    return Err(SceneError::TooManyLights { count: self.lights.len() + 1, max: MAX_LIGHTS });
                }
                self.lights.push(light);
            }
        }
        self.changes |= SceneChanges::LIGHT_CHANGED;
        Ok(())
    }

    /// Add an entity under its model id
    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.entry(entity.model_id().to_string()).or_default().push(entity);
    }

    /// Remove an entity by id, returning it
    pub fn remove_entity(&mut self, entity_id: &str) -> Result<Entity, SceneError> {
        for list in self.entities.values_mut() {
            if let Some(index) = list.iter().position(|e| e.id() == entity_id) {
                return Ok(list.remove(index));
            }
        }
        Err(SceneError::EntityNotFound(entity_id.to_string()))
    }

    /// Drop every entity
    pub fn remove_all_entities(&mut self) {
        self.entities.clear();
    }

    /// Entities instancing `model_id`; empty when none
    pub fn entities_by_model_id(&self, model_id: &str) -> &[Entity] {
        self.entities.get(model_id).map_or(&[][..], Vec::as_slice)
    }

    /// Mutable access to one entity
    pub fn entity_mut(&mut self, entity_id: &str) -> Option<&mut Entity> {
        self.entities.values_mut().flat_map(|list| list.iter_mut()).find(|e| e.id() == entity_id)
    }

    /// Changes accumulated since the last [`Scene::end_frame`]
    pub fn changes(&self) -> SceneChanges {
        let mut changes = self.changes;
        if self.camera.has_moved() {
            changes |= SceneChanges::CAMERA_MOVED;
        }
        changes
    }

    /// Clear change tracking; called once after each rendered frame
    pub fn end_frame(&mut self) {
        self.changes = SceneChanges::empty();
        self.camera.clear_moved();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;

    fn scene() -> Scene {
        Scene::new(&EngineProperties::default(), 800, 600)
    }

    fn lights(count: usize) -> Vec<Light> {
        (0..count).map(|i| Light::point(Vec3::new(i as f32, 1.0, 0.0), Vec3::repeat(1.0), 1.0)).collect()
    }

    #[test]
    fn max_lights_is_accepted() {
        let mut scene = scene();
        assert!(scene.set_lights(lights(MAX_LIGHTS)).is_ok());
        assert_eq!(scene.lights().len(), MAX_LIGHTS);
    }

    #[test]
    fn one_light_over_max_is_rejected() {
        let mut scene = scene();
        let err = scene.set_lights(lights(MAX_LIGHTS + 1)).unwrap_err();
        assert_eq!(err, SceneError::TooManyLights { count: MAX_LIGHTS + 1, max: MAX_LIGHTS });
        assert!(scene.lights().is_empty());
    }

    #[test]
    fn entities_are_grouped_by_model() {
        let mut scene = scene();
        scene.add_entity(Entity::new("a", "cube", Vec3::zeros()));
        scene.add_entity(Entity::new("b", "cube", Vec3::zeros()));
        scene.add_entity(Entity::new("c", "plane", Vec3::zeros()));

        assert_eq!(scene.entities_by_model_id("cube").len(), 2);
        assert_eq!(scene.entities_by_model_id("plane").len(), 1);
        assert!(scene.entities_by_model_id("sphere").is_empty());

        let removed = scene.remove_entity("a").unwrap();
        assert_eq!(removed.id(), "a");
        assert_eq!(scene.entities_by_model_id("cube").len(), 1);
        assert_eq!(scene.remove_entity("a").unwrap_err(), SceneError::EntityNotFound("a".into()));
    }

    #[test]
    fn changes_track_camera_and_lights_until_end_frame() {
        let mut scene = scene();
        assert!(scene.changes().is_all());

        scene.end_frame();
        assert!(scene.changes().is_empty());

        scene.camera_mut().move_left(1.0);
        assert_eq!(scene.changes(), SceneChanges::CAMERA_MOVED);

        scene.set_lights(lights(1)).unwrap();
        assert!(scene.changes().contains(SceneChanges::LIGHT_CHANGED));

        scene.end_frame();
        assert!(scene.changes().is_empty());
    }

    #[test]
    fn directional_light_is_first_with_zero_w() {
        let mut scene = scene();
        let mut all = lights(2);
        all.push(Light::directional(Vec3::new(0.0, 1.0, 0.5), Vec3::repeat(1.0), 1.0));
        scene.set_lights(all).unwrap();
        assert!(scene.directional_light().unwrap().is_directional());
    }

    #[test]
    fn directional_light_is_replaced_in_place() {
        let mut scene = scene();
        scene.set_lights(lights(1)).unwrap();
        scene.end_frame();

        scene.set_directional_light(Light::directional(Vec3::y(), Vec3::repeat(1.0), 1.0)).unwrap();
        scene.set_directional_light(Light::directional(Vec3::x(), Vec3::repeat(0.5), 2.0)).unwrap();

        assert_eq!(scene.lights().len(), 2);
        assert_eq!(scene.directional_light().unwrap().position.x, 1.0);
        assert!(scene.changes().contains(SceneChanges::LIGHT_CHANGED));
        assert_eq!(
            scene.set_directional_light(Light::point(Vec3::zeros(), Vec3::repeat(1.0), 1.0)),
            Err(SceneError::NotDirectional)
        );
    }

    #[test]
    fn directional_light_respects_the_light_limit() {
        let mut scene = scene();
        scene.set_lights(lights(MAX_LIGHTS)).unwrap();
        let err = scene.set_directional_light(Light::directional(Vec3::y(), Vec3::repeat(1.0), 1.0)).unwrap_err();
        assert_eq!(err, SceneError::TooManyLights { count: MAX_LIGHTS + 1, max: MAX_LIGHTS });
    }
}
