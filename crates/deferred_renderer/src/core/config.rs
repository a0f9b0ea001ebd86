//! # Engine Properties
//!
//! Explicit engine configuration, constructed once at startup and handed by
//! reference to every component that needs it.
//!
//! Loading never fails: a missing or unreadable file, an unknown key, a value of
//! the wrong type or a value outside its valid range each fall back to the
//! default for that setting and emit a `warn!` naming the offending key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError, ConfigFormat};

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineProperties {
    /// Logic updates per second
    pub ups: u32,
    /// Enable Vulkan validation layers
    pub validate: bool,
    /// Preferred physical device name, first suitable device otherwise
    pub physical_device_name: Option<String>,
    /// Requested swapchain image count (clamped by the surface)
    pub requested_images: u32,
    /// Wait for vertical blank when presenting
    pub vsync: bool,
    /// Vertical field of view in degrees
    pub fov: f32,
    /// Near clip plane distance
    pub z_near: f32,
    /// Far clip plane distance
    pub z_far: f32,
    /// Capacity of the dynamic material uniform buffer
    pub max_materials: u32,
    /// Width and height of each shadow cascade layer
    pub shadow_map_size: u32,
    /// Depth bias applied when comparing against the shadow map
    pub shadow_bias: f32,
    /// Percentage-closer filtering for shadow lookups
    pub shadow_pcf: bool,
    /// Tint fragments by cascade index
    pub shadow_debug: bool,
    /// Texture used when a material names no texture
    pub default_texture_path: String,
    /// Directory holding compiled `.spv` shader stages
    pub shader_dir: PathBuf,
}

impl Default for EngineProperties {
    fn default() -> Self {
        Self {
            ups: 30,
            validate: false,
            physical_device_name: None,
            requested_images: 3,
            vsync: true,
            fov: 60.0,
            z_near: 1.0,
            z_far: 100.0,
            max_materials: 500,
            shadow_map_size: 2048,
            shadow_bias: 0.000_05,
            shadow_pcf: false,
            shadow_debug: false,
            default_texture_path: "resources/textures/default.png".to_string(),
            shader_dir: PathBuf::from("resources/shaders"),
        }
    }
}

impl Config for EngineProperties {}

/// Largest material capacity whose records all have a 32-bit dynamic offset
/// at the widest uniform alignment Vulkan allows (256 bytes)
pub const MAX_MATERIALS_LIMIT: u32 = u32::MAX / 256;

const KNOWN_KEYS: &[&str] = &[
    "ups",
    "validate",
    "physical_device_name",
    "requested_images",
    "vsync",
    "fov",
    "z_near",
    "z_far",
    "max_materials",
    "shadow_map_size",
    "shadow_bias",
    "shadow_pcf",
    "shadow_debug",
    "default_texture_path",
    "shader_dir",
];

impl EngineProperties {
    /// Load properties from `path`, falling back to defaults on any problem
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!("Could not read engine properties {}: {}; using defaults", path.display(), err);
                return Self::default();
            }
        };

        let properties = match ConfigFormat::from_path(path) {
            Ok(ConfigFormat::Toml) => Self::from_toml_lenient(&contents),
            Ok(ConfigFormat::Ron) => Self::from_ron_lenient(&contents),
            Err(err) => {
                warn!("{}; using default engine properties", err);
                Self::default()
            }
        };

        info!("Loaded engine properties from {}", path.display());
        properties.sanitized()
    }

    /// Parse TOML text key by key; a bad value only resets its own setting
    pub fn from_toml_lenient(contents: &str) -> Self {
        match contents.parse::<toml::Table>() {
            Ok(table) => Self::from_fields(&Fields::Toml(table)),
            Err(err) => {
                warn!("Engine properties are not valid TOML: {}; using defaults", err);
                Self::default()
            }
        }
    }

    /// Parse a RON struct key by key; a bad value only resets its own setting
    pub fn from_ron_lenient(contents: &str) -> Self {
        let map = match ron::from_str::<ron::Value>(contents) {
            Ok(ron::Value::Map(map)) => map,
            Ok(_) => {
                warn!("Engine properties are not a RON struct; using defaults");
                return Self::default();
            }
            Err(err) => {
                warn!("Engine properties are not valid RON: {}; using defaults", err);
                return Self::default();
            }
        };

        let mut entries = HashMap::new();
        for (key, value) in map.iter() {
            match key {
                ron::Value::String(key) => {
                    entries.insert(key.clone(), value.clone());
                }
                other => warn!("Ignoring engine property with non-string key {:?}", other),
            }
        }
        Self::from_fields(&Fields::Ron(entries))
    }

    fn from_fields(fields: &Fields) -> Self {
        for key in fields.keys() {
            if !KNOWN_KEYS.contains(&key) {
                warn!("Ignoring unknown engine property '{}'", key);
            }
        }

        let d = Self::default();
        Self {
            ups: fields.get("ups", d.ups),
            validate: fields.get("validate", d.validate),
            physical_device_name: fields.get("physical_device_name", d.physical_device_name),
            requested_images: fields.get("requested_images", d.requested_images),
            vsync: fields.get("vsync", d.vsync),
            fov: fields.get("fov", d.fov),
            z_near: fields.get("z_near", d.z_near),
            z_far: fields.get("z_far", d.z_far),
            max_materials: fields.get("max_materials", d.max_materials),
            shadow_map_size: fields.get("shadow_map_size", d.shadow_map_size),
            shadow_bias: fields.get("shadow_bias", d.shadow_bias),
            shadow_pcf: fields.get("shadow_pcf", d.shadow_pcf),
            shadow_debug: fields.get("shadow_debug", d.shadow_debug),
            default_texture_path: fields.get("default_texture_path", d.default_texture_path),
            shader_dir: fields.get("shader_dir", d.shader_dir),
        }
        .sanitized()
    }

    /// Replace out-of-range values with their defaults
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();

        if self.ups == 0 {
            warn!("ups must be positive; using {}", d.ups);
            self.ups = d.ups;
        }
        if self.requested_images < 2 {
            warn!("requested_images {} is below 2; using {}", self.requested_images, d.requested_images);
            self.requested_images = d.requested_images;
        }
        if !(self.fov > 0.0 && self.fov < 180.0) {
            warn!("fov {} is outside (0, 180); using {}", self.fov, d.fov);
            self.fov = d.fov;
        }
        if !(self.z_near > 0.0 && self.z_far > self.z_near) {
            warn!(
                "clip planes near={} far={} are invalid; using near={} far={}",
                self.z_near, self.z_far, d.z_near, d.z_far
            );
            self.z_near = d.z_near;
            self.z_far = d.z_far;
        }
        if self.max_materials == 0 || self.max_materials > MAX_MATERIALS_LIMIT {
            warn!(
                "max_materials {} is outside 1..={}; using {}",
                self.max_materials, MAX_MATERIALS_LIMIT, d.max_materials
            );
            self.max_materials = d.max_materials;
        }
        if !self.shadow_map_size.is_power_of_two() {
            warn!(
                "shadow_map_size {} is not a power of two; using {}",
                self.shadow_map_size, d.shadow_map_size
            );
            self.shadow_map_size = d.shadow_map_size;
        }
        if !(self.shadow_bias >= 0.0) {
            warn!("shadow_bias {} is negative; using {}", self.shadow_bias, d.shadow_bias);
            self.shadow_bias = d.shadow_bias;
        }

        self
    }

    /// Persist properties, format chosen by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.save_to_file(path)
    }

    /// Vertical field of view in radians
    pub fn fov_radians(&self) -> f32 {
        self.fov.to_radians()
    }

    /// Set the update rate
    pub fn with_ups(mut self, ups: u32) -> Self {
        self.ups = ups;
        self
    }

    /// Set the swapchain image request
    pub fn with_requested_images(mut self, count: u32) -> Self {
        self.requested_images = count;
        self
    }

    /// Toggle vsync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Set field of view (degrees) and clip planes
    pub fn with_projection(mut self, fov: f32, z_near: f32, z_far: f32) -> Self {
        self.fov = fov;
        self.z_near = z_near;
        self.z_far = z_far;
        self
    }

    /// Set the material capacity
    pub fn with_max_materials(mut self, max_materials: u32) -> Self {
        self.max_materials = max_materials;
        self
    }

    /// Configure the shadow map
    pub fn with_shadows(mut self, size: u32, bias: f32, pcf: bool) -> Self {
        self.shadow_map_size = size;
        self.shadow_bias = bias;
        self.shadow_pcf = pcf;
        self
    }

    /// Set the fallback texture path
    pub fn with_default_texture(mut self, path: impl Into<String>) -> Self {
        self.default_texture_path = path.into();
        self
    }

    /// Set the compiled shader directory
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }
}

/// Top-level keys of a parsed properties document
enum Fields {
    Toml(toml::Table),
    Ron(HashMap<String, ron::Value>),
}

impl Fields {
    fn keys(&self) -> Vec<&str> {
        match self {
            Self::Toml(table) => table.keys().map(String::as_str).collect(),
            Self::Ron(entries) => entries.keys().map(String::as_str).collect(),
        }
    }

    fn get<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let parsed = match self {
            Self::Toml(table) => table.get(key).map(|value| value.clone().try_into::<T>().map_err(|e| e.to_string())),
            Self::Ron(entries) => entries.get(key).map(|value| value.clone().into_rust::<T>().map_err(|e| e.to_string())),
        };
        match parsed {
            None => fallback,
            Some(Ok(value)) => value,
            Some(Err(err)) => {
                warn!("Invalid value for engine property '{}': {}; using default", key, err);
                fallback
            }
        }
    }
}
