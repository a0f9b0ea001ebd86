//! Frame orchestration
//!
//! [`Renderer`] owns the device, the three passes, the texture cache, the
//! uploaded models and one [`ImageSlot`](crate::render::resources::sync::ImageSlot)
//! per swapchain image. One call to [`Renderer::render`] runs a whole frame:
//!
//! ```text
//! acquire ──► shadow ──────────────┐ shadow_complete (fragment)
//!        └──► geometry ──► lighting ┴──► present
//!    image_acquired   geometry_complete   render_complete
//! ```

use ash::vk;

use crate::assets::{ImageSource, ModelData};
use crate::core::config::EngineProperties;
use crate::render::device::{AcquireOutcome, GpuDevice, PresentOutcome, Submission};
use crate::render::passes::geometry::GeometryPass;
use crate::render::passes::lighting::LightingPass;
use crate::render::passes::shadow::ShadowPass;
use crate::render::resources::model::{sort_models, upload_models, GpuModel};
use crate::render::resources::sync::FrameSync;
use crate::render::resources::texture::TextureCache;
use crate::render::{RenderError, RenderResult};
use crate::scene::Scene;

/// Size of the presentation surface as the window reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceState {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl SurfaceState {
    /// Surface of `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True while minimized
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn extent(self) -> vk::Extent2D {
        vk::Extent2D { width: self.width, height: self.height }
    }
}

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Surface has no area; nothing was recorded
    Skipped,
    /// Frame queued for display
    Presented,
    /// Swapchain went out of date; it is rebuilt on the next frame
    SurfaceStale,
}

/// Deferred renderer over a [`GpuDevice`]
pub struct Renderer<D: GpuDevice> {
    device: D,
    textures: TextureCache,
    models: Vec<GpuModel>,
    shadow: ShadowPass,
    geometry: GeometryPass,
    lighting: LightingPass,
    sync: FrameSync,
    /// Surface size the swapchain was last built for; the swapchain itself
    /// may be clamped to something else
    surface_extent: vk::Extent2D,
    resize_pending: bool,
    shut_down: bool,
}

impl<D: GpuDevice> Renderer<D> {
    /// Build every pass for the device's current swapchain
    ///
    /// `image_source` feeds the texture cache; the default texture comes from
    /// `props.default_texture_path`.
    pub fn new(
        mut device: D,
        props: &EngineProperties,
        scene: &Scene,
        image_source: Box<dyn ImageSource>,
    ) -> RenderResult<Self> {
        log::info!("Creating renderer...");
        let swapchain = device.swapchain_info();
        let image_count = swapchain.image_count;
        if image_count == 0 {
            return Err(RenderError::InitializationFailed("swapchain has no images".into()));
        }

        let textures = TextureCache::new(&mut device, image_source, &props.default_texture_path)?;
        let shadow = ShadowPass::new(&mut device, props, image_count)?;
        let geometry =
            GeometryPass::new(&mut device, props, swapchain.extent(), image_count, scene.projection().matrix())?;
        let lighting = LightingPass::new(&mut device, props, geometry.gbuffer(), shadow.depth_image())?;
        let sync = FrameSync::new(&mut device, image_count)?;

        log::info!(
            "Renderer ready: {}x{}, {} swapchain images",
            swapchain.width,
            swapchain.height,
            image_count
        );
        Ok(Self {
            device,
            textures,
            models: Vec::new(),
            shadow,
            geometry,
            lighting,
            sync,
            surface_extent: swapchain.extent(),
            resize_pending: false,
            shut_down: false,
        })
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Uploaded models in draw order
    pub fn models(&self) -> &[GpuModel] {
        &self.models
    }

    /// Texture cache shared by every model
    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    /// Upload `models` alongside those already loaded
    ///
    /// Materials are re-sorted and every material record and texture set is
    /// registered again. If the upload fails or the combined material count
    /// exceeds the material buffer, the new models and any textures they
    /// brought into the cache are released and nothing changes.
    pub fn load_models(&mut self, models: &[ModelData]) -> RenderResult<()> {
        log::debug!("Loading {} models", models.len());
        self.device.wait_idle()?;

        let cached = self.textures.ids();
        let mut uploaded = match upload_models(&mut self.device, &mut self.textures, models) {
            Ok(uploaded) => uploaded,
            Err(err) => {
                self.textures.release_except(&mut self.device, &cached);
                return Err(err);
            }
        };
        let requested: usize =
            self.models.iter().chain(&uploaded).map(|model| model.materials.len()).sum();
        let max = self.geometry.max_materials();
        if requested > max {
            log::error!("Loading {} models would need {} materials, capacity {}", models.len(), requested, max);
            for model in uploaded {
                model.destroy(&mut self.device);
            }
            self.textures.release_except(&mut self.device, &cached);
            return Err(RenderError::MaterialLimitExceeded { requested, max });
        }

        self.models.append(&mut uploaded);
        sort_models(&mut self.models);
        self.geometry.register_models(&mut self.device, &self.models, &self.textures)?;
        log::info!("{} models loaded, {} textures cached", self.models.len(), self.textures.len());
        Ok(())
    }

    /// Render one frame of `scene` to a surface of the given size
    ///
    /// A stale acquire or present is not an error: the frame reports
    /// [`FrameStatus::SurfaceStale`] and the swapchain is rebuilt on the next
    /// call. Any other failure is fatal.
    pub fn render(&mut self, surface: SurfaceState, scene: &Scene) -> RenderResult<FrameStatus> {
        if self.shut_down {
            return Err(RenderError::invalid("render after shutdown"));
        }
        if surface.is_empty() {
            return Ok(FrameStatus::Skipped);
        }
        if self.resize_pending || surface.extent() != self.surface_extent {
            self.resize(surface.width, surface.height, scene)?;
        }

        let image_acquired = self.sync.image_acquired();
        let image_index = match self.device.acquire_next_image(image_acquired)? {
            AcquireOutcome::Image(index) => index,
            AcquireOutcome::Stale => {
                log::debug!("Swapchain out of date on acquire");
                self.resize_pending = true;
                return Ok(FrameStatus::SurfaceStale);
            }
        };
        self.sync.advance();
        let slot = *self
            .sync
            .slot(image_index)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("frame slot {}", image_index)))?;

        self.device.wait_fence(slot.in_flight)?;

        self.shadow.update(&mut self.device, scene, image_index)?;
        self.geometry.update(&mut self.device, scene, image_index)?;
        let cascades = self.shadow.cascades().lighting_uniform();
        self.lighting.update(&mut self.device, scene, &cascades, image_index)?;

        self.shadow.record(&mut self.device, slot.shadow_commands, image_index, &self.models, scene)?;
        self.geometry.record(&mut self.device, slot.geometry_commands, image_index, &self.models, scene)?;
        self.lighting.record(&mut self.device, slot.lighting_commands, image_index)?;

        self.device.submit(&Submission {
            command_buffer: slot.shadow_commands,
            waits: &[],
            signals: &[slot.shadow_complete],
            fence: None,
        })?;
        self.device.submit(&Submission {
            command_buffer: slot.geometry_commands,
            waits: &[(image_acquired, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)],
            signals: &[slot.geometry_complete],
            fence: None,
        })?;
        self.device.reset_fence(slot.in_flight)?;
        self.device.submit(&Submission {
            command_buffer: slot.lighting_commands,
            waits: &[
                (slot.geometry_complete, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
                (slot.shadow_complete, vk::PipelineStageFlags::FRAGMENT_SHADER),
            ],
            signals: &[slot.render_complete],
            fence: Some(slot.in_flight),
        })?;

        match self.device.present(image_index, slot.render_complete)? {
            PresentOutcome::Presented => Ok(FrameStatus::Presented),
            PresentOutcome::Stale => {
                log::debug!("Swapchain out of date on present");
                self.resize_pending = true;
                Ok(FrameStatus::SurfaceStale)
            }
        }
    }

    /// Rebuild everything sized by the surface
    ///
    /// Waits for the device to go idle, recreates the swapchain, then the
    /// G-buffer, both framebuffer sets, the lighting attachment set and the
    /// projection uniform. Per-image objects are rebuilt only if the number
    /// of swapchain images changed. Cascades are refit on the next frame.
    pub fn resize(&mut self, width: u32, height: u32, scene: &Scene) -> RenderResult<()> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        log::debug!("Resizing to {}x{}", width, height);
        self.device.wait_idle()?;
        self.device.recreate_swapchain(width, height)?;
        let swapchain = self.device.swapchain_info();

        if swapchain.image_count as usize != self.sync.image_count() {
            log::info!("Swapchain image count changed to {}", swapchain.image_count);
            self.sync.destroy(&mut self.device);
            self.sync = FrameSync::new(&mut self.device, swapchain.image_count)?;
            self.shadow.recreate_uniforms(&mut self.device, swapchain.image_count)?;
            self.geometry.recreate_view_uniforms(&mut self.device, swapchain.image_count)?;
            self.lighting.recreate_uniforms(&mut self.device, swapchain.image_count)?;
        }

        self.geometry.resize(&mut self.device, swapchain.extent(), scene.projection().matrix())?;
        self.lighting.resize(&mut self.device, self.geometry.gbuffer(), self.shadow.depth_image())?;
        self.shadow.invalidate();

        self.surface_extent = vk::Extent2D { width, height };
        self.resize_pending = false;
        Ok(())
    }

    /// Wait for the device and destroy every GPU object, dependents first;
    /// later calls do nothing
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Shutting down renderer");
        if let Err(err) = self.device.wait_idle() {
            log::error!("wait_idle failed during shutdown: {}", err);
        }

        self.sync.destroy(&mut self.device);
        self.lighting.destroy(&mut self.device);
        self.geometry.destroy(&mut self.device);
        self.shadow.destroy(&mut self.device);
        for model in self.models.drain(..) {
            model.destroy(&mut self.device);
        }
        self.textures.cleanup(&mut self.device);
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ImageData, MaterialData, MemoryImageSource, MeshData};
    use crate::foundation::math::{Vec3, Vec4};
    use crate::render::device::headless::{HeadlessDevice, ResourceCounts};
    use crate::render::device::DeviceLimits;
    use crate::render::passes::geometry::GEOMETRY_PASS;
    use crate::render::passes::lighting::LIGHTING_PASS;
    use crate::render::passes::shadow::SHADOW_PASS;
    use crate::scene::{Entity, Light};

    const WIDTH: u32 = 64;
    const HEIGHT: u32 = 48;

    fn props() -> EngineProperties {
        EngineProperties::default().with_max_materials(8).with_shadows(256, 0.00005, false)
    }

    fn images() -> MemoryImageSource {
        MemoryImageSource::new()
            .with_image("resources/textures/default.png", ImageData::solid_color(1, 1, [255; 4]))
            .with_image("brick.png", ImageData::solid_color(2, 2, [180, 60, 40, 255]))
            .with_image("glass.png", ImageData::solid_color(2, 2, [200, 220, 255, 96]))
    }

    fn renderer(scene: &Scene) -> Renderer<HeadlessDevice> {
        Renderer::new(HeadlessDevice::new(WIDTH, HEIGHT, 3), &props(), scene, Box::new(images())).unwrap()
    }

    fn triangle(material_idx: i32) -> MeshData {
        MeshData {
            positions: vec![-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.0, 0.5, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            tex_coords: vec![0.0, 0.0, 1.0, 0.0, 0.5, 1.0],
            indices: vec![0, 1, 2],
            material_idx,
            ..MeshData::default()
        }
    }

    fn textured(path: &str) -> MaterialData {
        MaterialData { texture_path: Some(path.to_string()), ..MaterialData::default() }
    }

    fn triangle_model(id: &str) -> ModelData {
        ModelData { model_id: id.to_string(), meshes: vec![triangle(0)], materials: vec![textured("brick.png")] }
    }

    fn surface() -> SurfaceState {
        SurfaceState::new(WIDTH, HEIGHT)
    }

    #[test]
    fn single_triangle_renders_one_geometry_draw() {
        let mut scene = Scene::new(&props(), WIDTH, HEIGHT);
        scene.set_lights(vec![Light::directional(Vec3::new(0.3, 1.0, 0.2), Vec3::repeat(1.0), 1.0)]).unwrap();
        let mut renderer = renderer(&scene);
        renderer.load_models(&[triangle_model("triangle")]).unwrap();
        scene.add_entity(Entity::new("t1", "triangle", Vec3::new(0.0, 0.0, -3.0)));

        let status = renderer.render(surface(), &scene).unwrap();

        let device = renderer.device();
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(device.draw_count(GEOMETRY_PASS), 1);
        assert_eq!(device.draw_count(SHADOW_PASS), 1);
        assert_eq!(device.draw_count(LIGHTING_PASS), 1);
        assert_eq!(device.presented(), &[0]);
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());
    }

    #[test]
    fn frames_cycle_through_every_image_without_violations() {
        let mut scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.load_models(&[triangle_model("triangle")]).unwrap();
        scene.add_entity(Entity::new("t1", "triangle", Vec3::zeros()));

        for _ in 0..7 {
            assert_eq!(renderer.render(surface(), &scene).unwrap(), FrameStatus::Presented);
            scene.camera_mut().move_forward(0.1);
            scene.end_frame();
        }

        let device = renderer.device();
        assert_eq!(device.presented(), &[0, 1, 2, 0, 1, 2, 0]);
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());
    }

    #[test]
    fn minimized_surface_skips_the_frame() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);

        assert_eq!(renderer.render(SurfaceState::new(0, HEIGHT), &scene).unwrap(), FrameStatus::Skipped);
        assert_eq!(renderer.render(SurfaceState::new(WIDTH, 0), &scene).unwrap(), FrameStatus::Skipped);
        assert!(renderer.device().submissions().is_empty());
        assert!(renderer.device().presented().is_empty());
    }

    #[test]
    fn stale_acquire_rebuilds_on_the_next_frame() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.device_mut().inject_stale_acquire(1);
        let old_images = renderer.device().swapchain_images();

        assert_eq!(renderer.render(surface(), &scene).unwrap(), FrameStatus::SurfaceStale);
        assert!(renderer.device().submissions().is_empty());

        assert_eq!(renderer.render(surface(), &scene).unwrap(), FrameStatus::Presented);
        assert_ne!(renderer.device().swapchain_images(), old_images);
        assert!(renderer.device().validation_errors().is_empty(), "{:?}", renderer.device().validation_errors());
    }

    #[test]
    fn stale_present_rebuilds_on_the_next_frame() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.device_mut().inject_stale_present(1);

        assert_eq!(renderer.render(surface(), &scene).unwrap(), FrameStatus::SurfaceStale);
        let old_images = renderer.device().swapchain_images();
        assert_eq!(renderer.render(surface(), &scene).unwrap(), FrameStatus::Presented);

        assert_ne!(renderer.device().swapchain_images(), old_images);
        assert_eq!(renderer.device().presented(), &[0]);
        assert!(renderer.device().validation_errors().is_empty(), "{:?}", renderer.device().validation_errors());
    }

    #[test]
    fn surface_size_change_triggers_resize() {
        let mut scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        scene.resize(100, 80);

        assert_eq!(renderer.render(SurfaceState::new(100, 80), &scene).unwrap(), FrameStatus::Presented);
        assert_eq!(renderer.device().swapchain_info().extent(), vk::Extent2D { width: 100, height: 80 });
        assert_eq!(renderer.geometry.gbuffer().extent(), vk::Extent2D { width: 100, height: 80 });
        assert!(renderer.device().validation_errors().is_empty(), "{:?}", renderer.device().validation_errors());
    }

    #[test]
    fn clamped_swapchain_is_not_rebuilt_every_frame() {
        let mut scene = Scene::new(&props(), WIDTH, HEIGHT);
        let device = HeadlessDevice::new(WIDTH, HEIGHT, 3).with_max_extent(80, 60);
        let mut renderer = Renderer::new(device, &props(), &scene, Box::new(images())).unwrap();
        scene.resize(100, 80);

        for _ in 0..3 {
            assert_eq!(renderer.render(SurfaceState::new(100, 80), &scene).unwrap(), FrameStatus::Presented);
        }

        assert_eq!(renderer.device().swapchain_recreations(), 1);
        assert_eq!(renderer.device().swapchain_info().extent(), vk::Extent2D { width: 80, height: 60 });
        assert_eq!(renderer.geometry.gbuffer().extent(), vk::Extent2D { width: 80, height: 60 });

        assert_eq!(renderer.render(SurfaceState::new(70, 50), &scene).unwrap(), FrameStatus::Presented);
        assert_eq!(renderer.device().swapchain_recreations(), 2);
        assert!(renderer.device().validation_errors().is_empty(), "{:?}", renderer.device().validation_errors());
    }

    fn projection_bytes(renderer: &Renderer<HeadlessDevice>) -> Vec<u8> {
        let buffers = renderer.device().buffers_labeled("projection");
        assert_eq!(buffers.len(), 1);
        renderer.device().buffer_data(buffers[0]).unwrap().to_vec()
    }

    #[test]
    fn resize_is_idempotent() {
        let mut scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.load_models(&[triangle_model("triangle")]).unwrap();
        scene.resize(120, 90);

        renderer.resize(120, 90, &scene).unwrap();
        let counts: ResourceCounts = renderer.device().resource_counts();
        let projection = projection_bytes(&renderer);

        renderer.resize(120, 90, &scene).unwrap();
        assert_eq!(renderer.device().resource_counts(), counts);
        assert_eq!(projection_bytes(&renderer), projection);
        assert_eq!(
            projection,
            bytemuck::bytes_of(&crate::render::resources::uniform::MatrixUniform::new(scene.projection().matrix()))
        );
    }

    #[test]
    fn too_many_materials_leaves_loaded_models_untouched() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.load_models(&[triangle_model("first")]).unwrap();
        let counts = renderer.device().resource_counts();

        let crowded = ModelData {
            model_id: "crowded".into(),
            meshes: (0..8).map(triangle).collect(),
            materials: (0..8).map(|_| MaterialData::default()).collect(),
        };
        let err = renderer.load_models(&[crowded]).unwrap_err();

        assert!(matches!(err, RenderError::MaterialLimitExceeded { requested: 9, max: 8 }));
        assert_eq!(renderer.models().len(), 1);
        assert_eq!(renderer.device().resource_counts(), counts);
    }

    #[test]
    fn rejected_batches_release_the_textures_they_loaded() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.load_models(&[triangle_model("first")]).unwrap();
        let counts = renderer.device().resource_counts();
        let cached = renderer.textures().len();

        let crowded = ModelData {
            model_id: "crowded".into(),
            meshes: (0..8).map(triangle).collect(),
            materials: (0..8).map(|_| textured("glass.png")).collect(),
        };
        assert!(renderer.load_models(&[crowded]).is_err());
        assert_eq!(renderer.textures().len(), cached);
        assert_eq!(renderer.device().resource_counts(), counts);

        let broken = ModelData {
            model_id: "broken".into(),
            meshes: vec![triangle(0), triangle(1)],
            materials: vec![textured("glass.png"), textured("missing.png")],
        };
        assert!(matches!(renderer.load_models(&[broken]), Err(RenderError::Asset(_))));
        assert_eq!(renderer.textures().len(), cached);
        assert_eq!(renderer.device().resource_counts(), counts);

        let window = ModelData {
            model_id: "window".into(),
            meshes: vec![triangle(0)],
            materials: vec![textured("glass.png")],
        };
        renderer.load_models(&[window]).unwrap();
        assert_eq!(renderer.textures().len(), cached + 1);
    }

    #[test]
    fn opaque_models_and_materials_draw_first() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        let window = ModelData {
            model_id: "window".into(),
            meshes: vec![triangle(0), triangle(1)],
            materials: vec![textured("glass.png"), textured("brick.png")],
        };
        renderer.load_models(&[window, triangle_model("wall")]).unwrap();

        let models = renderer.models();
        assert_eq!(models[0].model_id, "wall");
        assert_eq!(models[1].model_id, "window");
        assert!(!models[1].materials[0].transparent);
        assert!(models[1].materials[1].transparent);
    }

    #[test]
    fn shared_texture_paths_load_once() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.load_models(&[triangle_model("a"), triangle_model("b")]).unwrap();

        // default plus brick.png
        assert_eq!(renderer.textures().len(), 2);
        let albedo = |i: usize| renderer.models()[i].materials[0].albedo;
        assert_eq!(albedo(0), albedo(1));
    }

    #[test]
    fn submissions_chain_through_the_image_semaphores() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.render(surface(), &scene).unwrap();

        let slot = *renderer.sync.slot(0).unwrap();
        let submissions = renderer.device().submissions();
        assert_eq!(submissions.len(), 3);
        assert_eq!(submissions[0].signals, vec![slot.shadow_complete]);
        assert_eq!(submissions[1].signals, vec![slot.geometry_complete]);
        assert_eq!(submissions[2].waits, vec![slot.geometry_complete, slot.shadow_complete]);
        assert_eq!(submissions[2].signals, vec![slot.render_complete]);
        assert_eq!(submissions[2].fence, Some(slot.in_flight));
    }

    #[test]
    fn submit_failure_is_fatal() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let mut renderer = renderer(&scene);
        renderer.device_mut().inject_submit_failure(vk::Result::ERROR_DEVICE_LOST);

        let err = renderer.render(surface(), &scene).unwrap_err();
        assert!(matches!(err, RenderError::Api(vk::Result::ERROR_DEVICE_LOST)));
    }

    #[test]
    fn shutdown_releases_every_object() {
        let mut scene = Scene::new(&props(), WIDTH, HEIGHT);
        scene.set_ambient_light(Vec4::new(0.1, 0.1, 0.1, 1.0));
        let mut renderer = renderer(&scene);
        renderer.load_models(&[triangle_model("triangle")]).unwrap();
        renderer.render(surface(), &scene).unwrap();

        renderer.shutdown();
        renderer.shutdown();

        assert_eq!(renderer.device().resource_counts(), ResourceCounts::default());
        assert!(renderer.device().validation_errors().is_empty(), "{:?}", renderer.device().validation_errors());
        assert!(renderer.render(surface(), &scene).is_err());
    }

    #[test]
    fn alignment_follows_device_limits() {
        let scene = Scene::new(&props(), WIDTH, HEIGHT);
        let device = HeadlessDevice::new(WIDTH, HEIGHT, 2)
            .with_limits(DeviceLimits { min_uniform_buffer_offset_alignment: 64, max_push_constants_size: 128 });
        let renderer = Renderer::new(device, &props(), &scene, Box::new(images())).unwrap();

        assert_eq!(renderer.geometry.material_size(), 64);
    }
}
