//! Engine loop
//!
//! [`Engine`] ties a [`Window`], an [`Application`] and a [`Renderer`]
//! together. Every iteration polls the window, hands the drained events to the
//! application, runs fixed-rate updates, renders, then clears the scene's
//! change flags.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::assets::{AssetError, FileImageSource, ImageSource, ModelData};
use crate::core::config::EngineProperties;
use crate::events::{EventQueue, InputEvent};
use crate::foundation::logging;
use crate::render::device::GpuDevice;
use crate::render::{FrameStatus, RenderError, Renderer, SurfaceState};
use crate::scene::{Scene, SceneError};

/// Platform window as the engine sees it
pub trait Window {
    /// Push every pending platform event into `events`
    fn poll_events(&mut self, events: &mut EventQueue);

    /// Current framebuffer size in pixels; zero while minimized
    fn surface_size(&self) -> (u32, u32);

    /// True once the user asked to close the window
    fn should_close(&self) -> bool;
}

/// Game or demo logic driven by the engine
pub trait Application {
    /// Populate `scene` and return the models to upload
    fn init(&mut self, props: &EngineProperties, scene: &mut Scene) -> Result<Vec<ModelData>, EngineError>;

    /// React to this tick's events; `delta` is the time since the last tick
    fn input(&mut self, events: &[InputEvent], scene: &mut Scene, delta: Duration) -> Result<(), EngineError>;

    /// Fixed-rate logic update; `delta` is the time since the last update
    fn update(&mut self, scene: &mut Scene, delta: Duration) -> Result<(), EngineError>;

    /// Called once after the loop exits
    fn cleanup(&mut self) {}
}

/// Errors that end the engine loop
#[derive(Error, Debug)]
pub enum EngineError {
    /// Renderer failure
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Asset failure
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Scene invariant violated
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Application-defined failure
    #[error("Application error: {0}")]
    Application(String),
}

/// Owns everything needed to run frames
pub struct Engine<W: Window, A: Application, D: GpuDevice> {
    props: EngineProperties,
    window: W,
    application: A,
    renderer: Renderer<D>,
    scene: Scene,
    events: EventQueue,
}

impl<W: Window, A: Application, D: GpuDevice> Engine<W, A, D> {
    /// Create the engine with textures read from disk
    pub fn new(props: EngineProperties, window: W, device: D, application: A) -> Result<Self, EngineError> {
        Self::with_image_source(props, window, device, Box::new(FileImageSource), application)
    }

    /// Create the engine with textures read through `image_source`
    ///
    /// Initializes the application and uploads the models it returns.
    pub fn with_image_source(
        props: EngineProperties,
        window: W,
        device: D,
        image_source: Box<dyn ImageSource>,
        mut application: A,
    ) -> Result<Self, EngineError> {
        logging::init();
        log::info!("Initializing engine...");
        let (width, height) = window.surface_size();
        let mut scene = Scene::new(&props, width, height);
        let mut renderer = Renderer::new(device, &props, &scene, image_source)?;

        let models = application.init(&props, &mut scene)?;
        renderer.load_models(&models)?;

        Ok(Self { props, window, application, renderer, scene, events: EventQueue::new() })
    }

    /// The scene
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// The renderer
    pub fn renderer(&self) -> &Renderer<D> {
        &self.renderer
    }

    /// The application
    pub fn application(&self) -> &A {
        &self.application
    }

    /// Run until the window closes
    ///
    /// A fatal error shuts the renderer down before it is returned.
    pub fn run(&mut self) -> Result<(), EngineError> {
        log::info!("Starting main loop at {} updates per second", self.props.ups);
        let result = self.run_loop();
        if let Err(err) = &result {
            log::error!("Engine loop failed: {}", err);
        }
        self.application.cleanup();
        self.renderer.shutdown();
        log::info!("Engine shutdown complete");
        result
    }

    fn run_loop(&mut self) -> Result<(), EngineError> {
        let update_period = Duration::from_secs_f64(1.0 / f64::from(self.props.ups.max(1)));
        let mut last_tick = Instant::now();
        let mut last_update = last_tick;
        let mut pending_update = Duration::ZERO;

        while !self.window.should_close() {
            self.window.poll_events(&mut self.events);
            let events = self.events.drain();
            if events.iter().any(|event| matches!(event, InputEvent::CloseRequested)) {
                log::debug!("Close requested");
                break;
            }
            for event in &events {
                if let InputEvent::Resized { width, height } = *event {
                    self.scene.resize(width, height);
                }
            }

            let now = Instant::now();
            let delta = now - last_tick;
            pending_update += delta;
            self.application.input(&events, &mut self.scene, delta)?;

            if pending_update >= update_period {
                self.application.update(&mut self.scene, now - last_update)?;
                last_update = now;
                pending_update -= update_period;
            }

            let (width, height) = self.window.surface_size();
            match self.renderer.render(SurfaceState::new(width, height), &self.scene)? {
                FrameStatus::Presented => self.scene.end_frame(),
                FrameStatus::Skipped | FrameStatus::SurfaceStale => {}
            }
            last_tick = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ImageData, MaterialData, MemoryImageSource, MeshData};
    use crate::events::Key;
    use crate::foundation::math::Vec3;
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::passes::geometry::GEOMETRY_PASS;
    use crate::scene::Entity;

    struct ScriptedWindow {
        frames: Vec<Vec<InputEvent>>,
        size: (u32, u32),
        polls: usize,
    }

    impl Window for ScriptedWindow {
        fn poll_events(&mut self, events: &mut EventQueue) {
            if let Some(frame) = self.frames.get(self.polls) {
                for event in frame {
                    events.push(event.clone());
                }
            }
            self.polls += 1;
        }

        fn surface_size(&self) -> (u32, u32) {
            self.size
        }

        fn should_close(&self) -> bool {
            self.polls >= self.frames.len()
        }
    }

    #[derive(Default)]
    struct Spinner {
        keys: Vec<Key>,
        updates: usize,
        cleaned_up: bool,
    }

    impl Application for Spinner {
        fn init(&mut self, _props: &EngineProperties, scene: &mut Scene) -> Result<Vec<ModelData>, EngineError> {
            scene.add_entity(Entity::new("spinner", "triangle", Vec3::new(0.0, 0.0, -2.0)));
            Ok(vec![ModelData {
                model_id: "triangle".into(),
                meshes: vec![MeshData {
                    positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                    indices: vec![0, 1, 2],
                    material_idx: 0,
                    ..MeshData::default()
                }],
                materials: vec![MaterialData::default()],
            }])
        }

        fn input(&mut self, events: &[InputEvent], _scene: &mut Scene, _delta: Duration) -> Result<(), EngineError> {
            for event in events {
                if let InputEvent::KeyPressed(key) = event {
                    self.keys.push(*key);
                }
            }
            Ok(())
        }

        fn update(&mut self, _scene: &mut Scene, _delta: Duration) -> Result<(), EngineError> {
            self.updates += 1;
            Ok(())
        }

        fn cleanup(&mut self) {
            self.cleaned_up = true;
        }
    }

    fn engine(frames: Vec<Vec<InputEvent>>) -> Engine<ScriptedWindow, Spinner, HeadlessDevice> {
        let window = ScriptedWindow { frames, size: (64, 48), polls: 0 };
        let images = MemoryImageSource::new()
            .with_image("resources/textures/default.png", ImageData::solid_color(1, 1, [255; 4]));
        Engine::with_image_source(
            EngineProperties::default(),
            window,
            HeadlessDevice::new(64, 48, 2),
            Box::new(images),
            Spinner::default(),
        )
        .unwrap()
    }

    #[test]
    fn runs_until_the_window_closes() {
        let mut engine = engine(vec![vec![InputEvent::KeyPressed(Key::W)], vec![], vec![]]);
        engine.run().unwrap();

        assert_eq!(engine.application().keys, vec![Key::W]);
        assert!(engine.application().cleaned_up);
        let device = engine.renderer().device();
        assert_eq!(device.presented().len(), 3);
        assert_eq!(device.draw_count(GEOMETRY_PASS), 3);
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());
        assert_eq!(device.resource_counts(), Default::default());
    }

    #[test]
    fn close_request_stops_before_rendering() {
        let mut engine = engine(vec![vec![], vec![InputEvent::CloseRequested], vec![]]);
        engine.run().unwrap();

        assert_eq!(engine.renderer().device().presented().len(), 1);
    }

    #[test]
    fn scene_changes_clear_after_each_presented_frame() {
        let mut engine = engine(vec![vec![]]);
        assert!(!engine.scene().changes().is_empty());
        engine.run().unwrap();
        assert!(engine.scene().changes().is_empty());
    }

    #[test]
    fn fatal_render_errors_shut_down_and_propagate() {
        let mut engine = engine(vec![vec![], vec![]]);
        engine.renderer.device_mut().inject_submit_failure(ash::vk::Result::ERROR_DEVICE_LOST);

        let err = engine.run().unwrap_err();

        assert!(matches!(err, EngineError::Render(RenderError::Api(_))));
        assert!(engine.application().cleaned_up);
        assert_eq!(engine.renderer().device().resource_counts(), Default::default());
    }
}
