use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ash::vk;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

use labscenes::config_loader::{Backend, Config, ConfigFileLoader};
use labscenes::input_map::{InputMap, InputSource, Key};
use labscenes::scene::{kernels, DemoScene, Scene, SceneKind, SceneSettings};
use labscenes::time::Time;
use labscenes::vulkan::native::{NativeDevice, SwapchainSurface};
use labscenes::vulkan::{
    Context, HeadlessSurface, NamedShaders, ShaderSource, SoftwareDevice, SpirvDirectory,
    SurfaceError,
};

const CONFIG_PATH: &str = "config.json";
/// Frame step of the headless loop.
const HEADLESS_DELTA: Duration = Duration::from_nanos(16_666_667);

fn shader_source(config: &Config) -> Box<dyn ShaderSource> {
    match &config.shader_directory {
        Some(directory) => Box::new(SpirvDirectory::new(directory.clone())),
        None => Box::new(SpirvDirectory::compiled()),
    }
}

fn scene_settings(config: &Config) -> SceneSettings {
    SceneSettings {
        sph_particle_count: config.sph_particle_count as usize,
    }
}

// Rust will drop these fields in the order they are declared
struct LabScenes {
    scene: Option<DemoScene>,
    scene_kind: SceneKind,
    settings: SceneSettings,
    input_map: InputMap,
    time: Time,
    should_recreate_surface: bool,
    context: Arc<Context>,

    /// Application window
    window: Window,
}

impl LabScenes {
    pub fn new(event_loop: &EventLoop<()>, config: &Config) -> Result<Self> {
        let window = WindowBuilder::new()
            .with_title("Lab Scenes")
            .with_inner_size(PhysicalSize::new(
                config.window.width,
                config.window.height,
            ))
            .build(event_loop)?;

        let device = NativeDevice::new(&window)?;
        let window_size = window.inner_size();
        let surface = SwapchainSurface::new(
            &device,
            vk::Extent2D {
                width: window_size.width,
                height: window_size.height,
            },
            config.window.present_mode,
        )?;
        let context = Arc::new(Context::new(
            Box::new(device),
            Box::new(surface),
            shader_source(config),
        ));

        let settings = scene_settings(config);
        let scene = DemoScene::init(config.scene, &context, &settings)?;

        Ok(Self {
            scene: Some(scene),
            scene_kind: config.scene,
            settings,
            input_map: InputMap::new(),
            time: Time::new(),
            should_recreate_surface: false,
            context,
            window,
        })
    }

    pub fn main_loop(mut self, event_loop: EventLoop<()>) -> ! {
        event_loop.run(move |event, _, control_flow| {
            control_flow.set_poll();

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        control_flow.set_exit();
                    }
                    WindowEvent::Resized(_) => {
                        self.should_recreate_surface = true;
                    }
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                virtual_keycode: Some(virtual_keycode),
                                state,
                                ..
                            },
                        ..
                    } => {
                        if virtual_keycode == VirtualKeyCode::Escape
                            && state == ElementState::Pressed
                        {
                            control_flow.set_exit();
                        }
                        if let Some(key) = Key::from_virtual_key(virtual_keycode) {
                            match state {
                                ElementState::Pressed => self.input_map.update_key_press(key),
                                ElementState::Released => self.input_map.update_key_release(key),
                            }
                        }
                    }
                    _ => {}
                },
                Event::MainEventsCleared => {
                    self.window.request_redraw();
                }
                Event::RedrawRequested(_window_id) => {
                    if let Err(err) = self.draw_frame() {
                        log::error!("{err:#}");
                        control_flow.set_exit();
                    }
                }
                Event::LoopDestroyed => {
                    if let Some(scene) = &mut self.scene {
                        scene.cleanup();
                    }
                }
                _ => (),
            }
        });
    }

    /// Drops the current scene before building the next one, so their resources never overlap.
    fn switch_scene(&mut self, kind: SceneKind) -> Result<()> {
        if let Some(mut scene) = self.scene.take() {
            scene.cleanup();
        }
        self.scene = Some(DemoScene::init(kind, &self.context, &self.settings)?);
        self.scene_kind = kind;
        Ok(())
    }

    fn recreate_surface(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        if let Some(mut scene) = self.scene.take() {
            scene.cleanup();
        }
        self.context.surface().recreate(vk::Extent2D {
            width: size.width,
            height: size.height,
        })?;
        self.should_recreate_surface = false;
        // Scenes size their images and pipelines by the surface
        self.switch_scene(self.scene_kind)
    }

    fn draw_frame(&mut self) -> Result<()> {
        let window_size = self.window.inner_size();
        if window_size.width == 0 || window_size.height == 0 {
            return Ok(());
        }
        if self.should_recreate_surface {
            self.recreate_surface(window_size)?;
        }

        self.time.update();
        if self.input_map.was_pressed(Key::Tab) {
            self.switch_scene(self.scene_kind.next())?;
        }
        let Some(scene) = self.scene.as_mut() else {
            return Ok(());
        };

        let surface = self.context.surface();
        let frame = match surface.acquire_next_frame() {
            Ok(frame) => frame,
            Err(SurfaceError::OutOfDate) => {
                self.should_recreate_surface = true;
                self.input_map.advance();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        scene.update(&self.input_map, &self.time)?;
        scene.render(&frame);
        self.input_map.advance();

        match surface.present(&frame) {
            Ok(()) => Ok(()),
            Err(SurfaceError::OutOfDate) => {
                self.should_recreate_surface = true;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Runs the configured scene on the CPU device for a fixed number of frames.
fn run_headless(config: &Config) -> Result<()> {
    let device = SoftwareDevice::new();
    kernels::register_all(&device);
    let surface = HeadlessSurface::new(
        &device,
        config.window.extent(),
        3,
        vk::Format::R8G8B8A8_UNORM,
    )?;
    let context = Arc::new(Context::new(
        Box::new(device.clone()),
        Box::new(surface),
        Box::new(NamedShaders::any()),
    ));

    let mut scene = DemoScene::init(config.scene, &context, &scene_settings(config))?;
    let input_map = InputMap::new();
    let mut time = Time::new();
    for _ in 0..config.headless_frames {
        time.advance(HEADLESS_DELTA);
        let frame = context.surface().acquire_next_frame()?;
        scene.update(&input_map, &time)?;
        scene.render(&frame);
        context.surface().present(&frame)?;
    }
    scene.cleanup();

    log::info!(
        "Rendered {} frames of {:?}: {:?}",
        config.headless_frames,
        scene.kind(),
        device.stats()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config_loader = ConfigFileLoader::new(CONFIG_PATH);
    let config = config_loader.load_config()?.clone();

    match config.backend {
        Backend::Software => run_headless(&config),
        Backend::Vulkan => {
            let event_loop = EventLoop::new();
            let app = LabScenes::new(&event_loop, &config)?;
            app.main_loop(event_loop)
        }
    }
}
