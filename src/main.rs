// =============================================================================
// VULKAN TRIANGLE RENDERER
// =============================================================================
//
// Opens a fixed-size window and draws one triangle every frame until the
// window is closed.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Renderer                                                 │
// │          └── Instance + Surface + Device                        │
// │                └── PresentationChain + RenderPass + Pipeline    │
// │                      └── FrameExecutor (one frame in flight)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the previous frame's fence
// 2. Acquire swapchain image
// 3. Record the command buffer for that image
// 4. Submit to the graphics queue
// 5. Present on the present queue
//
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use ash::vk;
use backend::{DeviceRequirements, InitError, InstanceConfig, Renderer, RendererConfig, ShaderCode};
use config::Config;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, config_error) = Config::load_or_default(CONFIG_PATH);

    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e);
    }
    log::info!("Starting triangle renderer");
    log::info!(
        "Window: {}x{} \"{}\"",
        config.window.width,
        config.window.height,
        config.window.title
    );
    log::info!("Preferred present mode: {}", config.graphics.present_mode);

    // Shaders are read before any window or GPU object exists
    let vertex = ShaderCode::load(&config.shaders.vertex).context("Failed to load vertex shader")?;
    let fragment =
        ShaderCode::load(&config.shaders.fragment).context("Failed to load fragment shader")?;

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, vertex, fragment);
    event_loop.run_app(&mut app)?;

    // Any fatal error ends the process with a non-zero status
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Level comes from config; RUST_LOG overrides it
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer must go before the
/// window its surface was created for.
struct App {
    config: Config,
    vertex: ShaderCode,
    fragment: ShaderCode,

    renderer: Option<Renderer>,
    window: Option<Window>,

    /// First unrecoverable error, reported after the event loop returns
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config, vertex: ShaderCode, fragment: ShaderCode) -> Self {
        Self {
            config,
            vertex,
            fragment,
            renderer: None,
            window: None,
            fatal: None,
        }
    }

    fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            instance: InstanceConfig {
                app_name: self.config.window.title.clone(),
                enable_validation: self.config.validation_enabled(),
            },
            device: DeviceRequirements::default(),
            preferred_present_mode: self.config.preferred_present_mode(),
            clear_color: self.config.graphics.clear_color,
        }
    }

    fn init_renderer(&self, window: &Window) -> Result<Renderer, InitError> {
        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        Renderer::new(
            window,
            extent,
            &self.renderer_config(),
            &self.vertex,
            &self.fragment,
        )
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        // Dropping the renderer waits for the GPU before releasing anything
        self.renderer = None;
        event_loop.exit();
    }

    fn close(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            if let Err(e) = renderer.shutdown() {
                self.fail(event_loop, anyhow::Error::new(e).context("Shutdown failed"));
                return;
            }
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // The swapchain is never recreated, so the size is fixed
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => {
                log::info!("Vulkan initialized successfully!");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                if let InitError::Resource(resource) = &e {
                    log::error!("Driver status: {:?}", resource.status());
                }
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to initialize Vulkan"));
            }
        }
    }

    /// Handle window events.
    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close(event_loop);
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                if let Err(e) = renderer.draw_frame() {
                    self.fail(event_loop, anyhow::Error::new(e).context("Frame loop failed"));
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.close(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
