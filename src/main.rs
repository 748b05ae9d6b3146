// =============================================================================
// MINI RENDERER - textured geometry from an asset archive
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, resize, redraw)                      │
// │    └── Renderer                                                 │
// │          └── Vulkan Device + Swapchain + Pipeline               │
// │                └── Frame slots (command buffer, sync, uniforms) │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for this slot's fence
// 2. Acquire swapchain image
// 3. Record commands and write the transform block
// 4. Submit, signalling "render finished"
// 5. Present, rebuilding the swapchain when it went stale
//
// =============================================================================

use anyhow::{Context, Result};
use mini_renderer::assets::AssetArchive;
use mini_renderer::backend::shader::ShaderPair;
use mini_renderer::backend::{FrameStatus, PresentationTarget, Renderer, RendererSettings, Scene};
use mini_renderer::config::{Config, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // First argument overrides the config path
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load_or_default(&config_path);

    init_logging(&config);
    log::info!("Starting mini renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let scene = load_scene(&config)?;

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, scene);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `debug.log_level` sets the default, `RUST_LOG` still wins
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_filter())
        .parse_default_env()
        .init();
}

/// Shaders plus the texture and mesh named in the config
fn load_scene(config: &Config) -> Result<Scene> {
    let assets = &config.assets;

    let shaders = ShaderPair::load(&assets.vertex_shader, &assets.fragment_shader)
        .context("Failed to load shaders")?;

    // Nothing named means nothing to read
    let archive = if assets.texture.is_some() || assets.model.is_some() {
        let archive = AssetArchive::load(&assets.archive, assets.archive_version)
            .with_context(|| format!("Failed to load asset archive {:?}", assets.archive))?;
        log::info!(
            "Loaded {:?} ({:?}): {} textures, {} models",
            assets.archive,
            assets.archive_version,
            archive.textures.len(),
            archive.models.len()
        );
        archive
    } else {
        AssetArchive::default()
    };

    let scene = Scene::from_archive(
        &archive,
        assets.texture.as_deref(),
        assets.model.as_deref(),
        shaders,
    )?;

    log::info!(
        "Scene: texture '{}' ({}x{}, {} mip levels), {} vertices, {} indices",
        scene.texture.name,
        scene.texture.width,
        scene.texture.height,
        scene.texture.mip_levels,
        scene.mesh.vertices.len(),
        scene.mesh.indices.len()
    );

    Ok(scene)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    scene: Scene,

    // ─────────────────────────────────────────────────────────────────────────
    // GPU + WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    /// Declared before `window` so it drops first
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Drawable size is zero; nothing can be presented
    is_minimized: bool,
    /// First fatal error; turned into the process exit status
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config, scene: Scene) -> Self {
        Self {
            config,
            scene,
            renderer: None,
            window: None,
            is_minimized: false,
            failure: None,
        }
    }

    fn init_renderer(&mut self, window: Arc<Window>) -> Result<Renderer> {
        let settings = RendererSettings {
            app_name: self.config.window.title.clone(),
            enable_validation: self.config.debug.validation_layers,
            clear_color: self.config.graphics.clear_color,
        };

        let target: Arc<dyn PresentationTarget> = window;
        let renderer = Renderer::new(target, &settings, &self.scene)
            .context("Failed to initialize renderer")?;

        let extent = renderer.extent();
        log::info!("Rendering at {}x{}", extent.width, extent.height);
        Ok(renderer)
    }

    fn render_frame(&mut self) -> Result<()> {
        if self.is_minimized {
            return Ok(());
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        match renderer.draw_frame() {
            Ok(FrameStatus::Presented) => {}
            Ok(FrameStatus::SwapchainRecreated) => {
                let extent = renderer.extent();
                log::debug!("Swapchain now {}x{}", extent.width, extent.height);
            }
            Ok(FrameStatus::Skipped) => log::debug!("Frame skipped, swapchain out of date"),
            Err(e) if !e.is_fatal() => log::warn!("Frame dropped: {}", e),
            Err(e) => return Err(e).context("Rendering failed"),
        }

        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::from(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(window.clone()) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    if let Some(renderer) = self.renderer.as_mut() {
                        renderer.request_resize();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing while the event loop is idle
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            log::info!("Submitted {} frames", renderer.frames_submitted());
            drop(renderer);
        }
    }
}
