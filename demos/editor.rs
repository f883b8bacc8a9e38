//! Minimal editor shell: a window, the Vulkan frame loop and an egui
//! overlay with a couple of live controls.
//!
//! Press V to toggle vsync (tearing only appears when the surface supports
//! immediate presents). Close the window to exit.
//!
//! ```bash
//! cargo run --example editor
//! ```

use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use ember_graphics::{
    ContextConfig, EguiOverlay, GraphicsContext, GraphicsError, RenderSurface, VulkanBackend,
};

const INITIAL_SIZE: (u32, u32) = (1280, 720);

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 4],
}

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0, 1.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0, 1.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0, 1.0],
    },
];

/// Adapter between winit's resize events and the graphics core. Resizes
/// are latched here and picked up once per frame by `GraphicsContext::resize`.
struct WindowSurface {
    size: (u32, u32),
    pending: Option<(u32, u32)>,
}

impl WindowSurface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            pending: None,
        }
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.pending = Some((width, height));
    }
}

impl RenderSurface for WindowSurface {
    fn extent(&self) -> (u32, u32) {
        self.size
    }

    fn needs_resize(&self) -> bool {
        self.pending.is_some()
    }

    fn refresh_extent(&mut self) -> bool {
        match self.pending.take() {
            Some(next) if next != self.size => {
                self.size = next;
                true
            }
            _ => false,
        }
    }

    fn resize_finished(&mut self) {
        log::debug!("window acknowledged resize to {}x{}", self.size.0, self.size.1);
    }
}

struct EditorApp {
    window: Option<Window>,
    surface: WindowSurface,
    ctx: Option<GraphicsContext<VulkanBackend>>,
    overlay: Option<EguiOverlay>,
    last_frame: Instant,
    frame_time_ms: f32,
}

impl EditorApp {
    fn new() -> Self {
        Self {
            window: None,
            surface: WindowSurface::new(INITIAL_SIZE.0, INITIAL_SIZE.1),
            ctx: None,
            overlay: None,
            last_frame: Instant::now(),
            frame_time_ms: 0.0,
        }
    }

    fn init_graphics(&mut self) -> Result<(), GraphicsError> {
        let window = self.window.as_ref().ok_or_else(|| {
            GraphicsError::InitializationFailed("no window to render to".into())
        })?;

        let size = window.inner_size();
        self.surface = WindowSurface::new(size.width.max(1), size.height.max(1));

        let backend = VulkanBackend::new(window, self.surface.size.0, self.surface.size.1, true)?;
        let mut ctx = GraphicsContext::new(backend, ContextConfig::default());
        let overlay = EguiOverlay::new(ctx.backend(), window)?;

        // Static geometry goes up once, before the first frame.
        let vertices = ctx.upload_vertices(bytemuck::cast_slice(&TRIANGLE))?;
        log::info!("uploaded demo triangle as {:?}", vertices);

        self.ctx = Some(ctx);
        self.overlay = Some(overlay);
        Ok(())
    }

    fn render_frame(&mut self) -> Result<(), GraphicsError> {
        let (Some(window), Some(ctx), Some(overlay)) =
            (&self.window, &mut self.ctx, &mut self.overlay)
        else {
            return Ok(());
        };

        ctx.resize(&mut self.surface)?;

        let now = Instant::now();
        self.frame_time_ms = now.duration_since(self.last_frame).as_secs_f32() * 1000.0;
        self.last_frame = now;

        overlay.begin_ui(window);
        let egui_ctx = overlay.context().clone();
        egui::Window::new("Editor")
            .default_pos([16.0, 16.0])
            .show(&egui_ctx, |ui| {
                ui.label(format!("Frame time: {:.2} ms", self.frame_time_ms));
                ui.label(format!("Frames presented: {}", ctx.frames_presented()));
                ui.label(format!(
                    "VSync: {} (press V to toggle)",
                    if ctx.vsync() { "on" } else { "off" }
                ));
            });
        overlay.end_ui(window);

        ctx.begin_frame()?;
        ctx.end_frame(overlay)?;
        Ok(())
    }

    fn teardown(&mut self) {
        // The overlay borrows the backend's device; destroy it first.
        if let (Some(overlay), Some(ctx)) = (&mut self.overlay, &self.ctx) {
            overlay.destroy(ctx.backend());
        }
        self.overlay = None;
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(err) = ctx.shutdown() {
                log::error!("error during shutdown: {}", err);
            }
        }
    }
}

impl ApplicationHandler for EditorApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("Ember Editor")
            .with_inner_size(winit::dpi::LogicalSize::new(
                INITIAL_SIZE.0,
                INITIAL_SIZE.1,
            ));

        match event_loop.create_window(attributes) {
            Ok(window) => {
                self.window = Some(window);
                if let Err(err) = self.init_graphics() {
                    log::error!("graphics initialization failed: {}", err);
                    event_loop.exit();
                }
            }
            Err(err) => {
                log::error!("window creation failed: {}", err);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let (Some(window), Some(overlay)) = (&self.window, &mut self.overlay) {
            if overlay.on_window_event(window, &event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                self.teardown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.surface.set_size(size.width.max(1), size.height.max(1));
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyV),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(ctx) = &mut self.ctx {
                    ctx.toggle_vsync();
                }
            }
            WindowEvent::RedrawRequested => {
                match self.render_frame() {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => {
                        log::error!("fatal frame error: {}", err);
                        self.teardown();
                        event_loop.exit();
                        return;
                    }
                    Err(err) => {
                        log::warn!("frame error: {}", err);
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            log::error!("failed to create event loop: {}", err);
            std::process::exit(1);
        }
    };

    let mut app = EditorApp::new();
    if let Err(err) = event_loop.run_app(&mut app) {
        log::error!("event loop error: {}", err);
        std::process::exit(1);
    }
}
