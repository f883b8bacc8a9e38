//! egui overlay for the Vulkan backend, via egui-ash-renderer.

use std::sync::{Arc, Mutex};

use egui_ash_renderer::{Options, Renderer};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use winit::event::WindowEvent;
use winit::window::Window;

use crate::backend::vulkan::VulkanBackend;
use crate::error::GraphicsError;
use crate::overlay::OverlayRenderer;

/// egui integration driven by the frame pipeline.
///
/// Input handling and UI building happen outside the frame loop
/// ([`Self::on_window_event`], [`Self::begin_ui`], [`Self::end_ui`]); the
/// [`OverlayRenderer`] impl then records the tessellated output into the
/// backend's open render pass during `end_frame`.
pub struct EguiOverlay {
    ctx: egui::Context,
    winit_state: egui_winit::State,
    /// Must be dropped before the allocator.
    renderer: Option<Renderer>,
    /// Separate allocator over cloned device handles; egui-ash-renderer
    /// requires a `std::sync::Mutex`. Must be dropped while the backend's
    /// device is still alive, which is what [`Self::destroy`] guarantees.
    allocator: Option<Arc<Mutex<Allocator>>>,
    paint_jobs: Vec<egui::ClippedPrimitive>,
    textures_delta: egui::TexturesDelta,
}

impl EguiOverlay {
    pub fn new(backend: &VulkanBackend, window: &Window) -> Result<Self, GraphicsError> {
        let ctx = egui::Context::default();

        let winit_state = egui_winit::State::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            window.theme(),
            None,
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: backend.instance().clone(),
            device: backend.device().clone(),
            physical_device: backend.physical_device(),
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to create overlay allocator: {}",
                e
            ))
        })?;
        let allocator = Arc::new(Mutex::new(allocator));

        let renderer = Renderer::with_gpu_allocator(
            allocator.clone(),
            backend.device().clone(),
            backend.overlay_render_pass(),
            Options {
                srgb_framebuffer: true,
                ..Default::default()
            },
        )
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to create overlay renderer: {}",
                e
            ))
        })?;

        Ok(Self {
            ctx,
            winit_state,
            renderer: Some(renderer),
            allocator: Some(allocator),
            paint_jobs: Vec::new(),
            textures_delta: egui::TexturesDelta::default(),
        })
    }

    /// Release GPU resources. Must be called while the backend's device is
    /// still alive, i.e. before the context shuts down.
    pub fn destroy(&mut self, backend: &VulkanBackend) {
        unsafe {
            let _ = backend.device().device_wait_idle();
        }
        // Renderer holds allocations; it goes first.
        self.renderer = None;
        self.allocator = None;
    }

    pub fn context(&self) -> &egui::Context {
        &self.ctx
    }

    /// Feed a window event to egui. Returns true when egui consumed it.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    /// Start collecting UI for this frame. Build widgets against
    /// [`Self::context`] between this and [`Self::end_ui`].
    pub fn begin_ui(&mut self, window: &Window) {
        let raw_input = self.winit_state.take_egui_input(window);
        self.ctx.begin_pass(raw_input);
    }

    /// Finish the UI pass and tessellate it for the next `record`.
    pub fn end_ui(&mut self, window: &Window) {
        let full_output = self.ctx.end_pass();
        self.winit_state
            .handle_platform_output(window, full_output.platform_output);
        self.paint_jobs = self
            .ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);
        self.textures_delta = full_output.textures_delta;
    }
}

impl OverlayRenderer<VulkanBackend> for EguiOverlay {
    fn record(&mut self, backend: &mut VulkanBackend) -> Result<(), GraphicsError> {
        let renderer = match self.renderer.as_mut() {
            Some(renderer) => renderer,
            None => return Ok(()),
        };

        let set_textures: Vec<_> = self.textures_delta.set.drain(..).collect();
        renderer
            .set_textures(
                backend.graphics_queue(),
                backend.command_pool(),
                &set_textures,
            )
            .map_err(|e| {
                GraphicsError::ResourceCreationFailed(format!(
                    "Failed to update overlay textures: {}",
                    e
                ))
            })?;

        let (width, height) = backend.surface_extent();
        renderer
            .cmd_draw(
                backend.command_buffer(),
                ash::vk::Extent2D { width, height },
                self.ctx.pixels_per_point(),
                &self.paint_jobs,
            )
            .map_err(|e| GraphicsError::Internal(format!("Failed to draw overlay: {}", e)))?;

        let free_textures: Vec<_> = self.textures_delta.free.drain(..).collect();
        renderer.free_textures(&free_textures).map_err(|e| {
            GraphicsError::Internal(format!("Failed to free overlay textures: {}", e))
        })?;

        Ok(())
    }
}

impl Drop for EguiOverlay {
    fn drop(&mut self) {
        if self.renderer.is_some() || self.allocator.is_some() {
            log::warn!("EguiOverlay dropped without destroy(); GPU resources may leak");
        }
    }
}
