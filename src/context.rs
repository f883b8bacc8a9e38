//! Frame pipeline controller.
//!
//! [`GraphicsContext`] owns the backend and sequences every frame:
//! `begin_frame` opens a recording session and moves the current back buffer
//! into the render-target state, the client draws, `end_frame` records the
//! overlay, transitions back to present source, submits synchronously and
//! presents. It also owns the structural operations that must respect the
//! fence: resize and shutdown.
//!
//! The context is an exclusively-owned object passed into the application's
//! main loop; there is no global GPU state. All access is confined to the
//! single control thread driving the loop.

use crate::backend::{BufferHandle, GpuBackend, BACK_BUFFER_COUNT};
use crate::error::GraphicsError;
use crate::overlay::OverlayRenderer;
use crate::surface::RenderSurface;

/// Context creation options.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Clear color applied to the back buffer each frame.
    pub clear_color: [f32; 4],
    /// Start with vertical sync enabled.
    pub vsync: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.1, 0.15, 1.0],
            vsync: true,
        }
    }
}

/// Owns the graphics backend and drives the double-buffered frame loop.
pub struct GraphicsContext<B: GpuBackend> {
    backend: B,
    clear_color: [f32; 4],
    vsync: bool,
    frame_open: bool,
    frames_presented: u64,
    destroyed: bool,
}

impl<B: GpuBackend> GraphicsContext<B> {
    /// Wrap an initialized backend. The backend arrives with its swapchain
    /// already created against the startup surface.
    pub fn new(backend: B, config: ContextConfig) -> Self {
        log::info!("graphics context ready on {} backend", backend.name());
        Self {
            backend,
            clear_color: config.clear_color,
            vsync: config.vsync,
            frame_open: false,
            frames_presented: 0,
            destroyed: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Whether presents wait for the vertical blank.
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Flip the vsync flag. Consulted by the next present; no GPU objects
    /// are recreated.
    pub fn toggle_vsync(&mut self) {
        self.vsync = !self.vsync;
        log::debug!("vsync {}", if self.vsync { "on" } else { "off" });
    }

    /// Frames successfully presented since creation.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Open a recording session and transition the current back buffer from
    /// present source to render target.
    pub fn begin_frame(&mut self) -> Result<(), GraphicsError> {
        if self.frame_open {
            return Err(GraphicsError::CommandListInFlight);
        }
        self.backend.begin_recording()?;
        self.backend.transition_to_render_target()?;
        self.frame_open = true;
        Ok(())
    }

    /// Clear and bind the render target, record the overlay, transition back
    /// to present source, submit and present.
    pub fn end_frame(
        &mut self,
        overlay: &mut dyn OverlayRenderer<B>,
    ) -> Result<(), GraphicsError> {
        if !self.frame_open {
            return Err(GraphicsError::NoFrameInProgress);
        }
        self.backend.clear_render_target(self.clear_color)?;
        overlay.record(&mut self.backend)?;
        self.backend.transition_to_present()?;
        self.backend.submit()?;
        // Secondary GUI surfaces render between the main submission and the
        // present of the primary surface.
        overlay.update_secondary_surfaces()?;
        self.backend.present(self.vsync)?;

        self.frame_open = false;
        self.frames_presented += 1;
        Ok(())
    }

    /// Signal-and-wait once per back buffer, guaranteeing no buffer is still
    /// referenced by an in-flight submission.
    pub fn flush(&mut self) -> Result<(), GraphicsError> {
        for _ in 0..BACK_BUFFER_COUNT {
            self.backend.signal_and_wait()?;
        }
        Ok(())
    }

    /// Resize the swapchain to the surface's current size.
    ///
    /// No-op returning `Ok(false)` when the surface size is unchanged. The
    /// order is strict: release every buffer reference, flush in-flight
    /// work, resize the chain, then re-acquire. Anything else is a
    /// use-after-free on the GPU timeline.
    pub fn resize(&mut self, surface: &mut dyn RenderSurface) -> Result<bool, GraphicsError> {
        if self.frame_open {
            return Err(GraphicsError::CommandListInFlight);
        }
        if !surface.refresh_extent() {
            return Ok(false);
        }
        let (width, height) = surface.extent();
        let (width, height) = (width.max(1), height.max(1));
        log::info!("resizing swapchain to {}x{}", width, height);

        self.backend.release_buffers();
        self.flush()?;
        self.backend.resize_buffers(width, height)?;
        surface.resize_finished();
        self.backend.acquire_buffers()?;
        Ok(true)
    }

    /// Copy static vertex data into device-local memory via a staging
    /// buffer. Startup-only; the copy is submitted synchronously.
    pub fn upload_vertices(&mut self, data: &[u8]) -> Result<BufferHandle, GraphicsError> {
        self.backend.upload_vertices(data)
    }

    /// Flush outstanding work and release every GPU object. Idempotent;
    /// also performed on drop.
    pub fn shutdown(&mut self) -> Result<(), GraphicsError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let flush_result = self.flush();
        self.backend.release_buffers();
        self.backend.destroy();
        log::info!(
            "graphics context shut down after {} frames",
            self.frames_presented
        );
        flush_result
    }
}

impl<B: GpuBackend> Drop for GraphicsContext<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("error during graphics teardown: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::overlay::NoOverlay;

    fn context() -> GraphicsContext<NullBackend> {
        let backend = NullBackend::new(1280, 720).unwrap();
        GraphicsContext::new(backend, ContextConfig::default())
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut ctx = context();
        ctx.begin_frame().unwrap();
        assert!(matches!(
            ctx.begin_frame(),
            Err(GraphicsError::CommandListInFlight)
        ));
    }

    #[test]
    fn test_end_without_begin_is_rejected() {
        let mut ctx = context();
        assert!(matches!(
            ctx.end_frame(&mut NoOverlay),
            Err(GraphicsError::NoFrameInProgress)
        ));
    }

    #[test]
    fn test_flush_signals_once_per_back_buffer() {
        let mut ctx = context();
        let before = ctx.backend().signaled_fence_value();
        ctx.flush().unwrap();
        assert_eq!(
            ctx.backend().signaled_fence_value(),
            before + BACK_BUFFER_COUNT as u64
        );
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut ctx = context();
        ctx.begin_frame().unwrap();
        ctx.end_frame(&mut NoOverlay).unwrap();
        ctx.upload_vertices(&[0u8; 64]).unwrap();
        assert!(ctx.backend().outstanding_handles() > 0);
        ctx.shutdown().unwrap();
        assert_eq!(ctx.backend().outstanding_handles(), 0);
    }
}
