//! GUI overlay integration.
//!
//! The immediate-mode GUI is an external collaborator: it consumes the open
//! command list and the overlay render surface the backend exposes, and it
//! owns no swapchain or synchronization state of its own.
//! `GraphicsContext::end_frame` records the overlay between the clear and
//! the present transition, then gives it a chance to update secondary
//! platform surfaces after the main submission.

#[cfg(feature = "vulkan-backend")]
pub mod egui_vulkan;

use crate::backend::GpuBackend;
use crate::error::GraphicsError;

/// Per-frame GUI overlay hook.
pub trait OverlayRenderer<B: GpuBackend> {
    /// Record the overlay's draw commands into the backend's open command
    /// list. The current back buffer is already cleared and bound.
    fn record(&mut self, backend: &mut B) -> Result<(), GraphicsError>;

    /// Update and render secondary platform surfaces (multi-viewport GUI).
    /// Runs after the main submission and before `present`.
    fn update_secondary_surfaces(&mut self) -> Result<(), GraphicsError> {
        Ok(())
    }
}

/// Overlay that draws nothing.
pub struct NoOverlay;

impl<B: GpuBackend> OverlayRenderer<B> for NoOverlay {
    fn record(&mut self, _backend: &mut B) -> Result<(), GraphicsError> {
        Ok(())
    }
}
