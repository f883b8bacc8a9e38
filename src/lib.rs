//! # Ember Graphics
//!
//! GPU rendering core for the Ember editor. This crate owns the graphics
//! device, command submission, swapchain presentation and CPU/GPU
//! synchronization for a double-buffered real-time frame loop.
//!
//! ## Overview
//!
//! - [`GraphicsContext`] - frame pipeline controller and lifecycle owner
//! - [`GpuBackend`] - trait seam between the controller and the GPU API;
//!   the Vulkan backend is behind the `vulkan-backend` feature, the
//!   [`NullBackend`] models the contract without hardware
//! - [`RenderSurface`] - seam to the windowing collaborator
//! - [`OverlayRenderer`] - seam to the immediate-mode GUI overlay
//!
//! ## Example
//!
//! ```
//! use ember_graphics::{ContextConfig, GraphicsContext, NoOverlay, NullBackend};
//!
//! let backend = NullBackend::new(1920, 1080).unwrap();
//! let mut ctx = GraphicsContext::new(backend, ContextConfig::default());
//!
//! ctx.begin_frame().unwrap();
//! // client draw/update
//! ctx.end_frame(&mut NoOverlay).unwrap();
//! ```
//!
//! Submission is deliberately synchronous: every submit performs a
//! signal-and-wait on the frame fence, trading GPU pipelining for a frame
//! loop that can never overrun its single command allocator. The context
//! and everything it owns are confined to the one control thread driving
//! the loop.

pub mod backend;
pub mod context;
pub mod error;
pub mod overlay;
pub mod surface;

pub use backend::null::NullBackend;
pub use backend::{BufferHandle, GpuBackend, ViewHandle, BACK_BUFFER_COUNT, FENCE_TIMEOUT};
pub use context::{ContextConfig, GraphicsContext};
pub use error::GraphicsError;
pub use overlay::{NoOverlay, OverlayRenderer};
pub use surface::RenderSurface;

#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanBackend;
#[cfg(feature = "vulkan-backend")]
pub use overlay::egui_vulkan::EguiOverlay;

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_null_backend_name() {
        let backend = NullBackend::new(320, 240).unwrap();
        assert_eq!(backend.name(), "Null");
    }
}
