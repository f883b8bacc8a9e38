//! Surface abstraction for the windowing collaborator.
//!
//! The windowing layer owns the platform window and its message pump; the
//! graphics core only reads the surface's pixel size and acknowledges
//! resizes. The Vulkan backend additionally requires the raw display/window
//! handles at creation time, via the `raw-window-handle` traits.

/// A presentable surface owned by the windowing layer.
///
/// The core polls [`needs_resize`](RenderSurface::needs_resize) once per
/// frame before `begin_frame` and, when a resize is performed, signals
/// completion back through [`resize_finished`](RenderSurface::resize_finished)
/// so the owner can clear its pending-resize flag.
pub trait RenderSurface {
    /// Current size in pixels.
    fn extent(&self) -> (u32, u32);

    /// Whether the platform reported a size change since the last resize.
    fn needs_resize(&self) -> bool;

    /// Re-read the platform client area and update the cached extent.
    ///
    /// Returns `true` only if the pixel size actually changed; an unchanged
    /// size clears the pending flag and returns `false`, making resize
    /// idempotent.
    fn refresh_extent(&mut self) -> bool;

    /// Called by the core after the swapchain has been resized.
    fn resize_finished(&mut self);
}
