//! GPU backend abstraction layer.
//!
//! The frame pipeline controller in [`crate::context`] drives backends
//! through the [`GpuBackend`] trait. Two implementations exist:
//!
//! - [`null::NullBackend`]: no-op backend that models the fence counter,
//!   back-buffer ring and ordering rules deterministically, for tests and
//!   headless development
//! - `vulkan::VulkanBackend` (feature `vulkan-backend`): native Vulkan via
//!   ash

pub mod null;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::time::Duration;

use crate::error::GraphicsError;

/// Number of presentable back buffers (double buffering).
pub const BACK_BUFFER_COUNT: usize = 2;

/// Bounded wait applied to every fence wait. A wait exceeding this is
/// treated as a hung GPU or driver and reported as a fatal error.
pub const FENCE_TIMEOUT: Duration = Duration::from_secs(20);

/// Handle to a device-local GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a back-buffer render-target view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewHandle(pub(crate) u64);

/// Graphics backend trait.
///
/// One command list, one queue, one fence: submission is synchronous from
/// the CPU's perspective and only one recording is ever in flight. The
/// caller (the frame pipeline controller) is responsible for sequencing;
/// implementations check the sequencing rules and report violations as
/// fatal errors rather than corrupting the GPU timeline.
pub trait GpuBackend {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    // Command submission unit

    /// Reset the allocator/list pair and open a recording session.
    ///
    /// Also determines the back buffer targeted by this frame. Fails with
    /// [`GraphicsError::CommandListInFlight`] if a session is already open.
    fn begin_recording(&mut self) -> Result<(), GraphicsError>;

    /// Whether a recording session is currently open.
    fn is_recording(&self) -> bool;

    /// Close the list, enqueue it, and block until the GPU has executed it.
    fn submit(&mut self) -> Result<(), GraphicsError>;

    // Fence synchronizer

    /// Increment the fence counter, ask the queue to signal it, and block
    /// until signaled or [`FENCE_TIMEOUT`] elapses.
    fn signal_and_wait(&mut self) -> Result<(), GraphicsError>;

    /// Last value the fence was asked to signal.
    fn signaled_fence_value(&self) -> u64;

    /// Last value observed as completed by the GPU.
    fn completed_fence_value(&self) -> u64;

    // Swap chain

    /// Drop all back-buffer references and views. First step of the resize
    /// protocol; must precede the flush and the buffer resize.
    fn release_buffers(&mut self);

    /// Resize the underlying chain. All buffers must have been released and
    /// in-flight work flushed beforehand; implementations verify this.
    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), GraphicsError>;

    /// Re-acquire the back buffers and rebuild their views.
    fn acquire_buffers(&mut self) -> Result<(), GraphicsError>;

    /// Index of the buffer the next/current frame renders into. Always in
    /// `[0, BACK_BUFFER_COUNT)`.
    fn back_buffer_index(&self) -> usize;

    /// View handle for the given buffer slot, if acquired.
    fn back_buffer_view(&self, index: usize) -> Option<ViewHandle>;

    // Frame pipeline operations, recorded into the open command list

    /// Transition the current back buffer from present source to render
    /// target. Must precede any draw or clear targeting that buffer.
    fn transition_to_render_target(&mut self) -> Result<(), GraphicsError>;

    /// Clear the current back buffer and bind it for overlay rendering.
    fn clear_render_target(&mut self, color: [f32; 4]) -> Result<(), GraphicsError>;

    /// Record the inverse transition, render target back to present source.
    fn transition_to_present(&mut self) -> Result<(), GraphicsError>;

    /// Present the current back buffer. `vsync` selects the sync interval
    /// (1 = wait for vertical blank, 0 = immediate, tearing when supported).
    fn present(&mut self, vsync: bool) -> Result<(), GraphicsError>;

    // Upload/static resource staging

    /// One-shot startup helper: stage `data` through a CPU-visible upload
    /// buffer and copy it into a device-local vertex buffer, synchronously.
    fn upload_vertices(&mut self, data: &[u8]) -> Result<BufferHandle, GraphicsError>;

    /// Number of live GPU object handles owned by the backend.
    fn outstanding_handles(&self) -> usize;

    /// Release every GPU object. Idempotent; called by the context during
    /// shutdown after the final flush.
    fn destroy(&mut self);
}
