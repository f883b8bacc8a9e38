//! Null GPU backend for testing and headless development.
//!
//! Performs no GPU work but models the parts of the contract the frame
//! pipeline controller depends on: the monotonic fence counter, the
//! back-buffer ring and its view handles, and the ordering rules of the
//! resize protocol. Violations that would be use-after-free or timeline
//! corruption on a real device are reported as fatal errors here, which
//! lets the tests assert them directly.

use crate::error::GraphicsError;

use super::{BufferHandle, GpuBackend, ViewHandle, BACK_BUFFER_COUNT};

/// One recorded `present` call.
#[derive(Debug, Clone, Copy)]
pub struct PresentRecord {
    /// Back-buffer slot the present targeted.
    pub buffer_index: usize,
    /// View handle of that slot at present time.
    pub view: ViewHandle,
    /// Sync interval derived from the vsync flag (1 = vblank, 0 = immediate).
    pub sync_interval: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetState {
    Present,
    RenderTarget,
}

/// Null GPU backend.
#[derive(Debug)]
pub struct NullBackend {
    extent: (u32, u32),
    recording: bool,
    target_state: TargetState,
    fence_value: u64,
    completed_value: u64,
    buffers: [Option<ViewHandle>; BACK_BUFFER_COUNT],
    buffer_index: usize,
    next_view_id: u64,
    vertex_buffers: Vec<BufferHandle>,
    next_buffer_id: u64,
    resize_count: u64,
    release_fence: Option<u64>,
    presents: Vec<PresentRecord>,
    destroyed: bool,
}

impl NullBackend {
    /// Create a null backend with a simulated swapchain of the given size.
    pub fn new(width: u32, height: u32) -> Result<Self, GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::SwapchainCreationFailed(format!(
                "surface size {}x{} is below the 1x1 minimum",
                width, height
            )));
        }

        let mut backend = Self {
            extent: (width, height),
            recording: false,
            target_state: TargetState::Present,
            fence_value: 0,
            completed_value: 0,
            buffers: [None; BACK_BUFFER_COUNT],
            buffer_index: 0,
            next_view_id: 1,
            vertex_buffers: Vec::new(),
            next_buffer_id: 1,
            resize_count: 0,
            release_fence: None,
            presents: Vec::new(),
            destroyed: false,
        };
        backend.acquire_buffers()?;

        log::info!("NullBackend: created {}x{} swapchain", width, height);
        Ok(backend)
    }

    /// Current simulated surface size.
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// How many times the underlying chain was resized.
    pub fn resize_count(&self) -> u64 {
        self.resize_count
    }

    /// Every `present` call in order.
    pub fn presents(&self) -> &[PresentRecord] {
        &self.presents
    }
}

impl GpuBackend for NullBackend {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn begin_recording(&mut self) -> Result<(), GraphicsError> {
        if self.recording {
            return Err(GraphicsError::CommandListInFlight);
        }
        if self.buffers.iter().any(Option::is_none) {
            return Err(GraphicsError::Internal(
                "begin_recording with unacquired back buffers".into(),
            ));
        }
        self.recording = true;
        log::trace!("NullBackend: recording into buffer {}", self.buffer_index);
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn submit(&mut self) -> Result<(), GraphicsError> {
        if !self.recording {
            return Err(GraphicsError::SubmitFailed(
                "no recording session is open".into(),
            ));
        }
        self.recording = false;
        self.signal_and_wait()
    }

    fn signal_and_wait(&mut self) -> Result<(), GraphicsError> {
        self.fence_value += 1;
        // No GPU: the signal completes immediately.
        self.completed_value = self.fence_value;
        Ok(())
    }

    fn signaled_fence_value(&self) -> u64 {
        self.fence_value
    }

    fn completed_fence_value(&self) -> u64 {
        self.completed_value
    }

    fn release_buffers(&mut self) {
        for slot in &mut self.buffers {
            *slot = None;
        }
        self.release_fence = Some(self.fence_value);
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        if self.buffers.iter().any(Option::is_some) {
            return Err(GraphicsError::Internal(
                "resize_buffers with live back-buffer references".into(),
            ));
        }
        match self.release_fence {
            Some(released_at)
                if self.fence_value >= released_at + BACK_BUFFER_COUNT as u64 => {}
            _ => {
                return Err(GraphicsError::Internal(
                    "resize_buffers before in-flight work was flushed".into(),
                ));
            }
        }
        if width == 0 || height == 0 {
            return Err(GraphicsError::SwapchainCreationFailed(format!(
                "resize to {}x{} is below the 1x1 minimum",
                width, height
            )));
        }

        self.extent = (width, height);
        self.buffer_index = 0;
        self.resize_count += 1;
        log::debug!("NullBackend: resized chain to {}x{}", width, height);
        Ok(())
    }

    fn acquire_buffers(&mut self) -> Result<(), GraphicsError> {
        if self.buffers.iter().any(Option::is_some) {
            return Err(GraphicsError::Internal(
                "acquire_buffers while views are still held".into(),
            ));
        }
        for slot in &mut self.buffers {
            *slot = Some(ViewHandle(self.next_view_id));
            self.next_view_id += 1;
        }
        Ok(())
    }

    fn back_buffer_index(&self) -> usize {
        self.buffer_index
    }

    fn back_buffer_view(&self, index: usize) -> Option<ViewHandle> {
        self.buffers.get(index).copied().flatten()
    }

    fn transition_to_render_target(&mut self) -> Result<(), GraphicsError> {
        if !self.recording {
            return Err(GraphicsError::Internal(
                "barrier recorded outside a recording session".into(),
            ));
        }
        if self.target_state != TargetState::Present {
            return Err(GraphicsError::Internal(
                "buffer is not in the present-source state".into(),
            ));
        }
        self.target_state = TargetState::RenderTarget;
        Ok(())
    }

    fn clear_render_target(&mut self, _color: [f32; 4]) -> Result<(), GraphicsError> {
        if !self.recording || self.target_state != TargetState::RenderTarget {
            return Err(GraphicsError::Internal(
                "clear recorded before the render-target transition".into(),
            ));
        }
        Ok(())
    }

    fn transition_to_present(&mut self) -> Result<(), GraphicsError> {
        if !self.recording || self.target_state != TargetState::RenderTarget {
            return Err(GraphicsError::Internal(
                "buffer is not in the render-target state".into(),
            ));
        }
        self.target_state = TargetState::Present;
        Ok(())
    }

    fn present(&mut self, vsync: bool) -> Result<(), GraphicsError> {
        if self.recording {
            return Err(GraphicsError::PresentFailed(
                "present before the command list was submitted".into(),
            ));
        }
        if self.target_state != TargetState::Present {
            return Err(GraphicsError::PresentFailed(
                "buffer was not transitioned back to present source".into(),
            ));
        }
        let view = self.buffers[self.buffer_index].ok_or_else(|| {
            GraphicsError::PresentFailed("present with released back buffers".into())
        })?;

        self.presents.push(PresentRecord {
            buffer_index: self.buffer_index,
            view,
            sync_interval: if vsync { 1 } else { 0 },
        });
        self.buffer_index = (self.buffer_index + 1) % BACK_BUFFER_COUNT;
        Ok(())
    }

    fn upload_vertices(&mut self, data: &[u8]) -> Result<BufferHandle, GraphicsError> {
        if data.is_empty() {
            return Err(GraphicsError::ResourceCreationFailed(
                "vertex upload with no data".into(),
            ));
        }
        // Staging buffer lives only for the duration of the copy; the
        // synchronous submit retires it before this returns.
        self.signal_and_wait()?;

        let handle = BufferHandle(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.vertex_buffers.push(handle);
        log::trace!("NullBackend: uploaded {} vertex bytes", data.len());
        Ok(handle)
    }

    fn outstanding_handles(&self) -> usize {
        self.buffers.iter().filter(|slot| slot.is_some()).count() + self.vertex_buffers.len()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.release_buffers();
        self.vertex_buffers.clear();
        self.destroyed = true;
        log::info!("NullBackend: destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_sized_surface() {
        let err = NullBackend::new(0, 600).unwrap_err();
        assert!(matches!(err, GraphicsError::SwapchainCreationFailed(_)));
        // Startup failures are recoverable: the caller aborts cleanly
        // instead of tearing the process down.
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_double_begin_is_fatal() {
        let mut backend = NullBackend::new(640, 480).unwrap();
        backend.begin_recording().unwrap();
        let err = backend.begin_recording().unwrap_err();
        assert!(matches!(err, GraphicsError::CommandListInFlight));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_resize_requires_release_and_flush() {
        let mut backend = NullBackend::new(640, 480).unwrap();

        // Resizing with live buffers is a use-after-free on the GPU timeline.
        assert!(backend.resize_buffers(800, 600).is_err());

        // Released but not flushed is still an ordering violation.
        backend.release_buffers();
        assert!(backend.resize_buffers(800, 600).is_err());

        for _ in 0..BACK_BUFFER_COUNT {
            backend.signal_and_wait().unwrap();
        }
        backend.resize_buffers(800, 600).unwrap();
        backend.acquire_buffers().unwrap();
        assert_eq!(backend.extent(), (800, 600));
    }

    #[test]
    fn test_submit_without_recording_fails() {
        let mut backend = NullBackend::new(640, 480).unwrap();
        assert!(matches!(
            backend.submit(),
            Err(GraphicsError::SubmitFailed(_))
        ));
    }

    #[test]
    fn test_transition_ordering_enforced() {
        let mut backend = NullBackend::new(640, 480).unwrap();
        backend.begin_recording().unwrap();

        // Clear before the render-target transition is rejected.
        assert!(backend.clear_render_target([0.0; 4]).is_err());

        backend.transition_to_render_target().unwrap();
        backend.clear_render_target([0.0; 4]).unwrap();
        backend.transition_to_present().unwrap();
        backend.submit().unwrap();
        backend.present(true).unwrap();
    }
}
