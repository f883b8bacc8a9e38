//! CPU/GPU synchronization via a single reusable fence.
//!
//! The backend owns one fence and a pair of monotonic counters. Every
//! signal operation bumps the signaled counter, asks the queue to signal
//! the fence after all previously submitted work, and blocks until the
//! fence fires or [`FENCE_TIMEOUT`](crate::backend::FENCE_TIMEOUT)
//! elapses. A timeout means the GPU or driver is hung; it is reported as a
//! fatal [`GraphicsError::SyncTimeout`] and the counters are left
//! diverged, which `completed` below makes visible.

use ash::vk;

use crate::backend::FENCE_TIMEOUT;
use crate::error::GraphicsError;

/// Reusable binary fence with monotonic bookkeeping counters.
pub struct FrameFence {
    fence: vk::Fence,
    signaled: u64,
    completed: u64,
}

impl FrameFence {
    pub fn new(device: &ash::Device) -> Result<Self, GraphicsError> {
        let create_info = vk::FenceCreateInfo::default();
        let fence = unsafe { device.create_fence(&create_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create frame fence: {:?}", e))
        })?;

        Ok(Self {
            fence,
            signaled: 0,
            completed: 0,
        })
    }

    /// Last value the queue was asked to signal.
    pub fn signaled(&self) -> u64 {
        self.signaled
    }

    /// Last value the CPU observed as completed.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Ask the queue to signal the fence once all previously submitted work
    /// has executed, then block until it does.
    pub fn signal_and_wait(
        &mut self,
        device: &ash::Device,
        queue: vk::Queue,
    ) -> Result<(), GraphicsError> {
        self.signaled += 1;
        // An empty submission signals the fence after everything already
        // in the queue.
        unsafe { device.queue_submit(queue, &[], self.fence) }
            .map_err(|e| map_submit_error(e, "Failed to signal frame fence"))?;
        self.wait(device)
    }

    /// Submit one command buffer and block until the GPU has executed it.
    pub fn submit_and_wait(
        &mut self,
        device: &ash::Device,
        queue: vk::Queue,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), GraphicsError> {
        self.signaled += 1;
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe { device.queue_submit(queue, &[submit_info], self.fence) }
            .map_err(|e| map_submit_error(e, "Failed to submit command buffer"))?;
        self.wait(device)
    }

    fn wait(&mut self, device: &ash::Device) -> Result<(), GraphicsError> {
        let timeout_ns = FENCE_TIMEOUT.as_nanos() as u64;
        let result = unsafe { device.wait_for_fences(&[self.fence], true, timeout_ns) };
        match result {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => {
                return Err(GraphicsError::SyncTimeout {
                    timeout: FENCE_TIMEOUT,
                    value: self.signaled,
                });
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => return Err(GraphicsError::DeviceLost),
            Err(e) => {
                return Err(GraphicsError::SyncFailed(format!(
                    "Failed to wait for frame fence: {:?}",
                    e
                )));
            }
        }

        unsafe { device.reset_fences(&[self.fence]) }.map_err(|e| {
            GraphicsError::SyncFailed(format!("Failed to reset frame fence: {:?}", e))
        })?;

        self.completed = self.signaled;
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        if self.fence != vk::Fence::null() {
            unsafe { device.destroy_fence(self.fence, None) };
            self.fence = vk::Fence::null();
        }
    }
}

fn map_submit_error(e: vk::Result, context: &str) -> GraphicsError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GraphicsError::OutOfMemory
        }
        _ => GraphicsError::SubmitFailed(format!("{}: {:?}", context, e)),
    }
}
