//! Vulkan backend built on ash.
//!
//! One logical device, one graphics queue, one command allocator/list pair
//! and one fence. Submission is synchronous: `submit` blocks until the GPU
//! has executed the list, so a single command buffer is always safe to
//! reset at the top of the next frame.

mod debug;
mod device;
mod instance;
mod swapchain;
mod sync;
mod upload;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{BufferHandle, GpuBackend, ViewHandle, BACK_BUFFER_COUNT};
use crate::error::GraphicsError;

use self::debug::DebugMessenger;
use self::swapchain::SwapchainState;
use self::sync::FrameFence;
use self::upload::VertexBuffer;

/// Native Vulkan backend.
pub struct VulkanBackend {
    // Held for the lifetime of the instance.
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    allocator: Option<Mutex<Allocator>>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: FrameFence,
    swapchain: SwapchainState,
    vertex_buffers: Vec<VertexBuffer>,
    next_buffer_id: u64,
    buffer_handles: Vec<BufferHandle>,
    recording: bool,
    render_pass_open: bool,
    release_fence: Option<u64>,
    // Present mode desired by the most recent present call. Applied the
    // next time the chain is recreated; flipping vsync alone never
    // reallocates buffers.
    vsync_hint: bool,
    destroyed: bool,
}

impl VulkanBackend {
    /// Initialize the full Vulkan stack against the given window.
    ///
    /// Validation layers are enabled in debug builds when available.
    pub fn new<W>(
        window: &W,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Self, GraphicsError>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display_handle = window
            .display_handle()
            .map_err(|e| {
                GraphicsError::SurfaceCreationFailed(format!("No display handle: {}", e))
            })?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GraphicsError::SurfaceCreationFailed(format!("No window handle: {}", e)))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan library: {}", e))
        })?;

        let (instance, debug_messenger) =
            instance::create_instance(&entry, display_handle, cfg!(debug_assertions))?;

        // Everything created from here on is registered with the guard; an
        // early return releases the partial state in reverse order.
        let mut guard = InitGuard::new();
        guard.instance = Some(instance.clone());
        guard.debug_messenger = debug_messenger;

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(|e| {
            GraphicsError::SurfaceCreationFailed(format!("Failed to create surface: {:?}", e))
        })?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        guard.surface = Some((surface_loader.clone(), surface));

        let (physical_device, queue_family) =
            device::select_physical_device(&instance, &surface_loader, surface)?;
        let device = device::create_logical_device(&instance, physical_device, queue_family)?;
        guard.device = Some(device.clone());
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
        })?;
        guard.allocator = Some(Mutex::new(allocator));

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(
            |e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to create command pool: {:?}",
                    e
                ))
            },
        )?;
        guard.command_pool = Some(command_pool);

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to allocate command buffer: {:?}",
                    e
                ))
            })?[0];

        let mut fence = FrameFence::new(&device)?;

        let swapchain = match SwapchainState::new(
            &instance,
            &device,
            surface_loader.clone(),
            physical_device,
            surface,
            width,
            height,
            vsync,
        ) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                fence.destroy(&device);
                return Err(e);
            }
        };

        // Initialization succeeded; defuse the guard and take ownership.
        guard.instance = None;
        guard.surface = None;
        guard.device = None;
        guard.command_pool = None;
        let debug_messenger = guard.debug_messenger.take();
        let allocator = guard.allocator.take();

        log::info!("Vulkan backend initialized");
        Ok(Self {
            _entry: entry,
            instance,
            debug_messenger,
            surface_loader,
            surface,
            physical_device,
            device,
            queue_family,
            queue,
            allocator,
            command_pool,
            command_buffer,
            fence,
            swapchain,
            vertex_buffers: Vec::new(),
            next_buffer_id: 1,
            buffer_handles: Vec::new(),
            recording: false,
            render_pass_open: false,
            release_fence: None,
            vsync_hint: vsync,
            destroyed: false,
        })
    }

    // Accessors for the overlay integration.

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Command buffer of the open recording session.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Render pass the overlay's pipelines must be compatible with.
    pub fn overlay_render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    pub fn surface_extent(&self) -> (u32, u32) {
        let extent = self.swapchain.extent();
        (extent.width, extent.height)
    }

    fn record_image_barrier(
        &self,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.swapchain.current_image())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn begin_recording(&mut self) -> Result<(), GraphicsError> {
        if self.recording {
            return Err(GraphicsError::CommandListInFlight);
        }
        if self.swapchain.view_count() == 0 {
            return Err(GraphicsError::Internal(
                "begin_recording with unacquired back buffers".into(),
            ));
        }

        self.swapchain.acquire_next_image()?;

        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| GraphicsError::Internal(format!("Failed to reset command buffer: {:?}", e)))?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.command_buffer, &begin_info) }
            .map_err(|e| {
                GraphicsError::Internal(format!("Failed to begin command buffer: {:?}", e))
            })?;

        self.recording = true;
        log::trace!(
            "Recording frame into back buffer {}",
            self.swapchain.image_index()
        );
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
        unsafe { self.device.end_command_buffer(self.command_buffer) }.map_err(|e| {
            GraphicsError::SubmitFailed(format!("Failed to end command buffer: {:?}", e))
        })?;
        self.recording = false;
        self.fence
            .submit_and_wait(&self.device, self.queue, self.command_buffer)
    }

    fn signal_and_wait(&mut self) -> Result<(), GraphicsError> {
        self.fence.signal_and_wait(&self.device, self.queue)
    }

    fn signaled_fence_value(&self) -> u64 {
        self.fence.signaled()
    }

    fn completed_fence_value(&self) -> u64 {
        self.fence.completed()
    }

    fn release_buffers(&mut self) {
        self.swapchain.release_buffers();
        self.release_fence = Some(self.fence.signaled());
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        match self.release_fence {
            Some(released_at)
                if self.fence.completed() >= released_at + BACK_BUFFER_COUNT as u64 => {}
            _ => {
                return Err(GraphicsError::Internal(
                    "resize_buffers before in-flight work was flushed".into(),
                ));
            }
        }
        self.swapchain.resize(width, height, self.vsync_hint)
    }

    fn acquire_buffers(&mut self) -> Result<(), GraphicsError> {
        self.swapchain.acquire_buffers()
    }

    fn back_buffer_index(&self) -> usize {
        self.swapchain.image_index()
    }

    fn back_buffer_view(&self, index: usize) -> Option<ViewHandle> {
        self.swapchain.view_handle(index)
    }

    fn transition_to_render_target(&mut self) -> Result<(), GraphicsError> {
        if !self.recording {
            return Err(GraphicsError::Internal(
                "barrier recorded outside a recording session".into(),
            ));
        }
        // Contents are cleared right after, so the previous present
        // contents can be discarded.
        self.record_image_barrier(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        );
        Ok(())
    }

    fn clear_render_target(&mut self, color: [f32; 4]) -> Result<(), GraphicsError> {
        if !self.recording {
            return Err(GraphicsError::Internal(
                "clear recorded outside a recording session".into(),
            ));
        }
        if self.render_pass_open {
            return Err(GraphicsError::Internal(
                "render pass is already open".into(),
            ));
        }

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        }];
        let extent = self.swapchain.extent();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.swapchain.render_pass())
            .framebuffer(self.swapchain.current_framebuffer())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        self.render_pass_open = true;
        Ok(())
    }

    fn transition_to_present(&mut self) -> Result<(), GraphicsError> {
        if !self.recording || !self.render_pass_open {
            return Err(GraphicsError::Internal(
                "buffer is not in the render-target state".into(),
            ));
        }
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
        self.render_pass_open = false;

        self.record_image_barrier(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        );
        Ok(())
    }

    fn present(&mut self, vsync: bool) -> Result<(), GraphicsError> {
        if self.recording {
            return Err(GraphicsError::PresentFailed(
                "present before the command list was submitted".into(),
            ));
        }
        if vsync != self.vsync_hint {
            log::debug!(
                "vsync {} takes effect at the next swapchain recreation",
                if vsync { "on" } else { "off" }
            );
            self.vsync_hint = vsync;
        }
        self.swapchain.present(self.queue)
    }

    fn upload_vertices(&mut self, data: &[u8]) -> Result<BufferHandle, GraphicsError> {
        let allocator = self.allocator.as_ref().ok_or_else(|| {
            GraphicsError::Internal("upload after the backend was destroyed".into())
        })?;
        let buffer = upload::upload_vertices(
            &self.device,
            &mut allocator.lock(),
            self.command_pool,
            self.queue,
            &mut self.fence,
            data,
        )?;
        self.vertex_buffers.push(buffer);

        let handle = BufferHandle(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffer_handles.push(handle);
        Ok(handle)
    }

    fn outstanding_handles(&self) -> usize {
        self.swapchain.view_count() + self.vertex_buffers.len()
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        unsafe {
            let _ = self.device.device_wait_idle();
        }

        if let Some(allocator) = self.allocator.take() {
            let mut allocator = allocator.into_inner();
            for mut buffer in self.vertex_buffers.drain(..) {
                buffer.destroy(&self.device, &mut allocator);
            }
            self.buffer_handles.clear();
            // Allocator drop releases its device memory before the device
            // goes away below.
            drop(allocator);
        }

        self.swapchain.destroy();
        self.fence.destroy(&self.device);

        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }

        if let Some(messenger) = &mut self.debug_messenger {
            messenger.destroy();
        }

        unsafe {
            self.instance.destroy_instance(None);
        }
        log::info!("Vulkan backend destroyed");
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Releases partially initialized GPU objects when the constructor bails
/// out early. On success every field is taken or cleared, leaving the drop
/// a no-op.
struct InitGuard {
    instance: Option<ash::Instance>,
    debug_messenger: Option<DebugMessenger>,
    surface: Option<(ash::khr::surface::Instance, vk::SurfaceKHR)>,
    device: Option<ash::Device>,
    allocator: Option<Mutex<Allocator>>,
    command_pool: Option<vk::CommandPool>,
}

impl InitGuard {
    fn new() -> Self {
        Self {
            instance: None,
            debug_messenger: None,
            surface: None,
            device: None,
            allocator: None,
            command_pool: None,
        }
    }
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        // Reverse creation order. The allocator frees its device memory, so
        // it has to go before the device does.
        self.allocator = None;
        unsafe {
            if let Some(device) = &self.device {
                if let Some(pool) = self.command_pool.take() {
                    device.destroy_command_pool(pool, None);
                }
                device.destroy_device(None);
            }
            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
        }
        if let Some(messenger) = &mut self.debug_messenger {
            messenger.destroy();
        }
        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }
    }
}
