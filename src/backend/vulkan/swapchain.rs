//! Vulkan swapchain and back-buffer view management.
//!
//! The chain is created for double buffering and recreated in place on
//! resize with `old_swapchain` chaining. Views and framebuffers follow the
//! release / resize / acquire split the resize protocol demands: they are
//! destroyed before the flush, and rebuilt only after the new chain exists.

use ash::vk;

use crate::backend::{ViewHandle, BACK_BUFFER_COUNT};
use crate::error::GraphicsError;

/// Swapchain, its per-image views and framebuffers, and the render pass
/// the overlay records into.
pub struct SwapchainState {
    device: ash::Device,
    loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    chain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    render_pass: vk::RenderPass,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    image_index: usize,
    acquire_fence: vk::Fence,
    tearing_supported: bool,
}

impl SwapchainState {
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        surface_loader: ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Self, GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::SwapchainCreationFailed(format!(
                "surface size {}x{} is below the 1x1 minimum",
                width, height
            )));
        }

        let loader = ash::khr::swapchain::Device::new(instance, device);

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(|e| {
            GraphicsError::SwapchainCreationFailed(format!(
                "Failed to query surface formats: {:?}",
                e
            ))
        })?;
        let format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .copied()
            .unwrap_or(formats[0]);

        // IMMEDIATE availability is a device/surface property; query it once
        // and reuse the answer for every later present-mode decision.
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(|e| {
            GraphicsError::SwapchainCreationFailed(format!(
                "Failed to query present modes: {:?}",
                e
            ))
        })?;
        let tearing_supported = present_modes.contains(&vk::PresentModeKHR::IMMEDIATE);

        let fence_info = vk::FenceCreateInfo::default();
        let acquire_fence = unsafe { device.create_fence(&fence_info, None) }.map_err(|e| {
            GraphicsError::SwapchainCreationFailed(format!(
                "Failed to create acquire fence: {:?}",
                e
            ))
        })?;

        let render_pass = match create_render_pass(device, format.format) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                unsafe { device.destroy_fence(acquire_fence, None) };
                return Err(e);
            }
        };

        let mut state = Self {
            device: device.clone(),
            loader,
            surface_loader,
            physical_device,
            surface,
            chain: vk::SwapchainKHR::null(),
            format,
            extent: vk::Extent2D { width, height },
            render_pass,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            image_index: 0,
            acquire_fence,
            tearing_supported,
        };

        // From here on partial state is owned by `state`; destroy() releases
        // whatever was created before a failure.
        if let Err(e) = state
            .create_chain(width, height, vsync)
            .and_then(|_| state.acquire_buffers())
        {
            state.destroy();
            return Err(e);
        }

        log::info!(
            "Created swapchain: {}x{}, {} images, format {:?}, tearing {}",
            width,
            height,
            state.images.len(),
            format.format,
            if tearing_supported {
                "supported"
            } else {
                "unsupported"
            }
        );

        Ok(state)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }

    pub fn image_index(&self) -> usize {
        self.image_index
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn current_image(&self) -> vk::Image {
        self.images[self.image_index]
    }

    pub fn current_framebuffer(&self) -> vk::Framebuffer {
        self.framebuffers[self.image_index]
    }

    pub fn view_handle(&self, index: usize) -> Option<ViewHandle> {
        use vk::Handle;
        self.views.get(index).map(|view| ViewHandle(view.as_raw()))
    }

    /// Block until the driver hands out the next image to render into.
    ///
    /// The frame loop is fully synchronous, so a fence wait right here is
    /// equivalent to the semaphore dance a pipelined renderer would need.
    pub fn acquire_next_image(&mut self) -> Result<usize, GraphicsError> {
        let (index, suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.chain,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquire_fence,
            )
        }
        .map_err(|e| match e {
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => {
                GraphicsError::SurfaceLost
            }
            _ => GraphicsError::Internal(format!("Failed to acquire swapchain image: {:?}", e)),
        })?;
        if suboptimal {
            log::trace!("Swapchain suboptimal on acquire");
        }

        unsafe {
            self.device
                .wait_for_fences(&[self.acquire_fence], true, u64::MAX)
                .and_then(|_| self.device.reset_fences(&[self.acquire_fence]))
        }
        .map_err(|e| GraphicsError::SyncFailed(format!("Failed to wait for acquire: {:?}", e)))?;

        self.image_index = index as usize;
        Ok(self.image_index)
    }

    /// Present the image acquired by the last [`Self::acquire_next_image`].
    pub fn present(&mut self, queue: vk::Queue) -> Result<(), GraphicsError> {
        let swapchains = [self.chain];
        let image_indices = [self.image_index as u32];
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        match result {
            Ok(_) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                // The surface changed under us; the owner resizes on the
                // next frame.
                log::warn!("Swapchain out of date on present");
                Ok(())
            }
            Err(vk::Result::SUBOPTIMAL_KHR) => {
                log::trace!("Swapchain suboptimal on present");
                Ok(())
            }
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(GraphicsError::SurfaceLost),
            Err(e) => Err(GraphicsError::PresentFailed(format!(
                "Failed to present swapchain image: {:?}",
                e
            ))),
        }
    }

    /// Drop every view and framebuffer referencing the chain's images. The
    /// chain itself survives so the resize can link it as `old_swapchain`.
    pub fn release_buffers(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
        }
        self.images.clear();
    }

    /// Replace the chain with one of the new size. All views must already be
    /// released and in-flight work flushed.
    pub fn resize(&mut self, width: u32, height: u32, vsync: bool) -> Result<(), GraphicsError> {
        if !self.views.is_empty() {
            return Err(GraphicsError::Internal(
                "resize with live back-buffer references".into(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(GraphicsError::SwapchainCreationFailed(format!(
                "resize to {}x{} is below the 1x1 minimum",
                width, height
            )));
        }

        self.create_chain(width, height, vsync)?;
        self.image_index = 0;
        log::debug!("Resized swapchain to {}x{}", width, height);
        Ok(())
    }

    /// Fetch the chain's images and rebuild views and framebuffers.
    pub fn acquire_buffers(&mut self) -> Result<(), GraphicsError> {
        if !self.views.is_empty() {
            return Err(GraphicsError::Internal(
                "acquire_buffers while views are still held".into(),
            ));
        }

        self.images = unsafe { self.loader.get_swapchain_images(self.chain) }.map_err(|e| {
            GraphicsError::SwapchainCreationFailed(format!(
                "Failed to get swapchain images: {:?}",
                e
            ))
        })?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view =
                unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
                    GraphicsError::SwapchainCreationFailed(format!(
                        "Failed to create image view: {:?}",
                        e
                    ))
                })?;
            self.views.push(view);

            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe {
                self.device.create_framebuffer(&framebuffer_info, None)
            }
            .map_err(|e| {
                GraphicsError::SwapchainCreationFailed(format!(
                    "Failed to create framebuffer: {:?}",
                    e
                ))
            })?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    fn create_chain(&mut self, width: u32, height: u32, vsync: bool) -> Result<(), GraphicsError> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .map_err(|e| {
            GraphicsError::SwapchainCreationFailed(format!(
                "Failed to query surface capabilities: {:?}",
                e
            ))
        })?;

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let mut image_count = (BACK_BUFFER_COUNT as u32).max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let present_mode = choose_present_mode(vsync, self.tearing_supported);
        let old_chain = self.chain;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_chain);

        let chain = unsafe { self.loader.create_swapchain(&create_info, None) }.map_err(|e| {
            GraphicsError::SwapchainCreationFailed(format!("Failed to create swapchain: {:?}", e))
        })?;

        if old_chain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_chain, None) };
        }

        self.chain = chain;
        self.extent = extent;
        Ok(())
    }

    /// Release every resource this state still holds. Idempotent, and safe
    /// to call on a partially constructed state.
    pub fn destroy(&mut self) {
        self.release_buffers();
        unsafe {
            if self.acquire_fence != vk::Fence::null() {
                self.device.destroy_fence(self.acquire_fence, None);
                self.acquire_fence = vk::Fence::null();
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            if self.chain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.chain, None);
                self.chain = vk::SwapchainKHR::null();
            }
        }
    }
}

/// FIFO when vsync is on (always available), IMMEDIATE when vsync is off
/// and the surface supports tearing, FIFO otherwise.
fn choose_present_mode(vsync: bool, tearing_supported: bool) -> vk::PresentModeKHR {
    if !vsync && tearing_supported {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Render pass the overlay records into. The caller transitions the image
/// into `COLOR_ATTACHMENT_OPTIMAL` with an explicit barrier before the pass
/// begins and out to `PRESENT_SRC_KHR` after it ends, so the pass itself
/// clears on load and leaves the layout alone.
fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> Result<vk::RenderPass, GraphicsError> {
    let attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_refs = [color_ref];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);

    let attachments = [attachment];
    let subpasses = [subpass];
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses);

    unsafe { device.create_render_pass(&create_info, None) }.map_err(|e| {
        GraphicsError::SwapchainCreationFailed(format!("Failed to create render pass: {:?}", e))
    })
}
