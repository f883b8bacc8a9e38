//! Startup vertex uploads through a transient staging buffer.
//!
//! The data path is staging (CPU-visible) to device-local: the caller's
//! bytes are memcpy'd into a mapped CpuToGpu allocation, a one-time command
//! buffer records the copy, and the submission is waited on synchronously.
//! The staging buffer never outlives this function.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::error::GraphicsError;

use super::sync::FrameFence;

/// Device-local vertex buffer and its backing allocation.
pub struct VertexBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl VertexBuffer {
    pub fn destroy(&mut self, device: &ash::Device, allocator: &mut Allocator) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = allocator.free(allocation) {
                log::error!("Failed to free vertex buffer allocation: {}", e);
            }
            unsafe { device.destroy_buffer(self.buffer, None) };
            self.buffer = vk::Buffer::null();
        }
    }
}

/// Copy `data` into a new device-local vertex buffer, blocking until the
/// GPU-side copy has retired.
#[allow(clippy::too_many_arguments)]
pub fn upload_vertices(
    device: &ash::Device,
    allocator: &mut Allocator,
    command_pool: vk::CommandPool,
    queue: vk::Queue,
    fence: &mut FrameFence,
    data: &[u8],
) -> Result<VertexBuffer, GraphicsError> {
    if data.is_empty() {
        return Err(GraphicsError::ResourceCreationFailed(
            "vertex upload with no data".into(),
        ));
    }
    let size = data.len() as u64;

    let (staging_buffer, mut staging_allocation) = create_buffer(
        device,
        allocator,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "vertex staging",
    )?;

    let mapped = staging_allocation.mapped_slice_mut().ok_or_else(|| {
        GraphicsError::ResourceCreationFailed("staging buffer is not host-visible".into())
    })?;
    mapped[..data.len()].copy_from_slice(data);

    let (vertex_buffer, vertex_allocation) = match create_buffer(
        device,
        allocator,
        size,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
        MemoryLocation::GpuOnly,
        "vertex buffer",
    ) {
        Ok(pair) => pair,
        Err(e) => {
            free_buffer(device, allocator, staging_buffer, staging_allocation);
            return Err(e);
        }
    };

    let copy_result =
        record_and_submit_copy(device, command_pool, queue, fence, staging_buffer, vertex_buffer, size);

    // The staging buffer is done either way once the wait returns.
    free_buffer(device, allocator, staging_buffer, staging_allocation);

    if let Err(e) = copy_result {
        free_buffer(device, allocator, vertex_buffer, vertex_allocation);
        return Err(e);
    }

    log::debug!("Uploaded {} vertex bytes to device-local memory", size);
    Ok(VertexBuffer {
        buffer: vertex_buffer,
        allocation: Some(vertex_allocation),
        size,
    })
}

fn record_and_submit_copy(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    queue: vk::Queue,
    fence: &mut FrameFence,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: u64,
) -> Result<(), GraphicsError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to allocate upload command buffer: {:?}",
                e
            ))
        })?[0];

    let result = (|| {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to begin upload command buffer: {:?}", e))
        })?;

        let region = vk::BufferCopy::default().size(size);
        unsafe { device.cmd_copy_buffer(command_buffer, src, dst, &[region]) };

        unsafe { device.end_command_buffer(command_buffer) }.map_err(|e| {
            GraphicsError::Internal(format!("Failed to end upload command buffer: {:?}", e))
        })?;

        fence.submit_and_wait(device, queue, command_buffer)
    })();

    unsafe { device.free_command_buffers(command_pool, &[command_buffer]) };
    result
}

fn create_buffer(
    device: &ash::Device,
    allocator: &mut Allocator,
    size: u64,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    name: &str,
) -> Result<(vk::Buffer, Allocation), GraphicsError> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create {}: {:?}", name, e))
    })?;

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| {
            unsafe { device.destroy_buffer(buffer, None) };
            GraphicsError::ResourceCreationFailed(format!("Failed to allocate {}: {}", name, e))
        })?;

    if let Err(e) = unsafe {
        device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
    } {
        // Allocation is returned to the allocator below via the error path.
        unsafe { device.destroy_buffer(buffer, None) };
        let _ = allocator.free(allocation);
        return Err(GraphicsError::ResourceCreationFailed(format!(
            "Failed to bind {} memory: {:?}",
            name, e
        )));
    }

    Ok((buffer, allocation))
}

fn free_buffer(
    device: &ash::Device,
    allocator: &mut Allocator,
    buffer: vk::Buffer,
    allocation: Allocation,
) {
    if let Err(e) = allocator.free(allocation) {
        log::error!("Failed to free buffer allocation: {}", e);
    }
    unsafe { device.destroy_buffer(buffer, None) };
}
