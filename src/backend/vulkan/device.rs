//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

/// Select the physical device with the most device-local memory.
///
/// Software rasterizers are skipped outright, and candidates must expose a
/// queue family that can both render and present to `surface`. Among the
/// remaining devices the one with the largest device-local heap wins; on a
/// tie the first enumerated device is kept.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32), GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_memory = 0u64;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        // Software rasterizers are never eligible.
        if properties.device_type == vk::PhysicalDeviceType::CPU {
            log::debug!("Skipping software rasterizer {:?}", device_name);
            continue;
        }

        if properties.api_version < vk::make_api_version(0, 1, 2, 0) {
            log::debug!("Skipping {:?}: Vulkan 1.2 not supported", device_name);
            continue;
        }

        let queue_family = match find_queue_family(instance, surface_loader, surface, device)? {
            Some(index) => index,
            None => {
                log::debug!(
                    "Skipping {:?}: no graphics queue family can present",
                    device_name
                );
                continue;
            }
        };

        let memory = device_local_memory(instance, device);
        log::info!(
            "Found GPU: {:?} (type: {:?}, {} MiB device-local)",
            device_name,
            properties.device_type,
            memory / (1024 * 1024)
        );

        // Strict comparison keeps the first enumerated device on ties.
        if memory > best_memory {
            best_memory = memory;
            best_device = Some((device, queue_family));
        }
    }

    best_device
        .ok_or_else(|| GraphicsError::DeviceCreationFailed("No suitable GPU found".to_string()))
}

/// Find a queue family supporting both graphics and presentation to the
/// given surface. Returns `None` when the device has no such family.
fn find_queue_family(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<Option<u32>, GraphicsError> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    for (index, family) in queue_families.iter().enumerate() {
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }
        let present_supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                physical_device,
                index as u32,
                surface,
            )
        }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to query surface support: {:?}",
                e
            ))
        })?;
        if present_supported {
            return Ok(Some(index as u32));
        }
    }

    Ok(None)
}

/// Sum of the device-local memory heaps.
fn device_local_memory(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> u64 {
    let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Create a logical device with a single graphics queue and the swapchain
/// extension.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities);

    let queue_create_infos = [queue_create_info];

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features);

    let device =
        unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
            GraphicsError::DeviceCreationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

    Ok(device)
}
