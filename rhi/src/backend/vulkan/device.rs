//! Physical device selection and logical device creation.

use ash::vk;

use crate::error::GraphicsError;

/// Pick the physical device to render with.
///
/// Devices without sampler anisotropy are skipped. Discrete GPUs win over
/// integrated ones, ties go to the larger maximum texture size. When a
/// surface is given, the device must be able to present to it.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Result<(vk::PhysicalDevice, u32), GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("failed to enumerate physical devices: {e:?}"))
    })?;
    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "no Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(vk::PhysicalDevice, u32, u32)> = None;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        if features.sampler_anisotropy == vk::FALSE {
            continue;
        }
        let Some(queue_family) = find_graphics_queue_family(instance, device, surface) else {
            continue;
        };

        let mut score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 0,
        };
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "VulkanBackend: found GPU {:?} (type: {:?}, score: {score})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            properties.device_type,
        );
        if best.is_none_or(|(_, _, best_score)| score > best_score) {
            best = Some((device, queue_family, score));
        }
    }

    best.map(|(device, queue_family, _)| (device, queue_family))
        .ok_or_else(|| GraphicsError::InitializationFailed("no suitable GPU found".to_string()))
}

/// A queue family with graphics and compute support that can present to
/// `surface`, if one is given.
fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Option<u32> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families.iter().zip(0u32..).find_map(|(family, index)| {
        let flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
        if !family.queue_flags.contains(flags) {
            return None;
        }
        let presents = surface.is_none_or(|(loader, surface)| unsafe {
            loader
                .get_physical_device_surface_support(physical_device, index, surface)
                .unwrap_or(false)
        });
        presents.then_some(index)
    })
}

/// Create the logical device with swapchain and dynamic rendering.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    with_swapchain: bool,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities)];

    let mut device_extensions = vec![ash::khr::dynamic_rendering::NAME.as_ptr()];
    if with_swapchain {
        device_extensions.push(ash::khr::swapchain::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    device_extensions.push(ash::khr::portability_subset::NAME.as_ptr());

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
    let mut dynamic_rendering =
        vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut dynamic_rendering);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("failed to create logical device: {e:?}"))
    })
}
