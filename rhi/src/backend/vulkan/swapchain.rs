//! Window surface and swapchain.

use ash::vk;

use super::conversion::convert_texture_format;
use crate::error::GraphicsError;
use crate::types::{Extent2d, TextureFormat};

/// Format asked for first when creating the swapchain.
pub const PREFERRED_SURFACE_FORMAT: TextureFormat = TextureFormat::Bgra8Unorm;

/// Everything needed to (re)create a swapchain for one surface.
pub struct SurfaceContext<'a> {
    pub device: &'a ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface_loader: &'a ash::khr::surface::Instance,
    pub swapchain_loader: &'a ash::khr::swapchain::Device,
    pub surface: vk::SurfaceKHR,
}

/// A swapchain and views of its images.
pub struct VulkanSwapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl VulkanSwapchain {
    /// Create a swapchain of `requested` size, retiring `old` if given.
    ///
    /// The surface's current extent wins over the request when the window
    /// system fixes it.
    pub fn new(
        context: &SurfaceContext<'_>,
        requested: Extent2d,
        old: vk::SwapchainKHR,
    ) -> Result<Self, GraphicsError> {
        let capabilities = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, context.surface)
        }
        .map_err(surface_error("query surface capabilities"))?;

        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, context.surface)
        }
        .map_err(surface_error("query surface formats"))?;
        let preferred = convert_texture_format(PREFERRED_SURFACE_FORMAT);
        let surface_format = formats
            .iter()
            .find(|f| f.format == preferred)
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| {
                GraphicsError::ResourceCreationFailed("surface reports no formats".to_string())
            })?;

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: requested.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: requested.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let max_images = if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        };
        let image_count = (capabilities.min_image_count + 1).min(max_images);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(old);

        let swapchain = unsafe { context.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(surface_error("create swapchain"))?;

        let images = match unsafe { context.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { context.swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(surface_error("get swapchain images")(e));
            }
        };

        let mut result = Self {
            swapchain,
            images: Vec::new(),
            views: Vec::with_capacity(images.len()),
            format: surface_format.format,
            extent,
        };
        for &image in &images {
            match create_view(context.device, image, surface_format.format) {
                Ok(view) => result.views.push(view),
                Err(e) => {
                    result.destroy(context.device, context.swapchain_loader);
                    return Err(e);
                }
            }
        }
        result.images = images;

        log::info!(
            "VulkanSwapchain: created {}x{} with {} images ({:?})",
            extent.width,
            extent.height,
            result.images.len(),
            surface_format.format
        );
        Ok(result)
    }

    /// The extent in renderer units.
    pub fn extent(&self) -> Extent2d {
        Extent2d::new(self.extent.width, self.extent.height)
    }

    /// Destroy views and the swapchain. The device must be idle.
    pub fn destroy(&mut self, device: &ash::Device, loader: &ash::khr::swapchain::Device) {
        unsafe {
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}

fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, GraphicsError> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&view_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!(
            "failed to create swapchain image view: {e:?}"
        ))
    })
}

/// Map surface errors, keeping the variants the frame loop reacts to.
pub fn surface_error(what: &'static str) -> impl Fn(vk::Result) -> GraphicsError {
    move |result| match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
            GraphicsError::SurfaceOutdated
        }
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::Internal(format!("failed to {what}: {other:?}")),
    }
}
