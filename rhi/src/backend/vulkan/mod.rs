//! Native Vulkan backend using ash.
//!
//! - gpu-allocator for memory
//! - dynamic rendering (`VK_KHR_dynamic_rendering`), no render pass objects
//! - one descriptor set per material at set 0
//! - deferred destruction of every dropped handle, see [`deferred`]
//!
//! The backend is created for one window and owns its surface and
//! swapchain.

mod allocator;
mod barriers;
mod command;
mod conversion;
mod debug;
pub mod deferred;
mod device;
mod instance;
mod pipeline;
mod swapchain;

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use super::{
    DescriptorWrite, GpuBackend, GpuBuffer, GpuCommandBuffer, GpuDescriptorTable, GpuFence,
    GpuPipeline, GpuSampler, GpuSemaphore, GpuShader, GpuTexture, PipelineState,
    RenderTarget, RenderingAttachment, RenderingInfo, TextureBindingKind, TextureView,
};
use crate::config::{DeviceParameters, RenderConfig};
use crate::error::GraphicsError;
use crate::shader::{ShaderDescriptor, ShaderStageFlags};
use crate::types::{
    BufferDescriptor, Extent2d, MemoryType, SamplerDescriptor, TextureDescriptor, TextureFormat,
    TextureLayout, TextureType, TextureUsage,
};

use self::conversion::{
    aspect_mask, convert_address_mode, convert_buffer_type, convert_clear_value,
    convert_filter_mode, convert_layout, convert_load_op, convert_mipmap_filter_mode,
    convert_shader_stages, convert_store_op, convert_texture_format, convert_texture_usage,
    texture_format_from_vk,
};
use self::deferred::DeferredDestructor;
use self::pipeline::DescriptorAllocator;
use self::swapchain::{PREFERRED_SURFACE_FORMAT, SurfaceContext, VulkanSwapchain, surface_error};

/// How long a fence wait may take before the GPU is considered hung.
const FENCE_TIMEOUT_NS: u64 = 10_000_000_000;

/// Vulkan implementation of [`GpuBackend`].
pub struct VulkanBackend {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    /// Queue submissions and idle waits are externally synchronized.
    queue: Mutex<vk::Queue>,
    queue_family: u32,
    /// Dropped before the device.
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    deferred: Arc<DeferredDestructor>,
    descriptors: DescriptorAllocator,
    dynamic_rendering: ash::khr::dynamic_rendering::Device,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: Mutex<Option<VulkanSwapchain>>,
    parameters: DeviceParameters,
    validation_enabled: bool,
}

impl VulkanBackend {
    /// Create a backend presenting to `window`.
    ///
    /// `config.validation` enables the Khronos validation layer when it is
    /// installed, `config.frames_in_flight` sets how long dropped objects
    /// are kept alive. The window must outlive the backend.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InitializationFailed`] if Vulkan is missing,
    /// no GPU can present to the window, or any setup call fails.
    pub fn new<W>(window: &W, config: &RenderConfig) -> Result<Self, GraphicsError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GraphicsError::InitializationFailed(format!("no display handle: {e}")))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| GraphicsError::InitializationFailed(format!("no window handle: {e}")))?
            .as_raw();
        Self::from_raw_handles(display, window, config)
    }

    /// Create a backend from raw window system handles.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_raw_handles(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        config: &RenderConfig,
    ) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("failed to load Vulkan: {e}"))
        })?;

        let bundle = instance::create_instance(&entry, config.validation, Some(display))?;
        let instance = bundle.instance;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface =
            unsafe { ash_window::create_surface(&entry, &instance, display, window, None) }
                .map_err(|e| {
                    GraphicsError::InitializationFailed(format!(
                        "failed to create Vulkan surface: {e:?}"
                    ))
                })?;

        let (physical_device, queue_family) =
            device::select_physical_device(&instance, Some((&surface_loader, surface)))?;
        let device =
            device::create_logical_device(&instance, physical_device, queue_family, true)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Arc::new(Mutex::new(allocator::create_allocator(
            &instance,
            physical_device,
            &device,
        )?));
        let deferred = Arc::new(DeferredDestructor::new(config.frames_in_flight));
        deferred.set_allocator(Arc::downgrade(&allocator));

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let parameters = DeviceParameters {
            name: properties
                .device_name_as_c_str()
                .map_or_else(|_| "Unknown GPU".to_string(), |n| n.to_string_lossy().into_owned()),
            min_uniform_buffer_alignment: properties.limits.min_uniform_buffer_offset_alignment,
            max_anisotropy: properties.limits.max_sampler_anisotropy,
            max_push_constant_size: properties.limits.max_push_constants_size,
        };

        let dynamic_rendering = ash::khr::dynamic_rendering::Device::new(&instance, &device);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let descriptors = DescriptorAllocator::new(device.clone());

        log::info!(
            "VulkanBackend: initialized on '{}' (validation: {})",
            parameters.name,
            bundle.debug_messenger.is_some()
        );

        Ok(Self {
            entry,
            instance,
            debug_utils: bundle.debug_utils,
            debug_messenger: bundle.debug_messenger,
            physical_device,
            device,
            queue: Mutex::new(queue),
            queue_family,
            allocator: ManuallyDrop::new(allocator),
            deferred,
            descriptors,
            dynamic_rendering,
            surface_loader,
            swapchain_loader,
            surface,
            swapchain: Mutex::new(None),
            parameters,
            validation_enabled: config.validation,
        })
    }

    /// The loaded Vulkan entry points.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// The logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// The selected physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Family of the single graphics + compute queue.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Objects waiting for the GPU before destruction.
    pub fn pending_destructions(&self) -> usize {
        self.deferred.pending_count()
    }

    fn surface_context(&self) -> SurfaceContext<'_> {
        SurfaceContext {
            device: &self.device,
            physical_device: self.physical_device,
            surface_loader: &self.surface_loader,
            swapchain_loader: &self.swapchain_loader,
            surface: self.surface,
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mips: (u32, u32),
        layers: u32,
    ) -> Result<vk::ImageView, GraphicsError> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: mips.0,
                level_count: mips.1,
                base_array_layer: 0,
                layer_count: layers,
            });
        unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("failed to create image view: {e:?}"))
        })
    }

    /// Create a host-visible transfer source holding `data`.
    fn create_staging_buffer(
        &self,
        data: &[u8],
    ) -> Result<(vk::Buffer, Allocation), GraphicsError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(data.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("failed to create staging buffer: {e:?}"))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match allocator::allocate(
            &self.allocator,
            "texture_staging",
            requirements,
            MemoryLocation::CpuToGpu,
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        match (bound, allocation.mapped_ptr()) {
            (Ok(()), Some(mapped)) => {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        data.as_ptr(),
                        mapped.as_ptr().cast::<u8>(),
                        data.len(),
                    );
                }
                Ok((buffer, allocation))
            }
            (result, _) => {
                self.free_buffer(buffer, allocation);
                Err(GraphicsError::Internal(format!(
                    "staging buffer is not writable: {result:?}"
                )))
            }
        }
    }

    /// Destroy a buffer that was never handed out.
    fn free_buffer(&self, buffer: vk::Buffer, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("VulkanBackend: failed to free buffer memory: {e}");
        }
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    /// Destroy an image that was never handed out.
    fn free_image(&self, image: vk::Image, views: Vec<vk::ImageView>, allocation: Allocation) {
        unsafe {
            for view in views {
                self.device.destroy_image_view(view, None);
            }
        }
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("VulkanBackend: failed to free image memory: {e}");
        }
        unsafe { self.device.destroy_image(image, None) };
    }

    /// Record `record` into a fresh command buffer, submit it and wait.
    fn submit_blocking(
        &self,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> Result<(), GraphicsError> {
        let cmd = self.create_command_buffer()?;
        self.begin_commands(&cmd)?;
        if let GpuCommandBuffer::Vulkan { buffer, .. } = &cmd {
            record(*buffer);
        }
        self.end_commands(&cmd)?;
        let fence = self.create_fence(false)?;
        self.submit(&cmd, None, None, Some(&fence))?;
        self.wait_fence(&fence)
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.parameters.name)
            .field("validation_enabled", &self.validation_enabled)
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.deferred.flush_all();
            self.descriptors.destroy();

            if let Some(mut swapchain) = self.swapchain.lock().take() {
                swapchain.destroy(&self.device, &self.swapchain_loader);
            }
            self.surface_loader.destroy_surface(self.surface, None);

            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn vk_command_buffer(cmd: &GpuCommandBuffer) -> Option<vk::CommandBuffer> {
    match cmd {
        GpuCommandBuffer::Vulkan { buffer, .. } => Some(*buffer),
        _ => None,
    }
}

fn vk_buffer(buffer: &GpuBuffer) -> Option<vk::Buffer> {
    match buffer {
        GpuBuffer::Vulkan { buffer, .. } => Some(*buffer),
        _ => None,
    }
}

fn vk_semaphore(semaphore: &GpuSemaphore) -> Option<vk::Semaphore> {
    match semaphore {
        GpuSemaphore::Vulkan { semaphore, .. } => Some(*semaphore),
        _ => None,
    }
}

fn vk_fence(fence: &GpuFence) -> Option<vk::Fence> {
    match fence {
        GpuFence::Vulkan { fence, .. } => Some(*fence),
        _ => None,
    }
}

fn foreign_handle(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} was not created by the Vulkan backend"))
}

fn device_error(what: &'static str) -> impl Fn(vk::Result) -> GraphicsError {
    move |result| match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::Internal(format!("failed to {what}: {other:?}")),
    }
}

fn rendering_attachment(
    attachment: &RenderingAttachment<'_>,
    layout: vk::ImageLayout,
) -> Option<(vk::RenderingAttachmentInfo<'static>, bool)> {
    let GpuTexture::Vulkan { view, aspect, .. } = attachment.texture else {
        return None;
    };
    let info = vk::RenderingAttachmentInfo::default()
        .image_view(*view)
        .image_layout(layout)
        .load_op(convert_load_op(attachment.load_op))
        .store_op(convert_store_op(attachment.store_op))
        .clear_value(convert_clear_value(attachment.clear_value));
    Some((info, aspect.contains(vk::ImageAspectFlags::STENCIL)))
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn parameters(&self) -> DeviceParameters {
        self.parameters.clone()
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size.max(1))
            .usage(convert_buffer_type(descriptor.buffer_type))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(device_error("create buffer"))?;

        let location = match descriptor.memory_type {
            MemoryType::CpuGpu => MemoryLocation::CpuToGpu,
            MemoryType::GpuOnly => MemoryLocation::GpuOnly,
        };
        let name = if descriptor.name.is_empty() {
            "buffer"
        } else {
            descriptor.name.as_str()
        };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation =
            match allocator::allocate(&self.allocator, name, requirements, location, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            self.free_buffer(buffer, allocation);
            return Err(device_error("bind buffer memory")(e));
        }

        Ok(GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            size: descriptor.size,
            deferred: Arc::clone(&self.deferred),
        })
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let GpuBuffer::Vulkan {
            allocation, size, ..
        } = buffer
        else {
            return Err(foreign_handle("buffer"));
        };
        if offset + data.len() as u64 > *size {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {offset} overflows buffer of {size} bytes",
                data.len()
            )));
        }

        let guard = allocation.lock();
        let mapped = guard
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter("buffer is not host visible".to_string())
            })?;
        // SAFETY: the range was checked against the buffer size and the
        // mapping covers the whole allocation.
        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        let format = convert_texture_format(descriptor.format);
        let aspect = aspect_mask(descriptor.format);
        let mip_levels = descriptor.mip_levels();
        let layers = u32::from(descriptor.layers.max(1));
        let extent = vk::Extent3D {
            width: u32::from(descriptor.width),
            height: u32::from(descriptor.height),
            depth: 1,
        };
        let (flags, view_type) = match descriptor.texture_type {
            TextureType::Texture2d => (vk::ImageCreateFlags::empty(), vk::ImageViewType::TYPE_2D),
            TextureType::Texture2dArray => {
                (vk::ImageCreateFlags::empty(), vk::ImageViewType::TYPE_2D_ARRAY)
            }
            TextureType::Cubemap => (
                vk::ImageCreateFlags::CUBE_COMPATIBLE,
                vk::ImageViewType::CUBE,
            ),
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(
                descriptor.usage | TextureUsage::COPY_DST,
                descriptor.format,
            ))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(device_error("create image"))?;

        let name = if descriptor.name.is_empty() {
            "texture"
        } else {
            descriptor.name.as_str()
        };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match allocator::allocate(
            &self.allocator,
            name,
            requirements,
            MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            self.free_image(image, Vec::new(), allocation);
            return Err(device_error("bind image memory")(e));
        }

        let view = match self.create_image_view(
            image,
            view_type,
            format,
            aspect,
            (0, mip_levels),
            layers,
        ) {
            Ok(view) => view,
            Err(e) => {
                self.free_image(image, Vec::new(), allocation);
                return Err(e);
            }
        };

        let mut mip_views = Vec::new();
        if mip_levels > 1 {
            for level in 0..mip_levels {
                match self.create_image_view(image, view_type, format, aspect, (level, 1), layers)
                {
                    Ok(mip_view) => mip_views.push(mip_view),
                    Err(e) => {
                        mip_views.push(view);
                        self.free_image(image, mip_views, allocation);
                        return Err(e);
                    }
                }
            }
        }

        log::trace!(
            "VulkanBackend: created texture '{name}' {}x{} ({mip_levels} mips, {layers} layers)",
            extent.width,
            extent.height
        );
        Ok(GpuTexture::Vulkan {
            device: self.device.clone(),
            image,
            view,
            mip_views,
            allocation: Mutex::new(Some(allocation)),
            format,
            aspect,
            extent,
            mip_levels,
            layers,
            deferred: Arc::clone(&self.deferred),
        })
    }

    fn write_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let GpuTexture::Vulkan {
            image,
            aspect,
            extent,
            layers,
            ..
        } = texture
        else {
            return Err(foreign_handle("texture"));
        };
        if data.is_empty() {
            return Ok(());
        }

        let (staging, allocation) = self.create_staging_buffer(data)?;
        let (image, aspect, extent, layers) = (*image, *aspect, *extent, *layers);
        let result = self.submit_blocking(|cmd| {
            barriers::transition_image(
                &self.device,
                cmd,
                image,
                aspect,
                TextureLayout::Undefined,
                TextureLayout::TransferDst,
            );
            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: layers,
                })
                .image_extent(extent);
            unsafe {
                self.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            barriers::transition_image(
                &self.device,
                cmd,
                image,
                aspect,
                TextureLayout::TransferDst,
                TextureLayout::ShaderReadOnly,
            );
        });
        self.free_buffer(staging, allocation);

        log::trace!(
            "VulkanBackend: uploaded {} bytes to '{}'",
            data.len(),
            descriptor.name
        );
        result
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError> {
        let max_anisotropy = descriptor
            .max_anisotropy
            .min(self.parameters.max_anisotropy);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.mag_filter))
            .min_filter(convert_filter_mode(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(descriptor.mipmap_filter))
            .address_mode_u(convert_address_mode(descriptor.address_mode_u))
            .address_mode_v(convert_address_mode(descriptor.address_mode_v))
            .address_mode_w(convert_address_mode(descriptor.address_mode_w))
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy.max(1.0))
            .min_lod(descriptor.min_lod)
            .max_lod(descriptor.max_lod)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(device_error("create sampler"))?;
        Ok(GpuSampler::Vulkan {
            device: self.device.clone(),
            sampler,
            deferred: Arc::clone(&self.deferred),
        })
    }

    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<GpuShader, GraphicsError> {
        let objects = pipeline::create_shader_objects(&self.device, descriptor)?;
        log::debug!(
            "VulkanBackend: created shader '{}' with {} stages",
            descriptor.path,
            objects.modules.len()
        );
        Ok(GpuShader::Vulkan {
            device: self.device.clone(),
            modules: objects.modules,
            set_layout: objects.set_layout,
            pipeline_layout: objects.pipeline_layout,
            deferred: Arc::clone(&self.deferred),
        })
    }

    fn create_pipeline(
        &self,
        shader: &GpuShader,
        descriptor: &ShaderDescriptor,
        state: &PipelineState,
    ) -> Result<GpuPipeline, GraphicsError> {
        let GpuShader::Vulkan {
            modules,
            pipeline_layout,
            ..
        } = shader
        else {
            return Err(foreign_handle("shader"));
        };
        let pipeline =
            pipeline::create_pipeline(&self.device, modules, *pipeline_layout, descriptor, state)?;
        let bind_point = match state {
            PipelineState::Compute => vk::PipelineBindPoint::COMPUTE,
            PipelineState::Graphics { .. } => vk::PipelineBindPoint::GRAPHICS,
        };
        Ok(GpuPipeline::Vulkan {
            device: self.device.clone(),
            pipeline,
            layout: *pipeline_layout,
            bind_point,
            deferred: Arc::clone(&self.deferred),
        })
    }

    fn create_descriptor_table(
        &self,
        shader: &GpuShader,
    ) -> Result<GpuDescriptorTable, GraphicsError> {
        let GpuShader::Vulkan { set_layout, .. } = shader else {
            return Err(foreign_handle("shader"));
        };
        let (pool, set) = self.descriptors.allocate(*set_layout)?;
        Ok(GpuDescriptorTable::Vulkan {
            device: self.device.clone(),
            pool,
            set,
            deferred: Arc::clone(&self.deferred),
        })
    }

    fn update_descriptor_table(&self, table: &GpuDescriptorTable, writes: &[DescriptorWrite<'_>]) {
        let GpuDescriptorTable::Vulkan { set, .. } = table else {
            log::warn!("VulkanBackend: update of a foreign descriptor table ignored");
            return;
        };

        enum Info {
            Buffer(usize),
            Image(usize),
        }
        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut entries: Vec<(u32, vk::DescriptorType, Info)> = Vec::with_capacity(writes.len());

        for write in writes {
            match write {
                DescriptorWrite::Buffer {
                    slot,
                    buffer: GpuBuffer::Vulkan { buffer, .. },
                    offset,
                    range,
                    storage,
                } => {
                    let ty = if *storage {
                        vk::DescriptorType::STORAGE_BUFFER
                    } else {
                        vk::DescriptorType::UNIFORM_BUFFER
                    };
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(*buffer)
                            .offset(*offset)
                            .range(*range),
                    );
                    entries.push((*slot, ty, Info::Buffer(buffer_infos.len() - 1)));
                }
                DescriptorWrite::Texture {
                    slot,
                    texture:
                        GpuTexture::Vulkan {
                            view: full_view,
                            mip_views,
                            ..
                        },
                    sampler,
                    view,
                    layout,
                    kind,
                } => {
                    let image_view = match view {
                        TextureView::Full => *full_view,
                        TextureView::Mip(level) => mip_views
                            .get(*level as usize)
                            .copied()
                            .unwrap_or(*full_view),
                    };
                    let (ty, sampler) = match kind {
                        TextureBindingKind::Sampled => (
                            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                            match sampler {
                                GpuSampler::Vulkan { sampler, .. } => *sampler,
                                _ => vk::Sampler::null(),
                            },
                        ),
                        TextureBindingKind::Storage => {
                            (vk::DescriptorType::STORAGE_IMAGE, vk::Sampler::null())
                        }
                    };
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .image_view(image_view)
                            .sampler(sampler)
                            .image_layout(convert_layout(*layout)),
                    );
                    entries.push((*slot, ty, Info::Image(image_infos.len() - 1)));
                }
                other => {
                    log::warn!(
                        "VulkanBackend: foreign resource at slot {} ignored",
                        other.slot()
                    );
                }
            }
        }

        let descriptor_writes: Vec<vk::WriteDescriptorSet<'_>> = entries
            .iter()
            .map(|(slot, ty, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(*set)
                    .dst_binding(*slot)
                    .descriptor_type(*ty);
                match info {
                    Info::Buffer(i) => write.buffer_info(std::slice::from_ref(&buffer_infos[*i])),
                    Info::Image(i) => write.image_info(std::slice::from_ref(&image_infos[*i])),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&descriptor_writes, &[]) };
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .map_err(device_error("create fence"))?;
        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            fence,
        })
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        let fence = vk_fence(fence).ok_or_else(|| foreign_handle("fence"))?;
        match unsafe { self.device.wait_for_fences(&[fence], true, FENCE_TIMEOUT_NS) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                log::error!("VulkanBackend: fence wait timed out, the GPU may be hung");
                Err(GraphicsError::DeviceLost)
            }
            Err(e) => Err(device_error("wait for fence")(e)),
        }
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        let fence = vk_fence(fence).ok_or_else(|| foreign_handle("fence"))?;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(device_error("reset fence"))
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        vk_fence(fence)
            .is_some_and(|fence| unsafe { self.device.get_fence_status(fence) }.unwrap_or(false))
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(device_error("create semaphore"))?;
        Ok(GpuSemaphore::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn create_command_buffer(&self) -> Result<GpuCommandBuffer, GraphicsError> {
        let pool = command::create_command_pool(&self.device, self.queue_family)?;
        let buffer = match command::allocate_command_buffer(&self.device, pool) {
            Ok(buffer) => buffer,
            Err(e) => {
                unsafe { self.device.destroy_command_pool(pool, None) };
                return Err(e);
            }
        };
        Ok(GpuCommandBuffer::Vulkan {
            device: self.device.clone(),
            pool,
            buffer,
            deferred: Arc::clone(&self.deferred),
        })
    }

    fn begin_commands(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        let cmd = vk_command_buffer(cmd).ok_or_else(|| foreign_handle("command buffer"))?;
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(device_error("reset command buffer"))?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(device_error("begin command buffer"))
        }
    }

    fn end_commands(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError> {
        let cmd = vk_command_buffer(cmd).ok_or_else(|| foreign_handle("command buffer"))?;
        unsafe { self.device.end_command_buffer(cmd) }.map_err(device_error("end command buffer"))
    }

    fn submit(
        &self,
        cmd: &GpuCommandBuffer,
        wait: Option<&GpuSemaphore>,
        signal: Option<&GpuSemaphore>,
        fence: Option<&GpuFence>,
    ) -> Result<(), GraphicsError> {
        let command_buffers =
            [vk_command_buffer(cmd).ok_or_else(|| foreign_handle("command buffer"))?];
        let wait_semaphores: Vec<vk::Semaphore> = wait.and_then(vk_semaphore).into_iter().collect();
        let wait_stages =
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> =
            signal.and_then(vk_semaphore).into_iter().collect();
        let fence = fence.and_then(vk_fence).unwrap_or(vk::Fence::null());

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &[submit_info], fence) }
            .map_err(device_error("submit commands"))
    }

    fn configure_surface(&self, extent: Extent2d) -> Result<Extent2d, GraphicsError> {
        let queue = self.queue.lock();
        unsafe { self.device.device_wait_idle() }.map_err(device_error("wait for idle"))?;

        let mut slot = self.swapchain.lock();
        let old = slot.take();
        let old_handle = old
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |swapchain| swapchain.swapchain);
        let created = VulkanSwapchain::new(&self.surface_context(), extent, old_handle);
        if let Some(mut old) = old {
            old.destroy(&self.device, &self.swapchain_loader);
        }
        drop(queue);

        let swapchain = created?;
        let actual = swapchain.extent();
        *slot = Some(swapchain);
        Ok(actual)
    }

    fn surface_format(&self) -> TextureFormat {
        self.swapchain
            .lock()
            .as_ref()
            .and_then(|swapchain| texture_format_from_vk(swapchain.format))
            .unwrap_or(PREFERRED_SURFACE_FORMAT)
    }

    fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<u32, GraphicsError> {
        let semaphore = vk_semaphore(signal).ok_or_else(|| foreign_handle("semaphore"))?;
        let swapchain = self
            .swapchain
            .lock()
            .as_ref()
            .map(|swapchain| swapchain.swapchain)
            .ok_or(GraphicsError::SurfaceOutdated)?;

        // A suboptimal acquire still signals; present reports it.
        let (image_index, _suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(surface_error("acquire swapchain image"))?;
        Ok(image_index)
    }

    fn present(&self, image_index: u32, wait: &GpuSemaphore) -> Result<(), GraphicsError> {
        let wait_semaphores = [vk_semaphore(wait).ok_or_else(|| foreign_handle("semaphore"))?];
        let swapchains = [self
            .swapchain
            .lock()
            .as_ref()
            .map(|swapchain| swapchain.swapchain)
            .ok_or(GraphicsError::SurfaceOutdated)?];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.queue.lock();
        match unsafe { self.swapchain_loader.queue_present(*queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => Err(GraphicsError::SurfaceOutdated),
            Err(e) => Err(surface_error("present")(e)),
        }
    }

    fn cmd_transition_texture(
        &self,
        cmd: &GpuCommandBuffer,
        texture: &GpuTexture,
        from: TextureLayout,
        to: TextureLayout,
    ) {
        let (Some(cmd), GpuTexture::Vulkan { image, aspect, .. }) = (vk_command_buffer(cmd), texture)
        else {
            return;
        };
        barriers::transition_image(&self.device, cmd, *image, *aspect, from, to);
    }

    fn cmd_transition_surface(
        &self,
        cmd: &GpuCommandBuffer,
        image_index: u32,
        from: TextureLayout,
        to: TextureLayout,
    ) {
        let Some(cmd) = vk_command_buffer(cmd) else {
            return;
        };
        let Some(image) = self
            .swapchain
            .lock()
            .as_ref()
            .and_then(|swapchain| swapchain.images.get(image_index as usize).copied())
        else {
            log::warn!("VulkanBackend: no swapchain image {image_index} to transition");
            return;
        };
        // A presented image is cleared before reuse, its contents can be
        // discarded.
        let from = if from == TextureLayout::Present {
            TextureLayout::Undefined
        } else {
            from
        };
        barriers::transition_image(
            &self.device,
            cmd,
            image,
            vk::ImageAspectFlags::COLOR,
            from,
            to,
        );
    }

    fn cmd_begin_rendering(&self, cmd: &GpuCommandBuffer, info: &RenderingInfo<'_>) {
        let Some(cmd) = vk_command_buffer(cmd) else {
            return;
        };
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: info.extent.width,
                height: info.extent.height,
            },
        };

        match &info.target {
            RenderTarget::Textures { color, depth } => {
                let color_attachments: Vec<vk::RenderingAttachmentInfo<'_>> = color
                    .iter()
                    .filter_map(|a| {
                        rendering_attachment(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    })
                    .map(|(info, _)| info)
                    .collect();
                let depth_attachment = depth.as_ref().and_then(|a| {
                    rendering_attachment(a, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                });

                let mut rendering_info = vk::RenderingInfo::default()
                    .render_area(render_area)
                    .layer_count(1)
                    .color_attachments(&color_attachments);
                if let Some((depth_info, has_stencil)) = &depth_attachment {
                    rendering_info = rendering_info.depth_attachment(depth_info);
                    if *has_stencil {
                        rendering_info = rendering_info.stencil_attachment(depth_info);
                    }
                }
                unsafe {
                    self.dynamic_rendering
                        .cmd_begin_rendering(cmd, &rendering_info)
                };
            }
            RenderTarget::Surface {
                image_index,
                clear_value,
            } => {
                let Some(view) = self
                    .swapchain
                    .lock()
                    .as_ref()
                    .and_then(|swapchain| swapchain.views.get(*image_index as usize).copied())
                else {
                    log::warn!("VulkanBackend: no swapchain image {image_index} to render to");
                    return;
                };
                let color_attachments = [vk::RenderingAttachmentInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(convert_clear_value(*clear_value))];
                let rendering_info = vk::RenderingInfo::default()
                    .render_area(render_area)
                    .layer_count(1)
                    .color_attachments(&color_attachments);
                unsafe {
                    self.dynamic_rendering
                        .cmd_begin_rendering(cmd, &rendering_info)
                };
            }
        }
    }

    fn cmd_end_rendering(&self, cmd: &GpuCommandBuffer) {
        if let Some(cmd) = vk_command_buffer(cmd) {
            unsafe { self.dynamic_rendering.cmd_end_rendering(cmd) };
        }
    }

    fn cmd_bind_pipeline(&self, cmd: &GpuCommandBuffer, pipeline: &GpuPipeline) {
        if let (
            Some(cmd),
            GpuPipeline::Vulkan {
                pipeline,
                bind_point,
                ..
            },
        ) = (vk_command_buffer(cmd), pipeline)
        {
            unsafe { self.device.cmd_bind_pipeline(cmd, *bind_point, *pipeline) };
        }
    }

    fn cmd_set_viewport(&self, cmd: &GpuCommandBuffer, extent: Extent2d) {
        let Some(cmd) = vk_command_buffer(cmd) else {
            return;
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        unsafe {
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_bind_descriptor_table(
        &self,
        cmd: &GpuCommandBuffer,
        pipeline: &GpuPipeline,
        table: &GpuDescriptorTable,
    ) {
        if let (
            Some(cmd),
            GpuPipeline::Vulkan {
                layout, bind_point, ..
            },
            GpuDescriptorTable::Vulkan { set, .. },
        ) = (vk_command_buffer(cmd), pipeline, table)
        {
            unsafe {
                self.device
                    .cmd_bind_descriptor_sets(cmd, *bind_point, *layout, 0, &[*set], &[]);
            }
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: &GpuCommandBuffer,
        pipeline: &GpuPipeline,
        stages: ShaderStageFlags,
        data: &[u8],
    ) {
        if let (Some(cmd), GpuPipeline::Vulkan { layout, .. }) = (vk_command_buffer(cmd), pipeline)
        {
            unsafe {
                self.device
                    .cmd_push_constants(cmd, *layout, convert_shader_stages(stages), 0, data);
            }
        }
    }

    fn cmd_draw(
        &self,
        cmd: &GpuCommandBuffer,
        vertex_buffer: &GpuBuffer,
        vertex_count: u32,
        instance_count: u32,
    ) {
        if let (Some(cmd), Some(vertex_buffer)) = (vk_command_buffer(cmd), vk_buffer(vertex_buffer))
        {
            unsafe {
                self.device
                    .cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer], &[0]);
                self.device
                    .cmd_draw(cmd, vertex_count, instance_count, 0, 0);
            }
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: &GpuCommandBuffer,
        vertex_buffer: &GpuBuffer,
        index_buffer: &GpuBuffer,
        index_count: u32,
        instance_count: u32,
    ) {
        if let (Some(cmd), Some(vertex_buffer), Some(index_buffer)) = (
            vk_command_buffer(cmd),
            vk_buffer(vertex_buffer),
            vk_buffer(index_buffer),
        ) {
            unsafe {
                self.device
                    .cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer], &[0]);
                self.device
                    .cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
                self.device
                    .cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, 0);
            }
        }
    }

    fn cmd_dispatch(&self, cmd: &GpuCommandBuffer, x: u32, y: u32, z: u32) {
        if let Some(cmd) = vk_command_buffer(cmd) {
            unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
        }
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        let _queue = self.queue.lock();
        unsafe { self.device.device_wait_idle() }.map_err(device_error("wait for idle"))
    }

    unsafe fn advance_frame(&self) {
        unsafe { self.deferred.advance_frame() };
    }
}

static_assertions::assert_impl_all!(VulkanBackend: Send, Sync);
