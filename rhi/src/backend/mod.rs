//! GPU backend abstraction layer.
//!
//! This module provides a narrow trait-based abstraction over GPU APIs. The
//! [`GraphicsDevice`](crate::GraphicsDevice) drives a backend through
//! [`GpuBackend`] and never touches API handles directly.
//!
//! # Available Backends
//!
//! - `dummy` (default): No GPU. Records commands into an inspectable log,
//!   simulates a swapchain and GPU latency. Used by tests.
//! - `vulkan-backend`: Native Vulkan backend using ash.
//!
//! # Architecture
//!
//! Each resource kind has a handle enum with one variant per backend. A
//! backend only ever receives handles it created itself.

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use std::sync::Arc;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::Allocation;
#[cfg(feature = "vulkan-backend")]
use parking_lot::Mutex;

use crate::config::DeviceParameters;
use crate::error::GraphicsError;
use crate::shader::{ShaderDescriptor, ShaderStageFlags};
use crate::types::{
    BufferDescriptor, ClearValue, CompareOp, CullMode, Extent2d, LoadOp, SamplerDescriptor,
    StoreOp, TextureDescriptor, TextureFormat, TextureLayout,
};

pub use dummy::DummyBackend;
#[cfg(feature = "vulkan-backend")]
use vulkan::deferred::{DeferredDestructor, DeferredResource};

/// Handle to a GPU buffer resource.
#[allow(clippy::large_enum_variant)]
pub enum GpuBuffer {
    /// Dummy backend buffer (host memory).
    Dummy(dummy::DummyBuffer),
    /// Vulkan backend buffer
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        size: u64,
        deferred: Arc<DeferredDestructor>,
    },
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(buffer) => f.debug_tuple("GpuBuffer::Dummy").field(buffer).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU texture resource.
#[allow(clippy::large_enum_variant)]
pub enum GpuTexture {
    /// Dummy backend texture.
    Dummy(dummy::DummyTexture),
    /// Vulkan backend texture
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        image: vk::Image,
        /// View over every mip level and layer.
        view: vk::ImageView,
        /// One view per mip level, over every layer.
        mip_views: Vec<vk::ImageView>,
        allocation: Mutex<Option<Allocation>>,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        extent: vk::Extent3D,
        mip_levels: u32,
        layers: u32,
        deferred: Arc<DeferredDestructor>,
    },
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(texture) => f.debug_tuple("GpuTexture::Dummy").field(texture).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                image,
                view,
                format,
                extent,
                ..
            } => f
                .debug_struct("GpuTexture::Vulkan")
                .field("image", image)
                .field("view", view)
                .field("format", format)
                .field("extent", extent)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU sampler resource.
pub enum GpuSampler {
    /// Dummy backend (no GPU allocation)
    Dummy,
    /// Vulkan backend sampler
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        sampler: vk::Sampler,
        deferred: Arc<DeferredDestructor>,
    },
}

impl std::fmt::Debug for GpuSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy => write!(f, "GpuSampler::Dummy"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { sampler, .. } => f
                .debug_struct("GpuSampler::Vulkan")
                .field("sampler", sampler)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a created shader: stage modules plus the binding layout
/// derived from its reflection.
pub enum GpuShader {
    /// Dummy backend (no GPU object)
    Dummy,
    /// Vulkan backend shader
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        modules: Vec<(crate::shader::ShaderStage, vk::ShaderModule)>,
        set_layout: vk::DescriptorSetLayout,
        pipeline_layout: vk::PipelineLayout,
        deferred: Arc<DeferredDestructor>,
    },
}

impl std::fmt::Debug for GpuShader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy => write!(f, "GpuShader::Dummy"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                modules,
                pipeline_layout,
                ..
            } => f
                .debug_struct("GpuShader::Vulkan")
                .field("modules", modules)
                .field("pipeline_layout", pipeline_layout)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a graphics or compute pipeline.
pub enum GpuPipeline {
    /// Dummy backend pipeline.
    Dummy {
        /// Whether the pipeline binds to the compute bind point.
        compute: bool,
    },
    /// Vulkan backend pipeline
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pipeline: vk::Pipeline,
        /// Layout owned by the shader; not destroyed with the pipeline.
        layout: vk::PipelineLayout,
        bind_point: vk::PipelineBindPoint,
        deferred: Arc<DeferredDestructor>,
    },
}

impl std::fmt::Debug for GpuPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { compute } => f
                .debug_struct("GpuPipeline::Dummy")
                .field("compute", compute)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                pipeline,
                bind_point,
                ..
            } => f
                .debug_struct("GpuPipeline::Vulkan")
                .field("pipeline", pipeline)
                .field("bind_point", bind_point)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a shader-visible descriptor table.
pub enum GpuDescriptorTable {
    /// Dummy backend table.
    Dummy {
        /// Number of update calls applied to this table.
        updates: std::sync::atomic::AtomicUsize,
    },
    /// Vulkan backend descriptor set
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
        deferred: Arc<DeferredDestructor>,
    },
}

impl std::fmt::Debug for GpuDescriptorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { updates } => f
                .debug_struct("GpuDescriptorTable::Dummy")
                .field("updates", updates)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { set, .. } => f
                .debug_struct("GpuDescriptorTable::Vulkan")
                .field("set", set)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU fence for CPU-GPU synchronization.
pub enum GpuFence {
    /// Dummy backend fence, signaled by the simulated GPU.
    Dummy(Arc<dummy::DummySignal>),
    /// Vulkan backend fence
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        fence: vk::Fence,
    },
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(signal) => f.debug_tuple("GpuFence::Dummy").field(signal).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU semaphore for GPU-GPU synchronization.
pub enum GpuSemaphore {
    /// Dummy backend (no GPU semaphore)
    Dummy,
    /// Vulkan backend semaphore
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl std::fmt::Debug for GpuSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy => write!(f, "GpuSemaphore::Dummy"),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("GpuSemaphore::Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a command recording stream.
pub enum GpuCommandBuffer {
    /// Dummy backend command log.
    Dummy(dummy::DummyCommandBuffer),
    /// Vulkan backend command buffer
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::CommandPool,
        buffer: vk::CommandBuffer,
        deferred: Arc<DeferredDestructor>,
    },
}

impl std::fmt::Debug for GpuCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(commands) => f
                .debug_tuple("GpuCommandBuffer::Dummy")
                .field(commands)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, .. } => f
                .debug_struct("GpuCommandBuffer::Vulkan")
                .field("buffer", buffer)
                .finish_non_exhaustive(),
        }
    }
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocation,
            deferred,
            ..
        } = self
        {
            deferred.queue(DeferredResource::Buffer {
                device: device.clone(),
                buffer: *buffer,
                allocation: allocation.lock().take(),
            });
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let GpuTexture::Vulkan {
            device,
            image,
            view,
            mip_views,
            allocation,
            deferred,
            ..
        } = self
        {
            let mut views = std::mem::take(mip_views);
            views.push(*view);
            deferred.queue(DeferredResource::Texture {
                device: device.clone(),
                image: *image,
                views,
                allocation: allocation.lock().take(),
            });
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSampler {
    fn drop(&mut self) {
        if let GpuSampler::Vulkan {
            device,
            sampler,
            deferred,
        } = self
        {
            deferred.queue(DeferredResource::Sampler {
                device: device.clone(),
                sampler: *sampler,
            });
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuShader {
    fn drop(&mut self) {
        if let GpuShader::Vulkan {
            device,
            modules,
            set_layout,
            pipeline_layout,
            deferred,
        } = self
        {
            deferred.queue(DeferredResource::Shader {
                device: device.clone(),
                modules: modules.drain(..).map(|(_, module)| module).collect(),
                set_layout: *set_layout,
                pipeline_layout: *pipeline_layout,
            });
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuPipeline {
    fn drop(&mut self) {
        if let GpuPipeline::Vulkan {
            device,
            pipeline,
            deferred,
            ..
        } = self
        {
            deferred.queue(DeferredResource::Pipeline {
                device: device.clone(),
                pipeline: *pipeline,
            });
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuDescriptorTable {
    fn drop(&mut self) {
        if let GpuDescriptorTable::Vulkan {
            device,
            pool,
            set,
            deferred,
        } = self
        {
            deferred.queue(DeferredResource::DescriptorSet {
                device: device.clone(),
                pool: *pool,
                set: *set,
            });
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuCommandBuffer {
    fn drop(&mut self) {
        if let GpuCommandBuffer::Vulkan {
            device,
            pool,
            buffer,
            deferred,
        } = self
        {
            deferred.queue(DeferredResource::CommandBuffers {
                device: device.clone(),
                command_pool: *pool,
                buffers: vec![*buffer],
            });
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { device, fence } = self {
            unsafe {
                device.destroy_fence(*fence, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSemaphore {
    fn drop(&mut self) {
        if let GpuSemaphore::Vulkan { device, semaphore } = self {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

// ============================================================================
// Recording and binding descriptions
// ============================================================================

/// Which subresources a texture binding covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureView {
    /// Every mip level.
    Full,
    /// A single mip level.
    Mip(u32),
}

/// How a texture is bound to a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureBindingKind {
    /// Combined image + sampler.
    Sampled,
    /// Storage image.
    Storage,
}

/// One write into a descriptor table.
#[derive(Debug)]
pub enum DescriptorWrite<'a> {
    /// Bind a buffer range.
    Buffer {
        slot: u32,
        buffer: &'a GpuBuffer,
        offset: u64,
        range: u64,
        storage: bool,
    },
    /// Bind a texture.
    Texture {
        slot: u32,
        texture: &'a GpuTexture,
        sampler: &'a GpuSampler,
        view: TextureView,
        layout: TextureLayout,
        kind: TextureBindingKind,
    },
}

impl DescriptorWrite<'_> {
    /// Slot written.
    pub fn slot(&self) -> u32 {
        match self {
            Self::Buffer { slot, .. } | Self::Texture { slot, .. } => *slot,
        }
    }
}

/// Fixed-function state of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    /// Rasterization pipeline.
    Graphics {
        color_formats: Vec<TextureFormat>,
        depth_format: Option<TextureFormat>,
        cull_mode: CullMode,
        depth_compare_op: CompareOp,
    },
    /// Compute pipeline.
    Compute,
}

/// One texture attachment of a rendering scope.
#[derive(Debug)]
pub struct RenderingAttachment<'a> {
    pub texture: &'a GpuTexture,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: ClearValue,
}

/// Where a rendering scope draws to.
#[derive(Debug)]
pub enum RenderTarget<'a> {
    /// Offscreen textures.
    Textures {
        color: Vec<RenderingAttachment<'a>>,
        depth: Option<RenderingAttachment<'a>>,
    },
    /// The acquired swapchain image.
    Surface {
        image_index: u32,
        clear_value: ClearValue,
    },
}

/// Parameters of a rendering scope.
#[derive(Debug)]
pub struct RenderingInfo<'a> {
    pub extent: Extent2d,
    pub target: RenderTarget<'a>,
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// All recording methods take the command buffer explicitly; the backend
/// keeps no notion of a "current" frame.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Limits of the device.
    fn parameters(&self) -> DeviceParameters;

    /// Create a buffer resource.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    /// Write data into a host-visible buffer.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Create a texture resource with every mip level and layer.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError>;

    /// Upload the base level of a texture and leave it shader-readable.
    ///
    /// Blocks until the upload completes.
    fn write_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    /// Create a sampler resource.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError>;

    /// Create stage modules and the binding layout of a shader.
    fn create_shader(&self, descriptor: &ShaderDescriptor) -> Result<GpuShader, GraphicsError>;

    /// Create a pipeline for a shader.
    fn create_pipeline(
        &self,
        shader: &GpuShader,
        descriptor: &ShaderDescriptor,
        state: &PipelineState,
    ) -> Result<GpuPipeline, GraphicsError>;

    /// Allocate an empty descriptor table laid out for a shader.
    fn create_descriptor_table(&self, shader: &GpuShader)
    -> Result<GpuDescriptorTable, GraphicsError>;

    /// Apply all writes to a table in one update.
    fn update_descriptor_table(&self, table: &GpuDescriptorTable, writes: &[DescriptorWrite<'_>]);

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError>;

    /// Wait for a fence to be signaled.
    fn wait_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError>;

    /// Reset a fence to the unsignaled state.
    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError>;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> bool;

    /// Create a semaphore for GPU-GPU synchronization.
    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError>;

    /// Allocate a command buffer.
    fn create_command_buffer(&self) -> Result<GpuCommandBuffer, GraphicsError>;

    /// Reset a command buffer and begin recording.
    fn begin_commands(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError>;

    /// Finish recording.
    fn end_commands(&self, cmd: &GpuCommandBuffer) -> Result<(), GraphicsError>;

    /// Submit recorded commands.
    ///
    /// `wait` is waited at the color-attachment-output stage.
    fn submit(
        &self,
        cmd: &GpuCommandBuffer,
        wait: Option<&GpuSemaphore>,
        signal: Option<&GpuSemaphore>,
        fence: Option<&GpuFence>,
    ) -> Result<(), GraphicsError>;

    /// (Re)create the swapchain, returning the extent actually used.
    fn configure_surface(&self, extent: Extent2d) -> Result<Extent2d, GraphicsError>;

    /// Format of swapchain images.
    fn surface_format(&self) -> TextureFormat;

    /// Acquire the next swapchain image, signaling `signal` when it is ready.
    ///
    /// Returns [`GraphicsError::SurfaceOutdated`] if the swapchain must be
    /// recreated first.
    fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<u32, GraphicsError>;

    /// Queue an image for presentation after `wait` is signaled.
    ///
    /// Returns [`GraphicsError::SurfaceOutdated`] if the swapchain is out of
    /// date or suboptimal.
    fn present(&self, image_index: u32, wait: &GpuSemaphore) -> Result<(), GraphicsError>;

    /// Record a layout transition of a texture.
    fn cmd_transition_texture(
        &self,
        cmd: &GpuCommandBuffer,
        texture: &GpuTexture,
        from: TextureLayout,
        to: TextureLayout,
    );

    /// Record a layout transition of a swapchain image.
    fn cmd_transition_surface(
        &self,
        cmd: &GpuCommandBuffer,
        image_index: u32,
        from: TextureLayout,
        to: TextureLayout,
    );

    /// Begin a dynamic rendering scope.
    fn cmd_begin_rendering(&self, cmd: &GpuCommandBuffer, info: &RenderingInfo<'_>);

    /// End the current rendering scope.
    fn cmd_end_rendering(&self, cmd: &GpuCommandBuffer);

    /// Bind a pipeline.
    fn cmd_bind_pipeline(&self, cmd: &GpuCommandBuffer, pipeline: &GpuPipeline);

    /// Set viewport and scissor to cover `extent`.
    fn cmd_set_viewport(&self, cmd: &GpuCommandBuffer, extent: Extent2d);

    /// Bind a descriptor table at set 0.
    fn cmd_bind_descriptor_table(
        &self,
        cmd: &GpuCommandBuffer,
        pipeline: &GpuPipeline,
        table: &GpuDescriptorTable,
    );

    /// Upload push constants.
    fn cmd_push_constants(
        &self,
        cmd: &GpuCommandBuffer,
        pipeline: &GpuPipeline,
        stages: ShaderStageFlags,
        data: &[u8],
    );

    /// Draw non-indexed vertices from `vertex_buffer`.
    fn cmd_draw(
        &self,
        cmd: &GpuCommandBuffer,
        vertex_buffer: &GpuBuffer,
        vertex_count: u32,
        instance_count: u32,
    );

    /// Draw with 32-bit indices.
    fn cmd_draw_indexed(
        &self,
        cmd: &GpuCommandBuffer,
        vertex_buffer: &GpuBuffer,
        index_buffer: &GpuBuffer,
        index_count: u32,
        instance_count: u32,
    );

    /// Dispatch compute work groups.
    fn cmd_dispatch(&self, cmd: &GpuCommandBuffer, x: u32, y: u32, z: u32);

    /// Block until the GPU is idle.
    fn wait_idle(&self) -> Result<(), GraphicsError>;

    /// Advance deferred destruction by one frame.
    ///
    /// # Safety
    ///
    /// The caller must ensure the GPU has finished every submission older
    /// than the frames still in flight.
    unsafe fn advance_frame(&self);
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}
