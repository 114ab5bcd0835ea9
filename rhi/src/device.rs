//! Graphics device.
//!
//! The [`GraphicsDevice`] creates GPU resources, records passes into the
//! current frame's command stream, and paces frames against the GPU. It is
//! owned by the render thread; other threads reach it through
//! [`RenderThread`](crate::RenderThread).
//!
//! # Frame cycle
//!
//! ```text
//! begin_frame()   rebuild swapchain if dirty, acquire image, begin commands
//!   begin_pipeline() .. draw() .. end_pipeline()
//!   begin_compute_pipeline() .. dispatch() .. end_compute_pipeline()
//! end_frame()     submit waiting on "presentable", signal "render complete"
//! present()       present, then wait for the slot that is reused next
//! ```

use std::sync::{Arc, Weak};

use crate::backend::{
    GpuBackend, GpuCommandBuffer, PipelineState, RenderTarget, RenderingAttachment,
    RenderingInfo,
};
use crate::compute::ComputeState;
use crate::config::DeviceParameters;
use crate::error::GraphicsError;
use crate::frame::{FrameSlot, FrameState};
use crate::materials::GpuMaterial;
use crate::resources::{
    Buffer, Pipeline, PipelineDescriptor, PipelineKind, RenderPass, Sampler, Texture,
};
use crate::shader::{Shader, ShaderDescriptor, ShaderStageFlags, ShaderType};
use crate::types::{
    AttachmentDescriptor, BufferDescriptor, BufferType, ClearValue, Extent2d,
    RenderPassDescriptor, SamplerDescriptor, TextureDescriptor, TextureLayout,
};

/// How many times `begin_frame` rebuilds an out-of-date swapchain before
/// giving up.
const MAX_ACQUIRE_ATTEMPTS: u32 = 3;

/// The pass currently open on the frame's command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivePass {
    Graphics { offscreen: bool },
    Compute,
}

/// Owner of the GPU backend and the frame-in-flight state.
///
/// All methods are meant to be called from the render thread. Calling an
/// operation in the wrong [`FrameState`] is a programming error and panics.
pub struct GraphicsDevice {
    frames: Vec<FrameSlot>,
    frame_counter: u64,
    state: FrameState,
    active_pass: Option<ActivePass>,
    swapchain_dirty: bool,
    requested_extent: Extent2d,
    surface_extent: Extent2d,
    image_index: u32,
    /// Textures moved into attachment or general layout by the open pass,
    /// with the layout they return to when it ends.
    transitioned: Vec<(Weak<Texture>, TextureLayout)>,
    default_sampler: Arc<Sampler>,
    parameters: DeviceParameters,
    backend: Arc<dyn GpuBackend>,
}

impl GraphicsDevice {
    /// Create a device that keeps at most `frames_in_flight` frames queued
    /// on the GPU and presents at `extent`.
    ///
    /// # Errors
    ///
    /// Returns an error if `frames_in_flight` is zero or the backend fails
    /// to create the swapchain or per-frame objects.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        frames_in_flight: usize,
        extent: Extent2d,
    ) -> Result<Self, GraphicsError> {
        if frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames in flight must be at least 1".to_string(),
            ));
        }

        let parameters = backend.parameters();
        let requested_extent = extent.clamped();
        let surface_extent = backend.configure_surface(requested_extent)?;

        let frames = (0..frames_in_flight)
            .map(|_| FrameSlot::new(backend.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let sampler_descriptor = SamplerDescriptor::new()
            .with_name("default")
            .with_anisotropy(parameters.max_anisotropy);
        let default_sampler = Arc::new(Sampler::new(
            sampler_descriptor.clone(),
            backend.create_sampler(&sampler_descriptor)?,
        ));

        log::info!(
            "GraphicsDevice: created on '{}' ({} backend), {} frames in flight, surface {}",
            parameters.name,
            backend.name(),
            frames_in_flight,
            surface_extent
        );

        Ok(Self {
            frames,
            frame_counter: 0,
            state: FrameState::Idle,
            active_pass: None,
            swapchain_dirty: false,
            requested_extent,
            surface_extent,
            image_index: 0,
            transitioned: Vec::new(),
            default_sampler,
            parameters,
            backend,
        })
    }

    // ========================================================================
    // Resource creation
    // ========================================================================

    /// Create a buffer, optionally filled with `data`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] for a zero size or data
    /// larger than the buffer.
    pub fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer '{}' has zero size",
                descriptor.name
            )));
        }
        if let Some(data) = data
            && data.len() as u64 > descriptor.size
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "initial data of {} bytes exceeds buffer '{}' size {}",
                data.len(),
                descriptor.name,
                descriptor.size
            )));
        }

        let gpu_handle = self.backend.create_buffer(descriptor)?;
        if let Some(data) = data {
            self.backend.write_buffer(&gpu_handle, 0, data)?;
        }

        log::trace!(
            "GraphicsDevice: created buffer '{}', size={}",
            descriptor.name,
            descriptor.size
        );
        Ok(Arc::new(Buffer::new(
            Arc::clone(&self.backend),
            descriptor.clone(),
            gpu_handle,
        )))
    }

    /// Create a texture.
    ///
    /// Without a sampler the texture shares the device's default sampler.
    /// With `data` the base level is uploaded and the texture starts
    /// shader-readable; otherwise its contents are undefined.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] for an invalid descriptor
    /// or data of the wrong size.
    pub fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        sampler: Option<Arc<Sampler>>,
        data: Option<&[u8]>,
    ) -> Result<Arc<Texture>, GraphicsError> {
        descriptor.validate().map_err(GraphicsError::InvalidParameter)?;
        if let Some(data) = data
            && data.len() as u64 != descriptor.size_bytes()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture '{}' expects {} bytes of data, got {}",
                descriptor.name,
                descriptor.size_bytes(),
                data.len()
            )));
        }

        let gpu_handle = self.backend.create_texture(descriptor)?;
        let layout = match data {
            Some(data) => {
                self.backend.write_texture(&gpu_handle, descriptor, data)?;
                TextureLayout::ShaderReadOnly
            }
            None => TextureLayout::Undefined,
        };

        log::trace!(
            "GraphicsDevice: created texture '{}' {}x{}, {} mips, {:?}",
            descriptor.name,
            descriptor.width,
            descriptor.height,
            descriptor.mip_levels(),
            descriptor.format
        );
        let sampler = sampler.unwrap_or_else(|| Arc::clone(&self.default_sampler));
        Ok(Arc::new(Texture::new(
            descriptor.clone(),
            gpu_handle,
            sampler,
            layout,
        )))
    }

    /// Create a sampler. Anisotropy is clamped to the device limit.
    pub fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<Arc<Sampler>, GraphicsError> {
        let mut descriptor = descriptor.clone();
        descriptor.max_anisotropy = descriptor
            .max_anisotropy
            .min(self.parameters.max_anisotropy);
        let gpu_handle = self.backend.create_sampler(&descriptor)?;
        log::trace!("GraphicsDevice: created sampler '{}'", descriptor.name);
        Ok(Arc::new(Sampler::new(descriptor, gpu_handle)))
    }

    /// Create a shader from compiled stages.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if a stage the shader
    /// type needs has no code.
    pub fn create_shader(&self, descriptor: ShaderDescriptor) -> Result<Arc<Shader>, GraphicsError> {
        for stage in descriptor.shader_type.stages() {
            if descriptor.binary(*stage).is_none() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "shader '{}' from '{}' has no {:?} stage",
                    descriptor.name, descriptor.path, stage
                )));
            }
        }
        let gpu_handle = self.backend.create_shader(&descriptor)?;
        let shader = Arc::new(Shader::new(descriptor, gpu_handle));
        log::debug!(
            "GraphicsDevice: created shader '{}' ({:?})",
            shader.name(),
            shader.id()
        );
        Ok(shader)
    }

    /// Create a render pass.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if the extent is empty, a
    /// color attachment has a depth format or the depth attachment doesn't.
    pub fn create_render_pass(
        &self,
        descriptor: RenderPassDescriptor,
    ) -> Result<Arc<RenderPass>, GraphicsError> {
        if descriptor.extent.is_empty() {
            return Err(GraphicsError::InvalidParameter(format!(
                "render pass '{}' has an empty extent",
                descriptor.name
            )));
        }
        if let Some(attachment) = descriptor
            .color_attachments
            .iter()
            .find(|a| a.texture.format().is_depth_stencil())
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "render pass '{}': color attachment '{}' has a depth format",
                descriptor.name,
                attachment.texture.name()
            )));
        }
        if let Some(depth) = &descriptor.depth_stencil_attachment
            && !depth.texture.format().is_depth_stencil()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "render pass '{}': depth attachment '{}' has a color format",
                descriptor.name,
                depth.texture.name()
            )));
        }
        Ok(Arc::new(RenderPass::new(descriptor)))
    }

    /// Create a graphics or compute pipeline.
    ///
    /// On-screen pipelines render into the swapchain format regardless of
    /// their pass's attachments.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if the shader type doesn't
    /// match the pipeline kind.
    pub fn create_pipeline(
        &self,
        descriptor: PipelineDescriptor,
    ) -> Result<Arc<Pipeline>, GraphicsError> {
        let shader = &descriptor.shader;
        let state = match &descriptor.kind {
            PipelineKind::Graphics {
                pass,
                cull_mode,
                depth_compare_op,
                offscreen,
            } => {
                if shader.shader_type() != ShaderType::Fx {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "graphics pipeline needs an Fx shader, '{}' is {:?}",
                        shader.name(),
                        shader.shader_type()
                    )));
                }
                let (color_formats, depth_format) = if *offscreen {
                    (
                        pass.descriptor().color_formats(),
                        pass.descriptor().depth_format(),
                    )
                } else {
                    (vec![self.backend.surface_format()], None)
                };
                PipelineState::Graphics {
                    color_formats,
                    depth_format,
                    cull_mode: *cull_mode,
                    depth_compare_op: *depth_compare_op,
                }
            }
            PipelineKind::Compute { .. } => {
                if shader.shader_type() != ShaderType::Compute {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "compute pipeline needs a Compute shader, '{}' is {:?}",
                        shader.name(),
                        shader.shader_type()
                    )));
                }
                PipelineState::Compute
            }
        };

        let gpu_handle =
            self.backend
                .create_pipeline(shader.gpu_handle(), shader.descriptor(), &state)?;
        log::debug!(
            "GraphicsDevice: created {} pipeline for '{}'",
            if matches!(state, PipelineState::Compute) {
                "compute"
            } else {
                "graphics"
            },
            shader.name()
        );
        Ok(Arc::new(Pipeline::new(descriptor, gpu_handle)))
    }

    /// Create an empty binding table for `shader`.
    pub fn create_gpu_material(
        &self,
        shader: &Arc<Shader>,
    ) -> Result<Arc<GpuMaterial>, GraphicsError> {
        let table = self.backend.create_descriptor_table(shader.gpu_handle())?;
        Ok(Arc::new(GpuMaterial::new(
            Arc::clone(&self.backend),
            Arc::clone(shader),
            table,
            self.parameters.min_uniform_buffer_alignment,
        )))
    }

    // ========================================================================
    // Frame cycle
    // ========================================================================

    /// Start a frame: rebuild the swapchain if a resize is pending, select
    /// the next slot, begin its command stream and acquire an image.
    ///
    /// An out-of-date swapchain reported by acquisition is rebuilt and
    /// acquisition retried within this call. Returns `Ok(false)` if it is
    /// still out of date after [`MAX_ACQUIRE_ATTEMPTS`] rebuilds: the frame
    /// is skipped, the device stays [`FrameState::Idle`] and the next call
    /// rebuilds again.
    ///
    /// # Panics
    ///
    /// Panics unless the device is [`FrameState::Idle`].
    pub fn begin_frame(&mut self) -> Result<bool, GraphicsError> {
        assert_eq!(
            self.state,
            FrameState::Idle,
            "GraphicsDevice: begin_frame called while {:?}",
            self.state
        );

        if self.swapchain_dirty {
            self.rebuild_swapchain()?;
        }

        // The slot's fence was waited by the previous present.
        let slot = self.slot_of(self.frame_counter + 1);
        self.backend.begin_commands(&self.frames[slot].commands)?;

        let image_index = match self.acquire(slot) {
            Ok(Some(index)) => index,
            Ok(None) => {
                self.backend.end_commands(&self.frames[slot].commands)?;
                self.swapchain_dirty = true;
                log::warn!(
                    "GraphicsDevice: swapchain still out of date after {} rebuilds, skipping frame",
                    MAX_ACQUIRE_ATTEMPTS
                );
                return Ok(false);
            }
            Err(e) => {
                self.backend.end_commands(&self.frames[slot].commands)?;
                return Err(e);
            }
        };

        self.frame_counter += 1;
        self.image_index = image_index;
        self.state = FrameState::Recording;
        Ok(true)
    }

    /// Acquire the next swapchain image for `slot`, rebuilding an
    /// out-of-date swapchain between attempts. `None` if every attempt was
    /// out of date.
    fn acquire(&mut self, slot: usize) -> Result<Option<u32>, GraphicsError> {
        let mut attempts = 0;
        loop {
            match self
                .backend
                .acquire_next_image(&self.frames[slot].presentable)
            {
                Ok(index) => return Ok(Some(index)),
                Err(GraphicsError::SurfaceOutdated) if attempts < MAX_ACQUIRE_ATTEMPTS => {
                    attempts += 1;
                    log::warn!(
                        "GraphicsDevice: swapchain out of date on acquire, rebuilding (attempt {})",
                        attempts
                    );
                    self.rebuild_swapchain()?;
                }
                Err(GraphicsError::SurfaceOutdated) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Close the frame's command stream and submit it.
    ///
    /// # Panics
    ///
    /// Panics unless the device is [`FrameState::Recording`] with no open
    /// pass.
    pub fn end_frame(&mut self) -> Result<(), GraphicsError> {
        assert_eq!(
            self.state,
            FrameState::Recording,
            "GraphicsDevice: end_frame called while {:?}",
            self.state
        );
        assert!(
            self.active_pass.is_none(),
            "GraphicsDevice: end_frame called inside a {:?} pass",
            self.active_pass
        );

        let frame = &self.frames[self.current_slot()];
        self.backend.end_commands(&frame.commands)?;
        self.backend.reset_fence(&frame.fence)?;
        self.backend.submit(
            &frame.commands,
            Some(&frame.presentable),
            Some(&frame.render_complete),
            Some(&frame.fence),
        )?;
        self.state = FrameState::Submitted;
        Ok(())
    }

    /// Present the submitted frame and wait until the slot used next is
    /// free, so at most `frames_in_flight` frames are queued.
    ///
    /// An out-of-date swapchain is marked for rebuild on the next
    /// [`begin_frame`](Self::begin_frame) instead of being reported. Other
    /// present errors are returned after the wait; the device is
    /// [`FrameState::Idle`] either way.
    ///
    /// # Panics
    ///
    /// Panics unless the device is [`FrameState::Submitted`].
    pub fn present(&mut self) -> Result<(), GraphicsError> {
        assert_eq!(
            self.state,
            FrameState::Submitted,
            "GraphicsDevice: present called while {:?}",
            self.state
        );

        // The submission stands whether or not presenting succeeds.
        self.state = FrameState::Idle;

        let frame = &self.frames[self.current_slot()];
        let presented = match self.backend.present(self.image_index, &frame.render_complete) {
            Ok(()) => Ok(()),
            Err(GraphicsError::SurfaceOutdated) => {
                log::debug!("GraphicsDevice: swapchain out of date on present");
                self.swapchain_dirty = true;
                Ok(())
            }
            Err(e) => {
                log::error!("GraphicsDevice: present failed: {}", e);
                Err(e)
            }
        };

        let next = self.slot_of(self.frame_counter + 1);
        self.backend.wait_fence(&self.frames[next].fence)?;
        // SAFETY: the fence of the slot reused next was just waited, so every
        // submission older than the frames in flight has completed.
        unsafe {
            self.backend.advance_frame();
        }
        presented
    }

    fn rebuild_swapchain(&mut self) -> Result<(), GraphicsError> {
        self.backend.wait_idle()?;
        self.surface_extent = self.backend.configure_surface(self.requested_extent)?;
        self.swapchain_dirty = false;
        log::info!(
            "GraphicsDevice: rebuilt swapchain at {}",
            self.surface_extent
        );
        Ok(())
    }

    // ========================================================================
    // Graphics passes
    // ========================================================================

    /// Open a graphics pass for `pipeline` on the frame's command stream.
    ///
    /// Offscreen attachments are moved into attachment layouts; an on-screen
    /// pipeline renders into the acquired swapchain image, cleared to opaque
    /// black. The pipeline is bound with a viewport covering the pass.
    ///
    /// # Panics
    ///
    /// Panics if no frame is recording, a pass is already open, or the
    /// pipeline is a compute pipeline.
    pub fn begin_pipeline(&mut self, pipeline: &Pipeline) {
        self.assert_can_open_pass("begin_pipeline");
        let Some(pass) = pipeline.render_pass() else {
            panic!(
                "GraphicsDevice: begin_pipeline called with compute pipeline '{}'",
                pipeline.shader().name()
            );
        };
        let offscreen = pipeline.is_offscreen();
        let commands = &self.frames[self.current_slot()].commands;
        let backend = self.backend.as_ref();

        let extent = if offscreen {
            for attachment in pass.color_attachments() {
                transition_texture(
                    backend,
                    commands,
                    &attachment.texture,
                    TextureLayout::ColorAttachment,
                );
                self.transitioned
                    .push((Arc::downgrade(&attachment.texture), TextureLayout::ShaderReadOnly));
            }
            if let Some(depth) = pass.depth_stencil_attachment() {
                transition_texture(
                    backend,
                    commands,
                    &depth.texture,
                    TextureLayout::DepthStencilAttachment,
                );
                self.transitioned
                    .push((Arc::downgrade(&depth.texture), TextureLayout::General));
            }
            backend.cmd_begin_rendering(
                commands,
                &RenderingInfo {
                    extent: pass.extent(),
                    target: RenderTarget::Textures {
                        color: pass
                            .color_attachments()
                            .iter()
                            .map(rendering_attachment)
                            .collect(),
                        depth: pass.depth_stencil_attachment().map(rendering_attachment),
                    },
                },
            );
            pass.extent()
        } else {
            backend.cmd_transition_surface(
                commands,
                self.image_index,
                TextureLayout::Present,
                TextureLayout::ColorAttachment,
            );
            backend.cmd_begin_rendering(
                commands,
                &RenderingInfo {
                    extent: self.surface_extent,
                    target: RenderTarget::Surface {
                        image_index: self.image_index,
                        clear_value: ClearValue::OPAQUE_BLACK,
                    },
                },
            );
            self.surface_extent
        };

        backend.cmd_bind_pipeline(commands, pipeline.gpu_handle());
        backend.cmd_set_viewport(commands, extent);
        self.active_pass = Some(ActivePass::Graphics { offscreen });
    }

    /// Close the graphics pass opened by [`begin_pipeline`](Self::begin_pipeline).
    ///
    /// Offscreen color attachments become shader-readable and depth
    /// attachments move to general access; the swapchain image returns to
    /// the present layout.
    ///
    /// # Panics
    ///
    /// Panics if no graphics pass is open.
    pub fn end_pipeline(&mut self, pipeline: &Pipeline) {
        let Some(ActivePass::Graphics { offscreen }) = self.active_pass else {
            panic!(
                "GraphicsDevice: end_pipeline for '{}' without an open graphics pass",
                pipeline.shader().name()
            );
        };
        let commands = &self.frames[self.current_slot()].commands;
        let backend = self.backend.as_ref();

        backend.cmd_end_rendering(commands);
        if offscreen {
            for (texture, layout) in self.transitioned.drain(..) {
                if let Some(texture) = texture.upgrade() {
                    transition_texture(backend, commands, &texture, layout);
                }
            }
        } else {
            backend.cmd_transition_surface(
                commands,
                self.image_index,
                TextureLayout::ColorAttachment,
                TextureLayout::Present,
            );
        }
        self.active_pass = None;
    }

    // ========================================================================
    // Compute passes
    // ========================================================================

    /// Open a compute pass on the frame's command stream. Storage textures
    /// of the pipeline's compute pass move to general access.
    ///
    /// # Panics
    ///
    /// Panics if no frame is recording, a pass is already open, or the
    /// pipeline is a graphics pipeline.
    pub fn begin_compute_pipeline(&mut self, pipeline: &Pipeline) {
        self.assert_can_open_pass("begin_compute_pipeline");
        let Some(pass) = pipeline.compute_pass() else {
            panic!(
                "GraphicsDevice: begin_compute_pipeline called with graphics pipeline '{}'",
                pipeline.shader().name()
            );
        };
        let commands = &self.frames[self.current_slot()].commands;
        let backend = self.backend.as_ref();

        for texture in pass.storage_textures() {
            transition_texture(backend, commands, &texture, TextureLayout::General);
            self.transitioned
                .push((Arc::downgrade(&texture), TextureLayout::ShaderReadOnly));
        }
        backend.cmd_bind_pipeline(commands, pipeline.gpu_handle());
        self.active_pass = Some(ActivePass::Compute);
    }

    /// Close the compute pass; storage textures become shader-readable.
    ///
    /// # Panics
    ///
    /// Panics if no compute pass is open.
    pub fn end_compute_pipeline(&mut self, pipeline: &Pipeline) {
        assert_eq!(
            self.active_pass,
            Some(ActivePass::Compute),
            "GraphicsDevice: end_compute_pipeline for '{}' without an open compute pass",
            pipeline.shader().name()
        );
        let commands = &self.frames[self.current_slot()].commands;
        for (texture, layout) in self.transitioned.drain(..) {
            if let Some(texture) = texture.upgrade() {
                transition_texture(self.backend.as_ref(), commands, &texture, layout);
            }
        }
        self.active_pass = None;
    }

    /// Start one-shot compute work on its own command stream.
    ///
    /// Independent of the frame cycle; may be called at any time.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline is a graphics pipeline.
    pub fn begin_compute_pipeline_immediate(
        &self,
        pipeline: &Pipeline,
    ) -> Result<ComputeState, GraphicsError> {
        let Some(pass) = pipeline.compute_pass() else {
            panic!(
                "GraphicsDevice: begin_compute_pipeline_immediate called with graphics pipeline '{}'",
                pipeline.shader().name()
            );
        };
        let commands = self.backend.create_command_buffer()?;
        let fence = self.backend.create_fence(false)?;
        self.backend.begin_commands(&commands)?;

        let transitioned = pass.storage_textures();
        for texture in &transitioned {
            transition_texture(
                self.backend.as_ref(),
                &commands,
                texture,
                TextureLayout::General,
            );
        }
        self.backend
            .cmd_bind_pipeline(&commands, pipeline.gpu_handle());

        Ok(ComputeState {
            commands,
            fence,
            shader: pipeline.shader().id(),
            transitioned,
        })
    }

    /// Finish one-shot compute work: storage textures become
    /// shader-readable, the stream is submitted, and this call blocks until
    /// the GPU has executed it.
    pub fn end_compute_pipeline_immediate(
        &self,
        pipeline: &Pipeline,
        state: ComputeState,
    ) -> Result<(), GraphicsError> {
        assert_eq!(
            state.shader,
            pipeline.shader().id(),
            "GraphicsDevice: immediate compute state was begun for another pipeline than '{}'",
            pipeline.shader().name()
        );
        for texture in &state.transitioned {
            transition_texture(
                self.backend.as_ref(),
                &state.commands,
                texture,
                TextureLayout::ShaderReadOnly,
            );
        }
        self.backend.end_commands(&state.commands)?;
        self.backend
            .submit(&state.commands, None, None, Some(&state.fence))?;
        self.backend.wait_fence(&state.fence)?;
        log::trace!(
            "GraphicsDevice: immediate compute '{}' completed",
            pipeline.shader().name()
        );
        Ok(())
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Draw `vertex_count` vertices from `vertex_buffer`.
    ///
    /// # Panics
    ///
    /// Panics outside a graphics pass or if the buffer isn't a vertex buffer.
    pub fn draw(&self, vertex_buffer: &Buffer, vertex_count: u32, instance_count: u32) {
        self.assert_graphics_pass("draw");
        assert_eq!(
            vertex_buffer.buffer_type(),
            BufferType::Vertex,
            "GraphicsDevice: draw from non-vertex buffer '{}'",
            vertex_buffer.name()
        );
        self.backend.cmd_draw(
            self.current_commands(),
            vertex_buffer.gpu_handle(),
            vertex_count,
            instance_count,
        );
    }

    /// Draw with 32-bit indices.
    ///
    /// # Panics
    ///
    /// Panics outside a graphics pass or if the buffers are not a vertex
    /// and an index buffer.
    pub fn draw_indexed(
        &self,
        vertex_buffer: &Buffer,
        index_buffer: &Buffer,
        index_count: u32,
        instance_count: u32,
    ) {
        self.assert_graphics_pass("draw_indexed");
        assert_eq!(
            vertex_buffer.buffer_type(),
            BufferType::Vertex,
            "GraphicsDevice: draw_indexed from non-vertex buffer '{}'",
            vertex_buffer.name()
        );
        assert_eq!(
            index_buffer.buffer_type(),
            BufferType::Index,
            "GraphicsDevice: draw_indexed with non-index buffer '{}'",
            index_buffer.name()
        );
        self.backend.cmd_draw_indexed(
            self.current_commands(),
            vertex_buffer.gpu_handle(),
            index_buffer.gpu_handle(),
            index_count,
            instance_count,
        );
    }

    /// Dispatch work groups in the open compute pass.
    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        assert_eq!(
            self.active_pass,
            Some(ActivePass::Compute),
            "GraphicsDevice: dispatch outside a compute pass"
        );
        self.backend
            .cmd_dispatch(self.current_commands(), x, y, z);
    }

    /// Dispatch work groups into a one-shot stream.
    pub fn dispatch_immediate(&self, state: &ComputeState, x: u32, y: u32, z: u32) {
        self.backend.cmd_dispatch(&state.commands, x, y, z);
    }

    /// Bind a material's table for the open pass.
    ///
    /// # Panics
    ///
    /// Panics outside a pass, if the material was never synced, or if it was
    /// built for a different shader than the pipeline's.
    pub fn bind_gpu_material(&self, material: &GpuMaterial, pipeline: &Pipeline) {
        assert!(
            self.active_pass.is_some(),
            "GraphicsDevice: bind_gpu_material outside a pass"
        );
        assert_material_matches(material, pipeline);
        self.backend.cmd_bind_descriptor_table(
            self.current_commands(),
            pipeline.gpu_handle(),
            material.table(),
        );
    }

    /// Bind a material's table into a one-shot stream.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline isn't a compute pipeline, the material was
    /// never synced, or it was built for another shader.
    pub fn bind_gpu_material_immediate(
        &self,
        state: &ComputeState,
        material: &GpuMaterial,
        pipeline: &Pipeline,
    ) {
        assert!(
            pipeline.is_compute(),
            "GraphicsDevice: immediate bind with graphics pipeline '{}'",
            pipeline.shader().name()
        );
        assert_material_matches(material, pipeline);
        self.backend.cmd_bind_descriptor_table(
            &state.commands,
            pipeline.gpu_handle(),
            material.table(),
        );
    }

    /// Upload push constants for the open pass: vertex stage for graphics
    /// pipelines, compute stage for compute pipelines.
    pub fn push_constant(&self, pipeline: &Pipeline, data: &[u8]) {
        assert!(
            self.active_pass.is_some(),
            "GraphicsDevice: push_constant outside a pass"
        );
        self.assert_push_constant_size(data);
        let stages = if pipeline.is_compute() {
            ShaderStageFlags::COMPUTE
        } else {
            ShaderStageFlags::VERTEX
        };
        self.backend.cmd_push_constants(
            self.current_commands(),
            pipeline.gpu_handle(),
            stages,
            data,
        );
    }

    /// Upload compute push constants into a one-shot stream.
    pub fn push_constant_immediate(&self, state: &ComputeState, pipeline: &Pipeline, data: &[u8]) {
        self.assert_push_constant_size(data);
        self.backend.cmd_push_constants(
            &state.commands,
            pipeline.gpu_handle(),
            ShaderStageFlags::COMPUTE,
            data,
        );
    }

    // ========================================================================
    // Resize and synchronization
    // ========================================================================

    /// Request a swapchain of `width` x `height`, rebuilt at the next
    /// [`begin_frame`](Self::begin_frame). Zero sizes are clamped to 1.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.requested_extent = Extent2d::new(width, height).clamped();
        self.swapchain_dirty = true;
        log::debug!(
            "GraphicsDevice: resize to {} requested",
            self.requested_extent
        );
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_for_idle(&self) -> Result<(), GraphicsError> {
        self.backend.wait_idle()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current frame state.
    pub fn frame_state(&self) -> FrameState {
        self.state
    }

    /// Number of frames begun so far.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Index of the slot the current frame records into.
    pub fn current_slot(&self) -> usize {
        self.slot_of(self.frame_counter)
    }

    fn slot_of(&self, frame: u64) -> usize {
        (frame % self.frames.len() as u64) as usize
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Backend limits.
    pub fn parameters(&self) -> &DeviceParameters {
        &self.parameters
    }

    /// Extent of the current swapchain.
    pub fn surface_extent(&self) -> Extent2d {
        self.surface_extent
    }

    /// Whether the swapchain will be rebuilt at the next frame.
    pub fn is_swapchain_dirty(&self) -> bool {
        self.swapchain_dirty
    }

    /// Swapchain image acquired for the current frame.
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Sampler shared by textures created without one.
    pub fn default_sampler(&self) -> &Arc<Sampler> {
        &self.default_sampler
    }

    /// The backend this device drives.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    fn current_commands(&self) -> &GpuCommandBuffer {
        &self.frames[self.current_slot()].commands
    }

    fn assert_can_open_pass(&self, operation: &str) {
        assert_eq!(
            self.state,
            FrameState::Recording,
            "GraphicsDevice: {} called while {:?}",
            operation,
            self.state
        );
        assert!(
            self.active_pass.is_none(),
            "GraphicsDevice: {} called inside a {:?} pass",
            operation,
            self.active_pass
        );
    }

    fn assert_graphics_pass(&self, operation: &str) {
        assert!(
            matches!(self.active_pass, Some(ActivePass::Graphics { .. })),
            "GraphicsDevice: {} outside a graphics pass",
            operation
        );
    }

    fn assert_push_constant_size(&self, data: &[u8]) {
        assert!(
            data.len() <= self.parameters.max_push_constant_size as usize,
            "GraphicsDevice: push constant of {} bytes exceeds {}",
            data.len(),
            self.parameters.max_push_constant_size
        );
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("GraphicsDevice: wait idle on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend.name())
            .field("frames_in_flight", &self.frames.len())
            .field("frame_counter", &self.frame_counter)
            .field("state", &self.state)
            .field("surface_extent", &self.surface_extent)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send);

/// Record a layout transition unless the texture is already in `to`.
fn transition_texture(
    backend: &dyn GpuBackend,
    commands: &GpuCommandBuffer,
    texture: &Texture,
    to: TextureLayout,
) {
    let from = texture.layout();
    if from == to {
        return;
    }
    backend.cmd_transition_texture(commands, texture.gpu_handle(), from, to);
    texture.set_layout(to);
}

fn rendering_attachment(attachment: &AttachmentDescriptor) -> RenderingAttachment<'_> {
    RenderingAttachment {
        texture: attachment.texture.gpu_handle(),
        load_op: attachment.load_op,
        store_op: attachment.store_op,
        clear_value: attachment.clear_value,
    }
}

fn assert_material_matches(material: &GpuMaterial, pipeline: &Pipeline) {
    assert!(
        material.has_synced(),
        "GraphicsDevice: material for '{}' bound before its first sync",
        material.shader().name()
    );
    assert_eq!(
        material.shader().id(),
        pipeline.shader().id(),
        "GraphicsDevice: material for '{}' bound to pipeline of '{}'",
        material.shader().name(),
        pipeline.shader().name()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::backend::dummy::RecordedCommand;
    use crate::shader::{CompiledShader, ReflectedTexture, ShaderReflection, ShaderStage};
    use crate::types::{TextureFormat, TextureUsage};
    use rstest::rstest;

    fn device_with(frames: usize) -> (Arc<DummyBackend>, GraphicsDevice) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(backend.clone(), frames, Extent2d::new(64, 64)).unwrap();
        (backend, device)
    }

    fn compute_shader(device: &GraphicsDevice) -> Arc<Shader> {
        let reflection = ShaderReflection::default()
            .with_storage_image(0, ReflectedTexture::new("output", ShaderStageFlags::COMPUTE));
        let compiled = CompiledShader::default().with_stage(ShaderStage::Compute, vec![0], reflection);
        device
            .create_shader(ShaderDescriptor::from_compiled(
                "fill",
                "shaders/fill.comp",
                ShaderType::Compute,
                compiled,
            ))
            .unwrap()
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    fn test_frame_slots_rotate(#[case] frames: usize) {
        let (_, mut device) = device_with(frames);
        for expected in 1..=(frames as u64 * 2) {
            assert!(device.begin_frame().unwrap());
            assert_eq!(device.frame_counter(), expected);
            assert_eq!(device.current_slot(), (expected % frames as u64) as usize);
            device.end_frame().unwrap();
            device.present().unwrap();
            assert_eq!(device.frame_state(), FrameState::Idle);
        }
    }

    #[test]
    fn test_zero_frames_rejected() {
        let backend = Arc::new(DummyBackend::new());
        let result = GraphicsDevice::new(backend, 0, Extent2d::new(1, 1));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    #[should_panic(expected = "end_frame called while Idle")]
    fn test_end_frame_without_begin_panics() {
        let (_, mut device) = device_with(2);
        let _ = device.end_frame();
    }

    #[test]
    fn test_resize_is_deferred_to_begin_frame() {
        let (backend, mut device) = device_with(2);
        assert_eq!(backend.surface_configure_count(), 1);

        device.on_resize(0, 300);
        assert!(device.is_swapchain_dirty());
        assert_eq!(backend.surface_configure_count(), 1);

        device.begin_frame().unwrap();
        assert_eq!(backend.surface_configure_count(), 2);
        assert_eq!(device.surface_extent(), Extent2d::new(1, 300));
        assert!(!device.is_swapchain_dirty());
    }

    #[test]
    fn test_out_of_date_present_marks_dirty() {
        let (backend, mut device) = device_with(2);
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
        backend.force_present_out_of_date();
        device.present().unwrap();
        assert!(device.is_swapchain_dirty());
    }

    #[test]
    fn test_out_of_date_acquire_rebuilds_in_same_call() {
        let (backend, mut device) = device_with(2);
        backend.force_acquire_out_of_date();
        assert!(device.begin_frame().unwrap());
        assert_eq!(device.frame_state(), FrameState::Recording);
        assert_eq!(backend.surface_configure_count(), 2);
    }

    #[test]
    fn test_persistently_out_of_date_acquire_skips_frame() {
        let (backend, mut device) = device_with(2);
        backend.force_acquire_out_of_date_times(MAX_ACQUIRE_ATTEMPTS + 1);

        assert!(!device.begin_frame().unwrap());
        assert_eq!(device.frame_state(), FrameState::Idle);
        assert_eq!(device.frame_counter(), 0);
        assert!(device.is_swapchain_dirty());

        // The next frame rebuilds and uses the slot that was skipped.
        assert!(device.begin_frame().unwrap());
        assert_eq!(device.frame_counter(), 1);
        assert_eq!(device.current_slot(), 1);
        assert!(!device.is_swapchain_dirty());
        device.end_frame().unwrap();
        device.present().unwrap();
    }

    #[test]
    fn test_failed_present_returns_to_idle() {
        let (backend, mut device) = device_with(2);
        assert!(device.begin_frame().unwrap());
        device.end_frame().unwrap();
        backend.fail_next_present(GraphicsError::SurfaceLost);

        assert_eq!(device.present(), Err(GraphicsError::SurfaceLost));
        assert_eq!(device.frame_state(), FrameState::Idle);

        assert!(device.begin_frame().unwrap());
        device.end_frame().unwrap();
        device.present().unwrap();
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn test_texture_data_size_checked() {
        let (_, device) = device_with(1);
        let descriptor = TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba8Unorm);
        let result = device.create_texture(&descriptor, None, Some(&[0u8; 3]));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));

        let texture = device
            .create_texture(&descriptor, None, Some(&[0u8; 16]))
            .unwrap();
        assert_eq!(texture.layout(), TextureLayout::ShaderReadOnly);
        assert!(Arc::ptr_eq(texture.sampler(), device.default_sampler()));
    }

    #[test]
    fn test_immediate_compute_transitions_storage_textures() {
        let (backend, device) = device_with(1);
        let shader = compute_shader(&device);
        let pass = Arc::new(crate::resources::ComputePass::new());
        let pipeline = device
            .create_pipeline(PipelineDescriptor::compute(shader.clone(), pass.clone()))
            .unwrap();
        let output = device
            .create_texture(
                &TextureDescriptor::new_2d(32, 32, TextureFormat::Rgba16Float)
                    .with_usage(TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING),
                None,
                None,
            )
            .unwrap();
        pass.set_storage_textures(vec![output.clone()]);

        let material = device.create_gpu_material(&shader).unwrap();
        material.set_texture(&output, 0, None);
        assert!(material.sync());

        let state = device.begin_compute_pipeline_immediate(&pipeline).unwrap();
        device.bind_gpu_material_immediate(&state, &material, &pipeline);
        device.dispatch_immediate(&state, 1, 1, 1);
        device.end_compute_pipeline_immediate(&pipeline, state).unwrap();

        assert_eq!(output.layout(), TextureLayout::ShaderReadOnly);
        assert_eq!(backend.texture_writes(&output), 1);
        let commands = &backend.submissions()[0].commands;
        assert!(commands.contains(&RecordedCommand::Dispatch { x: 1, y: 1, z: 1 }));
    }

    #[test]
    #[should_panic(expected = "bound before its first sync")]
    fn test_binding_unsynced_material_panics() {
        let (_, device) = device_with(1);
        let shader = compute_shader(&device);
        let pipeline = device
            .create_pipeline(PipelineDescriptor::compute(
                shader.clone(),
                Arc::new(crate::resources::ComputePass::new()),
            ))
            .unwrap();
        let material = device.create_gpu_material(&shader).unwrap();
        let state = device.begin_compute_pipeline_immediate(&pipeline).unwrap();
        device.bind_gpu_material_immediate(&state, &material, &pipeline);
    }

    #[test]
    fn test_graphics_pipeline_rejects_compute_shader() {
        let (_, device) = device_with(1);
        let shader = compute_shader(&device);
        let pass = device
            .create_render_pass(RenderPassDescriptor::new("pass", Extent2d::new(4, 4)))
            .unwrap();
        let result = device.create_pipeline(PipelineDescriptor::graphics(
            shader,
            pass,
            Default::default(),
            Default::default(),
            true,
        ));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }
}
