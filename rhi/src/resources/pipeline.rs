//! Graphics and compute pipelines.

use std::sync::Arc;

use crate::backend::GpuPipeline;
use crate::shader::Shader;
use crate::types::{CompareOp, CullMode, Extent2d};

use super::{ComputePass, RenderPass};

/// Kind-specific part of a pipeline descriptor.
#[derive(Debug, Clone)]
pub enum PipelineKind {
    /// Rasterization into a render pass.
    Graphics {
        pass: Arc<RenderPass>,
        cull_mode: CullMode,
        depth_compare_op: CompareOp,
        /// Renders into textures rather than the swapchain image.
        offscreen: bool,
    },
    /// Compute dispatches.
    Compute { pass: Arc<ComputePass> },
}

/// Everything needed to create a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    /// The shader the pipeline runs.
    pub shader: Arc<Shader>,
    /// Graphics or compute state.
    pub kind: PipelineKind,
}

impl PipelineDescriptor {
    /// Describe a graphics pipeline.
    pub fn graphics(
        shader: Arc<Shader>,
        pass: Arc<RenderPass>,
        cull_mode: CullMode,
        depth_compare_op: CompareOp,
        offscreen: bool,
    ) -> Self {
        Self {
            shader,
            kind: PipelineKind::Graphics {
                pass,
                cull_mode,
                depth_compare_op,
                offscreen,
            },
        }
    }

    /// Describe a compute pipeline.
    pub fn compute(shader: Arc<Shader>, pass: Arc<ComputePass>) -> Self {
        Self {
            shader,
            kind: PipelineKind::Compute { pass },
        }
    }
}

/// A created pipeline.
pub struct Pipeline {
    descriptor: PipelineDescriptor,
    gpu_handle: GpuPipeline,
}

impl Pipeline {
    pub(crate) fn new(descriptor: PipelineDescriptor, gpu_handle: GpuPipeline) -> Self {
        Self {
            descriptor,
            gpu_handle,
        }
    }

    /// Get the pipeline descriptor.
    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    /// Get the shader.
    pub fn shader(&self) -> &Arc<Shader> {
        &self.descriptor.shader
    }

    /// Whether this is a compute pipeline.
    pub fn is_compute(&self) -> bool {
        matches!(self.descriptor.kind, PipelineKind::Compute { .. })
    }

    /// Whether this is a graphics pipeline rendering into textures.
    pub fn is_offscreen(&self) -> bool {
        matches!(
            self.descriptor.kind,
            PipelineKind::Graphics {
                offscreen: true,
                ..
            }
        )
    }

    /// The render pass of a graphics pipeline.
    pub fn render_pass(&self) -> Option<&Arc<RenderPass>> {
        match &self.descriptor.kind {
            PipelineKind::Graphics { pass, .. } => Some(pass),
            PipelineKind::Compute { .. } => None,
        }
    }

    /// The compute pass of a compute pipeline.
    pub fn compute_pass(&self) -> Option<&Arc<ComputePass>> {
        match &self.descriptor.kind {
            PipelineKind::Compute { pass } => Some(pass),
            PipelineKind::Graphics { .. } => None,
        }
    }

    /// Render area of a graphics pipeline.
    pub fn extent(&self) -> Option<Extent2d> {
        self.render_pass().map(|pass| pass.extent())
    }

    pub(crate) fn gpu_handle(&self) -> &GpuPipeline {
        &self.gpu_handle
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("shader", &self.descriptor.shader.name())
            .field("kind", &self.descriptor.kind)
            .finish()
    }
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync);
