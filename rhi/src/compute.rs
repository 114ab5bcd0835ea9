//! One-shot compute recording.

use std::sync::Arc;

use crate::backend::{GpuCommandBuffer, GpuFence};
use crate::resources::Texture;
use crate::shader::ShaderId;

/// A short-lived command stream for compute work that must finish before
/// the caller continues.
///
/// Created by [`GraphicsDevice::begin_compute_pipeline_immediate`] and
/// consumed by [`GraphicsDevice::end_compute_pipeline_immediate`], which
/// submits it and blocks until the GPU is done.
///
/// [`GraphicsDevice::begin_compute_pipeline_immediate`]: crate::GraphicsDevice::begin_compute_pipeline_immediate
/// [`GraphicsDevice::end_compute_pipeline_immediate`]: crate::GraphicsDevice::end_compute_pipeline_immediate
#[derive(Debug)]
pub struct ComputeState {
    pub(crate) commands: GpuCommandBuffer,
    pub(crate) fence: GpuFence,
    pub(crate) shader: ShaderId,
    /// Storage textures moved to general access by this stream.
    pub(crate) transitioned: Vec<Arc<Texture>>,
}

impl ComputeState {
    /// Identity of the shader whose pipeline is bound.
    pub fn shader(&self) -> ShaderId {
        self.shader
    }
}
