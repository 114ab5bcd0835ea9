//! Render and compute passes.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{AttachmentDescriptor, Extent2d, RenderPassDescriptor};

use super::Texture;

/// The attachments a graphics pipeline renders into.
///
/// Attachment textures are owned here; materials that depend on this pass
/// share the same `Arc<Texture>` instead of allocating their own.
pub struct RenderPass {
    descriptor: RenderPassDescriptor,
}

impl RenderPass {
    pub(crate) fn new(descriptor: RenderPassDescriptor) -> Self {
        Self { descriptor }
    }

    /// Get the pass descriptor.
    pub fn descriptor(&self) -> &RenderPassDescriptor {
        &self.descriptor
    }

    /// Get the debug name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Get the render area.
    pub fn extent(&self) -> Extent2d {
        self.descriptor.extent
    }

    /// Get the color attachments in order.
    pub fn color_attachments(&self) -> &[AttachmentDescriptor] {
        &self.descriptor.color_attachments
    }

    /// Get the depth/stencil attachment.
    pub fn depth_stencil_attachment(&self) -> Option<&AttachmentDescriptor> {
        self.descriptor.depth_stencil_attachment.as_ref()
    }

    /// Texture of the color attachment at `index`.
    pub fn color_texture(&self, index: usize) -> Option<&Arc<Texture>> {
        self.descriptor
            .color_attachments
            .get(index)
            .map(|a| &a.texture)
    }

    /// Texture of the depth/stencil attachment.
    pub fn depth_texture(&self) -> Option<&Arc<Texture>> {
        self.descriptor
            .depth_stencil_attachment
            .as_ref()
            .map(|a| &a.texture)
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("name", &self.descriptor.name)
            .field("extent", &self.descriptor.extent)
            .field("color_attachments", &self.descriptor.color_attachments.len())
            .field(
                "depth_stencil",
                &self.descriptor.depth_stencil_attachment.is_some(),
            )
            .finish()
    }
}

/// Input and storage textures of a compute pipeline.
///
/// Both lists start empty and are filled by the code that dispatches the
/// pipeline; storage textures are transitioned to general access for the
/// duration of a dispatch.
#[derive(Default)]
pub struct ComputePass {
    textures: RwLock<Vec<Arc<Texture>>>,
    storage_textures: RwLock<Vec<Arc<Texture>>>,
}

impl ComputePass {
    /// Create an empty compute pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the input textures.
    pub fn set_textures(&self, textures: Vec<Arc<Texture>>) {
        *self.textures.write() = textures;
    }

    /// Replace the storage textures.
    pub fn set_storage_textures(&self, textures: Vec<Arc<Texture>>) {
        *self.storage_textures.write() = textures;
    }

    /// Current input textures.
    pub fn textures(&self) -> Vec<Arc<Texture>> {
        self.textures.read().clone()
    }

    /// Current storage textures.
    pub fn storage_textures(&self) -> Vec<Arc<Texture>> {
        self.storage_textures.read().clone()
    }
}

impl std::fmt::Debug for ComputePass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePass")
            .field("textures", &self.textures.read().len())
            .field("storage_textures", &self.storage_textures.read().len())
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderPass: Send, Sync);
static_assertions::assert_impl_all!(ComputePass: Send, Sync);
