//! Render pass descriptors.

use std::sync::Arc;

use serde::Deserialize;

use crate::resources::Texture;
use crate::types::{ClearValue, Extent2d, TextureFormat};

/// Operation to perform when loading an attachment at the start of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadOp {
    /// Existing contents are not needed.
    #[default]
    Undefined,
    /// Keep the existing contents.
    Load,
    /// Clear with the attachment's clear value.
    Clear,
}

/// Operation to perform when storing an attachment at the end of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreOp {
    /// Contents may be discarded.
    #[default]
    Undefined,
    /// Keep the rendered contents.
    Store,
}

/// A single color or depth/stencil attachment of a render pass.
#[derive(Debug, Clone)]
pub struct AttachmentDescriptor {
    /// The texture rendered into.
    pub texture: Arc<Texture>,
    /// Load operation.
    pub load_op: LoadOp,
    /// Store operation.
    pub store_op: StoreOp,
    /// Value used when `load_op` is [`LoadOp::Clear`].
    pub clear_value: ClearValue,
}

impl AttachmentDescriptor {
    /// Create an attachment that keeps its contents.
    pub fn new(texture: Arc<Texture>) -> Self {
        let clear_value = if texture.format().is_depth_stencil() {
            ClearValue::depth_stencil(1.0, 0)
        } else {
            ClearValue::default()
        };
        Self {
            texture,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear_value,
        }
    }

    /// Set the load and store operations.
    pub fn with_ops(mut self, load_op: LoadOp, store_op: StoreOp) -> Self {
        self.load_op = load_op;
        self.store_op = store_op;
        self
    }

    /// Set the clear value.
    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = clear_value;
        self
    }
}

/// Descriptor for a render pass: the set of attachments a graphics
/// pipeline renders into, and the pixel extent of the render area.
#[derive(Debug, Clone, Default)]
pub struct RenderPassDescriptor {
    /// Debug name.
    pub name: String,
    /// Render area.
    pub extent: Extent2d,
    /// Ordered color attachments.
    pub color_attachments: Vec<AttachmentDescriptor>,
    /// Optional depth/stencil attachment.
    pub depth_stencil_attachment: Option<AttachmentDescriptor>,
}

impl RenderPassDescriptor {
    /// Create an empty pass descriptor.
    pub fn new(name: impl Into<String>, extent: Extent2d) -> Self {
        Self {
            name: name.into(),
            extent,
            ..Default::default()
        }
    }

    /// Add a color attachment.
    pub fn with_color_attachment(mut self, attachment: AttachmentDescriptor) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    /// Set the depth/stencil attachment.
    pub fn with_depth_stencil_attachment(mut self, attachment: AttachmentDescriptor) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }

    /// Formats of the color attachments, in order.
    pub fn color_formats(&self) -> Vec<TextureFormat> {
        self.color_attachments
            .iter()
            .map(|a| a.texture.format())
            .collect()
    }

    /// Format of the depth/stencil attachment, if any.
    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.depth_stencil_attachment
            .as_ref()
            .map(|a| a.texture.format())
    }
}
