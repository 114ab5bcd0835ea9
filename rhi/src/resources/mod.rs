//! GPU resources.
//!
//! This module contains the GPU resource types that are created by [`GraphicsDevice`]:
//! - [`Buffer`] - GPU memory buffer
//! - [`Texture`] - GPU texture/image with its current layout
//! - [`Sampler`] - Texture sampler
//! - [`RenderPass`] / [`ComputePass`] - attachments and textures of a pipeline
//! - [`Pipeline`] - graphics or compute pipeline
//!
//! Resources are reference-counted with [`Arc`] and can be shared across threads.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice
//! [`Arc`]: std::sync::Arc

mod buffer;
mod pass;
mod pipeline;
mod sampler;
mod texture;

pub use buffer::Buffer;
pub use pass::{ComputePass, RenderPass};
pub use pipeline::{Pipeline, PipelineDescriptor, PipelineKind};
pub use sampler::Sampler;
pub use texture::Texture;
