//! Plain descriptor types for GPU resources.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! consumed by the device and the material system.

mod buffer;
mod common;
mod pass;
mod pipeline;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferType, MemoryType};
pub use common::{ClearValue, Extent2d, MAX_RESOLUTION, TextureLayout};
pub use pass::{AttachmentDescriptor, LoadOp, RenderPassDescriptor, StoreOp};
pub use pipeline::{CompareOp, CullMode};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use texture::{
    CUBEMAP_FACES, TextureDescriptor, TextureFormat, TextureType, TextureUsage,
};
