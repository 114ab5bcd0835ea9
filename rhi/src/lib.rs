//! # RedLilium RHI
//!
//! Real-time rendering backend: a GPU device with frames in flight, a
//! declarative material system and a compute path for environment map
//! baking.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsDevice`] - Frame loop, resource creation and command recording
//! - [`GpuMaterial`] - Descriptor table bound to a shader's binding layout
//! - [`MaterialLoader`] - Asynchronous, single-flight material loading with
//!   shader and pipeline caches
//! - [`EnvironmentMapBaker`] - Compute passes producing IBL maps
//! - [`RenderThread`] - Queue that owns the device and serializes GPU work
//! - [`RenderContext`] - Ties the above into one per-window renderer
//! - Backends: Vulkan (`vulkan-backend`) and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_rhi::{DummyBackend, FileSystemSource, RenderConfig, RenderContext};
//!
//! let mut context = RenderContext::new(
//!     RenderConfig::default(),
//!     Arc::new(DummyBackend::new()),
//!     Arc::new(FileSystemSource::new("assets")),
//!     compiler,
//!     BufferLayoutRegistry::new(),
//! )?;
//! loop {
//!     context.update()?;
//!     // record passes...
//!     context.post_update()?;
//! }
//! ```

pub mod backend;
pub mod compute;
pub mod config;
pub mod context;
pub mod device;
pub mod environment;
pub mod error;
pub mod frame;
pub mod loader;
pub mod materials;
pub mod render_thread;
pub mod resource;
pub mod resources;
pub mod shader;
pub mod types;
pub mod worker;

// Re-export main types for convenience
#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanBackend;
pub use backend::{DummyBackend, GpuBackend, has_gpu_backend};
pub use compute::ComputeState;
pub use config::{DeviceParameters, EnvironmentConfig, RenderConfig, SystemMaterials};
pub use context::RenderContext;
pub use device::GraphicsDevice;
pub use environment::{EnvironmentMapBaker, EnvironmentMaps};
pub use error::{GraphicsError, MaterialError};
pub use frame::FrameState;
pub use loader::{
    FileSystemSource, LoadedMaterial, MaterialDefinition, MaterialLoader, MaterialResource,
    MaterialSource, MemorySource,
};
pub use materials::{GpuMaterial, Material};
pub use render_thread::{RenderHandle, RenderThread};
pub use resource::{Resource, ResourceStatus};
pub use resources::{Buffer, ComputePass, Pipeline, RenderPass, Sampler, Texture};
pub use shader::{
    BufferLayout, BufferLayoutRegistry, CompiledShader, Shader, ShaderCompiler,
    ShaderDescriptor, ShaderId, ShaderReflection, ShaderStage, ShaderType,
};
pub use types::{
    BufferDescriptor, BufferType, ClearValue, Extent2d, MemoryType, SamplerDescriptor,
    TextureDescriptor, TextureFormat, TextureType, TextureUsage,
};
pub use worker::WorkerPool;

/// RHI library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
    }

    #[test]
    fn test_gpu_backend_flag() {
        assert_eq!(has_gpu_backend(), cfg!(feature = "vulkan-backend"));
    }
}
