//! GPU sampler resource.

use crate::backend::GpuSampler;
use crate::types::SamplerDescriptor;

/// A GPU texture sampler.
///
/// Samplers are created by [`GraphicsDevice::create_sampler`] and shared by
/// the textures that use them.
///
/// [`GraphicsDevice::create_sampler`]: crate::GraphicsDevice::create_sampler
pub struct Sampler {
    descriptor: SamplerDescriptor,
    gpu_handle: GpuSampler,
}

impl Sampler {
    pub(crate) fn new(descriptor: SamplerDescriptor, gpu_handle: GpuSampler) -> Self {
        Self {
            descriptor,
            gpu_handle,
        }
    }

    /// Get the sampler descriptor.
    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    /// Get the debug name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub(crate) fn gpu_handle(&self) -> &GpuSampler {
        &self.gpu_handle
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("name", &self.descriptor.name)
            .field("mag_filter", &self.descriptor.mag_filter)
            .field("min_filter", &self.descriptor.min_filter)
            .finish()
    }
}

// Ensure Sampler is Send + Sync
static_assertions::assert_impl_all!(Sampler: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_debug() {
        let sampler = Sampler::new(
            SamplerDescriptor::new().with_name("linear"),
            GpuSampler::Dummy,
        );
        let debug = format!("{:?}", sampler);
        assert!(debug.contains("Sampler"));
        assert!(debug.contains("Linear"));
        assert_eq!(sampler.name(), "linear");
    }
}
