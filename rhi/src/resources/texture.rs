//! GPU texture resource.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::GpuTexture;
use crate::types::{Extent2d, TextureDescriptor, TextureFormat, TextureLayout, TextureType};

use super::Sampler;

/// A GPU texture resource.
///
/// Textures are created by [`GraphicsDevice::create_texture`] and are
/// reference-counted. Each texture shares exactly one [`Sampler`] and
/// carries its current image layout, which only the device changes.
///
/// [`GraphicsDevice::create_texture`]: crate::GraphicsDevice::create_texture
///
/// # Example
///
/// ```ignore
/// let texture = device.create_texture(
///     &TextureDescriptor::new_2d(1920, 1080, TextureFormat::Bgra8Unorm),
///     None,
///     None,
/// )?;
/// println!("Texture size: {}", texture.extent());
/// ```
pub struct Texture {
    descriptor: TextureDescriptor,
    gpu_handle: GpuTexture,
    sampler: Arc<Sampler>,
    layout: Mutex<TextureLayout>,
}

impl Texture {
    pub(crate) fn new(
        descriptor: TextureDescriptor,
        gpu_handle: GpuTexture,
        sampler: Arc<Sampler>,
        layout: TextureLayout,
    ) -> Self {
        Self {
            descriptor,
            gpu_handle,
            sampler,
            layout: Mutex::new(layout),
        }
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Get the debug name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Get the texture width.
    pub fn width(&self) -> u32 {
        u32::from(self.descriptor.width)
    }

    /// Get the texture height.
    pub fn height(&self) -> u32 {
        u32::from(self.descriptor.height)
    }

    /// Get the size of the base level.
    pub fn extent(&self) -> Extent2d {
        Extent2d::new(self.width(), self.height())
    }

    /// Get the texture format.
    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    /// Get the dimensionality.
    pub fn texture_type(&self) -> TextureType {
        self.descriptor.texture_type
    }

    /// Get the mip level count.
    pub fn mip_levels(&self) -> u32 {
        self.descriptor.mip_levels()
    }

    /// Get the array layer count.
    pub fn layers(&self) -> u32 {
        u32::from(self.descriptor.layers)
    }

    /// Get the sampler used when the texture is bound for sampling.
    pub fn sampler(&self) -> &Arc<Sampler> {
        &self.sampler
    }

    /// Get the current image layout.
    pub fn layout(&self) -> TextureLayout {
        *self.layout.lock()
    }

    pub(crate) fn set_layout(&self, layout: TextureLayout) {
        *self.layout.lock() = layout;
    }

    pub(crate) fn gpu_handle(&self) -> &GpuTexture {
        &self.gpu_handle
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.descriptor.name)
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("format", &self.descriptor.format)
            .field("layout", &self.layout())
            .finish()
    }
}

// Ensure Texture is Send + Sync
static_assertions::assert_impl_all!(Texture: Send, Sync);
