//! Texture types and descriptors.

use bitflags::bitflags;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 32-bit red channel, float.
    R32Float,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit depth, float.
    Depth32Float,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth32FloatStencil8)
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth32FloatStencil8)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R32Float
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    /// Single-layer 2D texture.
    #[default]
    Texture2d,
    /// Array of 2D layers.
    Texture2dArray,
    /// Six-faced cubemap.
    Cubemap,
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// Texture can be used as a storage texture.
        const STORAGE_BINDING = 1 << 3;
        /// Texture can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::TEXTURE_BINDING | Self::COPY_DST
    }
}

/// Number of faces in a cubemap.
pub const CUBEMAP_FACES: u8 = 6;

/// Descriptor for creating a texture.
///
/// Dimensions are stored as `u16` since the renderer never allocates
/// anything larger than 65536 pixels per axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug name of the texture.
    pub name: String,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Number of array layers (6 for cubemaps).
    pub layers: u8,
    /// Whether a full mip chain is allocated.
    pub mipmapped: bool,
    /// Pixel format.
    pub format: TextureFormat,
    /// Dimensionality.
    pub texture_type: TextureType,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u16, height: u16, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            ..Default::default()
        }
    }

    /// Create a new cubemap descriptor with six layers.
    pub fn new_cubemap(size: u16, format: TextureFormat) -> Self {
        Self {
            width: size,
            height: size,
            layers: CUBEMAP_FACES,
            format,
            texture_type: TextureType::Cubemap,
            ..Default::default()
        }
    }

    /// Set the debug name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Request a full mip chain.
    pub fn with_mipmaps(mut self) -> Self {
        self.mipmapped = true;
        self
    }

    /// Set the usage flags.
    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Set the number of array layers, turning the texture into an array.
    pub fn with_layers(mut self, layers: u8) -> Self {
        self.layers = layers;
        if layers > 1 && self.texture_type == TextureType::Texture2d {
            self.texture_type = TextureType::Texture2dArray;
        }
        self
    }

    /// Number of mip levels: `floor(log2(min(w, h))) + 1` when mipmapped,
    /// otherwise 1. Never returns 0.
    pub fn mip_levels(&self) -> u32 {
        if !self.mipmapped {
            return 1;
        }
        let min_dim = u32::from(self.width.min(self.height)).max(1);
        min_dim.ilog2() + 1
    }

    /// Size of one pixel in bytes.
    pub fn pixel_size(&self) -> u32 {
        self.format.block_size()
    }

    /// Size in bytes of the base mip level across all layers.
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.width)
            * u64::from(self.height)
            * u64::from(self.layers)
            * u64::from(self.pixel_size())
    }

    /// Check the descriptor for values the device can't allocate.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "texture '{}' has zero size {}x{}",
                self.name, self.width, self.height
            ));
        }
        if self.layers == 0 {
            return Err(format!("texture '{}' has zero layers", self.name));
        }
        if self.texture_type == TextureType::Cubemap && self.layers != CUBEMAP_FACES {
            return Err(format!(
                "cubemap '{}' must have {} layers, got {}",
                self.name, CUBEMAP_FACES, self.layers
            ));
        }
        if self.texture_type == TextureType::Cubemap && self.width != self.height {
            return Err(format!("cubemap '{}' faces must be square", self.name));
        }
        Ok(())
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            width: 1,
            height: 1,
            layers: 1,
            mipmapped: false,
            format: TextureFormat::default(),
            texture_type: TextureType::default(),
            usage: TextureUsage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1024, 1024, 11)]
    #[case(32, 32, 6)]
    #[case(640, 480, 9)]
    #[case(1, 1, 1)]
    fn test_mip_levels(#[case] width: u16, #[case] height: u16, #[case] expected: u32) {
        let desc = TextureDescriptor::new_2d(width, height, TextureFormat::Rgba8Unorm).with_mipmaps();
        assert_eq!(desc.mip_levels(), expected);
    }

    #[test]
    fn test_mip_levels_without_mipmaps() {
        let desc = TextureDescriptor::new_2d(1024, 1024, TextureFormat::Rgba8Unorm);
        assert_eq!(desc.mip_levels(), 1);
    }

    #[test]
    fn test_cubemap_descriptor() {
        let desc = TextureDescriptor::new_cubemap(32, TextureFormat::Rgba16Float);
        assert_eq!(desc.layers, 6);
        assert_eq!(desc.texture_type, TextureType::Cubemap);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.size_bytes(), 32 * 32 * 6 * 8);
    }

    #[test]
    fn test_validate_rejects_bad_cubemap() {
        let mut desc = TextureDescriptor::new_cubemap(32, TextureFormat::Rgba16Float);
        desc.layers = 1;
        assert!(desc.validate().is_err());

        let desc = TextureDescriptor::new_2d(0, 16, TextureFormat::Rgba8Unorm);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_with_layers_promotes_to_array() {
        let desc = TextureDescriptor::new_2d(16, 16, TextureFormat::Rgba8Unorm).with_layers(4);
        assert_eq!(desc.texture_type, TextureType::Texture2dArray);
    }

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::Depth32FloatStencil8.is_depth_stencil());
        assert!(TextureFormat::Depth32FloatStencil8.has_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(!TextureFormat::Bgra8Unorm.is_depth_stencil());
    }
}
