//! Common types shared across the rendering backend.

/// Largest extent allowed on either axis.
pub const MAX_RESOLUTION: u32 = 65536;

/// A 2D pixel extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2d {
    /// Create a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either axis is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp both axes into `[1, MAX_RESOLUTION]`.
    ///
    /// Logs a warning when a zero axis had to be raised.
    pub fn clamped(self) -> Self {
        if self.is_empty() {
            log::warn!(
                "Extent2d: zero-sized extent {}x{} clamped to at least 1x1",
                self.width,
                self.height
            );
        }
        Self {
            width: self.width.clamp(1, MAX_RESOLUTION),
            height: self.height.clamp(1, MAX_RESOLUTION),
        }
    }

    /// Width and height narrowed for texture descriptors.
    ///
    /// `MAX_RESOLUTION` itself does not fit in `u16`, so it saturates at
    /// `u16::MAX`.
    pub fn as_texture_size(&self) -> (u16, u16) {
        let narrow = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
        (narrow(self.width), narrow(self.height))
    }
}

impl std::fmt::Display for Extent2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Clear value for an attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// Color clear value (RGBA).
    Color { r: f32, g: f32, b: f32, a: f32 },
    /// Depth and stencil clear values.
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    /// Opaque black, used for on-screen passes.
    pub const OPAQUE_BLACK: Self = Self::Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    /// Create a color clear value.
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Color { r, g, b, a }
    }

    /// Create a depth/stencil clear value.
    pub fn depth_stencil(depth: f32, stencil: u32) -> Self {
        Self::DepthStencil { depth, stencil }
    }
}

impl Default for ClearValue {
    fn default() -> Self {
        Self::Color {
            r: 0.0,
            g: 0.0,
            b: 0.0,
            a: 0.0,
        }
    }
}

/// Image layout of a texture, tracked on the CPU side.
///
/// Only the device changes the layout of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureLayout {
    /// Contents undefined, the initial layout.
    #[default]
    Undefined,
    /// Writable as a color attachment.
    ColorAttachment,
    /// Writable as a depth/stencil attachment.
    DepthStencilAttachment,
    /// Readable from shaders.
    ShaderReadOnly,
    /// General access, used for storage images.
    General,
    /// Destination of a copy.
    TransferDst,
    /// Ready for presentation.
    Present,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Extent2d::new(0, 0), Extent2d::new(1, 1))]
    #[case(Extent2d::new(0, 720), Extent2d::new(1, 720))]
    #[case(Extent2d::new(1920, 1080), Extent2d::new(1920, 1080))]
    #[case(Extent2d::new(100_000, 70_000), Extent2d::new(65536, 65536))]
    fn test_extent_clamped(#[case] input: Extent2d, #[case] expected: Extent2d) {
        assert_eq!(input.clamped(), expected);
    }

    #[test]
    fn test_texture_size_saturates() {
        assert_eq!(Extent2d::new(65536, 16).as_texture_size(), (u16::MAX, 16));
        assert_eq!(Extent2d::new(1024, 768).as_texture_size(), (1024, 768));
    }
}
