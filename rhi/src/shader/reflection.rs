//! Shader reflection metadata.
//!
//! One [`ShaderReflection`] is produced per stage by the compiler and the
//! stage reflections are then merged into the reflection of the whole
//! program.

use std::collections::BTreeMap;

use super::{ShaderStage, ShaderStageFlags};

/// How a reflected buffer is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Read-only uniform block.
    Uniform,
    /// Read-write storage block.
    Storage,
}

/// A buffer bound at a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBuffer {
    /// Block name as declared in the shader.
    pub name: String,
    /// Size of the block in bytes.
    pub size: u64,
    /// Access kind.
    pub kind: BufferKind,
    /// Stages using the block.
    pub stages: ShaderStageFlags,
}

impl ReflectedBuffer {
    /// Create a uniform block visible to `stages`.
    pub fn uniform(name: impl Into<String>, size: u64, stages: ShaderStageFlags) -> Self {
        Self {
            name: name.into(),
            size,
            kind: BufferKind::Uniform,
            stages,
        }
    }

    /// Create a storage block visible to `stages`.
    pub fn storage(name: impl Into<String>, size: u64, stages: ShaderStageFlags) -> Self {
        Self {
            name: name.into(),
            size,
            kind: BufferKind::Storage,
            stages,
        }
    }
}

/// A texture bound at a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedTexture {
    /// Variable name as declared in the shader.
    pub name: String,
    /// Stages using the texture.
    pub stages: ShaderStageFlags,
}

impl ReflectedTexture {
    /// Create a texture entry.
    pub fn new(name: impl Into<String>, stages: ShaderStageFlags) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }
}

/// The push-constant block of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantBlock {
    /// Size in bytes.
    pub size: u32,
    /// Stages using the block.
    pub stages: ShaderStageFlags,
}

/// One vertex input attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Input location.
    pub location: u32,
    /// Number of 32-bit float components (1 to 4).
    pub components: u32,
}

impl VertexAttribute {
    /// Size of the attribute in bytes.
    pub fn size(&self) -> u32 {
        self.components * 4
    }
}

/// Ordered vertex input attributes of the vertex stage.
///
/// All attributes are interleaved in a single buffer binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexInputLayout {
    /// Attributes in location order.
    pub attributes: Vec<VertexAttribute>,
}

impl VertexInputLayout {
    /// Create a layout from component counts, assigning consecutive locations.
    pub fn from_components(components: &[u32]) -> Self {
        let attributes = components
            .iter()
            .zip(0u32..)
            .map(|(&components, location)| VertexAttribute {
                location,
                components,
            })
            .collect();
        Self { attributes }
    }

    /// Whether the stage takes no vertex input.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Distance in bytes between consecutive vertices.
    pub fn stride(&self) -> u32 {
        self.attributes.iter().map(VertexAttribute::size).sum()
    }

    /// Byte offset of each attribute within a vertex.
    pub fn offsets(&self) -> Vec<u32> {
        self.attributes
            .iter()
            .scan(0, |offset, attribute| {
                let current = *offset;
                *offset += attribute.size();
                Some(current)
            })
            .collect()
    }
}

/// Binding interface of a shader stage or of a whole program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Uniform and storage blocks by slot.
    pub buffers: BTreeMap<u32, ReflectedBuffer>,
    /// Sampled textures by slot.
    pub textures: BTreeMap<u32, ReflectedTexture>,
    /// Storage images by slot (compute only).
    pub storage_images: BTreeMap<u32, ReflectedTexture>,
    /// Push-constant block, if any.
    pub push_constant: Option<PushConstantBlock>,
    /// Vertex input layout (vertex stage only).
    pub vertex_input: VertexInputLayout,
    /// Number of color outputs of the fragment stage.
    pub output_count: u32,
}

impl ShaderReflection {
    /// Add a buffer at `slot`.
    pub fn with_buffer(mut self, slot: u32, buffer: ReflectedBuffer) -> Self {
        self.buffers.insert(slot, buffer);
        self
    }

    /// Add a sampled texture at `slot`.
    pub fn with_texture(mut self, slot: u32, texture: ReflectedTexture) -> Self {
        self.textures.insert(slot, texture);
        self
    }

    /// Add a storage image at `slot`.
    pub fn with_storage_image(mut self, slot: u32, texture: ReflectedTexture) -> Self {
        self.storage_images.insert(slot, texture);
        self
    }

    /// Set the push-constant block.
    pub fn with_push_constant(mut self, size: u32, stages: ShaderStageFlags) -> Self {
        self.push_constant = Some(PushConstantBlock { size, stages });
        self
    }

    /// Set the vertex input layout.
    pub fn with_vertex_input(mut self, layout: VertexInputLayout) -> Self {
        self.vertex_input = layout;
        self
    }

    /// Set the number of fragment outputs.
    pub fn with_output_count(mut self, count: u32) -> Self {
        self.output_count = count;
        self
    }

    /// Storage blocks by slot.
    pub fn storage_buffers(&self) -> impl Iterator<Item = (u32, &ReflectedBuffer)> {
        self.buffers
            .iter()
            .filter(|(_, b)| b.kind == BufferKind::Storage)
            .map(|(&slot, b)| (slot, b))
    }

    /// Uniform blocks by slot.
    pub fn uniform_buffers(&self) -> impl Iterator<Item = (u32, &ReflectedBuffer)> {
        self.buffers
            .iter()
            .filter(|(_, b)| b.kind == BufferKind::Uniform)
            .map(|(&slot, b)| (slot, b))
    }

    /// Whether `slot` is a storage image.
    pub fn is_storage_image(&self, slot: u32) -> bool {
        self.storage_images.contains_key(&slot)
    }

    /// Whether `slot` is a sampled texture.
    pub fn is_sampled_texture(&self, slot: u32) -> bool {
        self.textures.contains_key(&slot)
    }

    /// Merge the reflection of one stage into this program reflection.
    ///
    /// A block or texture used by several stages merges its stage flags.
    ///
    /// # Panics
    ///
    /// Panics if a slot is already claimed by a different buffer or a
    /// different texture, or if two stages declare a vertex input layout.
    pub fn merge(&mut self, stage: ShaderStage, other: ShaderReflection, path: &str) {
        for (slot, buffer) in other.buffers {
            assert!(
                !self.textures.contains_key(&slot) && !self.storage_images.contains_key(&slot),
                "Shader '{path}': slot {slot} is claimed by buffer '{}' and a texture",
                buffer.name
            );
            match self.buffers.get_mut(&slot) {
                Some(existing) => {
                    assert!(
                        existing.name == buffer.name
                            && existing.size == buffer.size
                            && existing.kind == buffer.kind,
                        "Shader '{path}': slot {slot} has assigned buffer '{}' already, can't bind '{}'",
                        existing.name,
                        buffer.name
                    );
                    existing.stages |= buffer.stages;
                }
                None => {
                    self.buffers.insert(slot, buffer);
                }
            }
        }

        for (storage, textures) in [(false, other.textures), (true, other.storage_images)] {
            for (slot, texture) in textures {
                assert!(
                    !self.buffers.contains_key(&slot),
                    "Shader '{path}': slot {slot} is claimed by texture '{}' and a buffer",
                    texture.name
                );
                let (own, foreign) = if storage {
                    (&mut self.storage_images, &self.textures)
                } else {
                    (&mut self.textures, &self.storage_images)
                };
                assert!(
                    !foreign.contains_key(&slot),
                    "Shader '{path}': slot {slot} is both sampled and a storage image"
                );
                match own.get_mut(&slot) {
                    Some(existing) => {
                        assert!(
                            existing.name == texture.name,
                            "Shader '{path}': slot {slot} has assigned texture '{}' already, can't bind '{}'",
                            existing.name,
                            texture.name
                        );
                        existing.stages |= texture.stages;
                    }
                    None => {
                        own.insert(slot, texture);
                    }
                }
            }
        }

        if !other.vertex_input.is_empty() {
            assert!(
                self.vertex_input.is_empty(),
                "Shader '{path}': input layout was already registered"
            );
            self.vertex_input = other.vertex_input;
        }

        match stage {
            ShaderStage::Vertex | ShaderStage::Compute => {
                if other.push_constant.is_some() {
                    self.push_constant = other.push_constant;
                }
            }
            ShaderStage::Fragment => self.output_count = other.output_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_stage() -> ShaderReflection {
        ShaderReflection::default()
            .with_buffer(
                0,
                ReflectedBuffer::uniform("Camera", 128, ShaderStageFlags::VERTEX),
            )
            .with_vertex_input(VertexInputLayout::from_components(&[3, 2]))
            .with_push_constant(64, ShaderStageFlags::VERTEX)
    }

    fn fragment_stage() -> ShaderReflection {
        ShaderReflection::default()
            .with_buffer(
                0,
                ReflectedBuffer::uniform("Camera", 128, ShaderStageFlags::FRAGMENT),
            )
            .with_texture(1, ReflectedTexture::new("albedo", ShaderStageFlags::FRAGMENT))
            .with_output_count(2)
    }

    #[test]
    fn test_vertex_layout_stride_and_offsets() {
        let layout = VertexInputLayout::from_components(&[3, 2, 4]);
        assert_eq!(layout.stride(), 36);
        assert_eq!(layout.offsets(), vec![0, 12, 20]);
    }

    #[test]
    fn test_merge_shared_buffer_merges_stages() {
        let mut merged = ShaderReflection::default();
        merged.merge(ShaderStage::Vertex, vertex_stage(), "pbr.glsl");
        merged.merge(ShaderStage::Fragment, fragment_stage(), "pbr.glsl");

        assert_eq!(merged.buffers.len(), 1);
        assert_eq!(merged.buffers[&0].stages, ShaderStageFlags::VERTEX_FRAGMENT);
        assert!(merged.is_sampled_texture(1));
        assert_eq!(merged.vertex_input.stride(), 20);
        assert_eq!(merged.output_count, 2);
        assert_eq!(merged.push_constant.map(|p| p.size), Some(64));
    }

    #[test]
    #[should_panic(expected = "has assigned buffer 'Camera' already")]
    fn test_merge_conflicting_buffers_panics() {
        let mut merged = ShaderReflection::default();
        merged.merge(ShaderStage::Vertex, vertex_stage(), "pbr.glsl");
        let conflicting = ShaderReflection::default().with_buffer(
            0,
            ReflectedBuffer::uniform("Lights", 256, ShaderStageFlags::FRAGMENT),
        );
        merged.merge(ShaderStage::Fragment, conflicting, "pbr.glsl");
    }

    #[test]
    #[should_panic(expected = "has assigned texture 'albedo' already")]
    fn test_merge_conflicting_textures_panics() {
        let mut merged = ShaderReflection::default();
        merged.merge(ShaderStage::Fragment, fragment_stage(), "pbr.glsl");
        let conflicting = ShaderReflection::default()
            .with_texture(1, ReflectedTexture::new("normal", ShaderStageFlags::VERTEX));
        merged.merge(ShaderStage::Vertex, conflicting, "pbr.glsl");
    }

    #[test]
    fn test_storage_buffer_filter() {
        let reflection = ShaderReflection::default()
            .with_buffer(
                0,
                ReflectedBuffer::uniform("Params", 16, ShaderStageFlags::COMPUTE),
            )
            .with_buffer(
                1,
                ReflectedBuffer::storage("Particles", 4096, ShaderStageFlags::COMPUTE),
            );
        let storage: Vec<_> = reflection.storage_buffers().map(|(slot, _)| slot).collect();
        assert_eq!(storage, vec![1]);
        assert_eq!(reflection.uniform_buffers().count(), 1);
    }
}
